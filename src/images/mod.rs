//! Image manager
//!
//! Pull-on-demand with per-image single-flight: N concurrent pulls of the
//! same image collapse to one engine call whose terminal status is delivered
//! to every caller and cached until explicit invalidation. The set of images
//! a deployment uses is bounded, so the cache needs no eviction.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::engine::{ContainerEngine, DiskUsage, EngineError, PruneReport};

/// Cache state of one image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageState {
    Available,
    Pulling,
    NotFound,
    Error,
}

/// Status record for one image
#[derive(Debug, Clone, Serialize)]
pub struct ImageStatus {
    pub image: String,
    pub status: ImageState,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_mb: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImageStatus {
    fn bare(image: &str, status: ImageState) -> Self {
        Self {
            image: image.to_string(),
            status,
            size_mb: None,
            created: None,
            id: None,
            error: None,
        }
    }
}

fn size_mb(bytes: i64) -> f64 {
    (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
}

/// Manages image pre-pulling and caching
#[derive(Clone)]
pub struct ImageManager {
    engine: Arc<dyn ContainerEngine>,
    pulls: Arc<Mutex<HashMap<String, Arc<OnceCell<ImageStatus>>>>>,
}

impl ImageManager {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self {
            engine,
            pulls: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Check whether an image is available locally or mid-pull
    pub async fn status(&self, image: &str) -> ImageStatus {
        match self.engine.image_status(image).await {
            Ok(Some(details)) => ImageStatus {
                image: image.to_string(),
                status: ImageState::Available,
                size_mb: Some(size_mb(details.size_bytes)),
                created: details.created,
                id: Some(details.id),
                error: None,
            },
            Ok(None) => {
                let in_flight = {
                    let pulls = self.pulls.lock();
                    pulls
                        .get(image)
                        .map(|cell| cell.get().cloned())
                };

                match in_flight {
                    // Entry exists but the pull has not finished
                    Some(None) => ImageStatus::bare(image, ImageState::Pulling),
                    Some(Some(status)) => status,
                    None => ImageStatus::bare(image, ImageState::NotFound),
                }
            }
            Err(e) => {
                let mut status = ImageStatus::bare(image, ImageState::Error);
                status.error = Some(e.to_string());
                status
            }
        }
    }

    /// List all locally cached (tagged) images
    pub async fn list_cached(&self) -> Vec<ImageStatus> {
        match self.engine.list_images().await {
            Ok(images) => images
                .into_iter()
                .map(|details| ImageStatus {
                    image: details.image,
                    status: ImageState::Available,
                    size_mb: Some(size_mb(details.size_bytes)),
                    created: details.created,
                    id: Some(details.id),
                    error: None,
                })
                .collect(),
            Err(e) => {
                warn!("Image listing failed | error={}", e);
                Vec::new()
            }
        }
    }

    /// Pull an image, collapsing concurrent callers onto one engine call.
    ///
    /// Terminal successes stay cached; failures are dropped from the map so a
    /// later pull can retry.
    pub async fn pull(&self, image: &str) -> ImageStatus {
        let cell = {
            let mut pulls = self.pulls.lock();
            pulls
                .entry(image.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let status = cell
            .get_or_init(|| async { self.do_pull(image).await })
            .await
            .clone();

        if status.status != ImageState::Available {
            self.pulls.lock().remove(image);
        }

        status
    }

    async fn do_pull(&self, image: &str) -> ImageStatus {
        info!("Pulling image | image={}", image);

        match self.engine.pull_image(image).await {
            Ok(()) => {
                info!("Image pulled | image={}", image);
                self.status(image).await
            }
            Err(EngineError::ImageNotFound(_)) => {
                warn!("Image not found in registry | image={}", image);
                let mut status = ImageStatus::bare(image, ImageState::NotFound);
                status.error = Some(format!("Image {} not found in registry", image));
                status
            }
            Err(e) => {
                warn!("Image pull failed | image={} | error={}", image, e);
                let mut status = ImageStatus::bare(image, ImageState::Error);
                status.error = Some(e.to_string());
                status
            }
        }
    }

    /// Pre-pull images in the background
    pub fn warmup(&self, images: &[String]) -> Vec<ImageStatus> {
        let mut statuses = Vec::new();

        for image in images {
            let manager = self.clone();
            let image = image.clone();
            statuses.push(ImageStatus::bare(&image, ImageState::Pulling));

            tokio::spawn(async move {
                manager.pull(&image).await;
            });
        }

        statuses
    }

    /// Remove a cached image and invalidate the single-flight entry
    pub async fn remove(&self, image: &str, force: bool) -> ImageStatus {
        self.pulls.lock().remove(image);

        match self.engine.remove_image(image, force).await {
            Ok(()) => ImageStatus::bare(image, ImageState::NotFound),
            Err(EngineError::ImageNotFound(_)) => ImageStatus::bare(image, ImageState::NotFound),
            Err(e) => {
                let mut status = ImageStatus::bare(image, ImageState::Error);
                status.error = Some(e.to_string());
                status
            }
        }
    }

    pub async fn disk_usage(&self) -> Result<DiskUsage, EngineError> {
        self.engine.disk_usage().await
    }

    pub async fn prune(&self) -> Result<PruneReport, EngineError> {
        self.engine.prune().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::FakeEngine;
    use std::time::Duration;

    const IMAGE: &str = "ubuntu:22.04";

    #[tokio::test]
    async fn test_concurrent_pulls_are_single_flight() {
        let engine = Arc::new(FakeEngine::new());
        engine.add_registry_image(IMAGE);
        engine.set_pull_delay(Duration::from_millis(20));

        let manager = ImageManager::new(engine.clone() as Arc<dyn ContainerEngine>);

        let (a, b, c) = tokio::join!(
            manager.pull(IMAGE),
            manager.pull(IMAGE),
            manager.pull(IMAGE)
        );

        assert_eq!(engine.pull_count(), 1);
        for status in [a, b, c] {
            assert_eq!(status.status, ImageState::Available);
        }
    }

    #[tokio::test]
    async fn test_completed_pull_is_cached() {
        let engine = Arc::new(FakeEngine::new());
        engine.add_registry_image(IMAGE);

        let manager = ImageManager::new(engine.clone() as Arc<dyn ContainerEngine>);

        manager.pull(IMAGE).await;
        manager.pull(IMAGE).await;

        assert_eq!(engine.pull_count(), 1);
        assert_eq!(manager.status(IMAGE).await.status, ImageState::Available);
    }

    #[tokio::test]
    async fn test_failed_pull_can_retry() {
        let engine = Arc::new(FakeEngine::new());
        let manager = ImageManager::new(engine.clone() as Arc<dyn ContainerEngine>);

        let status = manager.pull(IMAGE).await;
        assert_eq!(status.status, ImageState::NotFound);

        // The image appears in the registry later; a fresh pull must succeed
        engine.add_registry_image(IMAGE);
        let status = manager.pull(IMAGE).await;
        assert_eq!(status.status, ImageState::Available);
        assert_eq!(engine.pull_count(), 1);
    }

    #[tokio::test]
    async fn test_remove_invalidates_cache() {
        let engine = Arc::new(FakeEngine::new());
        engine.add_registry_image(IMAGE);

        let manager = ImageManager::new(engine.clone() as Arc<dyn ContainerEngine>);

        manager.pull(IMAGE).await;
        manager.remove(IMAGE, false).await;

        assert_eq!(manager.status(IMAGE).await.status, ImageState::NotFound);

        manager.pull(IMAGE).await;
        assert_eq!(engine.pull_count(), 2);
    }

    #[tokio::test]
    async fn test_warmup_pulls_in_background() {
        let engine = Arc::new(FakeEngine::new());
        engine.add_registry_image(IMAGE);

        let manager = ImageManager::new(engine.clone() as Arc<dyn ContainerEngine>);

        let statuses = manager.warmup(&[IMAGE.to_string()]);
        assert_eq!(statuses[0].status, ImageState::Pulling);

        for _ in 0..50 {
            if manager.status(IMAGE).await.status == ImageState::Available {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("warmup never completed");
    }
}
