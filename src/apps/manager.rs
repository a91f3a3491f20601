//! App container lifecycle and reconciliation

use std::collections::BTreeMap;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::database::{
    AppContainerRow, AppContainerStatus, AppContainerStore, Cookie, Database, Enrollment,
    EnrollmentStore, Track, TrackStore,
};
use crate::engine::{
    ContainerEngine, ContainerSpec, ContainerState, EngineError, ResourceLimits, RestartPolicyKind,
};
use crate::error::{DaemonError, Result};

use super::url::{auto_login_cookies, build_app_url, first_host_port};

const CONTAINER_PREFIX: &str = "livelabs-app-";
const MAX_RESTARTS: i64 = 3;
const STOP_GRACE_SECS: i64 = 10;

/// Status report for the learner-facing UI
#[derive(Debug, Clone, Serialize)]
pub struct AppStatus {
    pub status: String,
    pub has_app: bool,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ports: Option<BTreeMap<String, u16>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookies: Option<Vec<Cookie>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_start: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_restart: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_count: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AppStatus {
    pub fn bare(status: &str, has_app: bool) -> Self {
        Self {
            status: status.to_string(),
            has_app,
            kind: None,
            url: None,
            ports: None,
            cookies: None,
            can_start: None,
            can_restart: None,
            restart_count: None,
            started_at: None,
            error: None,
        }
    }

    fn stopped_container() -> Self {
        let mut status = Self::bare("stopped", true);
        status.kind = Some("container".to_string());
        status.can_start = Some(true);
        status
    }
}

/// Manages background containers for lab apps
pub struct AppContainerManager {
    engine: Arc<dyn ContainerEngine>,
    db: Arc<Database>,
    health_timeout: Duration,
    health_interval: Duration,
}

impl AppContainerManager {
    pub fn new(engine: Arc<dyn ContainerEngine>, db: Arc<Database>) -> Self {
        Self {
            engine,
            db,
            health_timeout: Duration::from_secs(30),
            health_interval: Duration::from_millis(500),
        }
    }

    #[cfg(test)]
    pub fn with_health_timing(mut self, timeout: Duration, interval: Duration) -> Self {
        self.health_timeout = timeout;
        self.health_interval = interval;
        self
    }

    fn container_name(enrollment_id: i64) -> String {
        format!("{}{}", CONTAINER_PREFIX, enrollment_id)
    }

    /// Ask the kernel for a free TCP port.
    ///
    /// The socket is released immediately; the window until the engine binds
    /// it is accepted and surfaces as a health failure at worst.
    fn find_free_port() -> Result<u16> {
        let listener = TcpListener::bind(("0.0.0.0", 0))
            .map_err(|e| DaemonError::Internal(format!("Port allocation failed: {}", e)))?;
        let port = listener
            .local_addr()
            .map_err(|e| DaemonError::Internal(format!("Port allocation failed: {}", e)))?
            .port();

        Ok(port)
    }

    async fn load_enrollment_and_track(&self, enrollment_id: i64) -> Result<(Enrollment, Track)> {
        let conn = self.db.conn().await;

        let enrollment = EnrollmentStore
            .get(&conn, enrollment_id)?
            .ok_or_else(|| DaemonError::NotFound("Enrollment not found".to_string()))?;

        let track = TrackStore
            .get(&conn, enrollment.track_id)?
            .ok_or_else(|| DaemonError::NotFound("Track not found".to_string()))?;

        Ok((enrollment, track))
    }

    /// Start the app container for an enrollment.
    ///
    /// Returns `None` when the track has no app container configured. An
    /// existing row routes through reconciliation instead of a second create.
    pub async fn start(&self, enrollment_id: i64) -> Result<Option<AppContainerRow>> {
        let (enrollment, track) = self.load_enrollment_and_track(enrollment_id).await?;

        let image = match &track.app_container_image {
            Some(image) => image.clone(),
            None => return Ok(None),
        };

        let existing = {
            let conn = self.db.conn().await;
            AppContainerStore.get(&conn, enrollment_id)?
        };

        if existing.is_some() {
            return self.ensure_running(enrollment_id).await.map(Some);
        }

        // Allocate host ports; null host means a kernel-assigned ephemeral one
        let mut engine_ports = std::collections::HashMap::new();
        let mut port_map = BTreeMap::new();

        for mapping in &track.app_container_ports {
            let host = match mapping.host {
                Some(host) => host,
                None => Self::find_free_port()?,
            };
            engine_ports.insert(mapping.container, host);
            port_map.insert(mapping.container.to_string(), host);
        }

        // Later entries override earlier ones
        let mut env = track.env_secrets.clone();
        env.extend(track.app_container_env.clone());
        env.extend(enrollment.environment.clone());

        let name = Self::container_name(enrollment_id);

        // Stale recovery: a container with our name may survive an
        // orchestrator crash
        match self.engine.remove_container(&name, true).await {
            Ok(()) => debug!("Removed stale container | name={}", name),
            Err(EngineError::ContainerNotFound(_)) => {}
            Err(e) => warn!("Stale container removal failed | name={} | error={}", name, e),
        }

        let mut spec = ContainerSpec::new(image);
        spec.name = Some(name.clone());
        spec.command = track.app_container_command.clone();
        spec.env = env;
        spec.ports = engine_ports;
        spec.limits = ResourceLimits::app();
        spec.restart = RestartPolicyKind::OnFailure {
            max_retries: MAX_RESTARTS,
        };

        let container_id = match self.engine.create_container(&spec).await {
            Ok(id) => id,
            Err(EngineError::ContainerExists(_)) => {
                // Lost a concurrent create; adopt the winner's container
                info!("Create raced, adopting existing container | name={}", name);
                let details = self.engine.inspect_container(&name).await?;

                let row = AppContainerRow {
                    enrollment_id,
                    container_id: details.id,
                    status: AppContainerStatus::Starting,
                    ports: details
                        .ports
                        .iter()
                        .map(|(c, h)| (c.to_string(), *h))
                        .collect(),
                    started_at: Some(chrono::Utc::now().timestamp()),
                    last_health_check: None,
                    restart_count: 0,
                };

                let conn = self.db.conn().await;
                AppContainerStore.save(&conn, &row)?;
                drop(conn);

                return self.ensure_running(enrollment_id).await.map(Some);
            }
            Err(e) => return Err(e.into()),
        };

        self.engine.start_container(&container_id).await?;

        info!(
            "App container started | enrollment_id={} | container_id={} | ports={:?}",
            enrollment_id, container_id, port_map
        );

        let row = AppContainerRow {
            enrollment_id,
            container_id,
            status: AppContainerStatus::Starting,
            ports: port_map.clone(),
            started_at: Some(chrono::Utc::now().timestamp()),
            last_health_check: None,
            restart_count: 0,
        };

        {
            let conn = self.db.conn().await;
            AppContainerStore.save(&conn, &row)?;
        }

        self.wait_for_health(enrollment_id, &track, &port_map).await?;

        let conn = self.db.conn().await;
        Ok(AppContainerStore.get(&conn, enrollment_id)?)
    }

    fn start_boxed(&self, enrollment_id: i64) -> BoxFuture<'_, Result<Option<AppContainerRow>>> {
        Box::pin(self.start(enrollment_id))
    }

    /// Reconcile the row against the engine's actual container state
    pub async fn ensure_running(&self, enrollment_id: i64) -> Result<AppContainerRow> {
        let row = {
            let conn = self.db.conn().await;
            AppContainerStore.get(&conn, enrollment_id)?
        };

        let row = match row {
            Some(row) => row,
            None => {
                return self
                    .start_boxed(enrollment_id)
                    .await?
                    .ok_or_else(|| {
                        DaemonError::BadRequest(
                            "This track does not have an app container configured".to_string(),
                        )
                    })
            }
        };

        match self.engine.inspect_container(&row.container_id).await {
            Ok(details) => match details.state {
                ContainerState::Running => {
                    let conn = self.db.conn().await;
                    AppContainerStore.touch_health(
                        &conn,
                        enrollment_id,
                        AppContainerStatus::Running,
                    )?;
                    Ok(AppContainerStore.get(&conn, enrollment_id)?.unwrap_or(row))
                }
                ContainerState::Exited | ContainerState::Dead => {
                    if let Err(e) = self.engine.start_container(&row.container_id).await {
                        let conn = self.db.conn().await;
                        AppContainerStore.set_status(
                            &conn,
                            enrollment_id,
                            AppContainerStatus::Failed,
                        )?;
                        return Err(e.into());
                    }

                    info!(
                        "Restarted exited app container | enrollment_id={} | container_id={}",
                        enrollment_id, row.container_id
                    );

                    let conn = self.db.conn().await;
                    AppContainerStore.increment_restart(&conn, enrollment_id)?;
                    Ok(AppContainerStore.get(&conn, enrollment_id)?.unwrap_or(row))
                }
                _ => Ok(row),
            },
            Err(EngineError::ContainerNotFound(_)) => {
                // The handle is gone; drop the row and start from scratch
                info!(
                    "App container vanished, recreating | enrollment_id={} | container_id={}",
                    enrollment_id, row.container_id
                );

                {
                    let conn = self.db.conn().await;
                    AppContainerStore.delete(&conn, enrollment_id)?;
                }

                self.start_boxed(enrollment_id).await?.ok_or_else(|| {
                    DaemonError::Internal("App container recreation yielded nothing".to_string())
                })
            }
            Err(e) => {
                let conn = self.db.conn().await;
                AppContainerStore.set_status(&conn, enrollment_id, AppContainerStatus::Failed)?;
                Err(e.into())
            }
        }
    }

    /// Restart the app container, recreating it once the restart cap is hit
    pub async fn restart(&self, enrollment_id: i64) -> Result<Option<AppContainerRow>> {
        let row = {
            let conn = self.db.conn().await;
            AppContainerStore.get(&conn, enrollment_id)?
        };

        let row = match row {
            Some(row) => row,
            None => return self.start_boxed(enrollment_id).await,
        };

        if row.restart_count >= MAX_RESTARTS {
            info!(
                "Restart cap reached, recreating | enrollment_id={} | restart_count={}",
                enrollment_id, row.restart_count
            );
            self.stop(enrollment_id).await?;
            return self.start_boxed(enrollment_id).await;
        }

        match self
            .engine
            .restart_container(&row.container_id, STOP_GRACE_SECS)
            .await
        {
            Ok(()) => {
                let conn = self.db.conn().await;
                AppContainerStore.increment_restart(&conn, enrollment_id)?;
                Ok(AppContainerStore.get(&conn, enrollment_id)?)
            }
            Err(EngineError::ContainerNotFound(_)) => {
                {
                    let conn = self.db.conn().await;
                    AppContainerStore.delete(&conn, enrollment_id)?;
                }
                self.start_boxed(enrollment_id).await
            }
            Err(e) => {
                {
                    let conn = self.db.conn().await;
                    AppContainerStore.set_status(&conn, enrollment_id, AppContainerStatus::Failed)?;
                }
                Err(DaemonError::Internal(format!("Failed to restart: {}", e)))
            }
        }
    }

    /// Stop and remove the app container. Idempotent; a missing engine
    /// handle is a success.
    pub async fn stop(&self, enrollment_id: i64) -> Result<()> {
        let row = {
            let conn = self.db.conn().await;
            AppContainerStore.get(&conn, enrollment_id)?
        };

        let row = match row {
            Some(row) => row,
            None => return Ok(()),
        };

        if let Err(e) = self
            .engine
            .stop_container(&row.container_id, STOP_GRACE_SECS)
            .await
        {
            debug!(
                "Stop failed (continuing to remove) | container_id={} | error={}",
                row.container_id, e
            );
        }

        if let Err(e) = self.engine.remove_container(&row.container_id, true).await {
            debug!(
                "Remove failed during stop | container_id={} | error={}",
                row.container_id, e
            );
        }

        let conn = self.db.conn().await;
        AppContainerStore.delete(&conn, enrollment_id)?;

        info!("App container stopped | enrollment_id={}", enrollment_id);
        Ok(())
    }

    /// Container-backed status report, reconciled against the engine
    pub async fn status(&self, enrollment_id: i64) -> Result<AppStatus> {
        let (_, track) = self.load_enrollment_and_track(enrollment_id).await?;

        if track.app_container_image.is_none() && track.app_url_template.is_none() {
            return Ok(AppStatus::bare("no_app", false));
        }

        // External URL only, no container involved
        if track.app_container_image.is_none() {
            let mut status = AppStatus::bare("external", true);
            status.kind = Some("external".to_string());
            status.url = build_app_url(&track, None);
            status.cookies = Some(auto_login_cookies(&track));
            return Ok(status);
        }

        let row = {
            let conn = self.db.conn().await;
            AppContainerStore.get(&conn, enrollment_id)?
        };

        let mut row = match row {
            Some(row) => row,
            None => return Ok(AppStatus::stopped_container()),
        };

        // Reconcile recorded status with what the engine reports
        match self.engine.inspect_container(&row.container_id).await {
            Ok(details) => {
                if details.state != ContainerState::Running
                    && row.status == AppContainerStatus::Running
                {
                    let actual = match details.state {
                        ContainerState::Exited | ContainerState::Dead => {
                            AppContainerStatus::Stopped
                        }
                        _ => AppContainerStatus::Starting,
                    };
                    let conn = self.db.conn().await;
                    AppContainerStore.set_status(&conn, enrollment_id, actual)?;
                    row.status = actual;
                }
            }
            Err(EngineError::ContainerNotFound(_)) => {
                let conn = self.db.conn().await;
                AppContainerStore.delete(&conn, enrollment_id)?;
                return Ok(AppStatus::stopped_container());
            }
            Err(e) => {
                debug!(
                    "Status inspect failed | enrollment_id={} | error={}",
                    enrollment_id, e
                );
            }
        }

        let url = if row.status == AppContainerStatus::Running {
            build_app_url(&track, Some(&row.ports))
        } else {
            None
        };

        let mut status = AppStatus::bare(row.status.as_str(), true);
        status.kind = Some("container".to_string());
        status.url = url;
        status.ports = Some(row.ports.clone());
        status.cookies = Some(auto_login_cookies(&track));
        status.can_restart = Some(row.restart_count < MAX_RESTARTS);
        status.restart_count = Some(row.restart_count);
        status.started_at = row.started_at;

        Ok(status)
    }

    /// Soft health probe: poll the first mapped host port until it accepts a
    /// TCP connection or the window lapses. The container is recorded
    /// `running` either way; an app may legitimately need more time.
    async fn wait_for_health(
        &self,
        enrollment_id: i64,
        track: &Track,
        ports: &BTreeMap<String, u16>,
    ) -> Result<()> {
        let port = match first_host_port(track, ports) {
            Some(port) => port,
            None => {
                let conn = self.db.conn().await;
                AppContainerStore.touch_health(&conn, enrollment_id, AppContainerStatus::Running)?;
                return Ok(());
            }
        };

        let healthy = self.probe_port(port).await;
        if !healthy {
            warn!(
                "Health probe window lapsed | enrollment_id={} | port={}",
                enrollment_id, port
            );
        }

        let conn = self.db.conn().await;
        AppContainerStore.touch_health(&conn, enrollment_id, AppContainerStatus::Running)?;
        Ok(())
    }

    async fn probe_port(&self, port: u16) -> bool {
        let deadline = tokio::time::Instant::now() + self.health_timeout;

        loop {
            let connect = tokio::net::TcpStream::connect(("127.0.0.1", port));
            if let Ok(Ok(_)) = tokio::time::timeout(Duration::from_secs(1), connect).await {
                return true;
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.health_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::PortMapping;
    use crate::engine::fake::FakeEngine;

    const IMAGE: &str = "nginx:alpine";

    struct Fixture {
        engine: Arc<FakeEngine>,
        db: Arc<Database>,
        manager: AppContainerManager,
        enrollment_id: i64,
    }

    async fn fixture(mutate: impl FnOnce(&mut Track)) -> Fixture {
        let engine = Arc::new(FakeEngine::with_images(&[IMAGE]));
        let db = Arc::new(Database::open_in_memory().unwrap());

        let enrollment_id = {
            let conn = db.conn().await;

            let mut track = Track::new("nginx-lab", "Nginx Lab");
            track.app_container_image = Some(IMAGE.to_string());
            track.app_container_ports = vec![PortMapping {
                container: 80,
                host: None,
            }];
            mutate(&mut track);

            let track_id = TrackStore.create(&conn, &track).unwrap();
            EnrollmentStore
                .create(&conn, &Enrollment::new(1, track_id))
                .unwrap()
        };

        let manager = AppContainerManager::new(
            engine.clone() as Arc<dyn ContainerEngine>,
            db.clone(),
        )
        .with_health_timing(Duration::from_millis(10), Duration::from_millis(2));

        Fixture {
            engine,
            db,
            manager,
            enrollment_id,
        }
    }

    #[tokio::test]
    async fn test_start_allocates_dynamic_port_and_persists_row() {
        let f = fixture(|_| {}).await;

        let row = f.manager.start(f.enrollment_id).await.unwrap().unwrap();

        assert_eq!(row.status, AppContainerStatus::Running);
        let host_port = row.host_port_for(80).unwrap();
        assert!(host_port > 0);

        let spec = f.engine.last_spec().unwrap();
        assert_eq!(spec.name.as_deref(), Some("livelabs-app-1"));
        assert_eq!(spec.ports.get(&80).copied(), Some(host_port));
        assert_eq!(spec.limits.memory, 1024 * 1024 * 1024);
        assert_eq!(spec.limits.cpu_quota, 100_000);
        assert_eq!(
            spec.restart,
            RestartPolicyKind::OnFailure { max_retries: 3 }
        );
    }

    #[tokio::test]
    async fn test_start_twice_keeps_one_container_and_one_row() {
        let f = fixture(|_| {}).await;

        f.manager.start(f.enrollment_id).await.unwrap();
        f.manager.start(f.enrollment_id).await.unwrap();

        assert_eq!(f.engine.container_count(), 1);

        let conn = f.db.conn().await;
        assert_eq!(
            AppContainerStore
                .count_for_enrollment(&conn, f.enrollment_id)
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_env_merge_order() {
        let f = fixture(|track| {
            track.env_secrets.insert("SHARED".to_string(), "secret".to_string());
            track.env_secrets.insert("ONLY_SECRET".to_string(), "a".to_string());
            track
                .app_container_env
                .insert("SHARED".to_string(), "app".to_string());
        })
        .await;

        {
            let conn = f.db.conn().await;
            conn.execute(
                "UPDATE enrollments SET environment = ?1 WHERE id = ?2",
                rusqlite::params![r#"{"SHARED":"learner"}"#, f.enrollment_id],
            )
            .unwrap();
        }

        f.manager.start(f.enrollment_id).await.unwrap();

        let env = f.engine.last_spec().unwrap().env;
        assert_eq!(env.get("SHARED").unwrap(), "learner");
        assert_eq!(env.get("ONLY_SECRET").unwrap(), "a");
    }

    #[tokio::test]
    async fn test_reconcile_restarts_exited_container() {
        let f = fixture(|_| {}).await;

        let row = f.manager.start(f.enrollment_id).await.unwrap().unwrap();
        f.engine.set_state(&row.container_id, ContainerState::Exited);

        let row = f.manager.ensure_running(f.enrollment_id).await.unwrap();

        assert_eq!(row.status, AppContainerStatus::Running);
        assert_eq!(row.restart_count, 1);
        assert_eq!(
            f.engine.container_state(&row.container_id),
            Some(ContainerState::Running)
        );
    }

    #[tokio::test]
    async fn test_reconcile_recreates_vanished_container() {
        let f = fixture(|_| {}).await;

        let row = f.manager.start(f.enrollment_id).await.unwrap().unwrap();
        let old_id = row.container_id.clone();
        f.engine.vanish(&old_id);

        let row = f.manager.ensure_running(f.enrollment_id).await.unwrap();

        assert_ne!(row.container_id, old_id);
        assert_eq!(row.restart_count, 0);
        assert_eq!(f.engine.container_count(), 1);

        let conn = f.db.conn().await;
        assert_eq!(
            AppContainerStore
                .count_for_enrollment(&conn, f.enrollment_id)
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_restart_cap_tears_down_and_recreates() {
        let f = fixture(|_| {}).await;

        let row = f.manager.start(f.enrollment_id).await.unwrap().unwrap();
        let old_id = row.container_id.clone();

        {
            let conn = f.db.conn().await;
            for _ in 0..3 {
                AppContainerStore
                    .increment_restart(&conn, f.enrollment_id)
                    .unwrap();
            }
        }

        let row = f.manager.restart(f.enrollment_id).await.unwrap().unwrap();

        assert_ne!(row.container_id, old_id);
        assert_eq!(row.restart_count, 0);
        assert_eq!(f.engine.container_count(), 1);
    }

    #[tokio::test]
    async fn test_restart_below_cap_uses_engine_restart() {
        let f = fixture(|_| {}).await;

        let row = f.manager.start(f.enrollment_id).await.unwrap().unwrap();
        let old_id = row.container_id.clone();

        let row = f.manager.restart(f.enrollment_id).await.unwrap().unwrap();

        assert_eq!(row.container_id, old_id);
        assert_eq!(row.restart_count, 1);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_cleans_up() {
        let f = fixture(|_| {}).await;

        // Stop with nothing running is a success
        f.manager.stop(f.enrollment_id).await.unwrap();

        f.manager.start(f.enrollment_id).await.unwrap();
        f.manager.stop(f.enrollment_id).await.unwrap();

        assert_eq!(f.engine.container_count(), 0);

        let conn = f.db.conn().await;
        assert!(AppContainerStore.get(&conn, f.enrollment_id).unwrap().is_none());
        drop(conn);

        // Second stop after teardown is still fine
        f.manager.stop(f.enrollment_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_status_decision_tree() {
        // No app at all
        let f = fixture(|track| {
            track.app_container_image = None;
            track.app_container_ports.clear();
        })
        .await;
        let status = f.manager.status(f.enrollment_id).await.unwrap();
        assert_eq!(status.status, "no_app");
        assert!(!status.has_app);

        // External URL only
        let f = fixture(|track| {
            track.app_container_image = None;
            track.app_container_ports.clear();
            track.app_url_template = Some("https://dash.example.com".to_string());
        })
        .await;
        let status = f.manager.status(f.enrollment_id).await.unwrap();
        assert_eq!(status.status, "external");
        assert_eq!(status.url.as_deref(), Some("https://dash.example.com"));

        // Container configured but not started
        let f = fixture(|_| {}).await;
        let status = f.manager.status(f.enrollment_id).await.unwrap();
        assert_eq!(status.status, "stopped");
        assert_eq!(status.can_start, Some(true));

        // Running container reports url + ports
        f.manager.start(f.enrollment_id).await.unwrap();
        let status = f.manager.status(f.enrollment_id).await.unwrap();
        assert_eq!(status.status, "running");
        let ports = status.ports.unwrap();
        let host = ports.get("80").copied().unwrap();
        assert_eq!(
            status.url.as_deref(),
            Some(format!("http://localhost:{}", host).as_str())
        );
        assert_eq!(status.can_restart, Some(true));
    }

    #[tokio::test]
    async fn test_status_reconciles_vanished_container() {
        let f = fixture(|_| {}).await;

        let row = f.manager.start(f.enrollment_id).await.unwrap().unwrap();
        f.engine.vanish(&row.container_id);

        let status = f.manager.status(f.enrollment_id).await.unwrap();
        assert_eq!(status.status, "stopped");
        assert_eq!(status.can_start, Some(true));

        let conn = f.db.conn().await;
        assert!(AppContainerStore.get(&conn, f.enrollment_id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_health_probe_connects_to_listening_port() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();

        let f = fixture(|track| {
            track.app_container_ports = vec![PortMapping {
                container: 80,
                host: Some(port),
            }];
        })
        .await;

        let row = f.manager.start(f.enrollment_id).await.unwrap().unwrap();

        assert_eq!(row.status, AppContainerStatus::Running);
        assert!(row.last_health_check.is_some());
        assert_eq!(row.host_port_for(80), Some(port));
    }
}
