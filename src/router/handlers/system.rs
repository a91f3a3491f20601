//! Health and infrastructure endpoints

use axum::{
    extract::{Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use crate::engine::{DiskUsage, PruneReport};
use crate::error::Result;
use crate::images::ImageStatus;
use crate::router::middleware::auth::{require_admin, Claims};
use crate::router::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub docker: bool,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let docker_ok = state.engine.ping().await.is_ok();
    Json(HealthResponse {
        status: if docker_ok { "healthy" } else { "degraded" }.to_string(),
        docker: docker_ok,
    })
}

#[derive(Debug, Deserialize)]
pub struct ImageQuery {
    pub image: String,

    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct PullRequest {
    pub image: String,
}

#[derive(Debug, Deserialize)]
pub struct WarmupRequest {
    pub images: Vec<String>,
}

pub async fn image_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ImageQuery>,
) -> Result<Json<ImageStatus>> {
    require_admin(&claims)?;
    Ok(Json(state.images.status(&query.image).await))
}

pub async fn list_images(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<ImageStatus>>> {
    require_admin(&claims)?;
    Ok(Json(state.images.list_cached().await))
}

/// Pull synchronously; concurrent pulls of one image collapse to one
pub async fn pull_image(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<PullRequest>,
) -> Result<Json<ImageStatus>> {
    require_admin(&claims)?;
    Ok(Json(state.images.pull(&request.image).await))
}

/// Kick off background pulls for a set of images
pub async fn warmup_images(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<WarmupRequest>,
) -> Result<Json<Vec<ImageStatus>>> {
    require_admin(&claims)?;
    Ok(Json(state.images.warmup(&request.images)))
}

pub async fn remove_image(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ImageQuery>,
) -> Result<Json<ImageStatus>> {
    require_admin(&claims)?;
    Ok(Json(state.images.remove(&query.image, query.force).await))
}

pub async fn disk_usage(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<DiskUsage>> {
    require_admin(&claims)?;
    Ok(Json(state.images.disk_usage().await?))
}

pub async fn prune(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<PruneReport>> {
    require_admin(&claims)?;
    Ok(Json(state.images.prune().await?))
}
