use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("Docker image not found: {0}")]
    ImageNotFound(String),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Upstream request timed out")]
    UpstreamTimeout,

    #[error("Upstream request failed: {0}")]
    UpstreamUnreachable(String),

    #[error("Database error: {0}")]
    Database(#[from] crate::database::DatabaseError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<crate::engine::EngineError> for DaemonError {
    fn from(e: crate::engine::EngineError) -> Self {
        use crate::engine::EngineError;

        match e {
            EngineError::Docker(e) => DaemonError::Docker(e),
            EngineError::ImageNotFound(image) => DaemonError::ImageNotFound(image),
            EngineError::ContainerNotFound(id) => DaemonError::ContainerNotFound(id),
            other => DaemonError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for DaemonError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            DaemonError::Docker(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            DaemonError::ImageNotFound(image) => {
                (StatusCode::BAD_REQUEST, format!("Docker image not found: {}", image))
            }
            DaemonError::ContainerNotFound(id) => {
                (StatusCode::NOT_FOUND, format!("Container not found: {}", id))
            }
            DaemonError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            DaemonError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            DaemonError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            DaemonError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            DaemonError::UpstreamTimeout => {
                (StatusCode::GATEWAY_TIMEOUT, "Upstream request timed out".to_string())
            }
            DaemonError::UpstreamUnreachable(msg) => {
                (StatusCode::BAD_GATEWAY, format!("Failed to fetch URL: {}", msg))
            }
            DaemonError::Database(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            DaemonError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": true,
            "message": message,
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;
