//! HTTP router module
//!
//! The control API the platform UI talks to: script execution, app
//! container lifecycle, init, the terminal WebSocket and the embedding
//! proxy.

mod handlers;
mod middleware;
mod websocket;

pub use middleware::auth::{decode_token, issue_token, Claims};

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::apps::AppContainerManager;
use crate::config::Configuration;
use crate::database::Database;
use crate::engine::ContainerEngine;
use crate::images::ImageManager;
use crate::init::InitOrchestrator;
use crate::proxy::ProxyService;
use crate::runner::ScriptRunner;

/// Application state shared across handlers.
///
/// Constructed once at startup and threaded through explicitly; nothing in
/// the daemon reaches for a global client.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Configuration>,
    pub db: Arc<Database>,
    pub engine: Arc<dyn ContainerEngine>,
    pub images: ImageManager,
    pub runner: Arc<ScriptRunner>,
    pub apps: Arc<AppContainerManager>,
    pub init: Arc<InitOrchestrator>,
    pub proxy: Arc<ProxyService>,
}

/// Build the HTTP router with all routes
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Script execution
        .route(
            "/enrollments/:eid/steps/:ord/execute",
            post(handlers::execute::execute_script),
        )
        .route(
            "/enrollments/:eid/steps/:ord/execute/history",
            get(handlers::execute::execution_history),
        )
        // App container lifecycle
        .route("/enrollments/:eid/app", get(handlers::app::app_status))
        .route("/enrollments/:eid/app/init", post(handlers::app::run_init))
        .route("/enrollments/:eid/app/start", post(handlers::app::start_app))
        .route(
            "/enrollments/:eid/app/restart",
            post(handlers::app::restart_app),
        )
        .route("/enrollments/:eid/app/stop", post(handlers::app::stop_app))
        // Admin image/infrastructure surface
        .nest("/infrastructure", infrastructure_routes())
        // Apply auth middleware to all API routes
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    Router::new()
        .route("/health", get(handlers::system::health))
        .merge(api_routes)
        // Query-token authenticated routes (browser limitations)
        .route("/terminal/ws/:eid", get(websocket::terminal::terminal_ws))
        .route("/proxy/fetch", get(handlers::proxy::proxy_fetch))
        // Apply global middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Routes for image and engine maintenance (admin only)
fn infrastructure_routes() -> Router<AppState> {
    Router::new()
        .route("/images", get(handlers::system::list_images))
        .route("/images", delete(handlers::system::remove_image))
        .route("/images/status", get(handlers::system::image_status))
        .route("/images/pull", post(handlers::system::pull_image))
        .route("/images/warmup", post(handlers::system::warmup_images))
        .route("/disk-usage", get(handlers::system::disk_usage))
        .route("/prune", post(handlers::system::prune))
}
