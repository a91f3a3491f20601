//! Main daemon command - starts the daemon server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum_server::tls_rustls::RustlsConfig;
use tracing::{info, warn};

use livelabs_daemon::apps::AppContainerManager;
use livelabs_daemon::config::Configuration;
use livelabs_daemon::database::Database;
use livelabs_daemon::engine::{ContainerEngine, DockerEngine};
use livelabs_daemon::images::ImageManager;
use livelabs_daemon::init::InitOrchestrator;
use livelabs_daemon::proxy::ProxyService;
use livelabs_daemon::router::{self, AppState};
use livelabs_daemon::runner::ScriptRunner;

/// Run the main daemon
pub async fn run(config_path: &str) -> Result<()> {
    // Load configuration; a missing file runs with defaults
    let config = if std::path::Path::new(config_path).exists() {
        info!("Loading configuration from: {}", config_path);
        Configuration::load(config_path)?
    } else {
        warn!("Config file {} not found, using defaults", config_path);
        Configuration::default()
    };
    let config = Arc::new(config);

    info!("  API: {}:{}", config.api.host, config.api.port);
    info!("  Database: {}", config.database.path.display());

    // Connect to the container engine
    let engine: Arc<dyn ContainerEngine> = if config.docker.socket.is_empty() {
        Arc::new(DockerEngine::new()?)
    } else {
        info!("  Docker socket: {}", config.docker.socket);
        Arc::new(DockerEngine::with_socket(&config.docker.socket)?)
    };

    if let Err(e) = engine.ping().await {
        warn!("Docker daemon not reachable at startup: {}", e);
    }

    // Open state database
    let db = Arc::new(Database::open(&config.database.path)?);

    // Wire up the core components; one engine handle threaded through all
    let images = ImageManager::new(engine.clone());
    let runner = Arc::new(ScriptRunner::new(
        engine.clone(),
        Duration::from_secs(config.runner.timeout_secs),
    ));
    let apps = Arc::new(AppContainerManager::new(engine.clone(), db.clone()));
    let init = Arc::new(InitOrchestrator::new(runner.clone(), db.clone()));
    let proxy = Arc::new(ProxyService::new(&config.proxy.allowed_url_patterns)?);

    // Pre-pull configured images in the background
    if !config.images.warmup.is_empty() {
        info!("Warming up {} images", config.images.warmup.len());
        images.warmup(&config.images.warmup);
    }

    let state = AppState {
        config: config.clone(),
        db,
        engine,
        images,
        runner,
        apps,
        init,
        proxy,
    };
    let app = router::build_router(state);

    let bind_addr: SocketAddr = format!("{}:{}", config.api.host, config.api.port)
        .parse()
        .expect("Invalid bind address");

    // Handle graceful shutdown
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");
        warn!("Received shutdown signal, stopping...");
        shutdown_handle.graceful_shutdown(Some(Duration::from_secs(10)));
    });

    if config.api.ssl.enabled {
        info!("Starting HTTPS server on {} (SSL enabled)", bind_addr);

        let tls_config = RustlsConfig::from_pem_file(&config.api.ssl.cert, &config.api.ssl.key)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to load TLS config: {}", e))?;

        axum_server::bind_rustls(bind_addr, tls_config)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;
    } else {
        info!("Starting HTTP server on {} (SSL disabled)", bind_addr);

        axum_server::bind(bind_addr)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;
    }

    info!("Daemon stopped");
    Ok(())
}
