//! Diagnostics command - engine connectivity and cache state

use anyhow::Result;

use livelabs_daemon::config::Configuration;
use livelabs_daemon::engine::{ContainerEngine, DockerEngine};

pub async fn run(config_path: &str) -> Result<()> {
    let config = if std::path::Path::new(config_path).exists() {
        Configuration::load(config_path)?
    } else {
        Configuration::default()
    };

    let engine = if config.docker.socket.is_empty() {
        DockerEngine::new()?
    } else {
        DockerEngine::with_socket(&config.docker.socket)?
    };

    print!("Docker daemon: ");
    match engine.ping().await {
        Ok(()) => println!("reachable"),
        Err(e) => {
            println!("UNREACHABLE ({})", e);
            return Ok(());
        }
    }

    let images = engine.list_images().await?;
    println!("Cached images: {}", images.len());
    for image in &images {
        println!("  {} ({:.1} MB)", image.image, image.size_bytes as f64 / (1024.0 * 1024.0));
    }

    let df = engine.disk_usage().await?;
    println!(
        "Disk usage: {} images ({:.1} MB), {} containers, {} volumes",
        df.images_count,
        df.images_bytes as f64 / (1024.0 * 1024.0),
        df.containers_count,
        df.volumes_count
    );

    Ok(())
}
