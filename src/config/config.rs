//! Configuration structures and loading

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Configuration {
    /// Enable debug mode
    #[serde(default)]
    pub debug: bool,

    /// API server configuration
    #[serde(default)]
    pub api: ApiConfiguration,

    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthConfiguration,

    /// Docker daemon configuration
    #[serde(default)]
    pub docker: DockerConfiguration,

    /// State database configuration
    #[serde(default)]
    pub database: DatabaseConfiguration,

    /// Embedding proxy configuration
    #[serde(default)]
    pub proxy: ProxyConfiguration,

    /// Script runner configuration
    #[serde(default)]
    pub runner: RunnerConfiguration,

    /// Image warmup configuration
    #[serde(default)]
    pub images: ImagesConfiguration,
}

impl Configuration {
    /// Load configuration from a TOML file
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let mut config: Configuration =
            toml::from_str(&content).with_context(|| "Failed to parse configuration")?;

        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment variables the host process honors over the file
    fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var("JWT_SECRET_KEY") {
            if !secret.is_empty() {
                self.auth.jwt_secret = secret;
            }
        }
    }
}

/// API server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfiguration {
    /// Host to bind to
    #[serde(default = "default_api_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// SSL configuration
    #[serde(default)]
    pub ssl: SslConfiguration,
}

impl Default for ApiConfiguration {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            ssl: SslConfiguration::default(),
        }
    }
}

fn default_api_host() -> String {
    "0.0.0.0".into()
}

fn default_api_port() -> u16 {
    8000
}

/// SSL configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SslConfiguration {
    /// Enable SSL
    #[serde(default)]
    pub enabled: bool,

    /// Path to certificate file
    #[serde(default)]
    pub cert: String,

    /// Path to key file
    #[serde(default)]
    pub key: String,
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfiguration {
    /// HS256 signing key for API and websocket tokens.
    ///
    /// Overridable via `JWT_SECRET_KEY`.
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
}

impl Default for AuthConfiguration {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
        }
    }
}

fn default_jwt_secret() -> String {
    "dev-secret-key-change-in-production".into()
}

/// Docker daemon configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DockerConfiguration {
    /// Unix socket path; empty uses the engine's default endpoint
    #[serde(default)]
    pub socket: String,
}

/// State database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfiguration {
    /// Path to the SQLite state database
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfiguration {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("livelabs.db")
}

/// Embedding proxy configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfiguration {
    /// Full-match URL regexes the proxy is willing to forward to.
    ///
    /// Fixed at startup; never reloaded per-request.
    #[serde(default = "default_allowed_url_patterns")]
    pub allowed_url_patterns: Vec<String>,
}

impl Default for ProxyConfiguration {
    fn default() -> Self {
        Self {
            allowed_url_patterns: default_allowed_url_patterns(),
        }
    }
}

fn default_allowed_url_patterns() -> Vec<String> {
    vec![
        r"^https?://localhost(:\d+)?(/.*)?$".to_string(),
        r"^https?://127\.0\.0\.1(:\d+)?(/.*)?$".to_string(),
    ]
}

/// Script runner configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfiguration {
    /// Hard wall-clock deadline for one script run, in seconds
    #[serde(default = "default_runner_timeout")]
    pub timeout_secs: u64,
}

impl Default for RunnerConfiguration {
    fn default() -> Self {
        Self {
            timeout_secs: default_runner_timeout(),
        }
    }
}

fn default_runner_timeout() -> u64 {
    300
}

/// Image warmup configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImagesConfiguration {
    /// Images pre-pulled in the background at startup
    #[serde(default)]
    pub warmup: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: Configuration = toml::from_str("").unwrap();

        assert_eq!(config.api.host, "0.0.0.0");
        assert_eq!(config.api.port, 8000);
        assert_eq!(config.runner.timeout_secs, 300);
        assert_eq!(config.proxy.allowed_url_patterns.len(), 2);
        assert!(config.images.warmup.is_empty());
    }

    #[test]
    fn test_full_toml() {
        let config: Configuration = toml::from_str(
            r#"
            debug = true

            [api]
            host = "127.0.0.1"
            port = 9000

            [auth]
            jwt_secret = "s3cret"

            [database]
            path = "/var/lib/livelabs/state.db"

            [proxy]
            allowed_url_patterns = ["^https://lab\\.example\\.com(/.*)?$"]

            [runner]
            timeout_secs = 60

            [images]
            warmup = ["ubuntu:22.04", "nginx:alpine"]
            "#,
        )
        .unwrap();

        assert!(config.debug);
        assert_eq!(config.api.port, 9000);
        assert_eq!(config.auth.jwt_secret, "s3cret");
        assert_eq!(config.proxy.allowed_url_patterns.len(), 1);
        assert_eq!(config.runner.timeout_secs, 60);
        assert_eq!(config.images.warmup.len(), 2);
    }

    #[test]
    fn test_default_patterns_compile() {
        for pattern in default_allowed_url_patterns() {
            regex::Regex::new(&pattern).unwrap();
        }
    }
}
