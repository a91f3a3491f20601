//! Configuration module

mod config;

pub use config::{
    ApiConfiguration, AuthConfiguration, Configuration, DatabaseConfiguration,
    DockerConfiguration, ImagesConfiguration, ProxyConfiguration, RunnerConfiguration,
    SslConfiguration,
};
