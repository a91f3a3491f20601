//! Docker implementation of the engine adapter

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, RestartContainerOptions,
    StopContainerOptions, WaitContainerOptions,
};
use bollard::exec::{CreateExecOptions, ResizeExecOptions, StartExecResults};
use bollard::image::{CreateImageOptions, ListImagesOptions, RemoveImageOptions};
use bollard::models::{
    ContainerStateStatusEnum, HostConfig, PortBinding, RestartPolicy as DockerRestartPolicy,
    RestartPolicyNameEnum,
};
use bollard::Docker;
use futures_util::stream::StreamExt;
use tracing::{debug, error};

use super::traits::{
    ContainerDetails, ContainerEngine, ContainerSpec, ContainerState, DiskUsage, EngineError,
    EngineResult, ExecStream, ImageDetails, PruneReport, RestartPolicyKind,
};

/// Maps a bollard error onto the engine taxonomy for a container handle
fn container_err(e: bollard::errors::Error, id: &str) -> EngineError {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => EngineError::ContainerNotFound(id.to_string()),
        _ => EngineError::Docker(e),
    }
}

fn image_err(e: bollard::errors::Error, image: &str) -> EngineError {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => EngineError::ImageNotFound(image.to_string()),
        _ => EngineError::Docker(e),
    }
}

#[derive(Clone)]
pub struct DockerEngine {
    client: Arc<Docker>,
}

impl DockerEngine {
    pub fn new() -> EngineResult<Self> {
        let client = Docker::connect_with_local_defaults().map_err(EngineError::Docker)?;

        Ok(Self {
            client: Arc::new(client),
        })
    }

    pub fn with_socket(socket_path: &str) -> EngineResult<Self> {
        let client = Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION)
            .map_err(EngineError::Docker)?;

        Ok(Self {
            client: Arc::new(client),
        })
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> EngineResult<()> {
        self.client.ping().await.map_err(EngineError::Docker)?;
        Ok(())
    }

    async fn image_status(&self, image: &str) -> EngineResult<Option<ImageDetails>> {
        match self.client.inspect_image(image).await {
            Ok(inspect) => Ok(Some(ImageDetails {
                image: image.to_string(),
                id: inspect.id.unwrap_or_default(),
                size_bytes: inspect.size.unwrap_or(0),
                created: inspect.created,
            })),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(e) => Err(EngineError::Docker(e)),
        }
    }

    async fn list_images(&self) -> EngineResult<Vec<ImageDetails>> {
        let options = Some(ListImagesOptions::<String> {
            all: false,
            ..Default::default()
        });

        let images = self
            .client
            .list_images(options)
            .await
            .map_err(EngineError::Docker)?;

        let mut result = Vec::new();
        for img in images {
            for tag in &img.repo_tags {
                result.push(ImageDetails {
                    image: tag.clone(),
                    id: img.id.clone(),
                    size_bytes: img.size,
                    created: chrono::DateTime::from_timestamp(img.created, 0)
                        .map(|dt| dt.to_rfc3339()),
                });
            }
        }

        Ok(result)
    }

    async fn pull_image(&self, image: &str) -> EngineResult<()> {
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.client.create_image(options, None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!("Pull {}: {}", image, status);
                    }
                }
                Err(e) => {
                    error!("Pull error for {}: {}", image, e);
                    return Err(image_err(e, image));
                }
            }
        }

        Ok(())
    }

    async fn remove_image(&self, image: &str, force: bool) -> EngineResult<()> {
        let options = Some(RemoveImageOptions {
            force,
            ..Default::default()
        });

        self.client
            .remove_image(image, options, None)
            .await
            .map_err(|e| image_err(e, image))?;

        Ok(())
    }

    async fn disk_usage(&self) -> EngineResult<DiskUsage> {
        let df = self.client.df().await.map_err(EngineError::Docker)?;

        let images = df.images.unwrap_or_default();
        let containers = df.containers.unwrap_or_default();
        let volumes = df.volumes.unwrap_or_default();

        Ok(DiskUsage {
            images_count: images.len(),
            images_bytes: images.iter().map(|i| i.size).sum(),
            containers_count: containers.len(),
            containers_bytes: containers.iter().filter_map(|c| c.size_rw).sum(),
            volumes_count: volumes.len(),
            volumes_bytes: volumes
                .iter()
                .filter_map(|v| v.usage_data.as_ref().map(|u| u.size))
                .sum(),
        })
    }

    async fn prune(&self) -> EngineResult<PruneReport> {
        let containers = self
            .client
            .prune_containers(None::<bollard::container::PruneContainersOptions<String>>)
            .await
            .map_err(EngineError::Docker)?;

        let images = self
            .client
            .prune_images(None::<bollard::image::PruneImagesOptions<String>>)
            .await
            .map_err(EngineError::Docker)?;

        Ok(PruneReport {
            containers_removed: containers.containers_deleted.unwrap_or_default().len(),
            images_removed: images.images_deleted.unwrap_or_default().len(),
            space_reclaimed_bytes: containers.space_reclaimed.unwrap_or(0)
                + images.space_reclaimed.unwrap_or(0),
        })
    }

    async fn create_container(&self, spec: &ContainerSpec) -> EngineResult<String> {
        // Build port bindings
        let port_bindings = if spec.ports.is_empty() {
            None
        } else {
            let mut bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
            for (container_port, host_port) in &spec.ports {
                let key = format!("{}/tcp", container_port);
                bindings.insert(
                    key,
                    Some(vec![PortBinding {
                        host_ip: None,
                        host_port: Some(host_port.to_string()),
                    }]),
                );
            }
            Some(bindings)
        };

        let exposed_ports = if spec.ports.is_empty() {
            None
        } else {
            let mut exposed: HashMap<String, HashMap<(), ()>> = HashMap::new();
            for container_port in spec.ports.keys() {
                exposed.insert(format!("{}/tcp", container_port), HashMap::new());
            }
            Some(exposed)
        };

        let restart_policy = match spec.restart {
            RestartPolicyKind::No => None,
            RestartPolicyKind::OnFailure { max_retries } => Some(DockerRestartPolicy {
                name: Some(RestartPolicyNameEnum::ON_FAILURE),
                maximum_retry_count: Some(max_retries),
            }),
        };

        let host_config = HostConfig {
            port_bindings,
            memory: Some(spec.limits.memory),
            cpu_period: Some(spec.limits.cpu_period),
            cpu_quota: Some(spec.limits.cpu_quota),
            network_mode: Some(spec.network_mode.clone()),
            restart_policy,
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(
                spec.env
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>(),
            ),
            cmd: spec.command.clone(),
            labels: Some(spec.labels.clone()),
            exposed_ports,
            host_config: Some(host_config),
            tty: Some(spec.tty),
            open_stdin: Some(spec.stdin_open),
            attach_stdin: Some(spec.stdin_open),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let options = spec.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            platform: None,
        });

        let response = self
            .client
            .create_container(options, config)
            .await
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                } => EngineError::ImageNotFound(spec.image.clone()),
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 409, ..
                } => EngineError::ContainerExists(spec.name.clone().unwrap_or_default()),
                _ => EngineError::Docker(e),
            })?;

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> EngineResult<()> {
        self.client
            .start_container::<String>(id, None)
            .await
            .map_err(|e| container_err(e, id))?;

        Ok(())
    }

    async fn stop_container(&self, id: &str, grace_secs: i64) -> EngineResult<()> {
        let options = Some(StopContainerOptions { t: grace_secs });

        self.client
            .stop_container(id, options)
            .await
            .map_err(|e| container_err(e, id))?;

        Ok(())
    }

    async fn restart_container(&self, id: &str, grace_secs: i64) -> EngineResult<()> {
        let options = Some(RestartContainerOptions {
            t: grace_secs as isize,
        });

        self.client
            .restart_container(id, options)
            .await
            .map_err(|e| container_err(e, id))?;

        Ok(())
    }

    async fn kill_container(&self, id: &str) -> EngineResult<()> {
        self.client
            .kill_container(id, None::<bollard::container::KillContainerOptions<String>>)
            .await
            .map_err(|e| container_err(e, id))?;

        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> EngineResult<()> {
        let options = Some(RemoveContainerOptions {
            force,
            v: true,
            ..Default::default()
        });

        self.client
            .remove_container(id, options)
            .await
            .map_err(|e| container_err(e, id))?;

        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> EngineResult<ContainerDetails> {
        let inspect = self
            .client
            .inspect_container(id, None)
            .await
            .map_err(|e| container_err(e, id))?;

        let state = inspect
            .state
            .as_ref()
            .and_then(|s| s.status)
            .map(|s| match s {
                ContainerStateStatusEnum::CREATED => ContainerState::Created,
                ContainerStateStatusEnum::RUNNING => ContainerState::Running,
                ContainerStateStatusEnum::PAUSED => ContainerState::Paused,
                ContainerStateStatusEnum::RESTARTING => ContainerState::Restarting,
                ContainerStateStatusEnum::REMOVING => ContainerState::Removing,
                ContainerStateStatusEnum::EXITED => ContainerState::Exited,
                _ => ContainerState::Dead,
            })
            .unwrap_or(ContainerState::Dead);

        let name = inspect
            .name
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string();

        let ports = inspect
            .network_settings
            .and_then(|ns| ns.ports)
            .map(|p| {
                p.into_iter()
                    .filter_map(|(key, bindings)| {
                        let container_port = key.split('/').next()?.parse().ok()?;
                        let host_port = bindings?
                            .first()?
                            .host_port
                            .as_deref()?
                            .parse()
                            .ok()?;
                        Some((container_port, host_port))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(ContainerDetails {
            id: inspect.id.unwrap_or_default(),
            name,
            state,
            ports,
        })
    }

    async fn wait_container(&self, id: &str) -> EngineResult<i64> {
        let mut stream = self
            .client
            .wait_container(id, None::<WaitContainerOptions<String>>);

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard surfaces non-zero exits as an error carrying the code
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(container_err(e, id)),
            None => Err(EngineError::Other(format!(
                "wait stream ended without a status for {}",
                id
            ))),
        }
    }

    async fn container_logs(&self, id: &str, stdout: bool, stderr: bool) -> EngineResult<String> {
        let options = Some(LogsOptions::<String> {
            stdout,
            stderr,
            tail: "all".to_string(),
            ..Default::default()
        });

        let mut stream = self.client.logs(id, options);
        let mut collected = String::new();

        while let Some(result) = stream.next().await {
            match result {
                Ok(output) => {
                    collected.push_str(&String::from_utf8_lossy(&output.into_bytes()));
                }
                Err(e) => return Err(container_err(e, id)),
            }
        }

        Ok(collected)
    }

    async fn create_exec(&self, container_id: &str, cmd: Vec<String>) -> EngineResult<String> {
        let exec = self
            .client
            .create_exec(
                container_id,
                CreateExecOptions {
                    attach_stdin: Some(true),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    tty: Some(true),
                    cmd: Some(cmd),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| container_err(e, container_id))?;

        Ok(exec.id)
    }

    async fn start_exec(&self, exec_id: &str) -> EngineResult<ExecStream> {
        let result = self
            .client
            .start_exec(exec_id, None)
            .await
            .map_err(EngineError::Docker)?;

        match result {
            StartExecResults::Attached { output, input } => Ok(ExecStream {
                input,
                output: Box::pin(output.map(|item| {
                    item.map(|log| log.into_bytes()).map_err(EngineError::Docker)
                })),
            }),
            StartExecResults::Detached => Err(EngineError::Other(
                "exec started detached, expected attached streams".to_string(),
            )),
        }
    }

    async fn resize_exec(&self, exec_id: &str, rows: u16, cols: u16) -> EngineResult<()> {
        self.client
            .resize_exec(
                exec_id,
                ResizeExecOptions {
                    height: rows,
                    width: cols,
                },
            )
            .await
            .map_err(EngineError::Docker)?;

        Ok(())
    }
}
