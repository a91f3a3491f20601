//! One-shot script runner
//!
//! Executes an author-supplied script in a fresh container and always comes
//! back with a result record. The runner never raises: every failure mode is
//! folded into a synthetic outcome with a deterministic stderr prefix, and
//! the container is removed on every exit path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::engine::{ContainerEngine, ContainerSpec, EngineError, ResourceLimits};

/// Result record of one script run
#[derive(Debug, Clone)]
pub struct ScriptOutcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub duration_ms: i64,
}

impl ScriptOutcome {
    fn empty_success() -> Self {
        Self {
            success: true,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
            duration_ms: 0,
        }
    }
}

enum RunError {
    Timeout,
    Engine(EngineError),
}

impl From<EngineError> for RunError {
    fn from(e: EngineError) -> Self {
        RunError::Engine(e)
    }
}

/// Stateless executor for setup, validation and init scripts
pub struct ScriptRunner {
    engine: Arc<dyn ContainerEngine>,
    timeout: Duration,
}

impl ScriptRunner {
    pub fn new(engine: Arc<dyn ContainerEngine>, timeout: Duration) -> Self {
        Self { engine, timeout }
    }

    /// Run a script to completion inside a fresh container.
    ///
    /// An empty or whitespace-only script synthesizes a zero-exit success
    /// without touching the engine.
    pub async fn run(
        &self,
        script: &str,
        env: &HashMap<String, String>,
        image: &str,
    ) -> ScriptOutcome {
        let start = Instant::now();

        if script.trim().is_empty() {
            info!("Script execution skipped (empty) | image={}", image);
            return ScriptOutcome::empty_success();
        }

        let preview: String = script.chars().take(200).collect();
        info!("Script execution started | image={} | script_preview={:?}", image, preview);

        let mut spec = ContainerSpec::new(image);
        spec.command = Some(vec![
            "bash".to_string(),
            "-c".to_string(),
            script.to_string(),
        ]);
        spec.env = env.clone();
        spec.limits = ResourceLimits::script();

        let container_id = match self.engine.create_container(&spec).await {
            Ok(id) => id,
            Err(e) => return self.synthetic_failure(e, start),
        };

        // Panic safety: if the drive below unwinds, a detached task still
        // force-removes the container.
        let guard = {
            let engine = self.engine.clone();
            let id = container_id.clone();
            scopeguard::guard((), move |_| {
                tokio::spawn(async move {
                    let _ = engine.remove_container(&id, true).await;
                });
            })
        };

        let result = self.drive(&container_id).await;

        if let Err(e) = self.engine.remove_container(&container_id, true).await {
            debug!("Cleanup remove failed | container_id={} | error={}", container_id, e);
        }
        let _ = scopeguard::ScopeGuard::into_inner(guard);

        let duration_ms = start.elapsed().as_millis() as i64;

        match result {
            Ok((exit_code, stdout, stderr)) => {
                info!(
                    "Script execution completed | container_id={} | exit_code={} | duration_ms={} | success={}",
                    container_id, exit_code, duration_ms, exit_code == 0
                );

                ScriptOutcome {
                    success: exit_code == 0,
                    stdout,
                    stderr,
                    exit_code,
                    duration_ms,
                }
            }
            Err(RunError::Timeout) => {
                warn!(
                    "Script execution timed out | container_id={} | timeout_secs={}",
                    container_id,
                    self.timeout.as_secs()
                );

                ScriptOutcome {
                    success: false,
                    stdout: String::new(),
                    stderr: format!(
                        "Script execution timed out after {} seconds",
                        self.timeout.as_secs()
                    ),
                    exit_code: 124,
                    duration_ms,
                }
            }
            Err(RunError::Engine(e)) => self.synthetic_failure(e, start),
        }
    }

    /// Start, wait (bounded), and collect split logs
    async fn drive(&self, container_id: &str) -> Result<(i64, String, String), RunError> {
        self.engine.start_container(container_id).await?;

        let exit_code = match tokio::time::timeout(
            self.timeout,
            self.engine.wait_container(container_id),
        )
        .await
        {
            Ok(waited) => waited?,
            Err(_) => {
                // Deadline hit: kill before the caller removes the handle
                if let Err(e) = self.engine.kill_container(container_id).await {
                    debug!("Kill after timeout failed | container_id={} | error={}", container_id, e);
                }
                return Err(RunError::Timeout);
            }
        };

        let stdout = self.engine.container_logs(container_id, true, false).await?;
        let stderr = self.engine.container_logs(container_id, false, true).await?;

        Ok((exit_code, stdout, stderr))
    }

    /// Fold an engine failure into the deterministic stderr taxonomy
    fn synthetic_failure(&self, error: EngineError, start: Instant) -> ScriptOutcome {
        let stderr = match &error {
            EngineError::ImageNotFound(image) => {
                format!("Docker image not found: {}", image)
            }
            EngineError::Docker(e) => format!("Docker API error: {}", e),
            other => format!("Execution error: {}", other),
        };

        warn!("Script execution failed | error={}", stderr);

        ScriptOutcome {
            success: false,
            stdout: String::new(),
            stderr,
            exit_code: 1,
            duration_ms: start.elapsed().as_millis() as i64,
        }
    }
}
