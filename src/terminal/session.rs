//! Terminal session allocation and teardown

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::engine::{
    ContainerEngine, ContainerSpec, EngineResult, ExecStream, ResourceLimits,
};

/// Bound on one write to the client, to avoid head-of-line stalls
pub const OUTPUT_CHUNK: usize = 4096;

/// Frames the browser sends over the terminal socket
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    Input { data: String },
    Resize { rows: u16, cols: u16 },
    Close,
}

/// Split raw PTY output into bounded, lossily decoded text chunks
pub fn chunk_text(data: &[u8]) -> Vec<String> {
    data.chunks(OUTPUT_CHUNK)
        .map(|chunk| String::from_utf8_lossy(chunk).to_string())
        .collect()
}

/// One throwaway container with an attached interactive shell
pub struct TerminalSession {
    engine: Arc<dyn ContainerEngine>,
    container_id: String,
    exec_id: String,
    stream: Option<ExecStream>,
}

impl TerminalSession {
    /// Create the ephemeral container, attach an interactive exec, and hand
    /// back the session. On any setup failure the container is removed
    /// before the error propagates.
    pub async fn allocate(
        engine: Arc<dyn ContainerEngine>,
        image: &str,
        env: &HashMap<String, String>,
        enrollment_id: i64,
    ) -> EngineResult<Self> {
        let mut spec = ContainerSpec::new(image);
        spec.command = Some(vec!["/bin/bash".to_string()]);
        spec.env = env.clone();
        spec.limits = ResourceLimits::script();
        spec.tty = true;
        spec.stdin_open = true;
        spec.labels = HashMap::from([
            ("app".to_string(), "livelabs".to_string()),
            ("type".to_string(), "terminal".to_string()),
            ("enrollment_id".to_string(), enrollment_id.to_string()),
        ]);

        let container_id = engine.create_container(&spec).await?;

        let setup = async {
            engine.start_container(&container_id).await?;
            let exec_id = engine
                .create_exec(&container_id, vec!["/bin/bash".to_string()])
                .await?;
            let stream = engine.start_exec(&exec_id).await?;
            Ok::<_, crate::engine::EngineError>((exec_id, stream))
        };

        let (exec_id, stream) = match setup.await {
            Ok(parts) => parts,
            Err(e) => {
                if let Err(remove_err) = engine.remove_container(&container_id, true).await {
                    debug!(
                        "Terminal setup cleanup failed | container_id={} | error={}",
                        container_id, remove_err
                    );
                }
                return Err(e);
            }
        };

        info!(
            "Terminal session allocated | enrollment_id={} | container_id={}",
            enrollment_id, container_id
        );

        Ok(Self {
            engine,
            container_id,
            exec_id,
            stream: Some(stream),
        })
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Take ownership of the raw duplex streams; each half goes to its pump
    pub fn take_stream(&mut self) -> Option<ExecStream> {
        self.stream.take()
    }

    /// Best-effort TTY resize; failures are swallowed
    pub async fn resize(&mut self, rows: u16, cols: u16) {
        if let Err(e) = self.engine.resize_exec(&self.exec_id, rows, cols).await {
            debug!(
                "Terminal resize failed | container_id={} | error={}",
                self.container_id, e
            );
        }
    }

    /// Stop (1 s grace) and force-remove the container. Errors are logged,
    /// never surfaced: teardown runs on every exit path.
    pub async fn teardown(&mut self) {
        if let Err(e) = self.engine.stop_container(&self.container_id, 1).await {
            debug!(
                "Terminal stop failed | container_id={} | error={}",
                self.container_id, e
            );
        }

        if let Err(e) = self.engine.remove_container(&self.container_id, true).await {
            debug!(
                "Terminal remove failed | container_id={} | error={}",
                self.container_id, e
            );
        }

        info!("Terminal session closed | container_id={}", self.container_id);
    }
}
