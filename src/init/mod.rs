//! Init orchestrator
//!
//! Runs the track's one-shot initialization script for an enrollment,
//! parses the JSON envelope it prints, and persists the result. Concurrent
//! requests collapse onto one run: the enrollment row's `init_status` is the
//! authoritative single-flight state, advanced by compare-and-set.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::database::{
    Cookie, Database, EnrollmentStore, ExecutionStatus, ExecutionStore, InitStatus, ScriptType,
    TrackStore,
};
use crate::error::{DaemonError, Result};
use crate::runner::ScriptRunner;

/// The JSON envelope an init script must print as its last `{...}` block
#[derive(Debug, Clone, Deserialize)]
pub struct InitEnvelope {
    pub url: Option<String>,

    #[serde(default)]
    pub cookies: Vec<Cookie>,
}

/// Outcome of one init request
#[derive(Debug, Clone, Serialize)]
pub struct InitResult {
    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookies: Option<Vec<Cookie>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl InitResult {
    fn success(url: Option<String>, cookies: Vec<Cookie>) -> Self {
        Self {
            status: "success".to_string(),
            url,
            cookies: Some(cookies),
            error: None,
            message: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            status: "failed".to_string(),
            url: None,
            cookies: None,
            error: Some(error),
            message: None,
        }
    }

    fn running() -> Self {
        Self {
            status: "running".to_string(),
            url: None,
            cookies: None,
            error: None,
            message: Some("Initialization already in progress".to_string()),
        }
    }
}

/// Locate and parse the envelope in the script's stdout.
///
/// The last `{` starts the envelope; anything before it is preamble log
/// output and ignored.
pub fn parse_envelope(stdout: &str) -> std::result::Result<InitEnvelope, String> {
    let trimmed = stdout.trim();

    let payload = match trimmed.rfind('{') {
        Some(start) => &trimmed[start..],
        None => trimmed,
    };

    let envelope: InitEnvelope = serde_json::from_str(payload).map_err(|e| {
        let sample: String = stdout.chars().take(500).collect();
        format!("Invalid JSON output: {}\nOutput: {}", e, sample)
    })?;

    if envelope.url.as_deref().unwrap_or("").is_empty() {
        return Err("Init script did not return a 'url' in JSON output".to_string());
    }

    Ok(envelope)
}

/// Drives per-enrollment initialization
pub struct InitOrchestrator {
    runner: Arc<ScriptRunner>,
    db: Arc<Database>,
}

impl InitOrchestrator {
    pub fn new(runner: Arc<ScriptRunner>, db: Arc<Database>) -> Self {
        Self { runner, db }
    }

    pub async fn run_init(&self, enrollment_id: i64) -> Result<InitResult> {
        let (enrollment, track) = {
            let conn = self.db.conn().await;

            let enrollment = EnrollmentStore
                .get(&conn, enrollment_id)?
                .ok_or_else(|| DaemonError::NotFound("Enrollment not found".to_string()))?;

            let track = TrackStore
                .get(&conn, enrollment.track_id)?
                .ok_or_else(|| DaemonError::NotFound("Track not found".to_string()))?;

            (enrollment, track)
        };

        // No init script: the configured URL (if any) is the answer
        if !track.has_init_script() {
            let conn = self.db.conn().await;
            EnrollmentStore.finish_init_success(
                &conn,
                enrollment_id,
                track.app_url_template.as_deref(),
                &[],
            )?;

            return Ok(InitResult::success(track.app_url_template.clone(), Vec::new()));
        }

        match enrollment.init_status {
            InitStatus::Success => {
                return Ok(InitResult::success(
                    enrollment.app_url.clone(),
                    enrollment.app_cookies.clone(),
                ));
            }
            InitStatus::Running => return Ok(InitResult::running()),
            InitStatus::Pending | InitStatus::Failed => {}
        }

        // CAS into running; the loser of a race observes the winner's state
        let won = {
            let conn = self.db.conn().await;
            EnrollmentStore.begin_init(&conn, enrollment_id)?
        };

        if !won {
            let conn = self.db.conn().await;
            let current = EnrollmentStore
                .get(&conn, enrollment_id)?
                .ok_or_else(|| DaemonError::NotFound("Enrollment not found".to_string()))?;

            return Ok(match current.init_status {
                InitStatus::Success => {
                    InitResult::success(current.app_url.clone(), current.app_cookies.clone())
                }
                _ => InitResult::running(),
            });
        }

        info!("Init script started | enrollment_id={}", enrollment_id);

        // Audit the run like any other script execution; init runs belong to
        // the enrollment, not to a step
        let execution_id = {
            let conn = self.db.conn().await;
            ExecutionStore.begin(&conn, enrollment_id, 0, ScriptType::Init)?
        };

        let init_script = track.init_script.as_deref().unwrap_or("");
        let outcome = self
            .runner
            .run(init_script, &track.env_secrets, &track.docker_image)
            .await;

        {
            let conn = self.db.conn().await;
            ExecutionStore.finish(
                &conn,
                execution_id,
                if outcome.success {
                    ExecutionStatus::Success
                } else {
                    ExecutionStatus::Failed
                },
                &outcome.stdout,
                &outcome.stderr,
                outcome.exit_code,
                outcome.duration_ms,
            )?;
        }

        if !outcome.success {
            let error = if outcome.stderr.is_empty() {
                format!("Script exited with code {}", outcome.exit_code)
            } else {
                outcome.stderr.clone()
            };

            warn!(
                "Init script failed | enrollment_id={} | exit_code={}",
                enrollment_id, outcome.exit_code
            );

            let conn = self.db.conn().await;
            EnrollmentStore.finish_init_failed(&conn, enrollment_id, &error)?;
            return Ok(InitResult::failed(error));
        }

        let envelope = match parse_envelope(&outcome.stdout) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(
                    "Init envelope rejected | enrollment_id={} | error={}",
                    enrollment_id, error
                );

                let conn = self.db.conn().await;
                EnrollmentStore.finish_init_failed(&conn, enrollment_id, &error)?;
                return Ok(InitResult::failed(error));
            }
        };

        let url = envelope.url.unwrap_or_default();

        {
            let conn = self.db.conn().await;
            EnrollmentStore.finish_init_success(
                &conn,
                enrollment_id,
                Some(&url),
                &envelope.cookies,
            )?;
        }

        info!(
            "Init script succeeded | enrollment_id={} | url={}",
            enrollment_id, url
        );

        Ok(InitResult::success(Some(url), envelope.cookies))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Enrollment, Track};
    use crate::engine::fake::{FakeEngine, FakeRun};
    use crate::engine::ContainerEngine;
    use std::time::Duration;

    const IMAGE: &str = "livelabs-runner:latest";

    struct Fixture {
        engine: Arc<FakeEngine>,
        db: Arc<Database>,
        orchestrator: InitOrchestrator,
        enrollment_id: i64,
    }

    async fn fixture(mutate: impl FnOnce(&mut Track)) -> Fixture {
        let engine = Arc::new(FakeEngine::with_images(&[IMAGE]));
        let db = Arc::new(Database::open_in_memory().unwrap());

        let enrollment_id = {
            let conn = db.conn().await;

            let mut track = Track::new("t", "T");
            mutate(&mut track);

            let track_id = TrackStore.create(&conn, &track).unwrap();
            EnrollmentStore
                .create(&conn, &Enrollment::new(1, track_id))
                .unwrap()
        };

        let runner = Arc::new(ScriptRunner::new(
            engine.clone() as Arc<dyn ContainerEngine>,
            Duration::from_secs(5),
        ));

        Fixture {
            engine,
            orchestrator: InitOrchestrator::new(runner, db.clone()),
            db,
            enrollment_id,
        }
    }

    #[test]
    fn test_parse_envelope_skips_preamble() {
        let stdout = "starting things up\nmore logs\n{\"url\":\"https://ex.com\",\"cookies\":[{\"name\":\"s\",\"value\":\"1\"}]}";
        let envelope = parse_envelope(stdout).unwrap();

        assert_eq!(envelope.url.as_deref(), Some("https://ex.com"));
        assert_eq!(envelope.cookies.len(), 1);
        assert_eq!(envelope.cookies[0].name, "s");
    }

    #[test]
    fn test_parse_envelope_rejects_missing_url() {
        let err = parse_envelope("{\"cookies\":[]}").unwrap_err();
        assert!(err.contains("'url'"));
    }

    #[test]
    fn test_parse_envelope_rejects_malformed_json() {
        let err = parse_envelope("oops no json here").unwrap_err();
        assert!(err.starts_with("Invalid JSON output:"));

        let err = parse_envelope("log line\n{not json").unwrap_err();
        assert!(err.starts_with("Invalid JSON output:"));
    }

    #[tokio::test]
    async fn test_no_init_script_uses_template() {
        let f = fixture(|track| {
            track.app_url_template = Some("https://dash.example.com".to_string());
        })
        .await;

        let result = f.orchestrator.run_init(f.enrollment_id).await.unwrap();

        assert_eq!(result.status, "success");
        assert_eq!(result.url.as_deref(), Some("https://dash.example.com"));
        assert_eq!(f.engine.created_total(), 0);

        let conn = f.db.conn().await;
        let enrollment = EnrollmentStore.get(&conn, f.enrollment_id).unwrap().unwrap();
        assert_eq!(enrollment.init_status, InitStatus::Success);
        assert_eq!(enrollment.app_url.as_deref(), Some("https://dash.example.com"));
    }

    #[tokio::test]
    async fn test_successful_init_persists_envelope_and_audit() {
        let f = fixture(|track| {
            track.init_script = Some("provision".to_string());
        })
        .await;

        f.engine.plan(
            FakeRun::exit(0)
                .stdout("preamble\n{\"url\":\"https://ex.com\",\"cookies\":[{\"name\":\"s\",\"value\":\"1\"}]}"),
        );

        let result = f.orchestrator.run_init(f.enrollment_id).await.unwrap();

        assert_eq!(result.status, "success");
        assert_eq!(result.url.as_deref(), Some("https://ex.com"));
        assert_eq!(result.cookies.as_ref().unwrap().len(), 1);

        let conn = f.db.conn().await;
        let enrollment = EnrollmentStore.get(&conn, f.enrollment_id).unwrap().unwrap();
        assert_eq!(enrollment.init_status, InitStatus::Success);
        assert_eq!(enrollment.app_url.as_deref(), Some("https://ex.com"));
        assert!(enrollment.init_completed_at.is_some());

        let audit = ExecutionStore.list_for_step(&conn, f.enrollment_id, 0).unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].script_type, ScriptType::Init);
        assert_eq!(audit[0].status, ExecutionStatus::Success);
    }

    #[tokio::test]
    async fn test_failed_script_records_stderr() {
        let f = fixture(|track| {
            track.init_script = Some("exit 2".to_string());
        })
        .await;

        f.engine.plan(FakeRun::exit(2).stderr("cannot reach api\n"));

        let result = f.orchestrator.run_init(f.enrollment_id).await.unwrap();

        assert_eq!(result.status, "failed");
        assert_eq!(result.error.as_deref(), Some("cannot reach api\n"));

        let conn = f.db.conn().await;
        let enrollment = EnrollmentStore.get(&conn, f.enrollment_id).unwrap().unwrap();
        assert_eq!(enrollment.init_status, InitStatus::Failed);
        assert_eq!(enrollment.init_error.as_deref(), Some("cannot reach api\n"));
    }

    #[tokio::test]
    async fn test_malformed_envelope_marks_failed() {
        let f = fixture(|track| {
            track.init_script = Some("echo garbage".to_string());
        })
        .await;

        f.engine.plan(FakeRun::exit(0).stdout("garbage, no envelope"));

        let result = f.orchestrator.run_init(f.enrollment_id).await.unwrap();

        assert_eq!(result.status, "failed");
        assert!(result.error.unwrap().starts_with("Invalid JSON output:"));
    }

    #[tokio::test]
    async fn test_cached_success_skips_second_run() {
        let f = fixture(|track| {
            track.init_script = Some("provision".to_string());
        })
        .await;

        f.engine
            .plan(FakeRun::exit(0).stdout("{\"url\":\"https://ex.com\"}"));

        f.orchestrator.run_init(f.enrollment_id).await.unwrap();
        let second = f.orchestrator.run_init(f.enrollment_id).await.unwrap();

        assert_eq!(second.status, "success");
        assert_eq!(second.url.as_deref(), Some("https://ex.com"));
        assert_eq!(f.engine.created_total(), 1);
    }

    #[tokio::test]
    async fn test_in_flight_run_reports_running() {
        let f = fixture(|track| {
            track.init_script = Some("provision".to_string());
        })
        .await;

        {
            let conn = f.db.conn().await;
            EnrollmentStore.begin_init(&conn, f.enrollment_id).unwrap();
        }

        let result = f.orchestrator.run_init(f.enrollment_id).await.unwrap();
        assert_eq!(result.status, "running");
        assert_eq!(f.engine.created_total(), 0);
    }

    #[tokio::test]
    async fn test_failed_init_can_retry() {
        let f = fixture(|track| {
            track.init_script = Some("provision".to_string());
        })
        .await;

        f.engine.plan(FakeRun::exit(1).stderr("first attempt\n"));
        f.engine
            .plan(FakeRun::exit(0).stdout("{\"url\":\"https://ex.com\"}"));

        let first = f.orchestrator.run_init(f.enrollment_id).await.unwrap();
        assert_eq!(first.status, "failed");

        let second = f.orchestrator.run_init(f.enrollment_id).await.unwrap();
        assert_eq!(second.status, "success");
        assert_eq!(f.engine.created_total(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_inits_run_exactly_one_script() {
        let f = fixture(|track| {
            track.init_script = Some("provision".to_string());
        })
        .await;

        f.engine
            .plan(FakeRun::exit(0).stdout("{\"url\":\"https://ex.com\"}"));
        f.engine
            .plan(FakeRun::exit(0).stdout("{\"url\":\"https://wrong.example\"}"));

        let (a, b, c) = tokio::join!(
            f.orchestrator.run_init(f.enrollment_id),
            f.orchestrator.run_init(f.enrollment_id),
            f.orchestrator.run_init(f.enrollment_id)
        );

        assert_eq!(f.engine.created_total(), 1);

        for result in [a.unwrap(), b.unwrap(), c.unwrap()] {
            match result.status.as_str() {
                "success" => assert_eq!(result.url.as_deref(), Some("https://ex.com")),
                "running" => {}
                other => panic!("unexpected status {}", other),
            }
        }
    }
}
