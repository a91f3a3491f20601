//! Script execution endpoint

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use crate::database::{
    Enrollment, EnrollmentStore, Execution, ExecutionStatus, ExecutionStore, ScriptType, Step,
    StepStore, Track, TrackStore,
};
use crate::error::{DaemonError, Result};
use crate::router::middleware::auth::{require_owner, Claims};
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub script_type: String,
}

#[derive(Debug, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub duration_ms: i64,
    pub advanced: bool,
}

async fn load_context(
    state: &AppState,
    claims: &Claims,
    enrollment_id: i64,
    step_ord: i64,
) -> Result<(Enrollment, Track, Step)> {
    let conn = state.db.conn().await;

    let enrollment = EnrollmentStore
        .get(&conn, enrollment_id)?
        .ok_or_else(|| DaemonError::NotFound("Enrollment not found".to_string()))?;

    require_owner(claims, enrollment.user_id)?;

    let track = TrackStore
        .get(&conn, enrollment.track_id)?
        .ok_or_else(|| DaemonError::NotFound("Track not found".to_string()))?;

    let step = StepStore
        .get_by_ord(&conn, track.id, step_ord)?
        .ok_or_else(|| DaemonError::NotFound("Step not found".to_string()))?;

    Ok((enrollment, track, step))
}

/// Dispatch a step's setup or validation script to the runner, record the
/// execution, and advance the enrollment on a passing validation.
pub async fn execute_script(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((enrollment_id, step_ord)): Path<(i64, i64)>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<ExecutionResult>> {
    let script_type = match request.script_type.as_str() {
        "setup" => ScriptType::Setup,
        "validation" => ScriptType::Validation,
        _ => {
            return Err(DaemonError::BadRequest(
                "Invalid script type. Use 'setup' or 'validation'".to_string(),
            ))
        }
    };

    let (enrollment, track, step) =
        load_context(&state, &claims, enrollment_id, step_ord).await?;

    // Learners may re-run past steps but never skip ahead
    if step_ord > enrollment.current_step {
        return Err(DaemonError::Forbidden(
            "Cannot execute steps ahead of current progress".to_string(),
        ));
    }

    let script = match script_type {
        ScriptType::Setup => step.setup_script.clone(),
        ScriptType::Validation => step.validation_script.clone(),
        ScriptType::Init => unreachable!(),
    };

    let execution_id = {
        let conn = state.db.conn().await;
        ExecutionStore.begin(&conn, enrollment.id, step.id, script_type)?
    };

    // Track secrets merged beneath the learner's own environment
    let mut env = track.env_secrets.clone();
    env.extend(enrollment.environment.clone());

    let outcome = state.runner.run(&script, &env, &track.docker_image).await;

    let mut advanced = false;

    {
        let conn = state.db.conn().await;

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

        // A passing validation at the current step advances progress; the
        // final step stamps completion instead
        if script_type == ScriptType::Validation
            && outcome.success
            && step_ord == enrollment.current_step
        {
            let total_steps = StepStore.count_for_track(&conn, track.id)?;

            if enrollment.current_step < total_steps {
                EnrollmentStore.advance_step(&conn, enrollment.id)?;
                advanced = true;
            } else if enrollment.current_step == total_steps {
                EnrollmentStore.set_completed(&conn, enrollment.id)?;
                advanced = true;
            }
        }
    }

    Ok(Json(ExecutionResult {
        success: outcome.success,
        stdout: outcome.stdout,
        stderr: outcome.stderr,
        exit_code: outcome.exit_code,
        duration_ms: outcome.duration_ms,
        advanced,
    }))
}

/// Execution history for a step, newest first
pub async fn execution_history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((enrollment_id, step_ord)): Path<(i64, i64)>,
) -> Result<Json<Vec<Execution>>> {
    let (enrollment, _, step) = load_context(&state, &claims, enrollment_id, step_ord).await?;

    let conn = state.db.conn().await;
    let history = ExecutionStore.list_for_step(&conn, enrollment.id, step.id)?;

    Ok(Json(history))
}
