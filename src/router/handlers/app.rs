//! App container and init endpoints

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde_json::json;

use crate::apps::url::{append_login_params, auto_login_cookies};
use crate::apps::AppStatus;
use crate::database::{Enrollment, EnrollmentStore, InitStatus, Track, TrackStore};
use crate::error::{DaemonError, Result};
use crate::init::InitResult;
use crate::router::middleware::auth::{require_owner, Claims};
use crate::router::AppState;

async fn load_owned(
    state: &AppState,
    claims: &Claims,
    enrollment_id: i64,
) -> Result<(Enrollment, Track)> {
    let conn = state.db.conn().await;

    let enrollment = EnrollmentStore
        .get(&conn, enrollment_id)?
        .ok_or_else(|| DaemonError::NotFound("Enrollment not found".to_string()))?;

    require_owner(claims, enrollment.user_id)?;

    let track = TrackStore
        .get(&conn, enrollment.track_id)?
        .ok_or_else(|| DaemonError::NotFound("Track not found".to_string()))?;

    Ok((enrollment, track))
}

/// App status for the enrollment.
///
/// Init gates the answer first; then the URL source is resolved in priority
/// order: configured template, init script output, app container.
pub async fn app_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(enrollment_id): Path<i64>,
) -> Result<Json<AppStatus>> {
    let (enrollment, track) = load_owned(&state, &claims, enrollment_id).await?;

    let has_init = track.has_init_script();
    let has_app =
        has_init || track.app_url_template.is_some() || track.app_container_image.is_some();

    if !has_app {
        return Ok(Json(AppStatus::bare("no_app", false)));
    }

    if has_init {
        match enrollment.init_status {
            InitStatus::Pending => return Ok(Json(AppStatus::bare("needs_init", true))),
            InitStatus::Running => return Ok(Json(AppStatus::bare("initializing", true))),
            InitStatus::Failed => {
                // A configured URL makes init failure telemetry, not a blocker
                if track.app_url_template.is_none() {
                    let mut status = AppStatus::bare("init_failed", true);
                    status.error = enrollment.init_error.clone();
                    return Ok(Json(status));
                }
            }
            InitStatus::Success => {}
        }
    }

    if let Some(template) = &track.app_url_template {
        let mut status = AppStatus::bare("ready", true);
        status.kind = Some("external".to_string());
        status.url = Some(append_login_params(&track, template.clone()));
        status.cookies = Some(auto_login_cookies(&track));
        return Ok(Json(status));
    }

    if has_init {
        if let Some(url) = &enrollment.app_url {
            let mut status = AppStatus::bare("ready", true);
            status.kind = Some("external".to_string());
            status.url = Some(url.clone());
            status.cookies = Some(enrollment.app_cookies.clone());
            return Ok(Json(status));
        }
    }

    if track.app_container_image.is_some() {
        return Ok(Json(state.apps.status(enrollment_id).await?));
    }

    Ok(Json(AppStatus::bare("no_app", false)))
}

/// Run the track's initialization script (single-flight per enrollment)
pub async fn run_init(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(enrollment_id): Path<i64>,
) -> Result<Json<InitResult>> {
    load_owned(&state, &claims, enrollment_id).await?;

    let result = state.init.run_init(enrollment_id).await?;
    Ok(Json(result))
}

fn require_app_container(track: &Track) -> Result<()> {
    if track.app_container_image.is_none() {
        return Err(DaemonError::BadRequest(
            "This track does not have an app container configured".to_string(),
        ));
    }
    Ok(())
}

pub async fn start_app(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(enrollment_id): Path<i64>,
) -> Result<Json<AppStatus>> {
    let (_, track) = load_owned(&state, &claims, enrollment_id).await?;
    require_app_container(&track)?;

    state.apps.start(enrollment_id).await?;
    Ok(Json(state.apps.status(enrollment_id).await?))
}

pub async fn restart_app(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(enrollment_id): Path<i64>,
) -> Result<Json<AppStatus>> {
    let (_, track) = load_owned(&state, &claims, enrollment_id).await?;
    require_app_container(&track)?;

    state.apps.restart(enrollment_id).await?;
    Ok(Json(state.apps.status(enrollment_id).await?))
}

pub async fn stop_app(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(enrollment_id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    load_owned(&state, &claims, enrollment_id).await?;

    state.apps.stop(enrollment_id).await?;
    Ok(Json(json!({
        "status": "stopped",
        "message": "Container stopped successfully"
    })))
}
