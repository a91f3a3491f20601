//! Enrollment persistence

use std::collections::HashMap;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::{DatabaseError, DatabaseResult};

/// A cookie the UI injects client-side for auto-login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

/// Init script lifecycle state.
///
/// Transitions follow `pending -> running -> {success, failed}` plus
/// `failed -> running` on explicit retry; the transition into `running` is a
/// compare-and-set so concurrent init requests collapse to one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
}

impl InitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InitStatus::Pending => "pending",
            InitStatus::Running => "running",
            InitStatus::Success => "success",
            InitStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "running" => InitStatus::Running,
            "success" => InitStatus::Success,
            "failed" => InitStatus::Failed,
            _ => InitStatus::Pending,
        }
    }
}

/// Enrollment record - the unit of sandbox ownership
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub id: i64,
    pub user_id: i64,
    pub track_id: i64,
    /// 1-indexed order of the step the learner is on
    pub current_step: i64,
    /// Learner-supplied environment, merged over the track secrets
    pub environment: HashMap<String, String>,
    pub app_url: Option<String>,
    pub app_cookies: Vec<Cookie>,
    pub init_status: InitStatus,
    pub init_error: Option<String>,
    pub init_completed_at: Option<i64>,
    pub started_at: i64,
    pub completed_at: Option<i64>,
}

impl Enrollment {
    pub fn new(user_id: i64, track_id: i64) -> Self {
        Self {
            id: 0,
            user_id,
            track_id,
            current_step: 1,
            environment: HashMap::new(),
            app_url: None,
            app_cookies: Vec::new(),
            init_status: InitStatus::Pending,
            init_error: None,
            init_completed_at: None,
            started_at: 0,
            completed_at: None,
        }
    }
}

/// Store for enrollment rows
pub struct EnrollmentStore;

impl EnrollmentStore {
    pub fn create(&self, conn: &Connection, enrollment: &Enrollment) -> DatabaseResult<i64> {
        conn.execute(
            r#"
            INSERT INTO enrollments (user_id, track_id, current_step, environment, init_status)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            rusqlite::params![
                enrollment.user_id,
                enrollment.track_id,
                enrollment.current_step,
                serde_json::to_string(&enrollment.environment)?,
                enrollment.init_status.as_str(),
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    pub fn get(&self, conn: &Connection, id: i64) -> DatabaseResult<Option<Enrollment>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, user_id, track_id, current_step, environment, app_url, app_cookies,
                   init_status, init_error, init_completed_at, started_at, completed_at
            FROM enrollments
            WHERE id = ?1
            "#,
        )?;

        let result = stmt.query_row([id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, Option<i64>>(9)?,
                row.get::<_, i64>(10)?,
                row.get::<_, Option<i64>>(11)?,
            ))
        });

        let raw = match result {
            Ok(raw) => raw,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(DatabaseError::from(e)),
        };

        Ok(Some(Enrollment {
            id: raw.0,
            user_id: raw.1,
            track_id: raw.2,
            current_step: raw.3,
            environment: serde_json::from_str(&raw.4)?,
            app_url: raw.5,
            app_cookies: serde_json::from_str(&raw.6)?,
            init_status: InitStatus::parse(&raw.7),
            init_error: raw.8,
            init_completed_at: raw.9,
            started_at: raw.10,
            completed_at: raw.11,
        }))
    }

    /// Compare-and-set the init status to `running`.
    ///
    /// Succeeds only from `pending` or `failed`; the returned flag is the
    /// single-flight gate for concurrent init requests.
    pub fn begin_init(&self, conn: &Connection, id: i64) -> DatabaseResult<bool> {
        let changed = conn.execute(
            r#"
            UPDATE enrollments
            SET init_status = 'running', init_error = NULL
            WHERE id = ?1 AND init_status IN ('pending', 'failed')
            "#,
            [id],
        )?;

        Ok(changed > 0)
    }

    pub fn finish_init_success(
        &self,
        conn: &Connection,
        id: i64,
        url: Option<&str>,
        cookies: &[Cookie],
    ) -> DatabaseResult<()> {
        conn.execute(
            r#"
            UPDATE enrollments
            SET init_status = 'success', init_error = NULL, app_url = ?2, app_cookies = ?3,
                init_completed_at = strftime('%s', 'now')
            WHERE id = ?1
            "#,
            rusqlite::params![id, url, serde_json::to_string(cookies)?],
        )?;

        Ok(())
    }

    pub fn finish_init_failed(&self, conn: &Connection, id: i64, error: &str) -> DatabaseResult<()> {
        conn.execute(
            r#"
            UPDATE enrollments
            SET init_status = 'failed', init_error = ?2
            WHERE id = ?1
            "#,
            rusqlite::params![id, error],
        )?;

        Ok(())
    }

    /// Advance the learner to the next step
    pub fn advance_step(&self, conn: &Connection, id: i64) -> DatabaseResult<()> {
        conn.execute(
            "UPDATE enrollments SET current_step = current_step + 1 WHERE id = ?1",
            [id],
        )?;

        Ok(())
    }

    /// Mark the enrollment finished
    pub fn set_completed(&self, conn: &Connection, id: i64) -> DatabaseResult<()> {
        conn.execute(
            "UPDATE enrollments SET completed_at = strftime('%s', 'now') WHERE id = ?1",
            [id],
        )?;

        Ok(())
    }
}
