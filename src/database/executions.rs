//! Execution audit persistence
//!
//! Rows are created at script dispatch and finalized exactly once; a row is
//! never amended after its status leaves `running`.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::{DatabaseError, DatabaseResult};

/// Which script of a step (or track) was executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptType {
    Setup,
    Validation,
    Init,
}

impl ScriptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptType::Setup => "setup",
            ScriptType::Validation => "validation",
            ScriptType::Init => "init",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "setup" => Some(ScriptType::Setup),
            "validation" => Some(ScriptType::Validation),
            "init" => Some(ScriptType::Init),
            _ => None,
        }
    }
}

/// Terminal status of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "success" => ExecutionStatus::Success,
            "failed" => ExecutionStatus::Failed,
            _ => ExecutionStatus::Running,
        }
    }
}

/// Append-only audit record of one script run
#[derive(Debug, Clone, Serialize)]
pub struct Execution {
    pub id: i64,
    pub enrollment_id: i64,
    pub step_id: i64,
    pub script_type: ScriptType,
    pub status: ExecutionStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i64>,
    pub duration_ms: Option<i64>,
    pub started_at: i64,
}

/// Store for execution rows
pub struct ExecutionStore;

impl ExecutionStore {
    /// Open an execution record in the `running` state
    pub fn begin(
        &self,
        conn: &Connection,
        enrollment_id: i64,
        step_id: i64,
        script_type: ScriptType,
    ) -> DatabaseResult<i64> {
        conn.execute(
            r#"
            INSERT INTO executions (enrollment_id, step_id, script_type, status)
            VALUES (?1, ?2, ?3, 'running')
            "#,
            rusqlite::params![enrollment_id, step_id, script_type.as_str()],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Finalize a record; only rows still `running` are touched
    pub fn finish(
        &self,
        conn: &Connection,
        id: i64,
        status: ExecutionStatus,
        stdout: &str,
        stderr: &str,
        exit_code: i64,
        duration_ms: i64,
    ) -> DatabaseResult<()> {
        conn.execute(
            r#"
            UPDATE executions
            SET status = ?2, stdout = ?3, stderr = ?4, exit_code = ?5, duration_ms = ?6
            WHERE id = ?1 AND status = 'running'
            "#,
            rusqlite::params![id, status.as_str(), stdout, stderr, exit_code, duration_ms],
        )?;

        Ok(())
    }

    pub fn get(&self, conn: &Connection, id: i64) -> DatabaseResult<Option<Execution>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, enrollment_id, step_id, script_type, status, stdout, stderr,
                   exit_code, duration_ms, started_at
            FROM executions
            WHERE id = ?1
            "#,
        )?;

        let result = stmt.query_row([id], Self::map_row);

        match result {
            Ok(execution) => Ok(Some(execution)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DatabaseError::from(e)),
        }
    }

    /// Execution history for one step, newest first
    pub fn list_for_step(
        &self,
        conn: &Connection,
        enrollment_id: i64,
        step_id: i64,
    ) -> DatabaseResult<Vec<Execution>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, enrollment_id, step_id, script_type, status, stdout, stderr,
                   exit_code, duration_ms, started_at
            FROM executions
            WHERE enrollment_id = ?1 AND step_id = ?2
            ORDER BY started_at DESC, id DESC
            "#,
        )?;

        let executions = stmt
            .query_map([enrollment_id, step_id], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(executions)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Execution> {
        Ok(Execution {
            id: row.get(0)?,
            enrollment_id: row.get(1)?,
            step_id: row.get(2)?,
            script_type: ScriptType::parse(&row.get::<_, String>(3)?)
                .unwrap_or(ScriptType::Setup),
            status: ExecutionStatus::parse(&row.get::<_, String>(4)?),
            stdout: row.get(5)?,
            stderr: row.get(6)?,
            exit_code: row.get(7)?,
            duration_ms: row.get(8)?,
            started_at: row.get(9)?,
        })
    }
}
