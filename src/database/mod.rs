//! State persistence module
//!
//! SQLite-backed storage for the sandbox-owning rows: tracks, steps,
//! enrollments, executions and app containers.

mod app_containers;
mod enrollments;
mod executions;
mod tracks;

pub use app_containers::{AppContainerRow, AppContainerStatus, AppContainerStore};
pub use enrollments::{Cookie, Enrollment, EnrollmentStore, InitStatus};
pub use executions::{Execution, ExecutionStatus, ExecutionStore, ScriptType};
pub use tracks::{AutoLoginConfig, AutoLoginType, PortMapping, Step, StepStore, Track, TrackStore};

use std::path::Path;

use rusqlite::{Connection, Result as SqliteResult};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::info;

/// Database errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Main database wrapper.
///
/// Stores are stateless and operate on a borrowed connection; the guard from
/// [`Database::conn`] is a short-lived unit of work and must never be held
/// across an engine call.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database
    pub fn open(path: impl AsRef<Path>) -> DatabaseResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent access
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        Self::init_tables(&conn)?;

        info!("Database opened at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> DatabaseResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_tables(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection for a unit of work
    pub async fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }

    /// Initialize database tables
    fn init_tables(conn: &Connection) -> SqliteResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tracks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                slug TEXT NOT NULL,
                title TEXT NOT NULL,
                is_published INTEGER NOT NULL DEFAULT 0,
                docker_image TEXT NOT NULL DEFAULT 'livelabs-runner:latest',
                env_secrets TEXT NOT NULL DEFAULT '{}',
                env_template TEXT NOT NULL DEFAULT '[]',
                init_script TEXT,
                app_url_template TEXT,
                app_container_image TEXT,
                app_container_ports TEXT NOT NULL DEFAULT '[]',
                app_container_command TEXT,
                app_container_env TEXT NOT NULL DEFAULT '{}',
                auto_login_type TEXT NOT NULL DEFAULT 'none',
                auto_login_config TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER DEFAULT (strftime('%s', 'now'))
            );

            CREATE TABLE IF NOT EXISTS steps (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                track_id INTEGER NOT NULL REFERENCES tracks(id),
                ord INTEGER NOT NULL,
                title TEXT NOT NULL,
                setup_script TEXT NOT NULL DEFAULT '',
                validation_script TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX IF NOT EXISTS idx_steps_track
                ON steps(track_id, ord);

            CREATE TABLE IF NOT EXISTS enrollments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                track_id INTEGER NOT NULL REFERENCES tracks(id),
                current_step INTEGER NOT NULL DEFAULT 1,
                environment TEXT NOT NULL DEFAULT '{}',
                app_url TEXT,
                app_cookies TEXT NOT NULL DEFAULT '[]',
                init_status TEXT NOT NULL DEFAULT 'pending',
                init_error TEXT,
                init_completed_at INTEGER,
                started_at INTEGER DEFAULT (strftime('%s', 'now')),
                completed_at INTEGER
            );

            CREATE TABLE IF NOT EXISTS executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                enrollment_id INTEGER NOT NULL REFERENCES enrollments(id),
                step_id INTEGER NOT NULL,
                script_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'running',
                stdout TEXT NOT NULL DEFAULT '',
                stderr TEXT NOT NULL DEFAULT '',
                exit_code INTEGER,
                duration_ms INTEGER,
                started_at INTEGER DEFAULT (strftime('%s', 'now'))
            );

            CREATE INDEX IF NOT EXISTS idx_executions_step
                ON executions(enrollment_id, step_id, started_at);

            -- enrollment_id as primary key: at most one app container per
            -- enrollment, enforced by the schema itself
            CREATE TABLE IF NOT EXISTS app_containers (
                enrollment_id INTEGER PRIMARY KEY REFERENCES enrollments(id),
                container_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'starting',
                ports TEXT NOT NULL DEFAULT '{}',
                started_at INTEGER,
                last_health_check INTEGER,
                restart_count INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_open() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn().await;

        let track_id = TrackStore.create(&conn, &Track::new("intro", "Intro Track")).unwrap();
        let loaded = TrackStore.get(&conn, track_id).unwrap();

        assert!(loaded.is_some());
        assert_eq!(loaded.unwrap().slug, "intro");
    }

    #[tokio::test]
    async fn test_database_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("state.db")).unwrap();
        let conn = db.conn().await;

        assert!(TrackStore.get(&conn, 1).unwrap().is_none());
    }
}
