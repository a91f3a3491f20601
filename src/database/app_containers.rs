//! App container persistence

use std::collections::BTreeMap;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::{DatabaseError, DatabaseResult};

/// Lifecycle state of a long-lived app container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppContainerStatus {
    Starting,
    Running,
    Stopped,
    Failed,
}

impl AppContainerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppContainerStatus::Starting => "starting",
            AppContainerStatus::Running => "running",
            AppContainerStatus::Stopped => "stopped",
            AppContainerStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "running" => AppContainerStatus::Running,
            "stopped" => AppContainerStatus::Stopped,
            "failed" => AppContainerStatus::Failed,
            _ => AppContainerStatus::Starting,
        }
    }
}

/// One app container owned by an enrollment.
///
/// `ports` maps the container port (as a string key, matching the JSON wire
/// shape) to the bound host port.
#[derive(Debug, Clone)]
pub struct AppContainerRow {
    pub enrollment_id: i64,
    pub container_id: String,
    pub status: AppContainerStatus,
    pub ports: BTreeMap<String, u16>,
    pub started_at: Option<i64>,
    pub last_health_check: Option<i64>,
    pub restart_count: i64,
}

impl AppContainerRow {
    pub fn host_port_for(&self, container_port: u16) -> Option<u16> {
        self.ports.get(&container_port.to_string()).copied()
    }
}

/// Store for app container rows
pub struct AppContainerStore;

impl AppContainerStore {
    /// Insert or replace the row for an enrollment.
    ///
    /// The primary key on `enrollment_id` turns a lost create race into
    /// last-writer-wins over a single row, never a second row.
    pub fn save(&self, conn: &Connection, row: &AppContainerRow) -> DatabaseResult<()> {
        conn.execute(
            r#"
            INSERT OR REPLACE INTO app_containers
                (enrollment_id, container_id, status, ports, started_at,
                 last_health_check, restart_count)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            rusqlite::params![
                row.enrollment_id,
                row.container_id,
                row.status.as_str(),
                serde_json::to_string(&row.ports)?,
                row.started_at,
                row.last_health_check,
                row.restart_count,
            ],
        )?;

        Ok(())
    }

    pub fn get(&self, conn: &Connection, enrollment_id: i64) -> DatabaseResult<Option<AppContainerRow>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT enrollment_id, container_id, status, ports, started_at,
                   last_health_check, restart_count
            FROM app_containers
            WHERE enrollment_id = ?1
            "#,
        )?;

        let result = stmt.query_row([enrollment_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, Option<i64>>(5)?,
                row.get::<_, i64>(6)?,
            ))
        });

        let raw = match result {
            Ok(raw) => raw,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(DatabaseError::from(e)),
        };

        Ok(Some(AppContainerRow {
            enrollment_id: raw.0,
            container_id: raw.1,
            status: AppContainerStatus::parse(&raw.2),
            ports: serde_json::from_str(&raw.3)?,
            started_at: raw.4,
            last_health_check: raw.5,
            restart_count: raw.6,
        }))
    }

    pub fn set_status(
        &self,
        conn: &Connection,
        enrollment_id: i64,
        status: AppContainerStatus,
    ) -> DatabaseResult<()> {
        conn.execute(
            "UPDATE app_containers SET status = ?2 WHERE enrollment_id = ?1",
            rusqlite::params![enrollment_id, status.as_str()],
        )?;

        Ok(())
    }

    /// Record a health probe observation
    pub fn touch_health(
        &self,
        conn: &Connection,
        enrollment_id: i64,
        status: AppContainerStatus,
    ) -> DatabaseResult<()> {
        conn.execute(
            r#"
            UPDATE app_containers
            SET status = ?2, last_health_check = strftime('%s', 'now')
            WHERE enrollment_id = ?1
            "#,
            rusqlite::params![enrollment_id, status.as_str()],
        )?;

        Ok(())
    }

    pub fn increment_restart(&self, conn: &Connection, enrollment_id: i64) -> DatabaseResult<()> {
        conn.execute(
            r#"
            UPDATE app_containers
            SET restart_count = restart_count + 1,
                status = 'running',
                last_health_check = strftime('%s', 'now')
            WHERE enrollment_id = ?1
            "#,
            [enrollment_id],
        )?;

        Ok(())
    }

    pub fn delete(&self, conn: &Connection, enrollment_id: i64) -> DatabaseResult<()> {
        conn.execute(
            "DELETE FROM app_containers WHERE enrollment_id = ?1",
            [enrollment_id],
        )?;

        Ok(())
    }

    pub fn count_for_enrollment(&self, conn: &Connection, enrollment_id: i64) -> DatabaseResult<i64> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM app_containers WHERE enrollment_id = ?1",
            [enrollment_id],
            |row| row.get(0),
        )?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Database, Enrollment, EnrollmentStore, Track, TrackStore};

    async fn seed(db: &Database) -> i64 {
        let conn = db.conn().await;
        let track_id = TrackStore.create(&conn, &Track::new("t", "T")).unwrap();
        EnrollmentStore
            .create(&conn, &Enrollment::new(1, track_id))
            .unwrap()
    }

    fn row(enrollment_id: i64, container_id: &str) -> AppContainerRow {
        let mut ports = BTreeMap::new();
        ports.insert("80".to_string(), 32768);

        AppContainerRow {
            enrollment_id,
            container_id: container_id.to_string(),
            status: AppContainerStatus::Starting,
            ports,
            started_at: Some(1),
            last_health_check: None,
            restart_count: 0,
        }
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let db = Database::open_in_memory().unwrap();
        let eid = seed(&db).await;
        let conn = db.conn().await;

        AppContainerStore.save(&conn, &row(eid, "abc123")).unwrap();

        let loaded = AppContainerStore.get(&conn, eid).unwrap().unwrap();
        assert_eq!(loaded.container_id, "abc123");
        assert_eq!(loaded.host_port_for(80), Some(32768));
        assert_eq!(loaded.restart_count, 0);
    }

    #[tokio::test]
    async fn test_at_most_one_row_per_enrollment() {
        let db = Database::open_in_memory().unwrap();
        let eid = seed(&db).await;
        let conn = db.conn().await;

        AppContainerStore.save(&conn, &row(eid, "first")).unwrap();
        AppContainerStore.save(&conn, &row(eid, "second")).unwrap();

        assert_eq!(AppContainerStore.count_for_enrollment(&conn, eid).unwrap(), 1);
        let loaded = AppContainerStore.get(&conn, eid).unwrap().unwrap();
        assert_eq!(loaded.container_id, "second");
    }

    #[tokio::test]
    async fn test_restart_counter_and_delete() {
        let db = Database::open_in_memory().unwrap();
        let eid = seed(&db).await;
        let conn = db.conn().await;

        AppContainerStore.save(&conn, &row(eid, "abc")).unwrap();
        AppContainerStore.increment_restart(&conn, eid).unwrap();
        AppContainerStore.increment_restart(&conn, eid).unwrap();

        let loaded = AppContainerStore.get(&conn, eid).unwrap().unwrap();
        assert_eq!(loaded.restart_count, 2);
        assert_eq!(loaded.status, AppContainerStatus::Running);
        assert!(loaded.last_health_check.is_some());

        AppContainerStore.delete(&conn, eid).unwrap();
        assert!(AppContainerStore.get(&conn, eid).unwrap().is_none());
    }
}
