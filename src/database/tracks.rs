//! Track and step persistence

use std::collections::HashMap;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::enrollments::Cookie;
use super::{DatabaseError, DatabaseResult};

/// One port mapping requested by a track.
///
/// `host: None` means the orchestrator picks a free ephemeral port at start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortMapping {
    pub container: u16,
    #[serde(default)]
    pub host: Option<u16>,
}

/// Auto-login mechanism for the lab app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoLoginType {
    #[default]
    None,
    UrlParams,
    Cookies,
}

impl AutoLoginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoLoginType::None => "none",
            AutoLoginType::UrlParams => "url_params",
            AutoLoginType::Cookies => "cookies",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "url_params" => AutoLoginType::UrlParams,
            "cookies" => AutoLoginType::Cookies,
            _ => AutoLoginType::None,
        }
    }
}

/// Auto-login payload; which half is used depends on [`AutoLoginType`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoLoginConfig {
    #[serde(default)]
    pub params: HashMap<String, String>,

    #[serde(default)]
    pub cookies: Vec<Cookie>,
}

/// Track record as consumed by the sandbox core
#[derive(Debug, Clone)]
pub struct Track {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub is_published: bool,

    /// Image used for one-shot scripts and terminal sessions
    pub docker_image: String,

    /// Author-supplied secrets, merged beneath the learner's environment
    pub env_secrets: HashMap<String, String>,

    /// Documents the environment keys the learner must provide
    pub env_template: Vec<serde_json::Value>,

    pub init_script: Option<String>,
    pub app_url_template: Option<String>,
    pub app_container_image: Option<String>,
    pub app_container_ports: Vec<PortMapping>,
    pub app_container_command: Option<Vec<String>>,
    pub app_container_env: HashMap<String, String>,
    pub auto_login_type: AutoLoginType,
    pub auto_login_config: AutoLoginConfig,
}

impl Track {
    pub fn new(slug: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: 0,
            slug: slug.into(),
            title: title.into(),
            is_published: false,
            docker_image: "livelabs-runner:latest".to_string(),
            env_secrets: HashMap::new(),
            env_template: Vec::new(),
            init_script: None,
            app_url_template: None,
            app_container_image: None,
            app_container_ports: Vec::new(),
            app_container_command: None,
            app_container_env: HashMap::new(),
            auto_login_type: AutoLoginType::None,
            auto_login_config: AutoLoginConfig::default(),
        }
    }

    /// Whether the init script is present and non-blank
    pub fn has_init_script(&self) -> bool {
        self.init_script
            .as_deref()
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false)
    }
}

/// One ordered unit of a track
#[derive(Debug, Clone)]
pub struct Step {
    pub id: i64,
    pub track_id: i64,
    pub ord: i64,
    pub title: String,
    pub setup_script: String,
    pub validation_script: String,
}

/// Store for track rows
pub struct TrackStore;

impl TrackStore {
    pub fn create(&self, conn: &Connection, track: &Track) -> DatabaseResult<i64> {
        conn.execute(
            r#"
            INSERT INTO tracks
                (slug, title, is_published, docker_image, env_secrets, env_template,
                 init_script, app_url_template, app_container_image, app_container_ports,
                 app_container_command, app_container_env, auto_login_type, auto_login_config)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            rusqlite::params![
                track.slug,
                track.title,
                track.is_published as i32,
                track.docker_image,
                serde_json::to_string(&track.env_secrets)?,
                serde_json::to_string(&track.env_template)?,
                track.init_script,
                track.app_url_template,
                track.app_container_image,
                serde_json::to_string(&track.app_container_ports)?,
                track
                    .app_container_command
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                serde_json::to_string(&track.app_container_env)?,
                track.auto_login_type.as_str(),
                serde_json::to_string(&track.auto_login_config)?,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    pub fn get(&self, conn: &Connection, id: i64) -> DatabaseResult<Option<Track>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, slug, title, is_published, docker_image, env_secrets, env_template,
                   init_script, app_url_template, app_container_image, app_container_ports,
                   app_container_command, app_container_env, auto_login_type, auto_login_config
            FROM tracks
            WHERE id = ?1
            "#,
        )?;

        let result = stmt.query_row([id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i32>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, Option<String>>(9)?,
                row.get::<_, String>(10)?,
                row.get::<_, Option<String>>(11)?,
                row.get::<_, String>(12)?,
                row.get::<_, String>(13)?,
                row.get::<_, String>(14)?,
            ))
        });

        let raw = match result {
            Ok(raw) => raw,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(DatabaseError::from(e)),
        };

        Ok(Some(Track {
            id: raw.0,
            slug: raw.1,
            title: raw.2,
            is_published: raw.3 != 0,
            docker_image: raw.4,
            env_secrets: serde_json::from_str(&raw.5)?,
            env_template: serde_json::from_str(&raw.6)?,
            init_script: raw.7,
            app_url_template: raw.8,
            app_container_image: raw.9,
            app_container_ports: serde_json::from_str(&raw.10)?,
            app_container_command: raw.11.as_deref().map(serde_json::from_str).transpose()?,
            app_container_env: serde_json::from_str(&raw.12)?,
            auto_login_type: AutoLoginType::parse(&raw.13),
            auto_login_config: serde_json::from_str(&raw.14)?,
        }))
    }
}

/// Store for step rows
pub struct StepStore;

impl StepStore {
    pub fn create(&self, conn: &Connection, step: &Step) -> DatabaseResult<i64> {
        conn.execute(
            r#"
            INSERT INTO steps (track_id, ord, title, setup_script, validation_script)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            rusqlite::params![
                step.track_id,
                step.ord,
                step.title,
                step.setup_script,
                step.validation_script,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    pub fn get_by_ord(
        &self,
        conn: &Connection,
        track_id: i64,
        ord: i64,
    ) -> DatabaseResult<Option<Step>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, track_id, ord, title, setup_script, validation_script
            FROM steps
            WHERE track_id = ?1 AND ord = ?2
            "#,
        )?;

        let result = stmt.query_row([track_id, ord], |row| {
            Ok(Step {
                id: row.get(0)?,
                track_id: row.get(1)?,
                ord: row.get(2)?,
                title: row.get(3)?,
                setup_script: row.get(4)?,
                validation_script: row.get(5)?,
            })
        });

        match result {
            Ok(step) => Ok(Some(step)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DatabaseError::from(e)),
        }
    }

    pub fn count_for_track(&self, conn: &Connection, track_id: i64) -> DatabaseResult<i64> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM steps WHERE track_id = ?1",
            [track_id],
            |row| row.get(0),
        )?;

        Ok(count)
    }
}
