//! Durable preference store.
//!
//! A single SQLite file holding JSON-encoded values keyed by name. The
//! connection is opened lazily on first use and shared afterwards;
//! concurrent first uses wait on the same open. Queries run on the blocking
//! pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::OnceCell;

pub const WASM_ENABLED: &str = "wasm-enabled";
pub const THEME: &str = "theme";

/// Default database file name inside the data directory.
pub const DATABASE_FILE: &str = "settings.db";

const SCHEMA_VERSION: i32 = 1;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Settings database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Invalid setting value: {0}")]
    Value(#[from] serde_json::Error),
    #[error("Cannot create settings directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("Settings task failed: {0}")]
    Task(String),
}

fn task_failed(err: tokio::task::JoinError) -> SettingsError {
    SettingsError::Task(err.to_string())
}

#[derive(Clone)]
pub struct SettingsStore {
    path: PathBuf,
    conn: Arc<OnceCell<Arc<Mutex<Connection>>>>,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: Arc::new(OnceCell::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn connection(&self) -> Result<Arc<Mutex<Connection>>, SettingsError> {
        self.conn
            .get_or_try_init(|| async {
                let path = self.path.clone();
                let conn = tokio::task::spawn_blocking(move || open(&path))
                    .await
                    .map_err(task_failed)??;
                log::debug!("Opened settings store at {}", self.path.display());
                Ok::<_, SettingsError>(Arc::new(Mutex::new(conn)))
            })
            .await
            .cloned()
    }

    /// Read and decode one value. `None` if never set.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SettingsError> {
        let conn = self.connection().await?;
        let key = key.to_string();
        let raw = tokio::task::spawn_blocking(move || {
            conn.lock()
                .query_row(
                    "SELECT value FROM settings WHERE key = ?1",
                    params![key],
                    |row| row.get::<_, String>(0),
                )
                .optional()
        })
        .await
        .map_err(task_failed)??;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), SettingsError> {
        let value = serde_json::to_string(value)?;
        let conn = self.connection().await?;
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            conn.lock().execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
        })
        .await
        .map_err(task_failed)??;
        Ok(())
    }

    pub async fn wasm_enabled(&self) -> Result<bool, SettingsError> {
        Ok(self.get(WASM_ENABLED).await?.unwrap_or(false))
    }

    pub async fn set_wasm_enabled(&self, enabled: bool) -> Result<(), SettingsError> {
        self.set(WASM_ENABLED, &enabled).await
    }

    pub async fn theme(&self) -> Result<String, SettingsError> {
        Ok(self.get(THEME).await?.unwrap_or_default())
    }

    pub async fn set_theme(&self, theme: &str) -> Result<(), SettingsError> {
        self.set(THEME, &theme).await
    }
}

fn open(path: &Path) -> Result<Connection, SettingsError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path)?;
    migrate(&conn)?;
    Ok(conn)
}

fn migrate(conn: &Connection) -> Result<(), SettingsError> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version < 1 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS settings (
                 key   TEXT PRIMARY KEY NOT NULL,
                 value TEXT NOT NULL
             );",
        )?;
    }
    if version < SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        log::info!("Settings store migrated to version {}", SCHEMA_VERSION);
    }
    Ok(())
}
