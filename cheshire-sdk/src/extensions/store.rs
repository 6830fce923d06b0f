//! Extension State Store
//!
//! Persists which extensions are enabled, and the last load error, in
//! SQLite so the set of active extensions survives restarts.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::migrations;
use crate::SDKResult;

/// Persisted state of one extension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionRecord {
    pub id: String,
    pub enabled: bool,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// SQLite-backed extension state
#[derive(Clone)]
pub struct ExtensionStateStore {
    db: Arc<Mutex<Connection>>,
}

impl ExtensionStateStore {
    /// Open (or create) the store at `path` and run migrations
    pub fn open(path: impl AsRef<Path>) -> SDKResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    /// Store that lives only as long as the process
    pub fn open_in_memory() -> SDKResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> SDKResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Record for `id`, if it was ever persisted
    pub async fn get(&self, id: &str) -> SDKResult<Option<ExtensionRecord>> {
        let db = self.db.lock().await;
        let record = db
            .query_row(
                "SELECT id, enabled, updated_at, error FROM cheshire_extensions WHERE id = ?1",
                params![id],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Whether `id` is enabled; extensions never seen before are enabled
    pub async fn is_enabled(&self, id: &str) -> SDKResult<bool> {
        Ok(self.get(id).await?.is_none_or(|r| r.enabled))
    }

    /// Persist the enabled flag
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> SDKResult<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO cheshire_extensions (id, enabled, updated_at, error)
             VALUES (?1, ?2, ?3, NULL)
             ON CONFLICT(id) DO UPDATE SET
                enabled = excluded.enabled,
                updated_at = excluded.updated_at",
            params![id, enabled, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Record (or clear, with `None`) the last load error
    pub async fn record_error(&self, id: &str, error: Option<&str>) -> SDKResult<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO cheshire_extensions (id, enabled, updated_at, error)
             VALUES (?1, 1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                error = excluded.error,
                updated_at = excluded.updated_at",
            params![id, Utc::now().to_rfc3339(), error],
        )?;
        Ok(())
    }

    /// Every persisted record, by id
    pub async fn list(&self) -> SDKResult<Vec<ExtensionRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, enabled, updated_at, error FROM cheshire_extensions ORDER BY id",
        )?;
        let records = stmt
            .query_map([], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Forget an extension
    pub async fn remove(&self, id: &str) -> SDKResult<bool> {
        let db = self.db.lock().await;
        let removed = db.execute("DELETE FROM cheshire_extensions WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExtensionRecord> {
    let updated_at: String = row.get(2)?;
    Ok(ExtensionRecord {
        id: row.get(0)?,
        enabled: row.get(1)?,
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        error: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_unknown_extension_is_enabled() {
        let store = ExtensionStateStore::open_in_memory().unwrap();
        assert!(store.get("pirate").await.unwrap().is_none());
        assert!(store.is_enabled("pirate").await.unwrap());
    }

    #[tokio::test]
    async fn test_enable_disable_and_errors() {
        let store = ExtensionStateStore::open_in_memory().unwrap();

        store.set_enabled("pirate", false).await.unwrap();
        assert!(!store.is_enabled("pirate").await.unwrap());

        store.record_error("pirate", Some("boom")).await.unwrap();
        let record = store.get("pirate").await.unwrap().unwrap();
        assert!(!record.enabled);
        assert_eq!(record.error.as_deref(), Some("boom"));

        store.set_enabled("pirate", true).await.unwrap();
        store.record_error("pirate", None).await.unwrap();
        let record = store.get("pirate").await.unwrap().unwrap();
        assert!(record.enabled);
        assert_eq!(record.error, None);

        assert_eq!(store.list().await.unwrap().len(), 1);
        assert!(store.remove("pirate").await.unwrap());
        assert!(!store.remove("pirate").await.unwrap());
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("cheshire.db");

        {
            let store = ExtensionStateStore::open(&path).unwrap();
            store.set_enabled("pirate", false).await.unwrap();
        }

        let store = ExtensionStateStore::open(&path).unwrap();
        assert!(!store.is_enabled("pirate").await.unwrap());
    }
}
