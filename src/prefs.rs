//! Student preference store
//!
//! Small key/value table in SQLite. Today it holds a single flag, whether
//! the onboarding guide has been dismissed, but the schema is generic.

use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

const GUIDE_SEEN_KEY: &str = "guide_seen";

#[derive(Debug, Error)]
pub enum PrefsError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Handle to the preference database. Cheap to clone; all clones share one
/// connection behind a mutex.
#[derive(Clone)]
pub struct PrefsStore {
    conn: Arc<Mutex<Connection>>,
}

impl PrefsStore {
    pub fn open(path: &Path) -> Result<Self, PrefsError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, PrefsError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, PrefsError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS prefs (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Whether the onboarding guide has already been dismissed. Absent means
    /// not seen.
    pub fn guide_seen(&self) -> Result<bool, PrefsError> {
        Ok(self.get(GUIDE_SEEN_KEY)?.as_deref() == Some("true"))
    }

    pub fn set_guide_seen(&self, seen: bool) -> Result<(), PrefsError> {
        self.set(GUIDE_SEEN_KEY, if seen { "true" } else { "false" })
    }

    fn get(&self, key: &str) -> Result<Option<String>, PrefsError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT value FROM prefs WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PrefsError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO prefs (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guide_seen_defaults_to_false() {
        let store = PrefsStore::open_in_memory().unwrap();
        assert!(!store.guide_seen().unwrap());
    }

    #[test]
    fn guide_seen_round_trips() {
        let store = PrefsStore::open_in_memory().unwrap();
        store.set_guide_seen(true).unwrap();
        assert!(store.guide_seen().unwrap());
        store.set_guide_seen(false).unwrap();
        assert!(!store.guide_seen().unwrap());
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.db");

        {
            let store = PrefsStore::open(&path).unwrap();
            store.set_guide_seen(true).unwrap();
        }

        let store = PrefsStore::open(&path).unwrap();
        assert!(store.guide_seen().unwrap());
    }
}
