use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub key: String,
    pub value: String,
    pub updated_at: String,
}

/// Key-value notes that outlive a single agent session.
pub struct SessionNotes {
    conn: Mutex<Connection>,
}

impl SessionNotes {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_connection(Connection::open(db_path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS notes (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO notes (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()
            .query_row("SELECT value FROM notes WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn list(&self) -> Result<Vec<Note>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT key, value, updated_at FROM notes ORDER BY key")?;
        let notes = stmt
            .query_map([], |row| {
                Ok(Note {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    updated_at: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(notes)
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        let removed = self
            .conn()
            .execute("DELETE FROM notes WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_overwrite() {
        let notes = SessionNotes::in_memory().unwrap();
        assert_eq!(notes.get("plan").unwrap(), None);
        notes.set("plan", "refactor parser").unwrap();
        notes.set("plan", "refactor resolver").unwrap();
        assert_eq!(notes.get("plan").unwrap().as_deref(), Some("refactor resolver"));
    }

    #[test]
    fn test_list_and_delete() {
        let notes = SessionNotes::in_memory().unwrap();
        notes.set("b", "2").unwrap();
        notes.set("a", "1").unwrap();

        let keys: Vec<String> = notes.list().unwrap().into_iter().map(|n| n.key).collect();
        assert_eq!(keys, vec!["a", "b"]);

        assert!(notes.delete("a").unwrap());
        assert!(!notes.delete("a").unwrap());
        assert_eq!(notes.list().unwrap().len(), 1);
    }
}
