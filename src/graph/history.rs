//! Append-only log of every edit applied through the mutation engine.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::graph::models::{Change, ChangeAction};

pub struct ChangeHistory {
    conn: Mutex<Connection>,
}

impl ChangeHistory {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_connection(Connection::open(db_path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;

            CREATE TABLE IF NOT EXISTS changes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                node_id TEXT NOT NULL,
                action TEXT NOT NULL,
                file_path TEXT NOT NULL,
                old_source TEXT,
                new_source TEXT,
                old_hash TEXT,
                new_hash TEXT,
                affected_nodes TEXT NOT NULL DEFAULT '[]',
                description TEXT NOT NULL,
                reasoning TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_changes_node ON changes(node_id);
            CREATE INDEX IF NOT EXISTS idx_changes_time ON changes(timestamp);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a change and returns its row id.
    pub fn record(&self, change: &Change) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO changes
            (timestamp, node_id, action, file_path, old_source, new_source, old_hash, new_hash,
             affected_nodes, description, reasoning)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                change.timestamp.to_rfc3339(),
                change.node_id,
                change.action.as_str(),
                change.file_path,
                change.old_source,
                change.new_source,
                change.old_hash,
                change.new_hash,
                serde_json::to_string(&change.affected_nodes)?,
                change.description,
                change.reasoning,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent changes first, optionally restricted to one node.
    pub fn list(&self, node_id: Option<&str>, limit: usize) -> Result<Vec<Change>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, timestamp, node_id, action, file_path, old_source, new_source, old_hash,
                   new_hash, affected_nodes, description, reasoning
            FROM changes
            WHERE ?1 IS NULL OR node_id = ?1
            ORDER BY id DESC
            LIMIT ?2
            "#,
        )?;
        let rows = stmt.query_map(params![node_id, limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, String>(9)?,
                row.get::<_, String>(10)?,
                row.get::<_, Option<String>>(11)?,
            ))
        })?;

        let mut changes = Vec::new();
        for row in rows {
            let (id, ts, node_id, action, file_path, old_source, new_source, old_hash, new_hash, affected, description, reasoning) =
                row?;
            let timestamp = chrono::DateTime::parse_from_rfc3339(&ts)
                .map(|t| t.with_timezone(&chrono::Utc))
                .map_err(|e| crate::error::LensError::Parse(format!("bad timestamp '{}': {}", ts, e)))?;
            changes.push(Change {
                id: Some(id),
                timestamp,
                node_id,
                action: ChangeAction::from_str(&action).unwrap_or(ChangeAction::Modified),
                file_path,
                old_source,
                new_source,
                old_hash,
                new_hash,
                affected_nodes: serde_json::from_str(&affected)?,
                description,
                reasoning,
            });
        }
        Ok(changes)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM changes", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_list() {
        let history = ChangeHistory::in_memory().unwrap();
        let change = Change::new("app.main", ChangeAction::Modified, "app.py", "Updated app.main")
            .with_old("def main(): pass")
            .with_new("def main(): return 1")
            .with_affected(vec!["app.run".into()])
            .with_reasoning(Some("return a value".into()));
        let id = history.record(&change).unwrap();
        assert!(id > 0);

        let listed = history.list(None, 10).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].node_id, "app.main");
        assert_eq!(listed[0].affected_nodes, vec!["app.run"]);
        assert_eq!(listed[0].old_hash, change.old_hash);
        assert_eq!(listed[0].reasoning.as_deref(), Some("return a value"));
    }

    #[test]
    fn test_list_filters_by_node_newest_first() {
        let history = ChangeHistory::in_memory().unwrap();
        for (node, desc) in [("a.f", "first"), ("b.g", "other"), ("a.f", "second")] {
            history
                .record(&Change::new(node, ChangeAction::Modified, "a.py", desc))
                .unwrap();
        }

        let for_f = history.list(Some("a.f"), 10).unwrap();
        assert_eq!(for_f.len(), 2);
        assert_eq!(for_f[0].description, "second");
        assert_eq!(history.count().unwrap(), 3);
    }
}
