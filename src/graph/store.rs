use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};

use crate::error::{LensError, Result};
use crate::graph::models::{
    Annotation, Confidence, Direction, Edge, EdgeKind, EdgeSource, FileGraph, Fingerprint, Node,
    NodeFilter, NodeKind, NodeMetrics, SearchField,
};

const NODE_COLUMNS: &str = "n.id, n.kind, n.name, n.qualified_name, n.file_path, n.start_line, \
     n.end_line, n.source_code, n.docstring, n.signature, n.hash, n.metadata, n.annotation, m.data";

const EDGE_COLUMNS: &str = "id, from_node, to_node, kind, line, col, confidence, source, \
     untracked_reason, metadata, origin_file";

/// Aggregate counts over the stored graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphStats {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub files: usize,
    pub nodes_by_kind: BTreeMap<String, usize>,
    pub edges_by_kind: BTreeMap<String, usize>,
    pub edges_by_confidence: BTreeMap<String, usize>,
    pub revision: u64,
}

/// Persistent node/edge store backed by SQLite.
pub struct GraphStore {
    conn: Mutex<Connection>,
}

impl GraphStore {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::configure_pragmas(&conn)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure_pragmas(&conn)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// WAL lets readers proceed while a sync transaction is open.
    fn configure_pragmas(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            PRAGMA temp_store = MEMORY;
            "#,
        )?;
        Ok(())
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                qualified_name TEXT NOT NULL,
                file_path TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                source_code TEXT NOT NULL,
                docstring TEXT,
                signature TEXT,
                hash TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                annotation TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_nodes_file ON nodes(file_path);
            CREATE INDEX IF NOT EXISTS idx_nodes_name ON nodes(name);
            CREATE INDEX IF NOT EXISTS idx_nodes_kind ON nodes(kind);

            CREATE TABLE IF NOT EXISTS edges (
                id TEXT PRIMARY KEY,
                from_node TEXT NOT NULL,
                to_node TEXT NOT NULL,
                kind TEXT NOT NULL,
                line INTEGER,
                col INTEGER,
                confidence TEXT NOT NULL,
                source TEXT NOT NULL DEFAULT 'static',
                untracked_reason TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                origin_file TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_edges_from ON edges(from_node);
            CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_node);
            CREATE INDEX IF NOT EXISTS idx_edges_origin ON edges(origin_file);

            CREATE TABLE IF NOT EXISTS metrics (
                node_id TEXT PRIMARY KEY,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS fingerprints (
                path TEXT PRIMARY KEY,
                mtime_ns INTEGER NOT NULL,
                size INTEGER NOT NULL,
                content_hash TEXT NOT NULL
            );

            -- Per-position answers from the external semantic analyzer
            CREATE TABLE IF NOT EXISTS semantic_cache (
                file_path TEXT NOT NULL,
                line INTEGER NOT NULL,
                col INTEGER NOT NULL,
                target TEXT,
                PRIMARY KEY (file_path, line, col)
            );

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            INSERT OR IGNORE INTO meta (key, value) VALUES ('graph_revision', '0');
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // === Bulk writes ===

    /// Atomically discards the whole graph and writes the given sets.
    pub fn replace_all(&self, nodes: &[Node], edges: &[Edge]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let annotations = Self::annotations_tx(&tx)?;

        tx.execute("DELETE FROM edges", [])?;
        tx.execute("DELETE FROM metrics", [])?;
        tx.execute("DELETE FROM nodes", [])?;

        for node in nodes {
            Self::insert_node(&tx, node, annotations.get(&node.id))?;
        }
        for edge in edges {
            Self::insert_edge(&tx, edge)?;
        }
        Self::bump_revision(&tx)?;

        tx.commit()?;
        Ok(())
    }

    /// Replaces the rows produced by each file's parse.
    ///
    /// Edges produced by the file are dropped with its nodes. Edges produced by other
    /// files survive unless their target was one of the file's nodes and is gone now.
    /// Every file's old rows are removed before any new row is written, so an id may
    /// move between files of the same batch.
    pub fn replace_files(&self, files: &[FileGraph]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let mut old_ids: HashSet<String> = HashSet::new();
        let mut carried: HashMap<String, Annotation> = HashMap::new();
        for file in files {
            {
                let mut stmt = tx.prepare("SELECT id FROM nodes WHERE file_path = ?1")?;
                let ids = stmt
                    .query_map(params![file.file_path], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?;
                old_ids.extend(ids);
            }
            {
                let mut stmt = tx.prepare(
                    "SELECT id, annotation FROM nodes WHERE file_path = ?1 AND annotation IS NOT NULL",
                )?;
                let rows = stmt.query_map(params![file.file_path], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                for row in rows {
                    let (id, raw) = row?;
                    carried.insert(id, serde_json::from_str(&raw)?);
                }
            }

            tx.execute(
                "DELETE FROM edges WHERE origin_file = ?1",
                params![file.file_path],
            )?;
            tx.execute(
                "DELETE FROM metrics WHERE node_id IN (SELECT id FROM nodes WHERE file_path = ?1)",
                params![file.file_path],
            )?;
            tx.execute(
                "DELETE FROM nodes WHERE file_path = ?1",
                params![file.file_path],
            )?;
        }

        for file in files {
            for node in &file.nodes {
                Self::insert_node(&tx, node, carried.get(&node.id))?;
            }
            for edge in &file.edges {
                Self::insert_edge(&tx, edge)?;
            }
        }

        let new_ids: HashSet<&str> = files
            .iter()
            .flat_map(|f| f.nodes.iter().map(|n| n.id.as_str()))
            .collect();
        for vanished in old_ids.iter().filter(|id| !new_ids.contains(id.as_str())) {
            let pruned = tx.execute("DELETE FROM edges WHERE to_node = ?1", params![vanished])?;
            if pruned > 0 {
                tracing::debug!("Pruned {} dangling edges into {}", pruned, vanished);
            }
        }

        Self::bump_revision(&tx)?;
        tx.commit()?;
        Ok(())
    }

    pub fn replace_metrics(&self, metrics: &HashMap<String, NodeMetrics>) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM metrics", [])?;
        {
            let mut stmt = tx.prepare("INSERT INTO metrics (node_id, data) VALUES (?1, ?2)")?;
            for (node_id, data) in metrics {
                stmt.execute(params![node_id, serde_json::to_string(data)?])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn insert_node(tx: &Transaction, node: &Node, carried: Option<&Annotation>) -> Result<()> {
        let annotation = node.annotation.as_ref().or(carried);
        let annotation = annotation.map(serde_json::to_string).transpose()?;
        let taken: Option<String> = tx
            .query_row("SELECT file_path FROM nodes WHERE id = ?1", params![node.id], |row| row.get(0))
            .optional()?;
        if taken.is_some() {
            return Err(LensError::DuplicateNode {
                id: node.id.clone(),
                file: node.file_path.clone(),
            });
        }
        tx.execute(
            r#"
            INSERT INTO nodes
            (id, kind, name, qualified_name, file_path, start_line, end_line, source_code,
             docstring, signature, hash, metadata, annotation)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                node.id,
                node.kind.as_str(),
                node.name,
                node.qualified_name,
                node.file_path,
                node.start_line as i64,
                node.end_line as i64,
                node.source_code,
                node.docstring,
                node.signature,
                node.hash,
                node.metadata.to_string(),
                annotation,
            ],
        )?;
        if let Some(metrics) = &node.metrics {
            tx.execute(
                "INSERT OR REPLACE INTO metrics (node_id, data) VALUES (?1, ?2)",
                params![node.id, serde_json::to_string(metrics)?],
            )?;
        }
        Ok(())
    }

    fn insert_edge(tx: &Transaction, edge: &Edge) -> Result<()> {
        tx.execute(
            r#"
            INSERT OR REPLACE INTO edges
            (id, from_node, to_node, kind, line, col, confidence, source, untracked_reason,
             metadata, origin_file)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                edge.id,
                edge.from_node,
                edge.to_node,
                edge.kind.as_str(),
                edge.line.map(|l| l as i64),
                edge.column.map(|c| c as i64),
                edge.confidence.as_str(),
                edge.source.as_str(),
                edge.untracked_reason,
                edge.metadata.to_string(),
                edge.origin_file,
            ],
        )?;
        Ok(())
    }

    fn bump_revision(tx: &Transaction) -> Result<()> {
        tx.execute(
            "UPDATE meta SET value = CAST(CAST(value AS INTEGER) + 1 AS TEXT) WHERE key = 'graph_revision'",
            [],
        )?;
        Ok(())
    }

    pub fn revision(&self) -> Result<u64> {
        let conn = self.conn();
        let rev: String = conn.query_row(
            "SELECT value FROM meta WHERE key = 'graph_revision'",
            [],
            |row| row.get(0),
        )?;
        Ok(rev.parse().unwrap_or(0))
    }

    // === Reads ===

    pub fn load_all(&self) -> Result<(Vec<Node>, Vec<Edge>)> {
        let conn = self.conn();
        let nodes = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM nodes n LEFT JOIN metrics m ON m.node_id = n.id ORDER BY n.id",
                NODE_COLUMNS
            ))?;
            let rows = stmt
                .query_map([], Self::node_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        let edges = {
            let mut stmt = conn.prepare(&format!("SELECT {} FROM edges ORDER BY id", EDGE_COLUMNS))?;
            let rows = stmt
                .query_map([], Self::edge_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        Ok((nodes, edges))
    }

    pub fn get_node(&self, id: &str) -> Result<Option<Node>> {
        let conn = self.conn();
        let node = conn
            .query_row(
                &format!(
                    "SELECT {} FROM nodes n LEFT JOIN metrics m ON m.node_id = n.id WHERE n.id = ?1",
                    NODE_COLUMNS
                ),
                params![id],
                Self::node_from_row,
            )
            .optional()?;
        Ok(node)
    }

    pub fn list_nodes(&self, filter: &NodeFilter) -> Result<Vec<Node>> {
        let conn = self.conn();
        let mut sql = format!(
            "SELECT {} FROM nodes n LEFT JOIN metrics m ON m.node_id = n.id WHERE 1=1",
            NODE_COLUMNS
        );
        let mut args: Vec<String> = Vec::new();

        if let Some(kind) = filter.kind {
            args.push(kind.as_str().to_string());
            sql.push_str(&format!(" AND n.kind = ?{}", args.len()));
        }
        if let Some(file) = &filter.file_path {
            args.push(file.clone());
            sql.push_str(&format!(" AND n.file_path = ?{}", args.len()));
        }
        if let Some(fragment) = &filter.name_contains {
            args.push(fragment.to_lowercase());
            sql.push_str(&format!(" AND instr(lower(n.name), ?{}) > 0", args.len()));
        }
        sql.push_str(" ORDER BY n.file_path, n.start_line, n.id");

        let mut stmt = conn.prepare(&sql)?;
        let nodes = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), Self::node_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(nodes)
    }

    pub fn nodes_in_file(&self, file_path: &str) -> Result<Vec<Node>> {
        self.list_nodes(&NodeFilter::default().file(file_path))
    }

    pub fn get_edges(&self, id: &str, direction: Direction) -> Result<Vec<Edge>> {
        let conn = self.conn();
        let clause = match direction {
            Direction::Incoming => "to_node = ?1",
            Direction::Outgoing => "from_node = ?1",
            Direction::Both => "from_node = ?1 OR to_node = ?1",
        };
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM edges WHERE {} ORDER BY origin_file, line, col, id",
            EDGE_COLUMNS, clause
        ))?;
        let edges = stmt
            .query_map(params![id], Self::edge_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(edges)
    }

    /// Deletes a node together with its id-prefix subtree and every touching edge.
    pub fn delete_node(&self, id: &str) -> Result<Vec<String>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let prefix = format!("{}.", id);
        let removed: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM nodes WHERE id = ?1 OR substr(id, 1, length(?2)) = ?2 ORDER BY id",
            )?;
            let ids = stmt
                .query_map(params![id, prefix], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            ids
        };

        for node_id in &removed {
            tx.execute(
                "DELETE FROM edges WHERE from_node = ?1 OR to_node = ?1",
                params![node_id],
            )?;
            tx.execute("DELETE FROM metrics WHERE node_id = ?1", params![node_id])?;
            tx.execute("DELETE FROM nodes WHERE id = ?1", params![node_id])?;
        }
        if !removed.is_empty() {
            Self::bump_revision(&tx)?;
        }

        tx.commit()?;
        Ok(removed)
    }

    pub fn search(&self, query: &str, field: SearchField, limit: usize) -> Result<Vec<Node>> {
        let conn = self.conn();
        let clause = match field {
            SearchField::Name => "instr(lower(n.name), ?1) > 0 OR instr(lower(n.id), ?1) > 0",
            SearchField::Code => "instr(lower(n.source_code), ?1) > 0",
            SearchField::Docstring => "instr(lower(coalesce(n.docstring, '')), ?1) > 0",
            SearchField::All => {
                "instr(lower(n.id), ?1) > 0 OR instr(lower(n.source_code), ?1) > 0 \
                 OR instr(lower(coalesce(n.docstring, '')), ?1) > 0"
            }
        };
        // Exact name matches first, then shorter ids.
        let sql = format!(
            "SELECT {} FROM nodes n LEFT JOIN metrics m ON m.node_id = n.id WHERE {} \
             ORDER BY (lower(n.name) = ?1) DESC, length(n.id), n.id LIMIT ?2",
            NODE_COLUMNS, clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let nodes = stmt
            .query_map(params![query.to_lowercase(), limit as i64], Self::node_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(nodes)
    }

    /// id -> hash for every stored node.
    pub fn node_hashes(&self) -> Result<HashMap<String, String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, hash FROM nodes")?;
        let map = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<HashMap<String, String>>>()?;
        Ok(map)
    }

    /// `(id, file_path)` of every stored node.
    pub fn node_locations(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, file_path FROM nodes ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<(String, String)>>>()?;
        Ok(rows)
    }

    pub fn file_paths(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT DISTINCT file_path FROM nodes ORDER BY file_path")?;
        let paths = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(paths)
    }

    /// Module id of every stored file, keyed by file path.
    pub fn module_ids(&self) -> Result<HashMap<String, String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT file_path, id FROM nodes WHERE kind = 'module'")?;
        let map = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<HashMap<String, String>>>()?;
        Ok(map)
    }

    /// Other files holding edges into `file_path`'s nodes.
    pub fn files_referencing(&self, file_path: &str) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT e.origin_file FROM edges e JOIN nodes n ON n.id = e.to_node \
             WHERE n.file_path = ?1 AND e.origin_file != ?1 ORDER BY e.origin_file",
        )?;
        let files = stmt
            .query_map(params![file_path], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(files)
    }

    /// Module nodes and every node carrying an export name.
    pub fn exported_nodes(&self) -> Result<Vec<Node>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM nodes n LEFT JOIN metrics m ON m.node_id = n.id \
             WHERE n.kind = 'module' OR json_extract(n.metadata, '$.export') IS NOT NULL \
             ORDER BY n.id",
            NODE_COLUMNS
        ))?;
        let nodes = stmt
            .query_map([], Self::node_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(nodes)
    }

    // === Annotations ===

    pub fn set_annotation(&self, id: &str, annotation: &Annotation) -> Result<bool> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE nodes SET annotation = ?1 WHERE id = ?2",
            params![serde_json::to_string(annotation)?, id],
        )?;
        Ok(updated > 0)
    }

    pub fn annotations(&self) -> Result<HashMap<String, Annotation>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let map = Self::annotations_tx(&tx)?;
        tx.commit()?;
        Ok(map)
    }

    fn annotations_tx(tx: &Transaction) -> Result<HashMap<String, Annotation>> {
        let mut stmt = tx.prepare("SELECT id, annotation FROM nodes WHERE annotation IS NOT NULL")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut map = HashMap::new();
        for row in rows {
            let (id, raw) = row?;
            map.insert(id, serde_json::from_str(&raw)?);
        }
        Ok(map)
    }

    // === Fingerprints ===

    pub fn fingerprints(&self) -> Result<HashMap<String, Fingerprint>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT path, mtime_ns, size, content_hash FROM fingerprints")?;
        let map = stmt
            .query_map([], |row| {
                let fp = Fingerprint {
                    path: row.get(0)?,
                    mtime_ns: row.get(1)?,
                    size: row.get::<_, i64>(2)? as u64,
                    content_hash: row.get(3)?,
                };
                Ok((fp.path.clone(), fp))
            })?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(map)
    }

    pub fn upsert_fingerprints(&self, fingerprints: &[Fingerprint]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for fp in fingerprints {
            tx.execute(
                "INSERT OR REPLACE INTO fingerprints (path, mtime_ns, size, content_hash) VALUES (?1, ?2, ?3, ?4)",
                params![fp.path, fp.mtime_ns, fp.size as i64, fp.content_hash],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn delete_fingerprints(&self, paths: &[String]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for path in paths {
            tx.execute("DELETE FROM fingerprints WHERE path = ?1", params![path])?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn replace_fingerprints(&self, fingerprints: &[Fingerprint]) -> Result<()> {
        {
            let conn = self.conn();
            conn.execute("DELETE FROM fingerprints", [])?;
        }
        self.upsert_fingerprints(fingerprints)
    }

    // === Semantic analyzer cache ===

    /// `Some(None)` is a cached "analyzer found nothing" answer.
    pub fn semantic_lookup(&self, file: &str, line: usize, col: usize) -> Result<Option<Option<String>>> {
        let conn = self.conn();
        let hit = conn
            .query_row(
                "SELECT target FROM semantic_cache WHERE file_path = ?1 AND line = ?2 AND col = ?3",
                params![file, line as i64, col as i64],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(hit)
    }

    pub fn semantic_store(&self, entries: &[(String, usize, usize, Option<String>)]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for (file, line, col, target) in entries {
            tx.execute(
                "INSERT OR REPLACE INTO semantic_cache (file_path, line, col, target) VALUES (?1, ?2, ?3, ?4)",
                params![file, *line as i64, *col as i64, target],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn semantic_invalidate(&self, files: &[String]) -> Result<()> {
        let conn = self.conn();
        for file in files {
            conn.execute("DELETE FROM semantic_cache WHERE file_path = ?1", params![file])?;
        }
        Ok(())
    }

    // === Stats ===

    pub fn stats(&self) -> Result<GraphStats> {
        let revision = self.revision()?;
        let conn = self.conn();
        let mut stats = GraphStats {
            revision,
            ..Default::default()
        };

        stats.total_nodes = conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| {
            row.get::<_, i64>(0)
        })? as usize;
        stats.total_edges = conn.query_row("SELECT COUNT(*) FROM edges", [], |row| {
            row.get::<_, i64>(0)
        })? as usize;
        stats.files = conn.query_row("SELECT COUNT(DISTINCT file_path) FROM nodes", [], |row| {
            row.get::<_, i64>(0)
        })? as usize;

        for (sql, target) in [
            ("SELECT kind, COUNT(*) FROM nodes GROUP BY kind", &mut stats.nodes_by_kind),
            ("SELECT kind, COUNT(*) FROM edges GROUP BY kind", &mut stats.edges_by_kind),
            (
                "SELECT confidence, COUNT(*) FROM edges GROUP BY confidence",
                &mut stats.edges_by_confidence,
            ),
        ] {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?;
            for row in rows {
                let (key, count) = row?;
                target.insert(key, count);
            }
        }
        Ok(stats)
    }

    // === Row mapping ===

    fn node_from_row(row: &rusqlite::Row) -> rusqlite::Result<Node> {
        let kind_str: String = row.get(1)?;
        let kind = NodeKind::from_str(&kind_str).ok_or_else(|| invalid_text(1, &kind_str))?;
        let metadata: String = row.get(11)?;
        let annotation: Option<String> = row.get(12)?;
        let metrics: Option<String> = row.get(13)?;

        Ok(Node {
            id: row.get(0)?,
            kind,
            name: row.get(2)?,
            qualified_name: row.get(3)?,
            file_path: row.get(4)?,
            start_line: row.get::<_, i64>(5)? as usize,
            end_line: row.get::<_, i64>(6)? as usize,
            source_code: row.get(7)?,
            docstring: row.get(8)?,
            signature: row.get(9)?,
            hash: row.get(10)?,
            metadata: json_column(11, &metadata)?,
            annotation: annotation.map(|raw| json_column(12, &raw)).transpose()?,
            metrics: metrics.map(|raw| json_column(13, &raw)).transpose()?,
        })
    }

    fn edge_from_row(row: &rusqlite::Row) -> rusqlite::Result<Edge> {
        let kind_str: String = row.get(3)?;
        let confidence_str: String = row.get(6)?;
        let source_str: String = row.get(7)?;
        let metadata: String = row.get(9)?;

        Ok(Edge {
            id: row.get(0)?,
            from_node: row.get(1)?,
            to_node: row.get(2)?,
            kind: EdgeKind::from_str(&kind_str).ok_or_else(|| invalid_text(3, &kind_str))?,
            line: row.get::<_, Option<i64>>(4)?.map(|l| l as usize),
            column: row.get::<_, Option<i64>>(5)?.map(|c| c as usize),
            confidence: Confidence::from_str(&confidence_str)
                .ok_or_else(|| invalid_text(6, &confidence_str))?,
            source: EdgeSource::from_str(&source_str).ok_or_else(|| invalid_text(7, &source_str))?,
            untracked_reason: row.get(8)?,
            metadata: json_column(9, &metadata)?,
            origin_file: row.get(10)?,
        })
    }
}

fn invalid_text(idx: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("unexpected value '{}'", value).into(),
    )
}

fn json_column<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
