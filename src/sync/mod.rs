//! Keeps the stored graph in step with the working tree.
//!
//! A full sync rebuilds everything from a fresh walk. An incremental sync diffs the tree
//! against stored fingerprints and rewrites only the files that changed. Every mutating
//! operation has a `*_locked` twin taking a [`SyncGuard`], so a caller can hold the sync
//! lock across several steps.

pub mod fingerprint;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;

use rayon::prelude::*;

use crate::config::{LensPaths, ProjectConfig, PARSER_VERSION};
use crate::error::Result;
use crate::graph::models::{Fingerprint, FileGraph, Node, SyncResult};
use crate::graph::{compute_metrics, GraphProjection, GraphStore};
use crate::parser::walker::FileWalker;
use crate::parser::{ParsedFile, ParserRegistry};
use crate::resolve::{ResolutionEngine, ResolverStats, SemanticAnalyzer, SubprocessAnalyzer};

pub use fingerprint::FileDiff;

/// Proof that the caller holds the sync lock.
pub struct SyncGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

pub struct SyncEngine {
    root: PathBuf,
    config_path: PathBuf,
    config: ProjectConfig,
    store: Arc<GraphStore>,
    registry: Arc<ParserRegistry>,
    walker: FileWalker,
    sync_lock: Mutex<()>,
    projection: RwLock<Option<Arc<GraphProjection>>>,
    /// Bumped by every invalidation; a projection loaded across a bump is discarded
    generation: AtomicU64,
    stale: AtomicBool,
    resolution: Mutex<ResolutionEngine>,
}

type Parsed = (ParsedFile, Fingerprint);

impl SyncEngine {
    pub fn new(
        paths: &LensPaths,
        config: ProjectConfig,
        store: Arc<GraphStore>,
        registry: Arc<ParserRegistry>,
    ) -> Self {
        let resolve_config = match config.clone().with_tsconfig(&paths.root) {
            Ok(merged) => merged,
            Err(e) => {
                tracing::warn!("Ignoring unreadable tsconfig: {}", e);
                config.clone()
            }
        };
        let mut resolution = ResolutionEngine::new(resolve_config);
        if let Some(analyzer) = config.semantic.as_ref().and_then(SubprocessAnalyzer::from_config) {
            tracing::info!("Semantic analyzer enabled for {}", analyzer.language());
            resolution.set_analyzer(Some(Arc::new(analyzer)));
        }

        Self {
            root: paths.root.clone(),
            config_path: paths.config.clone(),
            walker: FileWalker::new(&registry, &config.exclude),
            stale: AtomicBool::new(!config.is_current()),
            config,
            store,
            registry,
            sync_lock: Mutex::new(()),
            projection: RwLock::new(None),
            generation: AtomicU64::new(0),
            resolution: Mutex::new(resolution),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ParserRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    /// True until a full sync has run under the current parser version.
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    pub fn set_analyzer(&self, analyzer: Option<Arc<dyn SemanticAnalyzer>>) {
        self.resolution().set_analyzer(analyzer);
    }

    pub fn resolver_stats(&self) -> ResolverStats {
        self.resolution().stats()
    }

    pub fn lock(&self) -> SyncGuard<'_> {
        SyncGuard {
            _guard: self.sync_lock.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    fn resolution(&self) -> MutexGuard<'_, ResolutionEngine> {
        self.resolution.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // === Projection ===

    /// The current in-memory graph, rebuilt from the store after any write.
    pub fn get_graph(&self) -> Result<Arc<GraphProjection>> {
        loop {
            {
                let cached = self.projection.read().unwrap_or_else(PoisonError::into_inner);
                if let Some(graph) = cached.as_ref() {
                    return Ok(Arc::clone(graph));
                }
            }
            let (generation, graph) = self.load_projection()?;
            if self.install_projection(generation, &graph) {
                return Ok(graph);
            }
            tracing::debug!("Graph changed while loading, rebuilding");
        }
    }

    fn load_projection(&self) -> Result<(u64, Arc<GraphProjection>)> {
        let generation = self.generation.load(Ordering::SeqCst);
        let (nodes, edges) = self.store.load_all()?;
        Ok((generation, Arc::new(GraphProjection::build(nodes, edges))))
    }

    /// Caches `graph` unless an invalidation landed after it started loading.
    fn install_projection(&self, generation: u64, graph: &Arc<GraphProjection>) -> bool {
        let mut slot = self.projection.write().unwrap_or_else(PoisonError::into_inner);
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        *slot = Some(Arc::clone(graph));
        true
    }

    pub fn invalidate_graph(&self) {
        let mut slot = self.projection.write().unwrap_or_else(PoisonError::into_inner);
        self.generation.fetch_add(1, Ordering::SeqCst);
        *slot = None;
    }

    // === Full sync ===

    pub fn full_sync(&self) -> Result<SyncResult> {
        let guard = self.lock();
        self.full_sync_locked(&guard)
    }

    pub fn full_sync_locked(&self, _guard: &SyncGuard) -> Result<SyncResult> {
        let started = Instant::now();
        let files = self.walker.walk(&self.root)?;
        let before = self.store.node_hashes()?;

        let module_ids = self.registry.module_ids(&files);
        let (parsed, mut warnings) = self.parse_files(&files, &module_ids);
        let languages = languages_of(&parsed);

        let mut engine = self.resolution();
        engine.reset(&files);
        for (file, _) in &parsed {
            engine.register(file);
        }

        let mut nodes: Vec<Node> = Vec::new();
        let mut edges = Vec::new();
        for (file, _) in &parsed {
            edges.extend(engine.resolve_file(file));
            nodes.extend(file.nodes.iter().cloned());
        }
        warnings.extend(engine.refine(&self.root, &self.store, &mut edges, &languages));

        let metrics = compute_metrics(&nodes, &edges);
        for node in &mut nodes {
            node.metrics = metrics.get(&node.id).cloned();
        }

        if let Err(e) = self.store.replace_all(&nodes, &edges) {
            engine.discard();
            return Err(e);
        }
        drop(engine);

        let fingerprints: Vec<Fingerprint> = parsed.iter().map(|(_, fp)| fp.clone()).collect();
        self.store.replace_fingerprints(&fingerprints)?;
        self.stamp_version()?;
        self.stale.store(false, Ordering::SeqCst);
        self.invalidate_graph();

        let mut result = diff_nodes(&before, &nodes);
        result.files_parsed = parsed.len();
        result.warnings = warnings;
        tracing::info!(
            "Full sync: {} files, {} nodes, {} edges in {:?}",
            parsed.len(),
            nodes.len(),
            edges.len(),
            started.elapsed()
        );
        Ok(result)
    }

    fn stamp_version(&self) -> Result<()> {
        if self.config.is_current() && self.config_path.is_file() {
            return Ok(());
        }
        let mut stamped = self.config.clone();
        stamped.version = PARSER_VERSION.to_string();
        stamped.save(&self.config_path)
    }

    // === Incremental sync ===

    pub fn incremental_sync(&self) -> Result<SyncResult> {
        let guard = self.lock();
        self.incremental_sync_locked(&guard)
    }

    pub fn incremental_sync_locked(&self, _guard: &SyncGuard) -> Result<SyncResult> {
        let files = self.walker.walk(&self.root)?;
        let stored = self.store.fingerprints()?;
        let diff = fingerprint::diff(&self.root, &files, &stored);

        if !diff.touched.is_empty() {
            self.store.upsert_fingerprints(&diff.touched)?;
        }
        if diff.is_empty() {
            tracing::debug!("Working tree unchanged");
            return Ok(SyncResult::default());
        }
        tracing::debug!(
            "Incremental sync: {} added, {} modified, {} deleted",
            diff.added.len(),
            diff.modified.len(),
            diff.deleted.len()
        );
        self.apply_changes(&files, &diff.changed(), &diff.deleted)
    }

    /// Forces a full sync under a stale parser version; otherwise syncs incrementally.
    pub fn ensure_synced(&self) -> Result<SyncResult> {
        let guard = self.lock();
        self.ensure_synced_locked(&guard)
    }

    pub fn ensure_synced_locked(&self, guard: &SyncGuard) -> Result<SyncResult> {
        if self.is_stale() {
            tracing::info!("Graph built by an older parser, rebuilding");
            return self.full_sync_locked(guard);
        }
        self.incremental_sync_locked(guard)
    }

    /// Resyncs a single file; a file that no longer exists counts as deleted.
    pub fn reparse_file(&self, path: &str) -> Result<SyncResult> {
        let guard = self.lock();
        self.reparse_files_locked(&guard, &[path.to_string()])
    }

    pub fn reparse_files_locked(&self, _guard: &SyncGuard, paths: &[String]) -> Result<SyncResult> {
        let stored = self.store.fingerprints()?;
        let mut files: Vec<String> = stored.keys().cloned().collect();
        let mut changed = Vec::new();
        let mut deleted = Vec::new();

        for path in paths {
            let exists = self.root.join(path).is_file();
            if exists && self.registry.is_supported(path) && !self.walker.is_excluded(path) {
                if !stored.contains_key(path) {
                    files.push(path.clone());
                }
                changed.push(path.clone());
            } else if stored.contains_key(path) {
                files.retain(|f| f != path);
                deleted.push(path.clone());
            }
        }
        if changed.is_empty() && deleted.is_empty() {
            return Ok(SyncResult::default());
        }
        files.sort();
        self.apply_changes(&files, &changed, &deleted)
    }

    /// Parses `changed`, drops `deleted`, and writes both through `replace_files`.
    fn apply_changes(&self, files: &[String], changed: &[String], deleted: &[String]) -> Result<SyncResult> {
        let started = Instant::now();
        let module_ids = self.registry.module_ids(files);
        let changed = self.with_moved_modules(&module_ids, changed, deleted)?;
        let changed = changed.as_slice();
        let (parsed, mut warnings) = self.parse_files(changed, &module_ids);
        let languages = languages_of(&parsed);

        let mut before: HashMap<String, String> = HashMap::new();
        for path in changed.iter().chain(deleted) {
            for node in self.store.nodes_in_file(path)? {
                before.insert(node.id, node.hash);
            }
        }

        let touched: Vec<String> = changed.iter().chain(deleted).cloned().collect();
        self.store.semantic_invalidate(&touched)?;

        let mut engine = self.resolution();
        if let Err(e) = engine.ensure_seeded(&self.store, files) {
            engine.discard();
            return Err(e);
        }
        engine.update_layout(files);
        for path in deleted {
            engine.remove_file(path);
        }
        for (file, _) in &parsed {
            engine.register(file);
        }

        let mut graphs: Vec<FileGraph> = Vec::with_capacity(parsed.len() + deleted.len());
        for (file, _) in &parsed {
            let mut edges = engine.resolve_file(file);
            warnings.extend(engine.refine(&self.root, &self.store, &mut edges, &languages));
            graphs.push(FileGraph {
                file_path: file.file_path.clone(),
                nodes: file.nodes.clone(),
                edges,
            });
        }
        graphs.extend(deleted.iter().map(|path| FileGraph {
            file_path: path.clone(),
            ..Default::default()
        }));

        if let Err(e) = self.store.replace_files(&graphs) {
            engine.discard();
            return Err(e);
        }
        drop(engine);

        let (all_nodes, all_edges) = self.store.load_all()?;
        self.store.replace_metrics(&compute_metrics(&all_nodes, &all_edges))?;

        let fingerprints: Vec<Fingerprint> = parsed.iter().map(|(_, fp)| fp.clone()).collect();
        self.store.upsert_fingerprints(&fingerprints)?;
        self.store.delete_fingerprints(deleted)?;
        self.invalidate_graph();

        let after: Vec<Node> = graphs.into_iter().flat_map(|g| g.nodes).collect();
        let mut result = diff_nodes(&before, &after);
        result.files_parsed = parsed.len();
        result.warnings = warnings;
        tracing::info!(
            "Synced {} changed and {} deleted files in {:?}",
            parsed.len(),
            deleted.len(),
            started.elapsed()
        );
        Ok(result)
    }

    /// Adds to `changed` every stored file whose module id moves (a file with a colliding
    /// id appeared or went away), plus the files holding edges into it.
    fn with_moved_modules(
        &self,
        module_ids: &HashMap<String, String>,
        changed: &[String],
        deleted: &[String],
    ) -> Result<Vec<String>> {
        let mut all = changed.to_vec();
        for (path, stored) in self.store.module_ids()? {
            if deleted.contains(&path) || module_ids.get(&path).map_or(true, |id| *id == stored) {
                continue;
            }
            tracing::debug!("Module id of {} moves from {}", path, stored);
            let dependents = self.store.files_referencing(&path)?;
            for file in std::iter::once(path).chain(dependents) {
                if !all.contains(&file) && !deleted.contains(&file) && module_ids.contains_key(&file) {
                    all.push(file);
                }
            }
        }
        Ok(all)
    }

    /// Reads and parses files in parallel. Unreadable files become warnings.
    fn parse_files(&self, files: &[String], module_ids: &HashMap<String, String>) -> (Vec<Parsed>, Vec<String>) {
        let outcomes: Vec<std::result::Result<Parsed, String>> = files
            .par_iter()
            .map(|rel| {
                self.parse_one(rel, module_ids.get(rel).map(String::as_str))
                    .map_err(|e| format!("{}: {}", rel, e))
            })
            .collect();

        let mut parsed = Vec::with_capacity(outcomes.len());
        let mut warnings = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(file) => parsed.push(file),
                Err(message) => {
                    tracing::warn!("Skipping {}", message);
                    warnings.push(message);
                }
            }
        }
        (parsed, warnings)
    }

    fn parse_one(&self, rel: &str, module_id: Option<&str>) -> Result<Parsed> {
        let parser = self.registry.require_for_file(rel)?;
        let (source, fingerprint) = fingerprint::read_source(&self.root, rel)?;
        let parsed = match module_id {
            Some(id) => parser.parse_module(rel, id, &source)?,
            None => parser.parse(rel, &source)?,
        };
        if let Some(error) = &parsed.syntax_error {
            tracing::debug!("{} has syntax errors: {}", rel, error);
        }
        Ok((parsed, fingerprint))
    }
}

fn languages_of(parsed: &[Parsed]) -> HashMap<String, String> {
    parsed
        .iter()
        .map(|(file, _)| (file.file_path.clone(), file.language.clone()))
        .collect()
}

/// Compares node hashes before and after a write. Ids in `before` missing from
/// `after` are deleted.
fn diff_nodes(before: &HashMap<String, String>, after: &[Node]) -> SyncResult {
    let mut result = SyncResult::default();
    let mut seen = std::collections::HashSet::new();
    for node in after {
        if !seen.insert(node.id.as_str()) {
            continue;
        }
        match before.get(&node.id) {
            None => result.added.push(node.id.clone()),
            Some(hash) if *hash != node.hash => result.modified.push(node.id.clone()),
            Some(_) => {}
        }
    }
    result.deleted = before
        .keys()
        .filter(|id| !seen.contains(id.as_str()))
        .cloned()
        .collect();
    result.added.sort();
    result.modified.sort();
    result.deleted.sort();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::models::{Confidence, EdgeKind};
    use std::fs;
    use tempfile::TempDir;

    fn setup(files: &[(&str, &str)]) -> (TempDir, SyncEngine) {
        let dir = TempDir::new().unwrap();
        for (path, content) in files {
            let full = dir.path().join(path);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(full, content).unwrap();
        }
        let paths = LensPaths::new(dir.path());
        let store = Arc::new(GraphStore::in_memory().unwrap());
        let engine = SyncEngine::new(
            &paths,
            ProjectConfig::default(),
            store,
            Arc::new(ParserRegistry::new()),
        );
        (dir, engine)
    }

    const UTILS: &str = "def helper():\n    return 1\n";
    const APP: &str = "from utils import helper\n\ndef main():\n    return helper()\n";

    #[test]
    fn test_full_sync_builds_graph() {
        let (_dir, engine) = setup(&[("utils.py", UTILS), ("app.py", APP)]);
        let result = engine.full_sync().unwrap();

        assert_eq!(result.files_parsed, 2);
        assert!(result.added.contains(&"utils.helper".to_string()));
        assert!(result.added.contains(&"app.main".to_string()));

        let graph = engine.get_graph().unwrap();
        let call = graph
            .edges_from("app.main")
            .find(|e| e.kind == EdgeKind::Calls && e.to_node == "utils.helper")
            .unwrap();
        assert_eq!(call.confidence, Confidence::Resolved);
    }

    #[test]
    fn test_second_full_sync_reports_nothing_new() {
        let (_dir, engine) = setup(&[("utils.py", UTILS), ("app.py", APP)]);
        engine.full_sync().unwrap();
        let again = engine.full_sync().unwrap();
        assert!(again.added.is_empty());
        assert!(again.modified.is_empty());
        assert!(again.deleted.is_empty());
    }

    #[test]
    fn test_incremental_noop_when_unchanged() {
        let (_dir, engine) = setup(&[("utils.py", UTILS)]);
        engine.full_sync().unwrap();
        let revision = engine.store().revision().unwrap();

        let result = engine.incremental_sync().unwrap();
        assert_eq!(result, SyncResult::default());
        assert_eq!(engine.store().revision().unwrap(), revision);
    }

    #[test]
    fn test_incremental_picks_up_add_and_delete() {
        let (dir, engine) = setup(&[("utils.py", UTILS)]);
        engine.full_sync().unwrap();

        fs::write(dir.path().join("extra.py"), "def more():\n    pass\n").unwrap();
        fs::remove_file(dir.path().join("utils.py")).unwrap();
        let result = engine.incremental_sync().unwrap();

        assert!(result.added.contains(&"extra.more".to_string()));
        assert!(result.deleted.contains(&"utils.helper".to_string()));
        assert!(engine.store().get_node("utils.helper").unwrap().is_none());
        let fingerprints = engine.store().fingerprints().unwrap();
        assert!(fingerprints.contains_key("extra.py"));
        assert!(!fingerprints.contains_key("utils.py"));
    }

    #[test]
    fn test_body_edit_keeps_inbound_edge() {
        let (dir, engine) = setup(&[("utils.py", UTILS), ("app.py", APP)]);
        engine.full_sync().unwrap();

        fs::write(dir.path().join("utils.py"), "def helper():\n    return 2 + 2\n").unwrap();
        let result = engine.incremental_sync().unwrap();
        assert!(result.modified.contains(&"utils.helper".to_string()));
        assert!(result.added.is_empty());

        let graph = engine.get_graph().unwrap();
        let call = graph
            .edges_to("utils.helper")
            .find(|e| e.from_node == "app.main")
            .unwrap();
        assert_eq!(call.confidence, Confidence::Resolved);
    }

    #[test]
    fn test_reparse_missing_file_counts_as_deleted() {
        let (dir, engine) = setup(&[("utils.py", UTILS), ("app.py", APP)]);
        engine.full_sync().unwrap();

        fs::remove_file(dir.path().join("app.py")).unwrap();
        let result = engine.reparse_file("app.py").unwrap();
        assert!(result.deleted.contains(&"app.main".to_string()));
        assert!(engine.store().get_node("utils.helper").unwrap().is_some());
    }

    #[test]
    fn test_stale_version_forces_full_sync() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("utils.py"), UTILS).unwrap();
        let paths = LensPaths::new(dir.path());
        let config = ProjectConfig {
            version: "1".into(),
            ..Default::default()
        };
        let engine = SyncEngine::new(
            &paths,
            config,
            Arc::new(GraphStore::in_memory().unwrap()),
            Arc::new(ParserRegistry::new()),
        );
        assert!(engine.is_stale());

        let result = engine.ensure_synced().unwrap();
        assert!(!engine.is_stale());
        assert_eq!(result.files_parsed, 1);
        assert_eq!(ProjectConfig::load(&paths.config).unwrap().version, PARSER_VERSION);
    }

    #[test]
    fn test_graph_cache_swaps_on_write() {
        let (dir, engine) = setup(&[("utils.py", UTILS)]);
        engine.full_sync().unwrap();
        let old = engine.get_graph().unwrap();

        fs::write(dir.path().join("more.py"), "def extra():\n    pass\n").unwrap();
        engine.incremental_sync().unwrap();
        let new = engine.get_graph().unwrap();

        assert!(!old.contains("more.extra"));
        assert!(new.contains("more.extra"));
    }

    #[test]
    fn test_projection_loaded_before_a_write_is_not_cached() {
        let (dir, engine) = setup(&[("utils.py", UTILS)]);
        engine.full_sync().unwrap();
        engine.invalidate_graph();

        // A reader loads, then a writer commits before the reader installs
        let (generation, stale) = engine.load_projection().unwrap();
        fs::write(dir.path().join("more.py"), "def extra():\n    pass\n").unwrap();
        engine.incremental_sync().unwrap();

        assert!(!engine.install_projection(generation, &stale));
        assert!(!stale.contains("more.extra"));
        assert!(engine.get_graph().unwrap().contains("more.extra"));
    }

    #[test]
    fn test_colliding_module_added_later_renames_existing_file() {
        let (dir, engine) = setup(&[("api.ts", "export function getUser() {}\n")]);
        engine.full_sync().unwrap();
        assert!(engine.store().get_node("api.getUser").unwrap().is_some());

        fs::write(dir.path().join("api.py"), "def get_user():\n    pass\n").unwrap();
        let result = engine.incremental_sync().unwrap();

        assert_eq!(result.files_parsed, 2);
        assert!(result.added.contains(&"api@ts.getUser".to_string()));
        assert!(result.added.contains(&"api.get_user".to_string()));
        let modules = engine.store().module_ids().unwrap();
        assert_eq!(modules["api.py"], "api");
        assert_eq!(modules["api.ts"], "api@ts");
    }
}
