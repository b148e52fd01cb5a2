//! Transactional edits of graph nodes.
//!
//! Every edit validates first, writes through a [`PatchBuffer`], and resyncs the touched
//! files while holding the sync lock. A failure after the write restores the files from
//! snapshots taken just before it.

pub mod patch;
pub mod test_gate;
pub mod validate;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ProjectConfig;
use crate::error::{LensError, Result};
use crate::graph::models::{Change, ChangeAction, Confidence, EdgeKind, Node, NodeKind, SyncResult};
use crate::graph::ChangeHistory;
use crate::impact::{impact_zone, ImpactZone, Severity};
use crate::parser::tree::leading_indent;
use crate::sync::{SyncEngine, SyncGuard};

pub use patch::{apply_patches, reindent, Patch, PatchBuffer};
pub use test_gate::{TestGate, TestRun};
pub use validate::{Validation, Validator};

/// Hops of callers reported with each edit.
const IMPACT_DEPTH: usize = 2;

/// Cap on textual matches reported after a rename.
const MAX_REVIEW_MATCHES: usize = 100;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").expect("valid regex"));

/// One replacement in a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeUpdate {
    pub node_id: String,
    pub new_source: String,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl NodeUpdate {
    pub fn new(node_id: impl Into<String>, new_source: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            new_source: new_source.into(),
            reasoning: None,
        }
    }
}

/// Result of a successful edit.
#[derive(Debug, Clone, Serialize)]
pub struct EditOutcome {
    pub node_id: String,
    pub file_path: String,
    pub warnings: Vec<String>,
    pub severity: Severity,
    pub affected: Vec<String>,
    /// Hash of the node after the edit; absent once the node is gone
    pub new_hash: Option<String>,
    pub sync: SyncResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub edits: Vec<EditOutcome>,
    pub files: Vec<String>,
    pub sync: SyncResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tests: Option<TestRun>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenameOutcome {
    pub old_id: String,
    pub new_id: String,
    /// `file:line` locations that were rewritten
    pub rewritten: Vec<String>,
    /// Textual matches outside the tracked references, left untouched
    pub needs_review: Vec<String>,
    pub files: Vec<String>,
}

/// File contents captured before a write; `None` for files that did not exist.
struct Snapshots {
    files: Vec<(String, Option<String>)>,
}

impl Snapshots {
    fn take<'a>(root: &Path, files: impl IntoIterator<Item = &'a String>) -> Result<Self> {
        let mut taken = Vec::new();
        for file in files {
            let path = root.join(file);
            let content = if path.is_file() {
                Some(fs::read_to_string(&path)?)
            } else {
                None
            };
            taken.push((file.clone(), content));
        }
        Ok(Self { files: taken })
    }

    fn paths(&self) -> Vec<String> {
        self.files.iter().map(|(file, _)| file.clone()).collect()
    }

    fn restore(&self, root: &Path) -> Result<Vec<String>> {
        let mut restored = Vec::with_capacity(self.files.len());
        for (file, content) in &self.files {
            let path = root.join(file);
            match content {
                Some(content) => fs::write(&path, content)?,
                None if path.exists() => fs::remove_file(&path)?,
                None => {}
            }
            restored.push(file.clone());
        }
        Ok(restored)
    }
}

pub struct MutationEngine {
    sync: Arc<SyncEngine>,
    history: Arc<ChangeHistory>,
    validator: Validator,
    gate: TestGate,
}

impl MutationEngine {
    pub fn new(sync: Arc<SyncEngine>, history: Arc<ChangeHistory>, config: &ProjectConfig) -> Self {
        let validator = Validator::new(Arc::clone(sync.registry()), config.guards.clone());
        let gate = TestGate::new(sync.root(), &config.tests);
        Self {
            sync,
            history,
            validator,
            gate,
        }
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    // === Single edits ===

    /// Replaces a node's source, keeping the rest of its file intact.
    pub fn update_node(&self, node_id: &str, new_source: &str, reasoning: Option<String>) -> Result<EditOutcome> {
        let guard = self.sync.lock();
        self.sync.ensure_synced_locked(&guard)?;

        let node = self.require_node(node_id)?;
        let validation = self.validator.check_replacement(&node, new_source)?;
        let zone = self.impact_of(node_id)?;

        let replacement = reindent(new_source, leading_indent(&node.source_code));
        let files = vec![node.file_path.clone()];
        let snapshots = Snapshots::take(self.sync.root(), &files)?;

        let mut buffer = PatchBuffer::new(self.sync.root());
        buffer.add(&node.file_path, Patch::new(node.start_line, node.end_line, &replacement, node_id));
        buffer.flush(self.sync.registry())?;

        let sync = self.reparse_or_rollback(&guard, &snapshots)?;
        self.history.record(
            &Change::new(node_id, ChangeAction::Modified, &node.file_path, format!("Updated {}", node_id))
                .with_old(&node.source_code)
                .with_new(&replacement)
                .with_affected(zone.affected())
                .with_reasoning(reasoning),
        )?;

        tracing::info!("Updated {} ({} affected)", node_id, zone.total_affected);
        Ok(EditOutcome {
            node_id: node_id.to_string(),
            file_path: node.file_path,
            warnings: validation.warnings,
            severity: zone.severity,
            affected: zone.affected(),
            new_hash: self.sync.store().get_node(node_id)?.map(|n| n.hash),
            sync,
        })
    }

    /// Applies several replacements as one unit.
    ///
    /// Nothing is written unless every update validates. With `verify_tests`, the
    /// test command runs before and after, and any newly failing test rolls the whole
    /// batch back.
    pub fn batch_update(&self, updates: &[NodeUpdate], verify_tests: bool) -> Result<BatchOutcome> {
        let guard = self.sync.lock();
        self.sync.ensure_synced_locked(&guard)?;

        let mut planned = Vec::with_capacity(updates.len());
        let mut buffer = PatchBuffer::new(self.sync.root());
        let mut per_file: BTreeMap<String, Vec<Patch>> = BTreeMap::new();
        for update in updates {
            let node = self.require_node(&update.node_id)?;
            let validation = self.validator.check_replacement(&node, &update.new_source)?;
            let zone = self.impact_of(&node.id)?;
            let replacement = reindent(&update.new_source, leading_indent(&node.source_code));
            let patch = Patch::new(node.start_line, node.end_line, &replacement, &node.id);
            per_file.entry(node.file_path.clone()).or_default().push(patch.clone());
            buffer.add(&node.file_path, patch);
            planned.push((update, node, validation, zone, replacement));
        }
        // Surface conflicts before the test baseline runs
        for (file, patches) in &per_file {
            let content = fs::read_to_string(self.sync.root().join(file))?;
            apply_patches(file, &content, patches)?;
        }

        let baseline = if verify_tests { Some(self.gate.run()?) } else { None };

        let files: Vec<String> = per_file.keys().cloned().collect();
        let snapshots = Snapshots::take(self.sync.root(), &files)?;
        if let Err(e) = buffer.flush(self.sync.registry()) {
            if e.is_rejection() {
                return Err(e);
            }
            return Err(self.rollback(&guard, &snapshots, format!("write failed: {}", e)));
        }

        let sync = self.reparse_or_rollback(&guard, &snapshots)?;

        let tests = match baseline {
            Some(before) => {
                let after = match self.gate.run() {
                    Ok(run) => run,
                    Err(e) => return Err(self.rollback(&guard, &snapshots, e.to_string())),
                };
                let regressions = after.regressions_since(&before);
                if !regressions.is_empty() {
                    return Err(self.rollback(
                        &guard,
                        &snapshots,
                        format!("newly failing tests: {}", regressions.join(", ")),
                    ));
                }
                Some(after)
            }
            None => None,
        };

        let mut edits = Vec::with_capacity(planned.len());
        for (update, node, validation, zone, replacement) in planned {
            self.history.record(
                &Change::new(&node.id, ChangeAction::Modified, &node.file_path, format!("Batch update of {}", node.id))
                    .with_old(&node.source_code)
                    .with_new(&replacement)
                    .with_affected(zone.affected())
                    .with_reasoning(update.reasoning.clone()),
            )?;
            edits.push(EditOutcome {
                new_hash: self.sync.store().get_node(&node.id)?.map(|n| n.hash),
                node_id: node.id,
                file_path: node.file_path,
                warnings: validation.warnings,
                severity: zone.severity,
                affected: zone.affected(),
                sync: SyncResult::default(),
            });
        }

        tracing::info!("Batch updated {} nodes in {} files", edits.len(), files.len());
        Ok(BatchOutcome {
            edits,
            files,
            sync,
            tests,
        })
    }

    /// Inserts new code into `file`, after `after_node` or at the end of the file.
    pub fn add_node(&self, file: &str, source: &str, after_node: Option<&str>) -> Result<EditOutcome> {
        let guard = self.sync.lock();
        self.sync.ensure_synced_locked(&guard)?;

        let validation = self.validator.check_fragment(file, source)?;
        let path = self.sync.root().join(file);
        let content = if path.is_file() {
            fs::read_to_string(&path)?
        } else {
            String::new()
        };

        let (after_line, code) = match after_node {
            Some(anchor_id) => {
                let anchor = self.require_node(anchor_id)?;
                if anchor.file_path != file {
                    return Err(LensError::structure(
                        format!("{} is declared in {}, not {}", anchor_id, anchor.file_path, file),
                        Some("Pass a node from the target file as the anchor"),
                    ));
                }
                let indent = match anchor.kind {
                    NodeKind::Module => "",
                    _ => leading_indent(&anchor.source_code),
                };
                (anchor.end_line, reindent(source, indent))
            }
            None => (content.lines().count(), source.to_string()),
        };

        let patched = patch::insert_after(&content, after_line, code.trim_end_matches('\n'));
        let parser = self.sync.registry().require_for_file(file)?;
        parser
            .check_syntax(&patched, NodeKind::Module)
            .map_err(|reason| LensError::syntax(format!("{} after inserting into {}", reason, file)))?;

        let files = vec![file.to_string()];
        let snapshots = Snapshots::take(self.sync.root(), &files)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, &patched)?;

        let sync = self.reparse_or_rollback(&guard, &snapshots)?;
        let node_id = self.added_node(&sync, file)?;
        self.history.record(
            &Change::new(&node_id, ChangeAction::Created, file, format!("Added {}", node_id)).with_new(&code),
        )?;

        tracing::info!("Added {} to {}", node_id, file);
        Ok(EditOutcome {
            new_hash: self.sync.store().get_node(&node_id)?.map(|n| n.hash),
            node_id,
            file_path: file.to_string(),
            warnings: validation.warnings,
            severity: Severity::Low,
            affected: Vec::new(),
            sync,
        })
    }

    /// Removes a node's lines. Deleting a module removes its file.
    pub fn delete_node(&self, node_id: &str, reasoning: Option<String>) -> Result<EditOutcome> {
        let guard = self.sync.lock();
        self.sync.ensure_synced_locked(&guard)?;

        let node = self.require_node(node_id)?;
        let zone = self.impact_of(node_id)?;
        let path = self.sync.root().join(&node.file_path);
        let files = vec![node.file_path.clone()];

        let mut warnings = Vec::new();
        if !zone.direct_callers.is_empty() || !zone.inheritors.is_empty() {
            warnings.push(format!(
                "{} nodes still reference {}",
                zone.direct_callers.len() + zone.inheritors.len(),
                node_id
            ));
        }

        let snapshots = Snapshots::take(self.sync.root(), &files)?;
        if node.kind == NodeKind::Module {
            fs::remove_file(&path)?;
        } else {
            let content = fs::read_to_string(&path)?;
            let patched = patch::remove_lines(&content, node.start_line, node.end_line);
            let parser = self.sync.registry().require_for_file(&node.file_path)?;
            parser.check_syntax(&patched, NodeKind::Module).map_err(|reason| {
                LensError::structure(
                    format!("removing {} leaves {} invalid: {}", node_id, node.file_path, reason),
                    Some("Replace the parent node instead"),
                )
            })?;
            fs::write(&path, patched)?;
        }

        let sync = self.reparse_or_rollback(&guard, &snapshots)?;
        self.history.record(
            &Change::new(node_id, ChangeAction::Deleted, &node.file_path, format!("Deleted {}", node_id))
                .with_old(&node.source_code)
                .with_affected(zone.affected())
                .with_reasoning(reasoning),
        )?;

        tracing::info!("Deleted {}", node_id);
        Ok(EditOutcome {
            node_id: node_id.to_string(),
            file_path: node.file_path,
            warnings,
            severity: zone.severity,
            affected: zone.affected(),
            new_hash: None,
            sync,
        })
    }

    /// Renames a class or function along with its tracked references.
    ///
    /// The definition line and the lines of resolved incoming calls, imports and
    /// inherits edges are rewritten. Other textual matches are only reported.
    pub fn rename(&self, node_id: &str, new_name: &str) -> Result<RenameOutcome> {
        let guard = self.sync.lock();
        self.sync.ensure_synced_locked(&guard)?;

        let node = self.require_node(node_id)?;
        if matches!(node.kind, NodeKind::Module | NodeKind::Block) {
            return Err(LensError::structure(
                format!("{} is a {}; only classes, functions and methods can be renamed", node_id, node.kind.as_str()),
                None,
            ));
        }
        if !IDENTIFIER_RE.is_match(new_name) {
            return Err(LensError::structure(format!("`{}` is not a valid identifier", new_name), None));
        }
        let new_id = match node.parent_id() {
            Some(parent) => format!("{}.{}", parent, new_name),
            None => new_name.to_string(),
        };
        if self.sync.store().get_node(&new_id)?.is_some() {
            return Err(LensError::structure(format!("{} already exists", new_id), None));
        }

        let word = Regex::new(&format!(r"\b{}\b", regex::escape(&node.name)))
            .map_err(|e| LensError::Parse(e.to_string()))?;

        let mut targets: BTreeMap<String, BTreeSet<usize>> = BTreeMap::new();
        let definition_line = node
            .source_code
            .lines()
            .position(|line| word.is_match(line))
            .map(|offset| node.start_line + offset)
            .ok_or_else(|| LensError::Parse(format!("definition of {} not found in its source", node_id)))?;
        targets.entry(node.file_path.clone()).or_default().insert(definition_line);

        let graph = self.sync.get_graph()?;
        for edge in graph.edges_to(node_id) {
            let tracked = matches!(edge.kind, EdgeKind::Calls | EdgeKind::Imports | EdgeKind::Inherits);
            if !tracked || edge.confidence != Confidence::Resolved {
                continue;
            }
            if let Some(line) = edge.line {
                targets.entry(edge.origin_file.clone()).or_default().insert(line);
            }
        }

        let mut buffer = PatchBuffer::new(self.sync.root());
        let mut rewritten = Vec::new();
        for (file, lines) in &targets {
            let content = fs::read_to_string(self.sync.root().join(file))?;
            let source_lines: Vec<&str> = content.lines().collect();
            for &line in lines {
                let Some(text) = source_lines.get(line.wrapping_sub(1)) else {
                    continue;
                };
                let replaced = word.replace_all(text, regex::NoExpand(new_name));
                if replaced != *text {
                    buffer.add(file, Patch::new(line, line, replaced.into_owned(), node_id));
                    rewritten.push(format!("{}:{}", file, line));
                }
            }
        }

        let needs_review = self.textual_matches(&word, &targets)?;
        let files = buffer.pending_files();
        let snapshots = Snapshots::take(self.sync.root(), &files)?;
        buffer.flush(self.sync.registry())?;
        self.reparse_or_rollback(&guard, &snapshots)?;

        self.history.record(
            &Change::new(&new_id, ChangeAction::Renamed, &node.file_path, format!("Renamed {} to {}", node_id, new_id))
                .with_old(&node.source_code)
                .with_affected(rewritten.clone()),
        )?;

        tracing::info!("Renamed {} to {} ({} sites)", node_id, new_id, rewritten.len());
        Ok(RenameOutcome {
            old_id: node_id.to_string(),
            new_id,
            rewritten,
            needs_review,
            files,
        })
    }

    // === Helpers ===

    fn require_node(&self, node_id: &str) -> Result<Node> {
        self.sync
            .store()
            .get_node(node_id)?
            .ok_or_else(|| LensError::NodeNotFound(node_id.to_string()))
    }

    fn impact_of(&self, node_id: &str) -> Result<ImpactZone> {
        let graph = self.sync.get_graph()?;
        impact_zone(&graph, node_id, IMPACT_DEPTH)
    }

    /// Resyncs the snapshotted files, restoring them if the new content does not parse.
    fn reparse_or_rollback(&self, guard: &SyncGuard, snapshots: &Snapshots) -> Result<SyncResult> {
        let files = snapshots.paths();
        let failure = match self.sync.reparse_files_locked(guard, &files) {
            Ok(result) => {
                let broken = result
                    .warnings
                    .iter()
                    .find(|w| files.iter().any(|f| w.starts_with(&format!("{}:", f))));
                match broken {
                    Some(warning) => warning.clone(),
                    None => return Ok(result),
                }
            }
            Err(e) => e.to_string(),
        };
        Err(self.rollback(guard, snapshots, format!("reparse failed: {}", failure)))
    }

    fn rollback(&self, guard: &SyncGuard, snapshots: &Snapshots, reason: String) -> LensError {
        tracing::warn!("Rolling back edit: {}", reason);
        let restored = match snapshots.restore(self.sync.root()) {
            Ok(restored) => restored,
            Err(e) => {
                tracing::warn!("Restoring snapshots failed: {}", e);
                Vec::new()
            }
        };
        if let Err(e) = self.sync.reparse_files_locked(guard, &snapshots.paths()) {
            tracing::warn!("Resync after rollback failed: {}", e);
        }
        LensError::PatchRollback { reason, restored }
    }

    fn added_node(&self, sync: &SyncResult, file: &str) -> Result<String> {
        let mut candidates = Vec::new();
        for id in &sync.added {
            if let Some(node) = self.sync.store().get_node(id)? {
                if node.file_path == file && node.kind != NodeKind::Module {
                    candidates.push(node);
                }
            }
        }
        // The outermost new declaration
        candidates.sort_by_key(|n| (n.start_line, std::cmp::Reverse(n.end_line)));
        match candidates.into_iter().next() {
            Some(node) => Ok(node.id),
            None => Ok(self
                .sync
                .get_graph()?
                .module_for_file(file)
                .map(|m| m.id.clone())
                .unwrap_or_else(|| file.to_string())),
        }
    }

    fn textual_matches(&self, word: &Regex, skip: &BTreeMap<String, BTreeSet<usize>>) -> Result<Vec<String>> {
        let mut matches = Vec::new();
        for file in self.sync.store().file_paths()? {
            let Ok(content) = fs::read_to_string(self.sync.root().join(&file)) else {
                continue;
            };
            for (index, text) in content.lines().enumerate() {
                let line = index + 1;
                if skip.get(&file).is_some_and(|lines| lines.contains(&line)) || !word.is_match(text) {
                    continue;
                }
                matches.push(format!("{}:{}: {}", file, line, text.trim()));
                if matches.len() >= MAX_REVIEW_MATCHES {
                    return Ok(matches);
                }
            }
        }
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LensPaths, TestConfig};
    use crate::graph::GraphStore;
    use crate::parser::ParserRegistry;
    use tempfile::TempDir;

    const UTILS: &str = "def helper():\n    return 1\n\n\ndef greet(name):\n    return 'hi ' + name\n";
    const APP: &str = "from utils import helper\n\n\ndef main():\n    return helper()\n";

    struct Fixture {
        dir: TempDir,
        sync: Arc<SyncEngine>,
        history: Arc<ChangeHistory>,
        engine: MutationEngine,
    }

    impl Fixture {
        fn read(&self, file: &str) -> String {
            fs::read_to_string(self.dir.path().join(file)).unwrap()
        }
    }

    fn setup_with(files: &[(&str, &str)], tests: TestConfig) -> Fixture {
        let dir = TempDir::new().unwrap();
        for (path, content) in files {
            fs::write(dir.path().join(path), content).unwrap();
        }
        let paths = LensPaths::new(dir.path());
        let config = ProjectConfig {
            tests,
            ..ProjectConfig::default()
        };
        let sync = Arc::new(SyncEngine::new(
            &paths,
            config.clone(),
            Arc::new(GraphStore::in_memory().unwrap()),
            Arc::new(ParserRegistry::new()),
        ));
        sync.full_sync().unwrap();
        let history = Arc::new(ChangeHistory::in_memory().unwrap());
        let engine = MutationEngine::new(Arc::clone(&sync), Arc::clone(&history), &config);
        Fixture {
            dir,
            sync,
            history,
            engine,
        }
    }

    fn setup(files: &[(&str, &str)]) -> Fixture {
        setup_with(files, TestConfig::default())
    }

    #[test]
    fn test_update_node_rewrites_only_the_node() {
        let fx = setup(&[("utils.py", UTILS), ("app.py", APP)]);
        let outcome = fx
            .engine
            .update_node("utils.greet", "def greet(name):\n    return 'hello ' + name\n", Some("friendlier".into()))
            .unwrap();

        assert_eq!(outcome.severity, Severity::Low);
        assert!(outcome.warnings.is_empty());
        assert_eq!(
            fx.read("utils.py"),
            "def helper():\n    return 1\n\n\ndef greet(name):\n    return 'hello ' + name\n"
        );
        let stored = fx.sync.store().get_node("utils.greet").unwrap().unwrap();
        assert_eq!(outcome.new_hash.as_deref(), Some(stored.hash.as_str()));

        let history = fx.history.list(Some("utils.greet"), 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].reasoning.as_deref(), Some("friendlier"));
    }

    #[test]
    fn test_update_keeps_inbound_edges() {
        let fx = setup(&[("utils.py", UTILS), ("app.py", APP)]);
        let outcome = fx
            .engine
            .update_node("utils.helper", "def helper():\n    return 2\n", None)
            .unwrap();
        assert!(outcome.affected.contains(&"app.main".to_string()));

        let graph = fx.sync.get_graph().unwrap();
        assert!(graph
            .edges_to("utils.helper")
            .any(|e| e.from_node == "app.main" && e.kind == EdgeKind::Calls && e.confidence == Confidence::Resolved));
    }

    #[test]
    fn test_invalid_update_leaves_file_untouched() {
        let fx = setup(&[("utils.py", UTILS)]);
        let err = fx
            .engine
            .update_node("utils.helper", "def helper(:\n    return 2\n", None)
            .unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(fx.read("utils.py"), UTILS);
        assert_eq!(fx.history.count().unwrap(), 0);
    }

    #[test]
    fn test_method_update_is_reindented() {
        let source = "class Greeter:\n    def greet(self):\n        return 1\n";
        let fx = setup(&[("g.py", source)]);
        fx.engine
            .update_node("g.Greeter.greet", "def greet(self):\n    return 2\n", None)
            .unwrap();
        assert_eq!(fx.read("g.py"), "class Greeter:\n    def greet(self):\n        return 2\n");
    }

    #[test]
    fn test_batch_with_missing_node_writes_nothing() {
        let fx = setup(&[("utils.py", UTILS), ("app.py", APP)]);
        let err = fx
            .engine
            .batch_update(
                &[
                    NodeUpdate::new("utils.helper", "def helper():\n    return 5\n"),
                    NodeUpdate::new("utils.missing", "def missing():\n    pass\n"),
                ],
                false,
            )
            .unwrap_err();
        assert!(matches!(err, LensError::NodeNotFound(id) if id == "utils.missing"));
        assert_eq!(fx.read("utils.py"), UTILS);
    }

    #[test]
    fn test_batch_updates_two_files() {
        let fx = setup(&[("utils.py", UTILS), ("app.py", APP)]);
        let outcome = fx
            .engine
            .batch_update(
                &[
                    NodeUpdate::new("utils.helper", "def helper():\n    return 5\n"),
                    NodeUpdate::new("app.main", "def main():\n    return helper() + 1\n"),
                ],
                false,
            )
            .unwrap();
        assert_eq!(outcome.files, vec!["app.py", "utils.py"]);
        assert!(fx.read("utils.py").contains("return 5"));
        assert!(fx.read("app.py").contains("helper() + 1"));
        assert_eq!(fx.history.count().unwrap(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_batch_rolls_back_on_test_regression() {
        // Fails only once utils.py mentions "return 5"
        let script = "if grep -q 'return 5' utils.py; then echo 'FAILED test_utils.py::test_helper'; exit 1; fi";
        let tests = TestConfig {
            command: vec!["sh".into(), "-c".into(), script.into()],
            timeout_secs: 10,
        };
        let fx = setup_with(&[("utils.py", UTILS), ("app.py", APP)], tests);
        let err = fx
            .engine
            .batch_update(&[NodeUpdate::new("utils.helper", "def helper():\n    return 5\n")], true)
            .unwrap_err();

        match err {
            LensError::PatchRollback { reason, restored } => {
                assert!(reason.contains("test_utils.py::test_helper"));
                assert_eq!(restored, vec!["utils.py"]);
            }
            other => panic!("expected rollback, got {other}"),
        }
        assert_eq!(fx.read("utils.py"), UTILS);
        let helper = fx.sync.store().get_node("utils.helper").unwrap().unwrap();
        assert_eq!(helper.source_code, "def helper():\n    return 1");
    }

    #[test]
    fn test_add_and_delete_node() {
        let fx = setup(&[("utils.py", UTILS)]);
        let added = fx
            .engine
            .add_node("utils.py", "def extra():\n    return helper()\n", Some("utils.helper"))
            .unwrap();
        assert_eq!(added.node_id, "utils.extra");
        assert!(fx.read("utils.py").contains("def extra():"));
        assert!(fx.sync.store().get_node("utils.extra").unwrap().is_some());

        let deleted = fx.engine.delete_node("utils.extra", None).unwrap();
        assert_eq!(deleted.sync.deleted, vec!["utils.extra"]);
        assert!(!fx.read("utils.py").contains("extra"));
        assert_eq!(fx.history.count().unwrap(), 2);
    }

    #[test]
    fn test_delete_warns_about_callers() {
        let fx = setup(&[("utils.py", UTILS), ("app.py", APP)]);
        let outcome = fx.engine.delete_node("utils.helper", None).unwrap();
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.affected.contains(&"app.main".to_string()));
    }

    #[test]
    fn test_rename_rewrites_definition_and_callers() {
        let notes = "# helper is documented here\n";
        let fx = setup(&[("utils.py", UTILS), ("app.py", APP), ("notes.py", notes)]);
        let outcome = fx.engine.rename("utils.helper", "assist").unwrap();

        assert_eq!(outcome.new_id, "utils.assist");
        assert!(fx.read("utils.py").starts_with("def assist():"));
        assert!(fx.read("app.py").contains("return assist()"));
        assert!(outcome.needs_review.iter().any(|m| m.starts_with("notes.py:1")));
        assert!(fx.sync.store().get_node("utils.assist").unwrap().is_some());
        assert!(fx.sync.store().get_node("utils.helper").unwrap().is_none());
    }

    #[test]
    fn test_rename_rejects_bad_identifier() {
        let fx = setup(&[("utils.py", UTILS)]);
        let err = fx.engine.rename("utils.helper", "not valid").unwrap_err();
        assert!(err.is_rejection());
        let err = fx.engine.rename("utils.helper", "greet").unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }
}
