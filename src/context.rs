//! Per-project handle tying the stores and engines together.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{LensPaths, ProjectConfig};
use crate::error::{LensError, Result};
use crate::graph::models::SyncResult;
use crate::graph::{ChangeHistory, GraphProjection, GraphStore, SessionNotes};
use crate::mutation::MutationEngine;
use crate::parser::ParserRegistry;
use crate::sync::SyncEngine;

/// Everything needed to query and edit one project.
///
/// Contexts are independent; several can be open in the same process.
pub struct ProjectContext {
    paths: LensPaths,
    store: Arc<GraphStore>,
    history: Arc<ChangeHistory>,
    notes: SessionNotes,
    registry: Arc<ParserRegistry>,
    sync: Arc<SyncEngine>,
    mutation: MutationEngine,
}

impl ProjectContext {
    /// Creates `.lens/` under `root` and builds the graph from scratch.
    ///
    /// An existing config is kept unless `force` is set; `force` also drops the stored
    /// graph. History and notes survive either way.
    pub fn init(root: impl AsRef<Path>, force: bool) -> Result<(Self, SyncResult)> {
        let root = canonical_root(root.as_ref())?;
        let paths = LensPaths::new(&root);
        fs::create_dir_all(&paths.dir)?;

        let config = if paths.is_initialized() && !force {
            ProjectConfig::load(&paths.config)?
        } else {
            ProjectConfig::default()
        };
        if force && paths.graph_db.exists() {
            tracing::info!("Dropping stored graph at {}", paths.graph_db.display());
            for suffix in ["", "-wal", "-shm"] {
                let file = PathBuf::from(format!("{}{}", paths.graph_db.display(), suffix));
                if file.exists() {
                    fs::remove_file(&file)?;
                }
            }
        }
        config.save(&paths.config)?;

        let context = Self::assemble(paths, config)?;
        let result = context.sync.full_sync()?;
        tracing::info!(
            "Initialized {} ({} nodes)",
            context.paths.root.display(),
            result.added.len()
        );
        Ok((context, result))
    }

    /// Opens an initialized project without syncing it.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = canonical_root(root.as_ref())?;
        let paths = LensPaths::new(&root);
        if !paths.is_initialized() {
            return Err(LensError::NotInitialized(root));
        }
        let config = ProjectConfig::load(&paths.config)?;
        Self::assemble(paths, config)
    }

    fn assemble(paths: LensPaths, config: ProjectConfig) -> Result<Self> {
        let store = Arc::new(GraphStore::new(&paths.graph_db)?);
        let history = Arc::new(ChangeHistory::new(&paths.history_db)?);
        let notes = SessionNotes::new(&paths.session_db)?;
        let registry = Arc::new(ParserRegistry::new());
        let sync = Arc::new(SyncEngine::new(
            &paths,
            config.clone(),
            Arc::clone(&store),
            Arc::clone(&registry),
        ));
        let mutation = MutationEngine::new(Arc::clone(&sync), Arc::clone(&history), &config);
        Ok(Self {
            paths,
            store,
            history,
            notes,
            registry,
            sync,
            mutation,
        })
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    pub fn paths(&self) -> &LensPaths {
        &self.paths
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn history(&self) -> &ChangeHistory {
        &self.history
    }

    pub fn notes(&self) -> &SessionNotes {
        &self.notes
    }

    pub fn registry(&self) -> &ParserRegistry {
        &self.registry
    }

    pub fn sync(&self) -> &SyncEngine {
        &self.sync
    }

    pub fn mutation(&self) -> &MutationEngine {
        &self.mutation
    }

    /// Syncs pending working-tree changes, then returns the projection.
    pub fn graph(&self) -> Result<Arc<GraphProjection>> {
        self.sync.ensure_synced()?;
        self.sync.get_graph()
    }
}

fn canonical_root(root: &Path) -> Result<PathBuf> {
    Ok(root.canonicalize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_requires_init() {
        let dir = TempDir::new().unwrap();
        let err = ProjectContext::open(dir.path()).err().unwrap();
        assert!(matches!(err, LensError::NotInitialized(_)));
    }

    #[test]
    fn test_init_then_open() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("app.py"), "def main():\n    return 1\n").unwrap();

        let (context, result) = ProjectContext::init(dir.path(), false).unwrap();
        assert!(result.added.contains(&"app.main".to_string()));
        assert!(context.paths().graph_db.is_file());
        assert!(context.paths().config.is_file());
        drop(context);

        let reopened = ProjectContext::open(dir.path()).unwrap();
        assert!(reopened.store().get_node("app.main").unwrap().is_some());
        assert_eq!(reopened.graph().unwrap().node_count(), 2);
    }

    #[test]
    fn test_contexts_are_independent() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        fs::write(a.path().join("one.py"), "def one():\n    pass\n").unwrap();
        fs::write(b.path().join("two.py"), "def two():\n    pass\n").unwrap();

        let (ctx_a, _) = ProjectContext::init(a.path(), false).unwrap();
        let (ctx_b, _) = ProjectContext::init(b.path(), false).unwrap();
        ctx_a.notes().set("focus", "one").unwrap();

        assert!(ctx_a.store().get_node("two.two").unwrap().is_none());
        assert!(ctx_b.store().get_node("two.two").unwrap().is_some());
        assert_eq!(ctx_b.notes().get("focus").unwrap(), None);
    }

    #[test]
    fn test_force_init_rebuilds() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("app.py"), "def main():\n    return 1\n").unwrap();
        let (context, _) = ProjectContext::init(dir.path(), false).unwrap();
        context.notes().set("focus", "main").unwrap();
        drop(context);

        let (context, result) = ProjectContext::init(dir.path(), true).unwrap();
        assert!(result.added.contains(&"app.main".to_string()));
        assert_eq!(context.notes().get("focus").unwrap().as_deref(), Some("main"));
    }
}
