//! Optional higher-fidelity resolution through an external analyzer.
//!
//! Ambiguous call/uses edges are batched into one JSON request per chunk:
//!
//! ```json
//! {"root": "/abs/project", "queries": [{"file": "app.py", "line": 4, "column": 4, "name": "helper"}]}
//! ```
//!
//! and the analyzer answers with the fully qualified target of each position (or null):
//!
//! ```json
//! {"results": [{"file": "app.py", "line": 4, "column": 4, "target": "utils.helper"}]}
//! ```
//!
//! Answers are cached per (file, line, column). Any failure degrades to the static
//! result and surfaces as a warning.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ExportIndex;
use crate::config::SemanticConfig;
use crate::error::{LensError, Result};
use crate::graph::models::{Confidence, Edge, EdgeKind};
use crate::graph::GraphStore;
use crate::process::run_command;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticQuery {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticAnswer {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub target: Option<String>,
}

pub trait SemanticAnalyzer: Send + Sync {
    /// Parser language whose edges this analyzer can refine.
    fn language(&self) -> &str;

    fn batch_size(&self) -> usize {
        200
    }

    fn analyze(&self, root: &Path, queries: &[SemanticQuery]) -> Result<Vec<SemanticAnswer>>;
}

#[derive(Serialize)]
struct Request<'a> {
    root: String,
    queries: &'a [SemanticQuery],
}

#[derive(Deserialize)]
struct Reply {
    results: Vec<SemanticAnswer>,
}

/// Runs a configured command per batch, speaking JSON over stdin/stdout.
pub struct SubprocessAnalyzer {
    command: Vec<String>,
    language: String,
    timeout: Duration,
    batch_size: usize,
}

impl SubprocessAnalyzer {
    pub fn new(command: Vec<String>, language: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command,
            language: language.into(),
            timeout,
            batch_size: 200,
        }
    }

    /// None when no command is configured.
    pub fn from_config(config: &SemanticConfig) -> Option<Self> {
        if config.command.is_empty() {
            return None;
        }
        Some(Self {
            command: config.command.clone(),
            language: config.language.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
            batch_size: config.batch_size.max(1),
        })
    }
}

impl SemanticAnalyzer for SubprocessAnalyzer {
    fn language(&self) -> &str {
        &self.language
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn analyze(&self, root: &Path, queries: &[SemanticQuery]) -> Result<Vec<SemanticAnswer>> {
        let request = serde_json::to_vec(&Request {
            root: root.display().to_string(),
            queries,
        })?;
        let output = run_command(&self.command, root, Some(request), self.timeout)
            .map_err(|e| LensError::ResolutionDegraded(e.to_string()))?;
        if !output.success() {
            return Err(LensError::ResolutionDegraded(format!(
                "analyzer exited with {:?}: {}",
                output.status,
                output.stderr.trim()
            )));
        }
        let reply: Reply = serde_json::from_str(&output.stdout)
            .map_err(|e| LensError::ResolutionDegraded(format!("malformed analyzer reply: {}", e)))?;
        Ok(reply.results)
    }
}

fn apply(edge: &mut Edge, target: Option<&str>, exports: &ExportIndex) {
    let Some(target) = target else {
        return;
    };
    edge.to_node = target.to_string();
    edge.confidence = if exports.is_declared(target) {
        Confidence::Resolved
    } else {
        Confidence::External
    };
    edge.untracked_reason = None;
    if let serde_json::Value::Object(map) = &mut edge.metadata {
        map.insert("resolver".to_string(), "semantic".into());
    }
    edge.refresh_id();
}

/// Upgrades ambiguous edges of the analyzer's language. Returns degradation warnings.
pub fn refine_edges(
    analyzer: &dyn SemanticAnalyzer,
    root: &Path,
    store: &GraphStore,
    exports: &ExportIndex,
    edges: &mut [Edge],
    languages: &HashMap<String, String>,
) -> Vec<String> {
    let mut warnings = Vec::new();
    let mut pending: Vec<usize> = Vec::new();

    for (i, edge) in edges.iter_mut().enumerate() {
        let ambiguous = matches!(edge.kind, EdgeKind::Calls | EdgeKind::Uses)
            && matches!(edge.confidence, Confidence::Inferred | Confidence::Unresolved);
        let same_language = languages
            .get(&edge.origin_file)
            .is_some_and(|l| l == analyzer.language());
        let (Some(line), Some(column)) = (edge.line, edge.column) else {
            continue;
        };
        if !ambiguous || !same_language {
            continue;
        }
        match store.semantic_lookup(&edge.origin_file, line, column) {
            Ok(Some(cached)) => apply(edge, cached.as_deref(), exports),
            Ok(None) => pending.push(i),
            Err(e) => {
                warnings.push(LensError::ResolutionDegraded(format!("semantic cache unavailable: {}", e)).to_string());
                return warnings;
            }
        }
    }

    if pending.is_empty() {
        return warnings;
    }
    tracing::debug!("Sending {} ambiguous references to the semantic analyzer", pending.len());

    for chunk in pending.chunks(analyzer.batch_size().max(1)) {
        let queries: Vec<SemanticQuery> = chunk
            .iter()
            .map(|&i| {
                let edge = &edges[i];
                SemanticQuery {
                    file: edge.origin_file.clone(),
                    line: edge.line.unwrap_or_default(),
                    column: edge.column.unwrap_or_default(),
                    name: edge.to_node.clone(),
                }
            })
            .collect();

        let answers = match analyzer.analyze(root, &queries) {
            Ok(answers) => answers,
            Err(e) => {
                tracing::warn!("Semantic resolution degraded: {}", e);
                warnings.push(e.to_string());
                break;
            }
        };

        let by_position: HashMap<(&str, usize, usize), Option<&str>> = answers
            .iter()
            .map(|a| ((a.file.as_str(), a.line, a.column), a.target.as_deref()))
            .collect();
        let mut cache_rows = Vec::with_capacity(queries.len());
        for (query, &i) in queries.iter().zip(chunk) {
            let target = by_position
                .get(&(query.file.as_str(), query.line, query.column))
                .copied()
                .flatten();
            cache_rows.push((query.file.clone(), query.line, query.column, target.map(String::from)));
            apply(&mut edges[i], target, exports);
        }
        if let Err(e) = store.semantic_store(&cache_rows) {
            tracing::warn!("Failed to cache semantic answers: {}", e);
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedAnalyzer {
        answer: Option<String>,
        calls: AtomicUsize,
        fail: bool,
    }

    impl SemanticAnalyzer for FixedAnalyzer {
        fn language(&self) -> &str {
            "python"
        }

        fn analyze(&self, _root: &Path, queries: &[SemanticQuery]) -> Result<Vec<SemanticAnswer>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LensError::ResolutionDegraded("analyzer offline".into()));
            }
            Ok(queries
                .iter()
                .map(|q| SemanticAnswer {
                    file: q.file.clone(),
                    line: q.line,
                    column: q.column,
                    target: self.answer.clone(),
                })
                .collect())
        }
    }

    fn ambiguous_edge() -> Edge {
        Edge::new("app.py", "app.main", "obj.run", EdgeKind::Calls, Confidence::Unresolved)
            .at(4, 4)
            .with_reason("unknown_receiver")
    }

    fn languages() -> HashMap<String, String> {
        HashMap::from([("app.py".to_string(), "python".to_string())])
    }

    #[test]
    fn test_answers_upgrade_and_are_cached() {
        let store = GraphStore::in_memory().unwrap();
        let analyzer = FixedAnalyzer {
            answer: Some("requests.Session.get".into()),
            calls: AtomicUsize::new(0),
            fail: false,
        };
        let exports = ExportIndex::new();

        let mut edges = vec![ambiguous_edge()];
        let warnings = refine_edges(&analyzer, Path::new("."), &store, &exports, &mut edges, &languages());
        assert!(warnings.is_empty());
        assert_eq!(edges[0].to_node, "requests.Session.get");
        assert_eq!(edges[0].confidence, Confidence::External);

        // Second pass is served from the cache
        let mut edges = vec![ambiguous_edge()];
        refine_edges(&analyzer, Path::new("."), &store, &exports, &mut edges, &languages());
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(edges[0].to_node, "requests.Session.get");
    }

    #[test]
    fn test_failure_keeps_static_result() {
        let store = GraphStore::in_memory().unwrap();
        let analyzer = FixedAnalyzer {
            answer: None,
            calls: AtomicUsize::new(0),
            fail: true,
        };
        let mut edges = vec![ambiguous_edge()];
        let warnings = refine_edges(&analyzer, Path::new("."), &store, &ExportIndex::new(), &mut edges, &languages());

        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("analyzer offline"));
        assert_eq!(edges[0].confidence, Confidence::Unresolved);
        assert_eq!(edges[0].to_node, "obj.run");
    }

    #[test]
    fn test_other_languages_are_skipped() {
        let store = GraphStore::in_memory().unwrap();
        let analyzer = FixedAnalyzer {
            answer: Some("x".into()),
            calls: AtomicUsize::new(0),
            fail: false,
        };
        let mut edges = vec![ambiguous_edge()];
        let languages = HashMap::from([("app.py".to_string(), "typescript".to_string())]);
        refine_edges(&analyzer, Path::new("."), &store, &ExportIndex::new(), &mut edges, &languages);
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_subprocess_requires_command() {
        assert!(SubprocessAnalyzer::from_config(&SemanticConfig::default()).is_none());
    }
}
