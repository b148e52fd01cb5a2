//! Entry point detection for reachability analysis.
//!
//! Detects nodes that are invoked from outside the static graph: main functions,
//! script guards, tests, protocol methods, framework handlers and default exports.

use serde::{Deserialize, Serialize};

use crate::graph::models::{EdgeKind, Node, NodeKind};
use crate::graph::GraphProjection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// `main` functions
    Main,
    /// Module-level statement blocks, including `__main__` guards
    Block,
    /// Test functions, test classes and everything in test files
    Test,
    /// Methods invoked by the language runtime
    Dunder,
    /// TypeScript default exports
    DefaultExport,
    /// Functions registered through decorators (routes, tasks, fixtures)
    Decorated,
    /// CLI command and visitor naming conventions
    Convention,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Main => "main",
            EntryType::Block => "block",
            EntryType::Test => "test",
            EntryType::Dunder => "dunder",
            EntryType::DefaultExport => "default_export",
            EntryType::Decorated => "decorated",
            EntryType::Convention => "convention",
        }
    }
}

/// A detected entry point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryPoint {
    pub node_id: String,
    pub entry_type: EntryType,
    /// Why the node was picked
    pub evidence: String,
}

const DUNDER_METHODS: &[&str] = &[
    "__init__", "__post_init__", "__new__", "__del__", "__repr__", "__str__", "__hash__",
    "__eq__", "__ne__", "__lt__", "__le__", "__gt__", "__ge__", "__len__", "__iter__",
    "__next__", "__getitem__", "__setitem__", "__contains__", "__call__", "__enter__",
    "__exit__", "__aenter__", "__aexit__", "__get__", "__set__", "__delete__",
];

const TS_LIFECYCLE_METHODS: &[&str] = &["constructor", "render", "componentDidMount", "ngOnInit"];

fn is_test_file(path: &str) -> bool {
    let file = path.rsplit('/').next().unwrap_or(path);
    path.starts_with("tests/")
        || path.contains("/tests/")
        || path.starts_with("test/")
        || path.contains("/__tests__/")
        || file.starts_with("test_")
        || file.ends_with("_test.py")
        || file == "conftest.py"
        || file.contains(".test.")
        || file.contains(".spec.")
}

/// `test_x` and camel-cased `testX`, but not `testing`.
fn is_test_name(name: &str) -> bool {
    match name.strip_prefix("test") {
        Some(rest) => rest.starts_with('_') || rest.starts_with(|c: char| c.is_ascii_uppercase()),
        None => false,
    }
}

fn classify(node: &Node) -> Option<(EntryType, String)> {
    let name = node.name.as_str();
    match node.kind {
        NodeKind::Module => None,
        NodeKind::Block => Some((EntryType::Block, format!("module-level block `{}`", name))),
        _ if is_test_file(&node.file_path) => {
            Some((EntryType::Test, format!("declared in test file {}", node.file_path)))
        }
        NodeKind::Function if name == "main" => Some((EntryType::Main, "main function".into())),
        NodeKind::Function | NodeKind::Method if is_test_name(name) => {
            Some((EntryType::Test, format!("test function `{}`", name)))
        }
        NodeKind::Class if name.starts_with("Test") => {
            Some((EntryType::Test, format!("test class `{}`", name)))
        }
        NodeKind::Method if DUNDER_METHODS.contains(&name) || TS_LIFECYCLE_METHODS.contains(&name) => {
            Some((EntryType::Dunder, format!("runtime-invoked method `{}`", name)))
        }
        NodeKind::Function if name.starts_with("cmd_") || name.starts_with("handle_") => {
            Some((EntryType::Convention, format!("handler naming `{}`", name)))
        }
        NodeKind::Method if name.starts_with("visit_") || name == "generic_visit" => {
            Some((EntryType::Convention, format!("visitor method `{}`", name)))
        }
        _ if node.export_name() == Some("default") => {
            Some((EntryType::DefaultExport, "default export".into()))
        }
        _ => None,
    }
}

/// Auto-detects entry points, sorted by node id.
pub fn detect_entry_points(graph: &GraphProjection) -> Vec<EntryPoint> {
    let mut entries: Vec<EntryPoint> = graph
        .nodes()
        .iter()
        .filter_map(|node| {
            if let Some((entry_type, evidence)) = classify(node) {
                return Some(EntryPoint {
                    node_id: node.id.clone(),
                    entry_type,
                    evidence,
                });
            }
            // Decorators register functions with frameworks the graph cannot see
            let decorator = graph
                .edges_from(&node.id)
                .find(|e| e.kind == EdgeKind::Decorates)?;
            (node.kind == NodeKind::Function).then(|| EntryPoint {
                node_id: node.id.clone(),
                entry_type: EntryType::Decorated,
                evidence: format!("decorated by `{}`", decorator.to_node),
            })
        })
        .collect();

    entries.sort_by(|a, b| a.node_id.cmp(&b.node_id));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::models::{Confidence, Edge};

    fn node(id: &str, kind: NodeKind, file: &str) -> Node {
        let name = id.rsplit('.').next().unwrap_or(id);
        Node::new(id, kind, name, file, 1, 2, "")
    }

    fn detect(nodes: Vec<Node>, edges: Vec<Edge>) -> Vec<(String, EntryType)> {
        let graph = GraphProjection::build(nodes, edges);
        detect_entry_points(&graph)
            .into_iter()
            .map(|e| (e.node_id, e.entry_type))
            .collect()
    }

    #[test]
    fn test_detects_main_blocks_and_dunders() {
        let found = detect(
            vec![
                node("app", NodeKind::Module, "app.py"),
                node("app.main", NodeKind::Function, "app.py"),
                node("app._block_10", NodeKind::Block, "app.py"),
                node("app.Cls", NodeKind::Class, "app.py"),
                node("app.Cls.__init__", NodeKind::Method, "app.py"),
                node("app.helper", NodeKind::Function, "app.py"),
            ],
            vec![],
        );
        assert_eq!(
            found,
            vec![
                ("app.Cls.__init__".to_string(), EntryType::Dunder),
                ("app._block_10".to_string(), EntryType::Block),
                ("app.main".to_string(), EntryType::Main),
            ]
        );
    }

    #[test]
    fn test_detects_tests() {
        let found = detect(
            vec![
                node("tests.test_app.helper", NodeKind::Function, "tests/test_app.py"),
                node("pkg.core.test_fast", NodeKind::Function, "pkg/core.py"),
                node("pkg.core.TestSuite", NodeKind::Class, "pkg/core.py"),
                node("pkg.core.testing_mode", NodeKind::Function, "pkg/core.py"),
            ],
            vec![],
        );
        let ids: Vec<&str> = found.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["pkg.core.TestSuite", "pkg.core.test_fast", "tests.test_app.helper"]);
        assert!(found.iter().all(|(_, t)| *t == EntryType::Test));
    }

    #[test]
    fn test_detects_default_exports_and_decorated() {
        let page = node("src.page.Page", NodeKind::Function, "src/page.tsx").with_meta("export", "default");
        let found = detect(
            vec![page, node("api.routes.index", NodeKind::Function, "api/routes.py")],
            vec![Edge::new(
                "api/routes.py",
                "api.routes.index",
                "flask.Flask.route",
                EdgeKind::Decorates,
                Confidence::External,
            )],
        );
        assert!(found.contains(&("src.page.Page".to_string(), EntryType::DefaultExport)));
        assert!(found.contains(&("api.routes.index".to_string(), EntryType::Decorated)));
    }
}
