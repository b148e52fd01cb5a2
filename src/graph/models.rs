use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

// =====================================================
// Node
// =====================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Module,
    Class,
    Function,
    Method,
    Block,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Module => "module",
            NodeKind::Class => "class",
            NodeKind::Function => "function",
            NodeKind::Method => "method",
            NodeKind::Block => "block",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "module" => Some(NodeKind::Module),
            "class" => Some(NodeKind::Class),
            "function" => Some(NodeKind::Function),
            "method" => Some(NodeKind::Method),
            "block" => Some(NodeKind::Block),
            _ => None,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, NodeKind::Function | NodeKind::Method)
    }

    pub fn is_container(&self) -> bool {
        matches!(self, NodeKind::Class | NodeKind::Module)
    }
}

/// Semantic role of a node, as recorded by an annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Validator,
    Transformer,
    Io,
    Orchestrator,
    Pure,
    Handler,
    Test,
    Utility,
    Factory,
    Accessor,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Validator => "validator",
            NodeRole::Transformer => "transformer",
            NodeRole::Io => "io",
            NodeRole::Orchestrator => "orchestrator",
            NodeRole::Pure => "pure",
            NodeRole::Handler => "handler",
            NodeRole::Test => "test",
            NodeRole::Utility => "utility",
            NodeRole::Factory => "factory",
            NodeRole::Accessor => "accessor",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "validator" => Some(NodeRole::Validator),
            "transformer" => Some(NodeRole::Transformer),
            "io" => Some(NodeRole::Io),
            "orchestrator" => Some(NodeRole::Orchestrator),
            "pure" => Some(NodeRole::Pure),
            "handler" => Some(NodeRole::Handler),
            "test" => Some(NodeRole::Test),
            "utility" => Some(NodeRole::Utility),
            "factory" => Some(NodeRole::Factory),
            "accessor" => Some(NodeRole::Accessor),
            _ => None,
        }
    }
}

/// Externally supplied description of a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<NodeRole>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub side_effects: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub semantic_inputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub semantic_outputs: Vec<String>,
    /// Node hash at the time the annotation was written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation_hash: Option<String>,
}

/// Derived per-node metrics, recomputed after every sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub lines: usize,
    pub fan_in: usize,
    pub fan_out: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_methods: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependency_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_calls: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    pub name: String,
    pub qualified_name: String,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub source_code: String,
    pub docstring: Option<String>,
    pub signature: Option<String>,
    pub hash: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation: Option<Annotation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<NodeMetrics>,
}

impl Node {
    pub fn new(
        id: impl Into<String>,
        kind: NodeKind,
        name: impl Into<String>,
        file_path: impl Into<String>,
        start_line: usize,
        end_line: usize,
        source_code: impl Into<String>,
    ) -> Self {
        let id = id.into();
        let source_code = source_code.into();
        Self {
            qualified_name: id.clone(),
            id,
            kind,
            name: name.into(),
            file_path: file_path.into(),
            start_line,
            end_line,
            hash: content_hash(&source_code),
            source_code,
            docstring: None,
            signature: None,
            metadata: serde_json::Value::Object(serde_json::Map::new()),
            annotation: None,
            metrics: None,
        }
    }

    pub fn with_docstring(mut self, docstring: Option<String>) -> Self {
        self.docstring = docstring;
        self
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        if let serde_json::Value::Object(map) = &mut self.metadata {
            map.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// Exported name, if the declaration is visible outside its module.
    pub fn export_name(&self) -> Option<&str> {
        self.meta_str("export")
    }

    pub fn line_count(&self) -> usize {
        self.end_line.saturating_sub(self.start_line) + 1
    }

    /// Whether an annotation exists but was written for an older version of the source.
    pub fn annotation_is_stale(&self) -> bool {
        self.annotation
            .as_ref()
            .and_then(|a| a.annotation_hash.as_deref())
            .is_some_and(|h| h != self.hash)
    }

    /// The id of the containing node, derived from the dotted id.
    pub fn parent_id(&self) -> Option<&str> {
        if self.kind == NodeKind::Module {
            return None;
        }
        self.id.rsplit_once('.').map(|(parent, _)| parent)
    }
}

/// Hex xxh3 digest used for node hashes and file fingerprints.
pub fn content_hash(content: &str) -> String {
    format!("{:016x}", xxh3_64(content.as_bytes()))
}

// =====================================================
// Edge
// =====================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Calls,
    Imports,
    Inherits,
    Uses,
    Decorates,
    Contains,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Calls => "calls",
            EdgeKind::Imports => "imports",
            EdgeKind::Inherits => "inherits",
            EdgeKind::Uses => "uses",
            EdgeKind::Decorates => "decorates",
            EdgeKind::Contains => "contains",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "calls" => Some(EdgeKind::Calls),
            "imports" => Some(EdgeKind::Imports),
            "inherits" => Some(EdgeKind::Inherits),
            "uses" => Some(EdgeKind::Uses),
            "decorates" => Some(EdgeKind::Decorates),
            "contains" => Some(EdgeKind::Contains),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Target node exists in the store
    Resolved,
    /// Target file exists but the exact symbol could not be traced
    Inferred,
    /// Known non-project symbol
    External,
    /// No static determination was possible
    Unresolved,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Resolved => "resolved",
            Confidence::Inferred => "inferred",
            Confidence::External => "external",
            Confidence::Unresolved => "unresolved",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "resolved" => Some(Confidence::Resolved),
            "inferred" => Some(Confidence::Inferred),
            "external" => Some(Confidence::External),
            "unresolved" => Some(Confidence::Unresolved),
            _ => None,
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Confidence::Inferred | Confidence::Unresolved)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeSource {
    Static,
    Runtime,
    Both,
}

impl EdgeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeSource::Static => "static",
            EdgeSource::Runtime => "runtime",
            EdgeSource::Both => "both",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "static" => Some(EdgeSource::Static),
            "runtime" => Some(EdgeSource::Runtime),
            "both" => Some(EdgeSource::Both),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub from_node: String,
    pub to_node: String,
    pub kind: EdgeKind,
    pub line: Option<usize>,
    pub column: Option<usize>,
    pub confidence: Confidence,
    pub source: EdgeSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub untracked_reason: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// File whose parse produced this edge
    pub origin_file: String,
}

impl Edge {
    pub fn new(
        origin_file: impl Into<String>,
        from_node: impl Into<String>,
        to_node: impl Into<String>,
        kind: EdgeKind,
        confidence: Confidence,
    ) -> Self {
        let mut edge = Self {
            id: String::new(),
            from_node: from_node.into(),
            to_node: to_node.into(),
            kind,
            line: None,
            column: None,
            confidence,
            source: EdgeSource::Static,
            untracked_reason: None,
            metadata: serde_json::Value::Object(serde_json::Map::new()),
            origin_file: origin_file.into(),
        };
        edge.refresh_id();
        edge
    }

    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self.refresh_id();
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.untracked_reason = Some(reason.into());
        self
    }

    /// Recomputes the deterministic id after endpoints or position changed.
    pub fn refresh_id(&mut self) {
        let key = format!(
            "{}|{}|{}|{}|{}|{}",
            self.origin_file,
            self.from_node,
            self.to_node,
            self.kind.as_str(),
            self.line.map(|l| l as i64).unwrap_or(-1),
            self.column.map(|c| c as i64).unwrap_or(-1),
        );
        self.id = format!("{:016x}", xxh3_64(key.as_bytes()));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Incoming,
    Outgoing,
    Both,
}

impl Direction {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "incoming" | "in" | "callers" => Some(Direction::Incoming),
            "outgoing" | "out" | "callees" => Some(Direction::Outgoing),
            "both" => Some(Direction::Both),
            _ => None,
        }
    }
}

// =====================================================
// Queries
// =====================================================

#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub kind: Option<NodeKind>,
    pub file_path: Option<String>,
    pub name_contains: Option<String>,
}

impl NodeFilter {
    pub fn kind(mut self, kind: NodeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn file(mut self, file_path: impl Into<String>) -> Self {
        self.file_path = Some(file_path.into());
        self
    }

    pub fn name(mut self, fragment: impl Into<String>) -> Self {
        self.name_contains = Some(fragment.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchField {
    Name,
    Code,
    Docstring,
    All,
}

impl SearchField {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "name" => Some(SearchField::Name),
            "code" => Some(SearchField::Code),
            "docstring" => Some(SearchField::Docstring),
            "all" => Some(SearchField::All),
            _ => None,
        }
    }
}

// =====================================================
// Sync bookkeeping
// =====================================================

/// Cheap change detector for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub path: String,
    pub mtime_ns: i64,
    pub size: u64,
    pub content_hash: String,
}

/// Node set produced by parsing and resolving one file.
#[derive(Debug, Clone, Default)]
pub struct FileGraph {
    pub file_path: String,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    pub files_parsed: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl SyncResult {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    pub fn total_changes(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }
}

// =====================================================
// History
// =====================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Created,
    Modified,
    Deleted,
    Renamed,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Created => "created",
            ChangeAction::Modified => "modified",
            ChangeAction::Deleted => "deleted",
            ChangeAction::Renamed => "renamed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "created" => Some(ChangeAction::Created),
            "modified" => Some(ChangeAction::Modified),
            "deleted" => Some(ChangeAction::Deleted),
            "renamed" => Some(ChangeAction::Renamed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub id: Option<i64>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub node_id: String,
    pub action: ChangeAction,
    pub file_path: String,
    pub old_source: Option<String>,
    pub new_source: Option<String>,
    pub old_hash: Option<String>,
    pub new_hash: Option<String>,
    pub affected_nodes: Vec<String>,
    pub description: String,
    pub reasoning: Option<String>,
}

impl Change {
    pub fn new(
        node_id: impl Into<String>,
        action: ChangeAction,
        file_path: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            timestamp: chrono::Utc::now(),
            node_id: node_id.into(),
            action,
            file_path: file_path.into(),
            old_source: None,
            new_source: None,
            old_hash: None,
            new_hash: None,
            affected_nodes: Vec::new(),
            description: description.into(),
            reasoning: None,
        }
    }

    pub fn with_old(mut self, source: &str) -> Self {
        self.old_hash = Some(content_hash(source));
        self.old_source = Some(source.to_string());
        self
    }

    pub fn with_new(mut self, source: &str) -> Self {
        self.new_hash = Some(content_hash(source));
        self.new_source = Some(source.to_string());
        self
    }

    pub fn with_affected(mut self, affected: Vec<String>) -> Self {
        self.affected_nodes = affected;
        self
    }

    pub fn with_reasoning(mut self, reasoning: Option<String>) -> Self {
        self.reasoning = reasoning;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_kind_roundtrip_strings() {
        for kind in [
            NodeKind::Module,
            NodeKind::Class,
            NodeKind::Function,
            NodeKind::Method,
            NodeKind::Block,
        ] {
            assert_eq!(NodeKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(NodeKind::from_str("struct"), None);
    }

    #[test]
    fn test_node_hash_tracks_source() {
        let a = Node::new("m.f", NodeKind::Function, "f", "m.py", 1, 2, "def f():\n    pass");
        let b = Node::new("m.f", NodeKind::Function, "f", "m.py", 1, 2, "def f():\n    return 1");
        assert_ne!(a.hash, b.hash);
        assert_eq!(a.hash, content_hash("def f():\n    pass"));
    }

    #[test]
    fn test_node_parent_id() {
        let method = Node::new("pkg.mod.Cls.run", NodeKind::Method, "run", "pkg/mod.py", 3, 4, "");
        assert_eq!(method.parent_id(), Some("pkg.mod.Cls"));
        let module = Node::new("pkg.mod", NodeKind::Module, "mod", "pkg/mod.py", 1, 9, "");
        assert_eq!(module.parent_id(), None);
    }

    #[test]
    fn test_annotation_staleness() {
        let mut node = Node::new("m.f", NodeKind::Function, "f", "m.py", 1, 1, "def f(): pass");
        assert!(!node.annotation_is_stale());
        node.annotation = Some(Annotation {
            summary: Some("does nothing".into()),
            annotation_hash: Some(node.hash.clone()),
            ..Default::default()
        });
        assert!(!node.annotation_is_stale());
        node.hash = content_hash("def f(): return 2");
        assert!(node.annotation_is_stale());
    }

    #[test]
    fn test_edge_id_is_deterministic() {
        let a = Edge::new("app.py", "app.main", "utils.helper", EdgeKind::Calls, Confidence::Resolved)
            .at(3, 4);
        let b = Edge::new("app.py", "app.main", "utils.helper", EdgeKind::Calls, Confidence::Resolved)
            .at(3, 4);
        let c = Edge::new("app.py", "app.main", "utils.helper", EdgeKind::Calls, Confidence::Resolved)
            .at(5, 4);
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_export_name_from_metadata() {
        let node = Node::new("ui.Button", NodeKind::Function, "Button", "ui.tsx", 1, 3, "")
            .with_meta("export", "default");
        assert_eq!(node.export_name(), Some("default"));
    }

    #[test]
    fn test_sync_result_counts() {
        let result = SyncResult {
            added: vec!["a".into()],
            modified: vec!["b".into(), "c".into()],
            ..Default::default()
        };
        assert!(!result.is_empty());
        assert_eq!(result.total_changes(), 3);
    }
}
