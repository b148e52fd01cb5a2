pub mod python;
pub mod tree;
pub mod typescript;
pub mod walker;

pub use walker::FileWalker;

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{LensError, Result};
use crate::graph::models::{Edge, EdgeKind, Node, NodeKind};

/// A reference occurrence as written in source, before resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawReference {
    pub from_node: String,
    pub kind: EdgeKind,
    /// Dotted expression as written (`utils.helper`, `this.save`, `Base`)
    pub name: String,
    /// Module specifier for import references (`./utils`, `..pkg.mod`)
    pub source_hint: Option<String>,
    pub line: usize,
    pub column: usize,
}

impl RawReference {
    pub fn new(from_node: impl Into<String>, kind: EdgeKind, name: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            from_node: from_node.into(),
            kind,
            name: name.into(),
            source_hint: None,
            line,
            column,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source_hint = Some(source.into());
        self
    }

    /// First segment of the dotted name.
    pub fn root(&self) -> &str {
        self.name.split('.').next().unwrap_or(&self.name)
    }
}

/// A name bound in a file by an import statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportBinding {
    /// Local name (`*` for star imports)
    pub local: String,
    pub source: String,
    pub imported: ImportedName,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportedName {
    /// `import m`, `import * as ns from "m"`
    Module,
    /// `import x from "m"`
    Default,
    /// `from m import x`, `import { x } from "m"`
    Named(String),
    /// `from m import *`
    Star,
}

/// Everything one file contributes to the graph before resolution.
#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    pub file_path: String,
    pub module_id: String,
    pub language: String,
    pub nodes: Vec<Node>,
    pub references: Vec<RawReference>,
    pub imports: Vec<ImportBinding>,
    /// Edges fully determined by the file itself (containment)
    pub local_edges: Vec<Edge>,
    pub syntax_error: Option<String>,
}

impl ParsedFile {
    /// Nodes carrying an export name, as (export name, node id).
    pub fn exports(&self) -> Vec<(String, String)> {
        self.nodes
            .iter()
            .filter_map(|n| n.export_name().map(|name| (name.to_string(), n.id.clone())))
            .collect()
    }

    pub fn declares(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }
}

/// Outermost construct of a code fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Construct {
    pub kind: NodeKind,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub required: bool,
}

/// Per-language parsing capability.
///
/// `parse` turns file bytes into declared units and raw references. The remaining
/// methods answer questions about standalone fragments for edit validation; `kind` is
/// the kind of node the fragment replaces, so languages can wrap members in a
/// synthetic container before parsing.
pub trait LanguageParser: Send + Sync {
    fn name(&self) -> &'static str;
    fn extensions(&self) -> &[&'static str];
    fn module_id(&self, rel_path: &str) -> String;

    /// Parses a file under an explicit module id.
    fn parse_module(&self, rel_path: &str, module_id: &str, source: &str) -> Result<ParsedFile>;

    fn parse(&self, rel_path: &str, source: &str) -> Result<ParsedFile> {
        self.parse_module(rel_path, &self.module_id(rel_path), source)
    }

    /// `Err` carries a description of the first syntax error.
    fn check_syntax(&self, source: &str, kind: NodeKind) -> std::result::Result<(), String>;
    fn outermost(&self, source: &str, kind: NodeKind) -> Option<Construct>;
    fn parameters(&self, source: &str, kind: NodeKind) -> Option<Vec<Param>>;
}

pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn LanguageParser>>,
    extension_map: HashMap<String, String>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            parsers: HashMap::new(),
            extension_map: HashMap::new(),
        };
        registry.register(Arc::new(python::PythonParser));
        registry.register(Arc::new(typescript::TypeScriptParser));
        registry
    }

    pub fn register(&mut self, parser: Arc<dyn LanguageParser>) {
        let name = parser.name().to_string();
        for ext in parser.extensions() {
            self.extension_map.insert(ext.to_string(), name.clone());
        }
        self.parsers.insert(name, parser);
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn LanguageParser>> {
        self.parsers.get(name).cloned()
    }

    pub fn get_for_file(&self, path: impl AsRef<Path>) -> Option<Arc<dyn LanguageParser>> {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.extension_map.get(ext))
            .and_then(|name| self.parsers.get(name))
            .cloned()
    }

    pub fn require_for_file(&self, path: &str) -> Result<Arc<dyn LanguageParser>> {
        self.get_for_file(path)
            .ok_or_else(|| LensError::UnsupportedLanguage(path.to_string()))
    }

    /// Project-wide list of parseable extensions, sorted.
    pub fn extensions(&self) -> Vec<&str> {
        let mut exts: Vec<&str> = self.extension_map.keys().map(|s| s.as_str()).collect();
        exts.sort_unstable();
        exts
    }

    pub fn is_supported(&self, path: impl AsRef<Path>) -> bool {
        self.get_for_file(path).is_some()
    }

    /// Module id of every supported file in `files`.
    ///
    /// Files that map to the same id (`api.py` next to `api.ts`, `pkg.py` next to
    /// `pkg/__init__.py`) are disambiguated: the first path in sorted order keeps the id
    /// and the rest take an `@<extension>` suffix.
    pub fn module_ids(&self, files: &[String]) -> HashMap<String, String> {
        let mut sorted: Vec<&String> = files.iter().collect();
        sorted.sort();
        sorted.dedup();

        let mut taken: HashSet<String> = HashSet::new();
        let mut ids = HashMap::with_capacity(sorted.len());
        for path in sorted {
            let Some(parser) = self.get_for_file(path.as_str()) else {
                continue;
            };
            let base = parser.module_id(path);
            let mut id = base.clone();
            if taken.contains(&id) {
                let ext = path.rsplit_once('.').map_or("", |(_, ext)| ext);
                id = format!("{}@{}", base, ext);
                let mut n = 2;
                while taken.contains(&id) {
                    id = format!("{}@{}{}", base, ext, n);
                    n += 1;
                }
            }
            taken.insert(id.clone());
            ids.insert(path.clone(), id);
        }
        ids
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Module id from a project-relative path: drop the extension and a trailing
/// package marker, then join the components with dots.
pub fn module_id_from_path(rel_path: &str, package_markers: &[&str]) -> String {
    let without_ext = match rel_path.rsplit_once('.') {
        Some((stem, ext)) if !ext.contains('/') => stem,
        _ => rel_path,
    };
    let mut parts: Vec<&str> = without_ext.split('/').filter(|p| !p.is_empty()).collect();
    if parts.len() > 1 && parts.last().is_some_and(|last| package_markers.contains(last)) {
        parts.pop();
    }
    parts.join(".")
}

/// Id for a declaration named `name` under `parent_id`. A name the scope already
/// declares (a property setter, an accessor pair, a redefinition) gets its start line
/// appended.
pub(crate) fn declaration_id(nodes: &[Node], parent_id: &str, name: &str, start_line: usize) -> String {
    let id = format!("{}.{}", parent_id, name);
    if nodes.iter().any(|n| n.id == id) {
        format!("{}@{}", id, start_line)
    } else {
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_selects_by_extension() {
        let registry = ParserRegistry::new();
        assert_eq!(registry.get_for_file("a/b.py").unwrap().name(), "python");
        assert_eq!(registry.get_for_file("ui/App.tsx").unwrap().name(), "typescript");
        assert_eq!(registry.get_for_file("lib.js").unwrap().name(), "typescript");
        assert!(registry.get_for_file("README.md").is_none());
        assert!(registry.require_for_file("main.rs").is_err());
    }

    #[test]
    fn test_extensions_list() {
        let registry = ParserRegistry::default();
        assert_eq!(registry.extensions(), vec!["js", "jsx", "py", "ts", "tsx"]);
    }

    #[test]
    fn test_module_id_from_path() {
        assert_eq!(module_id_from_path("pkg/mod.py", &["__init__"]), "pkg.mod");
        assert_eq!(module_id_from_path("pkg/__init__.py", &["__init__"]), "pkg");
        assert_eq!(module_id_from_path("__init__.py", &["__init__"]), "__init__");
        assert_eq!(module_id_from_path("src/lib/index.ts", &["index"]), "src.lib");
        assert_eq!(module_id_from_path("app.tsx", &["index"]), "app");
    }

    #[test]
    fn test_colliding_module_ids_get_suffixes() {
        let registry = ParserRegistry::new();
        let files: Vec<String> = ["api.ts", "api.py", "pkg/__init__.py", "pkg.py", "src/index.ts", "src/index.tsx", "src.ts", "README.md"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let ids = registry.module_ids(&files);

        assert_eq!(ids["api.py"], "api");
        assert_eq!(ids["api.ts"], "api@ts");
        assert_eq!(ids["pkg.py"], "pkg");
        assert_eq!(ids["pkg/__init__.py"], "pkg@py");
        assert_eq!(ids["src.ts"], "src");
        assert_eq!(ids["src/index.ts"], "src@ts");
        assert_eq!(ids["src/index.tsx"], "src@tsx");
        assert!(!ids.contains_key("README.md"));

        let unique: HashSet<&String> = ids.values().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn test_raw_reference_root() {
        let r = RawReference::new("app.main", EdgeKind::Calls, "utils.helper", 3, 4);
        assert_eq!(r.root(), "utils");
    }
}
