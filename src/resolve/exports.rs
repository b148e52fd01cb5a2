use std::collections::{HashMap, HashSet};

use crate::graph::models::{Node, NodeKind};
use crate::parser::ParsedFile;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct FileExports {
    module_id: String,
    /// (export name, node id), sorted
    exports: Vec<(String, String)>,
    declared: Vec<String>,
}

/// Name → node-id index of every file's exported declarations.
///
/// Keys are `"<module_id>.<name>"` for named exports and `"<module_id>"` for the
/// default export. All declared ids are tracked as well, so member lookups such as
/// `Class.method` behind an exported class can be checked.
#[derive(Debug, Default)]
pub struct ExportIndex {
    files: HashMap<String, FileExports>,
    keys: HashMap<String, String>,
    declared: HashSet<String>,
    modules: HashMap<String, String>,
}

impl ExportIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the index from stored rows: exported and module nodes, plus the
    /// `(id, file)` location of every stored node.
    pub fn from_store(exported: &[Node], locations: &[(String, String)]) -> Self {
        let mut grouped: HashMap<&str, FileExports> = HashMap::new();
        for node in exported {
            let entry = grouped.entry(node.file_path.as_str()).or_default();
            if node.kind == NodeKind::Module {
                entry.module_id = node.id.clone();
            }
            if let Some(name) = node.export_name() {
                entry.exports.push((name.to_string(), node.id.clone()));
            }
        }
        for (id, file) in locations {
            grouped.entry(file.as_str()).or_default().declared.push(id.clone());
        }

        let mut index = Self::new();
        for (file, mut exports) in grouped {
            exports.exports.sort();
            exports.declared.sort();
            index.insert(file.to_string(), exports);
        }
        index
    }

    /// Registers a freshly parsed file. Returns true when its module id, export set or
    /// declared ids changed; member lookups behind an export depend on the latter.
    pub fn register(&mut self, parsed: &ParsedFile) -> bool {
        let mut exports = parsed.exports();
        exports.sort();
        let mut declared: Vec<String> = parsed.nodes.iter().map(|n| n.id.clone()).collect();
        declared.sort();
        let entry = FileExports {
            module_id: parsed.module_id.clone(),
            exports,
            declared,
        };

        let changed = self.files.get(&parsed.file_path).map_or(true, |old| *old != entry);
        self.remove(&parsed.file_path);
        self.insert(parsed.file_path.clone(), entry);
        changed
    }

    /// Forgets a file. Returns true when it was indexed.
    pub fn remove(&mut self, file_path: &str) -> bool {
        let Some(old) = self.files.remove(file_path) else {
            return false;
        };
        for (name, _) in &old.exports {
            self.keys.remove(&export_key(&old.module_id, name));
        }
        for id in &old.declared {
            self.declared.remove(id);
        }
        if self.modules.get(&old.module_id).is_some_and(|f| f == file_path) {
            self.modules.remove(&old.module_id);
        }
        true
    }

    fn insert(&mut self, file_path: String, entry: FileExports) {
        for (name, id) in &entry.exports {
            self.keys.insert(export_key(&entry.module_id, name), id.clone());
        }
        self.declared.extend(entry.declared.iter().cloned());
        if !entry.module_id.is_empty() {
            self.modules.insert(entry.module_id.clone(), file_path.clone());
        }
        self.files.insert(file_path, entry);
    }

    /// Node exported as `name` from `module_id`; `default` looks up the default export.
    pub fn export(&self, module_id: &str, name: &str) -> Option<&str> {
        self.keys.get(&export_key(module_id, name)).map(|s| s.as_str())
    }

    pub fn module_of(&self, file_path: &str) -> Option<&str> {
        self.files.get(file_path).map(|f| f.module_id.as_str())
    }

    pub fn file_of_module(&self, module_id: &str) -> Option<&str> {
        self.modules.get(module_id).map(|s| s.as_str())
    }

    pub fn has_module(&self, module_id: &str) -> bool {
        self.modules.contains_key(module_id)
    }

    pub fn is_declared(&self, id: &str) -> bool {
        self.declared.contains(id)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn export_key(module_id: &str, name: &str) -> String {
    if name == "default" {
        module_id.to_string()
    } else {
        format!("{}.{}", module_id, name)
    }
}
