//! Reference resolution.
//!
//! Raw references produced by the parsers become edges carrying a confidence tier:
//!
//! - `resolved`: the target declaration was found in the project
//! - `inferred`: the target file was found but the symbol was not (untraced re-exports,
//!   inherited members)
//! - `external`: a standard library, builtin or third-party symbol
//! - `unresolved`: nothing could be determined statically; the edge records why
//!
//! The algorithm is shared; each language supplies a [`Resolver`] that knows how its
//! specifiers map onto project files.

pub mod exports;
pub mod python;
pub mod semantic;
pub mod typescript;

pub use exports::ExportIndex;
pub use python::PythonResolver;
pub use semantic::{SemanticAnalyzer, SemanticAnswer, SemanticQuery, SubprocessAnalyzer};
pub use typescript::TypeScriptResolver;

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::config::ProjectConfig;
use crate::error::Result;
use crate::graph::models::{Confidence, Edge, EdgeKind, NodeKind};
use crate::graph::GraphStore;
use crate::parser::{ImportBinding, ImportedName, ParsedFile, RawReference};

/// Outcome of resolving one reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub to_node: String,
    pub confidence: Confidence,
    pub reason: Option<String>,
    /// File whose exports decided the outcome
    pub target_file: Option<String>,
}

impl Resolution {
    pub fn resolved(to_node: impl Into<String>, file: &str) -> Self {
        Self {
            to_node: to_node.into(),
            confidence: Confidence::Resolved,
            reason: None,
            target_file: Some(file.to_string()),
        }
    }

    pub fn inferred(to_node: impl Into<String>, reason: &str, file: &str) -> Self {
        Self {
            to_node: to_node.into(),
            confidence: Confidence::Inferred,
            reason: Some(reason.to_string()),
            target_file: Some(file.to_string()),
        }
    }

    pub fn external(to_node: impl Into<String>) -> Self {
        Self {
            to_node: to_node.into(),
            confidence: Confidence::External,
            reason: None,
            target_file: None,
        }
    }

    pub fn unresolved(to_node: impl Into<String>, reason: &str) -> Self {
        Self {
            to_node: to_node.into(),
            confidence: Confidence::Unresolved,
            reason: Some(reason.to_string()),
            target_file: None,
        }
    }
}

/// Project files plus derived lookup sets, rebuilt whenever the file set changes.
#[derive(Debug, Default, Clone)]
pub struct ProjectLayout {
    pub files: HashSet<String>,
    /// Top-level Python packages and modules importable from the root or a source root
    pub python_packages: HashSet<String>,
}

impl ProjectLayout {
    pub fn new(files: impl IntoIterator<Item = String>, config: &ProjectConfig) -> Self {
        let files: HashSet<String> = files.into_iter().collect();
        let mut python_packages = HashSet::new();
        for file in files.iter().filter(|f| f.ends_with(".py")) {
            let mut bases: Vec<&str> = vec![""];
            bases.extend(config.python.source_roots.iter().map(|s| s.as_str()));
            for base in bases {
                let rel = if base.is_empty() {
                    Some(file.as_str())
                } else {
                    file.strip_prefix(base.trim_end_matches('/'))
                        .and_then(|r| r.strip_prefix('/'))
                };
                if let Some(first) = rel.and_then(|r| r.split('/').next()) {
                    python_packages.insert(first.trim_end_matches(".py").to_string());
                }
            }
        }
        Self {
            files,
            python_packages,
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains(path)
    }
}

/// Everything a resolver may consult for one referencing file.
pub struct ResolveContext<'a> {
    pub file: &'a ParsedFile,
    pub exports: &'a ExportIndex,
    pub layout: &'a ProjectLayout,
    pub config: &'a ProjectConfig,
    declared: HashMap<&'a str, NodeKind>,
}

impl<'a> ResolveContext<'a> {
    pub fn new(
        file: &'a ParsedFile,
        exports: &'a ExportIndex,
        layout: &'a ProjectLayout,
        config: &'a ProjectConfig,
    ) -> Self {
        let declared = file.nodes.iter().map(|n| (n.id.as_str(), n.kind)).collect();
        Self {
            file,
            exports,
            layout,
            config,
            declared,
        }
    }

    pub fn declares(&self, id: &str) -> bool {
        self.declared.contains_key(id)
    }

    pub fn kind_of(&self, id: &str) -> Option<NodeKind> {
        self.declared.get(id).copied()
    }

    /// The last non-star import binding the file makes for `local`.
    pub fn binding(&self, local: &str) -> Option<&'a ImportBinding> {
        self.file
            .imports
            .iter()
            .rev()
            .find(|b| b.local == local && b.imported != ImportedName::Star)
    }

    pub fn star_bindings(&self) -> impl Iterator<Item = &'a ImportBinding> {
        self.file
            .imports
            .iter()
            .filter(|b| b.imported == ImportedName::Star)
    }

    /// Enclosing non-class scopes of `node_id`, innermost first, ending at the module.
    fn scope_chain(&self, node_id: &str) -> Vec<String> {
        let module = self.file.module_id.as_str();
        let mut chain = Vec::new();
        let mut current = node_id;
        loop {
            if self.kind_of(current) != Some(NodeKind::Class) {
                chain.push(current.to_string());
            }
            if current == module {
                break;
            }
            match current.rsplit_once('.') {
                Some((parent, _)) if parent.len() >= module.len() => current = parent,
                _ => {
                    chain.push(module.to_string());
                    break;
                }
            }
        }
        chain
    }

    fn enclosing_class(&self, node_id: &str) -> Option<String> {
        let mut current = node_id;
        loop {
            if self.kind_of(current) == Some(NodeKind::Class) {
                return Some(current.to_string());
            }
            current = current.rsplit_once('.')?.0;
        }
    }
}

/// Language-specific resolution strategy.
pub trait Resolver: Send + Sync {
    fn language(&self) -> &'static str;

    /// Whether the specifier names a package outside the project.
    fn is_external(&self, ctx: &ResolveContext, specifier: &str) -> bool;

    /// Project file a module specifier refers to.
    fn locate_module(&self, ctx: &ResolveContext, specifier: &str) -> Option<String>;

    /// Maps a path-alias specifier to a project file.
    fn resolve_alias(&self, ctx: &ResolveContext, specifier: &str) -> Option<String>;

    /// Target id for a language builtin such as `print` or `console.log`.
    fn builtin_target(&self, name: &str) -> Option<String>;

    /// Whether an attribute of a module may name a child module (`pkg.sub`).
    fn has_submodules(&self) -> bool {
        false
    }

    fn resolve_same_language(&self, ctx: &ResolveContext, reference: &RawReference) -> Resolution {
        resolve_reference(self, ctx, reference)
    }
}

fn join_name(base: &str, parts: &[&str]) -> String {
    let base = base.trim_start_matches('.');
    if parts.is_empty() {
        base.to_string()
    } else if base.is_empty() {
        parts.join(".")
    } else {
        format!("{}.{}", base, parts.join("."))
    }
}

/// Dotted parts a bound reference refers to inside the binding's module.
fn bound_parts<'r>(binding: &'r ImportBinding, rest: &[&'r str]) -> Vec<&'r str> {
    let mut parts = match &binding.imported {
        ImportedName::Named(name) => vec![name.as_str()],
        ImportedName::Default => vec!["default"],
        ImportedName::Module | ImportedName::Star => Vec::new(),
    };
    parts.extend_from_slice(rest);
    parts
}

fn split_name(name: &str) -> Vec<&str> {
    name.split('.').filter(|p| !p.is_empty()).collect()
}

/// The shared algorithm: import substitution, external detection, file mapping,
/// export lookup, then same-file and builtin fallbacks.
pub fn resolve_reference<R: Resolver + ?Sized>(
    resolver: &R,
    ctx: &ResolveContext,
    reference: &RawReference,
) -> Resolution {
    if reference.kind == EdgeKind::Imports {
        let spec = reference.source_hint.as_deref().unwrap_or_default();
        return resolve_in_module(resolver, ctx, spec, &split_name(&reference.name));
    }

    let parts = split_name(&reference.name);
    let Some((&root, rest)) = parts.split_first() else {
        return Resolution::unresolved(&reference.name, "empty_name");
    };

    if matches!(root, "self" | "this" | "cls") {
        return resolve_member_access(ctx, reference, rest);
    }

    if let Some(binding) = ctx.binding(root) {
        return resolve_in_module(resolver, ctx, &binding.source, &bound_parts(binding, rest));
    }

    if let Some(local) = resolve_local(ctx, reference, &parts) {
        return local;
    }

    for star in ctx.star_bindings() {
        let Some(file) = resolver.locate_module(ctx, &star.source) else {
            continue;
        };
        let Some(module_id) = ctx.exports.module_of(&file) else {
            continue;
        };
        if let Some(id) = ctx.exports.export(module_id, root) {
            return member_of(ctx, id, rest, &file);
        }
    }

    if let Some(target) = resolver.builtin_target(&reference.name) {
        return Resolution::external(target);
    }

    let reason = if rest.is_empty() {
        "undefined_name"
    } else {
        "unknown_receiver"
    };
    Resolution::unresolved(&reference.name, reason)
}

fn resolve_in_module<R: Resolver + ?Sized>(
    resolver: &R,
    ctx: &ResolveContext,
    spec: &str,
    parts: &[&str],
) -> Resolution {
    if resolver.is_external(ctx, spec) {
        return Resolution::external(join_name(spec, parts));
    }
    if let Some(file) = resolver.locate_module(ctx, spec) {
        return lookup_in_file(resolver, ctx, &file, parts);
    }
    // Namespace packages have no file of their own; try the longest module prefix
    if resolver.has_submodules() {
        for k in (1..=parts.len()).rev() {
            let separator = if spec.ends_with('.') { "" } else { "." };
            let sub_spec = format!("{}{}{}", spec, separator, parts[..k].join("."));
            if let Some(file) = resolver.locate_module(ctx, &sub_spec) {
                return lookup_in_file(resolver, ctx, &file, &parts[k..]);
            }
        }
    }
    Resolution::unresolved(join_name(spec, parts), "module_not_found")
}

fn lookup_in_file<R: Resolver + ?Sized>(
    resolver: &R,
    ctx: &ResolveContext,
    file: &str,
    parts: &[&str],
) -> Resolution {
    let Some(module_id) = ctx.exports.module_of(file) else {
        // Present on disk but never parsed successfully
        return Resolution::inferred(join_name(file, parts), "export_not_found", file);
    };
    if parts.is_empty() {
        return Resolution::resolved(module_id, file);
    }
    lookup_symbol(resolver, ctx, module_id, parts, file)
}

fn lookup_symbol<R: Resolver + ?Sized>(
    resolver: &R,
    ctx: &ResolveContext,
    module_id: &str,
    parts: &[&str],
    file: &str,
) -> Resolution {
    let (head, rest) = (parts[0], &parts[1..]);
    if let Some(id) = ctx.exports.export(module_id, head) {
        return member_of(ctx, id, rest, file);
    }
    if resolver.has_submodules() {
        let sub = format!("{}.{}", module_id, head);
        if let Some(sub_file) = ctx.exports.file_of_module(&sub) {
            let sub_file = sub_file.to_string();
            if rest.is_empty() {
                return Resolution::resolved(sub, &sub_file);
            }
            return lookup_symbol(resolver, ctx, &sub, rest, &sub_file);
        }
    }
    Resolution::inferred(join_name(module_id, parts), "export_not_found", file)
}

fn member_of(ctx: &ResolveContext, id: &str, rest: &[&str], file: &str) -> Resolution {
    if rest.is_empty() {
        return Resolution::resolved(id, file);
    }
    let candidate = join_name(id, rest);
    if ctx.exports.is_declared(&candidate) || ctx.declares(&candidate) {
        Resolution::resolved(candidate, file)
    } else {
        Resolution::inferred(candidate, "member_not_found", file)
    }
}

fn resolve_local(ctx: &ResolveContext, reference: &RawReference, parts: &[&str]) -> Option<Resolution> {
    let file = ctx.file.file_path.as_str();
    for scope in ctx.scope_chain(&reference.from_node) {
        let head = format!("{}.{}", scope, parts[0]);
        if !ctx.declares(&head) {
            continue;
        }
        let full = join_name(&scope, parts);
        return Some(if parts.len() == 1 || ctx.declares(&full) {
            Resolution::resolved(full, file)
        } else {
            Resolution::inferred(full, "member_not_found", file)
        });
    }
    None
}

fn resolve_member_access(ctx: &ResolveContext, reference: &RawReference, rest: &[&str]) -> Resolution {
    let file = ctx.file.file_path.as_str();
    let Some(class_id) = ctx.enclosing_class(&reference.from_node) else {
        return Resolution::unresolved(&reference.name, "no_enclosing_class");
    };
    let Some(first) = rest.first() else {
        return Resolution::resolved(class_id, file);
    };
    let candidate = format!("{}.{}", class_id, first);
    match (ctx.declares(&candidate), rest.len()) {
        (true, 1) => Resolution::resolved(candidate, file),
        (false, 1) => Resolution::inferred(candidate, "member_not_found", file),
        _ => Resolution::unresolved(join_name(&class_id, rest), "dynamic_attribute"),
    }
}

// ============================================================================
// Cache
// ============================================================================

type CacheKey = (String, String, String);

/// Cross-file resolutions keyed by (from-file, source, name).
#[derive(Debug, Default)]
pub struct ResolutionCache {
    entries: HashMap<CacheKey, Resolution>,
    hits: u64,
    misses: u64,
}

impl ResolutionCache {
    pub fn get(&mut self, key: &CacheKey) -> Option<Resolution> {
        match self.entries.get(key) {
            Some(hit) => {
                self.hits += 1;
                Some(hit.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: CacheKey, resolution: Resolution) {
        self.entries.insert(key, resolution);
    }

    /// Drops entries decided by `file`'s exports.
    pub fn invalidate_target(&mut self, file: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, r| r.target_file.as_deref() != Some(file));
        before - self.entries.len()
    }

    /// Drops entries that depend on which files exist (missing modules, externals).
    pub fn invalidate_topology(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, r| r.target_file.is_some());
        before - self.entries.len()
    }

    pub fn invalidate_from(&mut self, file: &str) {
        self.entries.retain(|(from, _, _), _| from != file);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolverStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cached_entries: usize,
    pub indexed_files: usize,
}

// ============================================================================
// Engine
// ============================================================================

/// Resolver strategies plus the export index and cache they share.
pub struct ResolutionEngine {
    resolvers: HashMap<&'static str, Arc<dyn Resolver>>,
    analyzer: Option<Arc<dyn SemanticAnalyzer>>,
    exports: ExportIndex,
    cache: ResolutionCache,
    layout: ProjectLayout,
    config: ProjectConfig,
    seeded: bool,
}

impl ResolutionEngine {
    pub fn new(config: ProjectConfig) -> Self {
        let mut resolvers: HashMap<&'static str, Arc<dyn Resolver>> = HashMap::new();
        resolvers.insert("python", Arc::new(PythonResolver));
        resolvers.insert("typescript", Arc::new(TypeScriptResolver));
        Self {
            resolvers,
            analyzer: None,
            exports: ExportIndex::new(),
            cache: ResolutionCache::default(),
            layout: ProjectLayout::default(),
            config,
            seeded: false,
        }
    }

    pub fn set_analyzer(&mut self, analyzer: Option<Arc<dyn SemanticAnalyzer>>) {
        self.analyzer = analyzer;
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn exports(&self) -> &ExportIndex {
        &self.exports
    }

    /// Starts from scratch for a full sync over `files`.
    pub fn reset(&mut self, files: &[String]) {
        self.exports = ExportIndex::new();
        self.cache.clear();
        self.layout = ProjectLayout::new(files.iter().cloned(), &self.config);
        self.seeded = true;
    }

    /// Loads the export index from the store the first time an incremental pass needs it.
    pub fn ensure_seeded(&mut self, store: &GraphStore, files: &[String]) -> Result<()> {
        if self.seeded {
            return Ok(());
        }
        let exported = store.exported_nodes()?;
        let locations = store.node_locations()?;
        self.exports = ExportIndex::from_store(&exported, &locations);
        self.layout = ProjectLayout::new(files.iter().cloned(), &self.config);
        self.seeded = true;
        tracing::debug!("Seeded export index with {} files", self.exports.file_count());
        Ok(())
    }

    /// Forgets all state; the next incremental pass reseeds from the store.
    pub fn discard(&mut self) {
        self.exports = ExportIndex::new();
        self.cache.clear();
        self.seeded = false;
    }

    /// Updates the project file set; a changed set invalidates missing-module entries.
    pub fn update_layout(&mut self, files: &[String]) {
        let changed = files.len() != self.layout.files.len()
            || files.iter().any(|f| !self.layout.contains(f));
        if changed {
            self.layout = ProjectLayout::new(files.iter().cloned(), &self.config);
            let dropped = self.cache.invalidate_topology();
            tracing::debug!("File set changed, dropped {} cached resolutions", dropped);
        }
    }

    /// Registers a parsed file's exports; returns true when they changed.
    pub fn register(&mut self, parsed: &ParsedFile) -> bool {
        let changed = self.exports.register(parsed);
        if changed {
            let dropped = self.cache.invalidate_target(&parsed.file_path);
            tracing::debug!("Exports of {} changed, dropped {} cached resolutions", parsed.file_path, dropped);
        }
        changed
    }

    pub fn remove_file(&mut self, file_path: &str) {
        if self.exports.remove(file_path) {
            self.cache.invalidate_target(file_path);
        }
        self.cache.invalidate_from(file_path);
    }

    /// Resolves a single reference of `parsed`, consulting the cache for cross-file lookups.
    pub fn resolve(&mut self, parsed: &ParsedFile, reference: &RawReference) -> Resolution {
        let Some(resolver) = self.resolvers.get(parsed.language.as_str()).cloned() else {
            return Resolution::unresolved(&reference.name, "unsupported_language");
        };
        let ctx = ResolveContext::new(parsed, &self.exports, &self.layout, &self.config);
        let key = cache_key(&ctx, reference);
        if let Some(key) = &key {
            if let Some(hit) = self.cache.get(key) {
                return hit;
            }
        }
        let resolution = resolver.resolve_same_language(&ctx, reference);
        if let Some(key) = key {
            self.cache.insert(key, resolution.clone());
        }
        resolution
    }

    /// All edges of a parsed file: its local edges plus one edge per resolved reference.
    pub fn resolve_file(&mut self, parsed: &ParsedFile) -> Vec<Edge> {
        let mut edges = parsed.local_edges.clone();
        let mut seen: HashSet<String> = edges.iter().map(|e| e.id.clone()).collect();

        for reference in &parsed.references {
            let resolution = self.resolve(parsed, reference);
            let mut edge = Edge::new(
                &parsed.file_path,
                &reference.from_node,
                &resolution.to_node,
                reference.kind,
                resolution.confidence,
            )
            .at(reference.line, reference.column);
            if let Some(reason) = resolution.reason {
                edge = edge.with_reason(reason);
            }
            if seen.insert(edge.id.clone()) {
                edges.push(edge);
            }
        }
        edges
    }

    /// Runs the optional semantic analyzer over ambiguous edges. Returns warnings.
    pub fn refine(
        &self,
        root: &Path,
        store: &GraphStore,
        edges: &mut [Edge],
        languages: &HashMap<String, String>,
    ) -> Vec<String> {
        match &self.analyzer {
            Some(analyzer) => {
                semantic::refine_edges(analyzer.as_ref(), root, store, &self.exports, edges, languages)
            }
            None => Vec::new(),
        }
    }

    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            cache_hits: self.cache.hits,
            cache_misses: self.cache.misses,
            cached_entries: self.cache.len(),
            indexed_files: self.exports.file_count(),
        }
    }
}

/// Key for references whose outcome depends only on the file's imports.
fn cache_key(ctx: &ResolveContext, reference: &RawReference) -> Option<CacheKey> {
    let file = ctx.file.file_path.clone();
    if reference.kind == EdgeKind::Imports {
        let source = reference.source_hint.clone().unwrap_or_default();
        return Some((file, source, reference.name.clone()));
    }
    let parts = split_name(&reference.name);
    let (&root, rest) = parts.split_first()?;
    let binding = ctx.binding(root)?;
    Some((file, binding.source.clone(), bound_parts(binding, rest).join(".")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{LanguageParser, ParserRegistry};

    fn parse_all(files: &[(&str, &str)]) -> Vec<ParsedFile> {
        let registry = ParserRegistry::new();
        files
            .iter()
            .map(|(path, source)| registry.get_for_file(path).unwrap().parse(path, source).unwrap())
            .collect()
    }

    fn engine_for(parsed: &[ParsedFile]) -> ResolutionEngine {
        let mut engine = ResolutionEngine::new(ProjectConfig::default());
        let files: Vec<String> = parsed.iter().map(|p| p.file_path.clone()).collect();
        engine.reset(&files);
        for file in parsed {
            engine.register(file);
        }
        engine
    }

    fn edge<'a>(edges: &'a [Edge], from: &str, to: &str) -> Option<&'a Edge> {
        edges.iter().find(|e| e.from_node == from && e.to_node == to)
    }

    #[test]
    fn test_python_cross_file_call_resolves() {
        let parsed = parse_all(&[
            ("utils.py", "def helper():\n    return 1\n"),
            ("app.py", "from utils import helper\n\ndef main():\n    helper()\n"),
        ]);
        let mut engine = engine_for(&parsed);
        let edges = engine.resolve_file(&parsed[1]);

        let call = edge(&edges, "app.main", "utils.helper").unwrap();
        assert_eq!(call.kind, EdgeKind::Calls);
        assert_eq!(call.confidence, Confidence::Resolved);
        let import = edge(&edges, "app", "utils.helper").unwrap();
        assert_eq!(import.kind, EdgeKind::Imports);
    }

    #[test]
    fn test_python_confidence_tiers() {
        let parsed = parse_all(&[
            ("pkg/__init__.py", ""),
            ("pkg/mod.py", "def f():\n    pass\n"),
            (
                "app.py",
                "import os\nimport pkg.mod\nfrom pkg import missing\nfrom nowhere.local import x\n\ndef main():\n    os.path.join('a')\n    pkg.mod.f()\n    missing()\n    print('x')\n    g.run()\n",
            ),
        ]);
        let mut engine = engine_for(&parsed);
        let edges = engine.resolve_file(&parsed[2]);
        let from_main = |to: &str| edge(&edges, "app.main", to).map(|e| (e.confidence, e.untracked_reason.clone()));

        assert_eq!(from_main("os.path.join"), Some((Confidence::External, None)));
        assert_eq!(from_main("pkg.mod.f"), Some((Confidence::Resolved, None)));
        assert_eq!(
            from_main("pkg.missing"),
            Some((Confidence::Inferred, Some("export_not_found".into())))
        );
        assert_eq!(from_main("builtins.print"), Some((Confidence::External, None)));
        assert_eq!(
            from_main("g.run"),
            Some((Confidence::Unresolved, Some("unknown_receiver".into())))
        );
        // `nowhere` is not a project package, so it is third-party
        assert!(edges.iter().any(|e| e.to_node == "nowhere.local.x" && e.confidence == Confidence::External));
    }

    #[test]
    fn test_same_file_and_self_references() {
        let parsed = parse_all(&[(
            "svc.py",
            "class Service:\n    def run(self):\n        self.step()\n        self.missing()\n        helper()\n\n    def step(self):\n        pass\n\ndef helper():\n    pass\n",
        )]);
        let mut engine = engine_for(&parsed);
        let edges = engine.resolve_file(&parsed[0]);

        assert_eq!(edge(&edges, "svc.Service.run", "svc.Service.step").unwrap().confidence, Confidence::Resolved);
        assert_eq!(edge(&edges, "svc.Service.run", "svc.Service.missing").unwrap().confidence, Confidence::Inferred);
        assert_eq!(edge(&edges, "svc.Service.run", "svc.helper").unwrap().confidence, Confidence::Resolved);
    }

    #[test]
    fn test_relative_and_submodule_imports() {
        let parsed = parse_all(&[
            ("pkg/__init__.py", ""),
            ("pkg/sub.py", "def f():\n    pass\n"),
            ("pkg/user.py", "from . import sub\nfrom .sub import f as g\n\ndef run():\n    sub.f()\n    g()\n"),
        ]);
        let mut engine = engine_for(&parsed);
        let edges = engine.resolve_file(&parsed[2]);
        let targets: Vec<(&str, Confidence)> = edges
            .iter()
            .filter(|e| e.from_node == "pkg.user.run")
            .map(|e| (e.to_node.as_str(), e.confidence))
            .collect();
        assert_eq!(targets, vec![("pkg.sub.f", Confidence::Resolved), ("pkg.sub.f", Confidence::Resolved)]);
    }

    #[test]
    fn test_cache_hits_and_invalidation() {
        let parsed = parse_all(&[
            ("utils.py", "def helper():\n    pass\n"),
            ("app.py", "from utils import helper\n\ndef a():\n    helper()\n\ndef b():\n    helper()\n"),
        ]);
        let mut engine = engine_for(&parsed);
        let first = engine.resolve_file(&parsed[1]);
        assert!(engine.stats().cache_hits >= 2);

        // Same exports: cached outcome stays identical
        assert!(!engine.register(&parsed[0]));
        let again = engine.resolve_file(&parsed[1]);
        assert_eq!(first, again);

        // Export removed: entries targeting utils.py are dropped and re-resolved
        let renamed = parse_all(&[("utils.py", "def other():\n    pass\n")]);
        assert!(engine.register(&renamed[0]));
        let edges = engine.resolve_file(&parsed[1]);
        assert_eq!(edge(&edges, "app.a", "utils.helper").unwrap().confidence, Confidence::Inferred);
    }

    #[test]
    fn test_removed_member_drops_cached_resolution() {
        let parsed = parse_all(&[
            ("utils.py", "class Svc:\n    def run(self):\n        pass\n"),
            ("app.py", "from utils import Svc\n\ndef main():\n    Svc.run()\n"),
        ]);
        let mut engine = engine_for(&parsed);
        let edges = engine.resolve_file(&parsed[1]);
        assert_eq!(edge(&edges, "app.main", "utils.Svc.run").unwrap().confidence, Confidence::Resolved);

        // Svc is still exported, but run is gone
        let trimmed = parse_all(&[("utils.py", "class Svc:\n    pass\n")]);
        assert!(engine.register(&trimmed[0]));
        let edges = engine.resolve_file(&parsed[1]);
        let call = edge(&edges, "app.main", "utils.Svc.run").unwrap();
        assert_eq!(call.confidence, Confidence::Inferred);
        assert_eq!(call.untracked_reason.as_deref(), Some("member_not_found"));
    }

    #[test]
    fn test_missing_module_recovers_when_file_appears() {
        let app = parse_all(&[("app.py", "from lib2 import f\n\ndef main():\n    f()\n")]);
        let mut engine = engine_for(&app);
        // lib2 is not a project package yet, so it is treated as third-party
        let edges = engine.resolve_file(&app[0]);
        assert_eq!(edge(&edges, "app.main", "lib2.f").unwrap().confidence, Confidence::External);

        let lib = parse_all(&[("lib2.py", "def f():\n    pass\n")]);
        engine.update_layout(&["app.py".to_string(), "lib2.py".to_string()]);
        engine.register(&lib[0]);
        let edges = engine.resolve_file(&app[0]);
        assert_eq!(edge(&edges, "app.main", "lib2.f").unwrap().confidence, Confidence::Resolved);
    }

    #[test]
    fn test_typescript_default_and_named_imports() {
        let parsed = parse_all(&[
            ("src/api.ts", "export function fetchUser() {}\nexport default function client() {}\n"),
            (
                "src/app.ts",
                "import client, { fetchUser } from './api';\nimport { useState } from 'react';\n\nexport function main() {\n  client();\n  fetchUser();\n  useState();\n}\n",
            ),
        ]);
        let mut engine = engine_for(&parsed);
        let edges = engine.resolve_file(&parsed[1]);
        let from_main = |to: &str| edge(&edges, "src.app.main", to).map(|e| e.confidence);

        assert_eq!(from_main("src.api.client"), Some(Confidence::Resolved));
        assert_eq!(from_main("src.api.fetchUser"), Some(Confidence::Resolved));
        assert_eq!(from_main("react.useState"), Some(Confidence::External));
    }
}
