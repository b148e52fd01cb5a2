use once_cell::sync::OnceCell;
use tree_sitter::{Language, Node as SyntaxNode, Query, StreamingIterator, Tree};

use super::tree::{describe_error, line_span, named_children, node_text, parse_tree, slice_lines};
use super::{
    declaration_id, module_id_from_path, Construct, ImportBinding, ImportedName, LanguageParser, Param, ParsedFile,
    RawReference,
};
use crate::error::Result;
use crate::graph::models::{Confidence, Edge, EdgeKind, Node, NodeKind};

/// Handles `.ts` with the TypeScript grammar and `.tsx`/`.js`/`.jsx` with the TSX grammar.
pub struct TypeScriptParser;

static TS_CALLS_QUERY: OnceCell<Query> = OnceCell::new();
static TSX_CALLS_QUERY: OnceCell<Query> = OnceCell::new();
static TSX_JSX_QUERY: OnceCell<Query> = OnceCell::new();

const CALLS_QUERY: &str = r#"
(call_expression
    function: [(identifier) (member_expression)] @call
)

(new_expression
    constructor: [(identifier) (member_expression)] @call
)
"#;

const JSX_QUERY: &str = r#"
(jsx_opening_element
    name: (_) @component
)

(jsx_self_closing_element
    name: (_) @component
)
"#;

const WRAPPER_OPEN: &str = "class __Wrapper {\n";

#[derive(Clone, Copy, PartialEq, Eq)]
enum Dialect {
    TypeScript,
    Tsx,
}

impl Dialect {
    fn for_path(rel_path: &str) -> Self {
        if rel_path.ends_with(".ts") {
            Dialect::TypeScript
        } else {
            Dialect::Tsx
        }
    }

    fn language(self) -> Language {
        match self {
            Dialect::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Dialect::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
        }
    }

    fn calls_query(self) -> Option<&'static Query> {
        let cell = match self {
            Dialect::TypeScript => &TS_CALLS_QUERY,
            Dialect::Tsx => &TSX_CALLS_QUERY,
        };
        cell.get_or_try_init(|| Query::new(&self.language(), CALLS_QUERY)).ok()
    }

    fn jsx_query(self) -> Option<&'static Query> {
        match self {
            Dialect::TypeScript => None,
            Dialect::Tsx => TSX_JSX_QUERY
                .get_or_try_init(|| Query::new(&self.language(), JSX_QUERY))
                .ok(),
        }
    }
}

/// Parses a fragment, wrapping class members in a synthetic class.
/// Returns the tree of the first dialect that parses cleanly, else the TypeScript attempt.
fn parse_fragment(source: &str, kind: NodeKind) -> Option<(Tree, String)> {
    let code = if kind == NodeKind::Method {
        format!("{}{}\n}}", WRAPPER_OPEN, source)
    } else {
        source.to_string()
    };
    let mut fallback = None;
    for dialect in [Dialect::TypeScript, Dialect::Tsx] {
        let tree = parse_tree(&dialect.language(), &code).ok()?;
        if !tree.root_node().has_error() {
            return Some((tree, code));
        }
        if fallback.is_none() {
            fallback = Some(tree);
        }
    }
    fallback.map(|tree| (tree, code))
}

/// First declaration of a fragment, with export wrappers and the member wrapper removed.
fn fragment_declaration<'t>(tree: &'t Tree, kind: NodeKind) -> Option<SyntaxNode<'t>> {
    let first = named_children(&tree.root_node())
        .into_iter()
        .find(|n| n.kind() != "comment")?;
    if kind == NodeKind::Method {
        let body = first.child_by_field_name("body")?;
        return named_children(&body)
            .into_iter()
            .find(|n| n.kind() != "comment" && n.kind() != "decorator");
    }
    if first.kind() == "export_statement" {
        return first.child_by_field_name("declaration").or(Some(first));
    }
    Some(first)
}

/// Function-valued initializer of a declarator or class field.
fn function_value<'t>(node: &SyntaxNode<'t>) -> Option<SyntaxNode<'t>> {
    let value = node.child_by_field_name("value")?;
    matches!(value.kind(), "arrow_function" | "function_expression" | "function" | "generator_function")
        .then_some(value)
}

impl LanguageParser for TypeScriptParser {
    fn name(&self) -> &'static str {
        "typescript"
    }

    fn extensions(&self) -> &[&'static str] {
        &["ts", "tsx", "js", "jsx"]
    }

    fn module_id(&self, rel_path: &str) -> String {
        module_id_from_path(rel_path, &["index"])
    }

    fn parse_module(&self, rel_path: &str, module_id: &str, source: &str) -> Result<ParsedFile> {
        let dialect = Dialect::for_path(rel_path);
        let tree = parse_tree(&dialect.language(), source)?;
        let root = tree.root_node();
        let module_id = module_id.to_string();

        let stem = rel_path
            .rsplit('/')
            .next()
            .and_then(|f| f.split('.').next())
            .unwrap_or(rel_path);
        let line_count = source.lines().count().max(1);
        let module = Node::new(&module_id, NodeKind::Module, stem, rel_path, 1, line_count, source)
            .with_meta("language", "typescript");

        let mut visitor = Visitor {
            source,
            file_path: rel_path,
            module_id: module_id.clone(),
            nodes: vec![module],
            references: Vec::new(),
            imports: Vec::new(),
            local_edges: Vec::new(),
            scopes: vec![(module_id.clone(), NodeKind::Module)],
            spans: Vec::new(),
            pending_exports: Vec::new(),
        };
        visitor.visit_children(&root);
        visitor.apply_pending_exports();
        visitor.extract_calls(&root, dialect);
        visitor.extract_jsx(&root, dialect);

        Ok(ParsedFile {
            file_path: rel_path.to_string(),
            module_id,
            language: "typescript".to_string(),
            nodes: visitor.nodes,
            references: visitor.references,
            imports: visitor.imports,
            local_edges: visitor.local_edges,
            syntax_error: describe_error(&tree, source),
        })
    }

    fn check_syntax(&self, source: &str, kind: NodeKind) -> std::result::Result<(), String> {
        let (tree, code) =
            parse_fragment(source, kind).ok_or_else(|| "Failed to parse source".to_string())?;
        match describe_error(&tree, &code) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn outermost(&self, source: &str, kind: NodeKind) -> Option<Construct> {
        if kind == NodeKind::Module {
            return Some(Construct {
                kind: NodeKind::Module,
                name: None,
            });
        }
        let (tree, code) = parse_fragment(source, kind)?;
        let decl = fragment_declaration(&tree, kind)?;
        let name_of = |n: &SyntaxNode| {
            n.child_by_field_name("name")
                .map(|name| node_text(&name, &code).to_string())
        };

        let construct = match decl.kind() {
            "function_declaration" | "generator_function_declaration" | "method_definition" => Construct {
                kind: NodeKind::Function,
                name: name_of(&decl),
            },
            "public_field_definition" if function_value(&decl).is_some() => Construct {
                kind: NodeKind::Function,
                name: name_of(&decl),
            },
            "class_declaration" | "abstract_class_declaration" => Construct {
                kind: NodeKind::Class,
                name: name_of(&decl),
            },
            "lexical_declaration" | "variable_declaration" => {
                let declarator = named_children(&decl)
                    .into_iter()
                    .find(|n| n.kind() == "variable_declarator")?;
                let kind = if function_value(&declarator).is_some() {
                    NodeKind::Function
                } else {
                    NodeKind::Block
                };
                Construct {
                    kind,
                    name: name_of(&declarator),
                }
            }
            _ => Construct {
                kind: NodeKind::Block,
                name: None,
            },
        };
        Some(construct)
    }

    fn parameters(&self, source: &str, kind: NodeKind) -> Option<Vec<Param>> {
        let (tree, code) = parse_fragment(source, kind)?;
        let decl = fragment_declaration(&tree, kind)?;
        let callable = match decl.kind() {
            "function_declaration" | "generator_function_declaration" | "method_definition" => decl,
            "public_field_definition" => function_value(&decl)?,
            "lexical_declaration" | "variable_declaration" => {
                let declarator = named_children(&decl)
                    .into_iter()
                    .find(|n| n.kind() == "variable_declarator")?;
                function_value(&declarator)?
            }
            _ => return None,
        };
        let params = callable.child_by_field_name("parameters")?;
        Some(collect_params(&params, &code))
    }
}

fn collect_params(params: &SyntaxNode, source: &str) -> Vec<Param> {
    let mut out = Vec::new();
    for param in named_children(params) {
        let Some(pattern) = param.child_by_field_name("pattern") else {
            continue;
        };
        let name = node_text(&pattern, source).to_string();
        if name == "this" {
            continue;
        }
        let required = param.kind() == "required_parameter"
            && param.child_by_field_name("value").is_none()
            && pattern.kind() != "rest_pattern";
        out.push(Param { name, required });
    }
    out
}

fn strip_quotes(text: &str) -> &str {
    text.trim_matches(|c| c == '"' || c == '\'' || c == '`')
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_simple_dotted(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '$' || c == '.')
        && !name.starts_with('.')
}

/// JSDoc block directly above the declaration.
fn jsdoc_of(span_node: &SyntaxNode, source: &str) -> Option<String> {
    let prev = span_node.prev_named_sibling()?;
    if prev.kind() != "comment" || prev.end_position().row + 1 != span_node.start_position().row {
        return None;
    }
    let text = node_text(&prev, source);
    let body = text.strip_prefix("/**")?.strip_suffix("*/")?;
    let cleaned = body
        .lines()
        .map(|l| l.trim().trim_start_matches('*').trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    (!cleaned.is_empty()).then_some(cleaned)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ExportMode {
    None,
    Named,
    Default,
}

struct Visitor<'s> {
    source: &'s str,
    file_path: &'s str,
    module_id: String,
    nodes: Vec<Node>,
    references: Vec<RawReference>,
    imports: Vec<ImportBinding>,
    local_edges: Vec<Edge>,
    scopes: Vec<(String, NodeKind)>,
    spans: Vec<(usize, usize, String)>,
    /// `export { local as exported }` and `export default local`, applied after the walk
    pending_exports: Vec<(String, String)>,
}

impl<'s> Visitor<'s> {
    fn current_scope(&self) -> &(String, NodeKind) {
        &self.scopes[self.scopes.len() - 1]
    }

    fn at_module_scope(&self) -> bool {
        self.scopes.len() == 1
    }

    fn visit_children(&mut self, node: &SyntaxNode) {
        for child in named_children(node) {
            self.visit(&child);
        }
    }

    fn visit(&mut self, node: &SyntaxNode) {
        match node.kind() {
            "export_statement" => self.visit_export(node),
            "import_statement" => self.visit_import(node),
            _ => self.visit_declaration(node, node, ExportMode::None),
        }
    }

    fn visit_declaration(&mut self, decl: &SyntaxNode, span: &SyntaxNode, export: ExportMode) {
        match decl.kind() {
            "function_declaration" | "generator_function_declaration" | "function_expression"
            | "function" => {
                let Some(name) = self.declared_name(decl, export) else {
                    return self.visit_children(decl);
                };
                self.define_callable(decl, decl, span, &name, export);
            }
            "class_declaration" | "abstract_class_declaration" | "class" => {
                let Some(name) = self.declared_name(decl, export) else {
                    return self.visit_children(decl);
                };
                self.define_class(decl, span, &name, export);
            }
            "method_definition" => {
                let Some(name) = self.declared_name(decl, ExportMode::None) else {
                    return;
                };
                self.define_callable(decl, decl, span, &name, ExportMode::None);
            }
            "public_field_definition" => match function_value(decl) {
                Some(value) => {
                    let Some(name) = self.declared_name(decl, ExportMode::None) else {
                        return;
                    };
                    self.define_callable(&value, decl, span, &name, ExportMode::None);
                }
                None => self.visit_children(decl),
            },
            "lexical_declaration" | "variable_declaration" => {
                let declarators: Vec<SyntaxNode> = named_children(decl)
                    .into_iter()
                    .filter(|n| n.kind() == "variable_declarator")
                    .collect();
                let single = declarators.len() == 1;
                for declarator in declarators {
                    let value = function_value(&declarator);
                    let name = declarator
                        .child_by_field_name("name")
                        .filter(|n| n.kind() == "identifier")
                        .map(|n| node_text(&n, self.source).to_string());
                    match (value, name) {
                        (Some(value), Some(name)) => {
                            let span_node = if single { *span } else { declarator };
                            let mode = if export == ExportMode::Default {
                                ExportMode::Named
                            } else {
                                export
                            };
                            self.define_callable(&value, &declarator, &span_node, &name, mode);
                        }
                        _ => self.visit_children(&declarator),
                    }
                }
            }
            _ => self.visit_children(decl),
        }
    }

    /// Declared name; anonymous default exports are named `default`.
    fn declared_name(&self, decl: &SyntaxNode, export: ExportMode) -> Option<String> {
        match decl.child_by_field_name("name") {
            Some(name) => Some(node_text(&name, self.source).to_string()),
            None if export == ExportMode::Default => Some("default".to_string()),
            None => None,
        }
    }

    fn export_meta(&self, name: &str, export: ExportMode) -> Option<String> {
        if !self.at_module_scope() {
            return None;
        }
        match export {
            ExportMode::None => None,
            ExportMode::Named => Some(name.to_string()),
            ExportMode::Default => Some("default".to_string()),
        }
    }

    fn register(&mut self, node: Node, span: &SyntaxNode) {
        let (parent_id, parent_kind) = self.current_scope().clone();
        if matches!(parent_kind, NodeKind::Function | NodeKind::Method) {
            self.local_edges.push(
                Edge::new(self.file_path, &parent_id, &node.id, EdgeKind::Contains, Confidence::Resolved)
                    .at(node.start_line, span.start_position().column),
            );
        }
        self.spans.push((span.start_byte(), span.end_byte(), node.id.clone()));
        self.nodes.push(node);
    }

    /// `func` owns the parameters and body; `header` is where the declaration starts.
    fn define_callable(
        &mut self,
        func: &SyntaxNode,
        header: &SyntaxNode,
        span: &SyntaxNode,
        name: &str,
        export: ExportMode,
    ) {
        let (parent_id, parent_kind) = self.current_scope().clone();
        let (start, end) = line_span(span);
        let id = declaration_id(&self.nodes, &parent_id, name, start);
        let kind = if parent_kind == NodeKind::Class {
            NodeKind::Method
        } else {
            NodeKind::Function
        };

        let body_start = func
            .child_by_field_name("body")
            .map(|b| b.start_byte())
            .unwrap_or(func.end_byte());
        let header_text = self
            .source
            .get(header.start_byte()..body_start)
            .unwrap_or("");
        let signature = collapse_whitespace(header_text.trim_end().trim_end_matches("=>"));
        let is_async = header_text.split_whitespace().any(|w| w == "async");

        let mut node = Node::new(&id, kind, name, self.file_path, start, end, slice_lines(self.source, start, end))
            .with_docstring(jsdoc_of(span, self.source))
            .with_signature(signature)
            .with_meta("is_async", is_async);
        if let Some(exported) = self.export_meta(name, export) {
            node = node.with_meta("export", exported);
        }
        self.register(node, span);
        self.extract_annotations(func, &id);

        self.scopes.push((id, kind));
        if let Some(body) = func.child_by_field_name("body") {
            self.visit_children(&body);
        }
        self.scopes.pop();
    }

    fn define_class(&mut self, decl: &SyntaxNode, span: &SyntaxNode, name: &str, export: ExportMode) {
        let parent_id = self.current_scope().0.clone();
        let (start, end) = line_span(span);
        let id = declaration_id(&self.nodes, &parent_id, name, start);

        let mut node = Node::new(&id, NodeKind::Class, name, self.file_path, start, end, slice_lines(self.source, start, end))
            .with_docstring(jsdoc_of(span, self.source));
        if decl.kind() == "abstract_class_declaration" {
            node = node.with_meta("abstract", true);
        }
        if let Some(exported) = self.export_meta(name, export) {
            node = node.with_meta("export", exported);
        }
        self.register(node, span);

        for heritage in named_children(decl)
            .into_iter()
            .filter(|n| n.kind() == "class_heritage")
        {
            for clause in named_children(&heritage) {
                for base in named_children(&clause) {
                    let target = match base.kind() {
                        "identifier" | "member_expression" | "type_identifier" | "nested_type_identifier" => base,
                        "generic_type" => match base.child_by_field_name("name") {
                            Some(n) => n,
                            None => continue,
                        },
                        _ => continue,
                    };
                    let text = node_text(&target, self.source);
                    if !is_simple_dotted(text) {
                        continue;
                    }
                    let pos = target.start_position();
                    self.references.push(RawReference::new(
                        &id,
                        EdgeKind::Inherits,
                        text,
                        pos.row + 1,
                        pos.column,
                    ));
                }
            }
        }

        self.scopes.push((id, NodeKind::Class));
        if let Some(body) = decl.child_by_field_name("body") {
            for member in named_children(&body) {
                self.visit_declaration(&member, &member, ExportMode::None);
            }
        }
        self.scopes.pop();
    }

    /// `uses` references for type names in parameter and return annotations.
    fn extract_annotations(&mut self, func: &SyntaxNode, id: &str) {
        let mut annotations = Vec::new();
        if let Some(params) = func.child_by_field_name("parameters") {
            for param in named_children(&params) {
                if let Some(t) = param.child_by_field_name("type") {
                    annotations.push(t);
                }
            }
        }
        if let Some(ret) = func.child_by_field_name("return_type") {
            annotations.push(ret);
        }

        let mut names = Vec::new();
        for annotation in annotations {
            collect_type_names(&annotation, self.source, &mut names);
        }
        for (name, line, column) in names {
            let duplicate = self
                .references
                .iter()
                .any(|r| r.from_node == id && r.kind == EdgeKind::Uses && r.name == name);
            if !duplicate {
                self.references
                    .push(RawReference::new(id, EdgeKind::Uses, name, line, column));
            }
        }
    }

    fn visit_export(&mut self, node: &SyntaxNode) {
        let mut cursor = node.walk();
        let is_default = node.children(&mut cursor).any(|c| c.kind() == "default");
        let mode = if is_default {
            ExportMode::Default
        } else {
            ExportMode::Named
        };

        if let Some(decl) = node.child_by_field_name("declaration") {
            return self.visit_declaration(&decl, node, mode);
        }

        let source = node
            .child_by_field_name("source")
            .map(|s| strip_quotes(node_text(&s, self.source)).to_string());
        let scope = self.current_scope().0.clone();
        let line = node.start_position().row + 1;

        if let Some(value) = node.child_by_field_name("value") {
            match value.kind() {
                "identifier" => self
                    .pending_exports
                    .push((node_text(&value, self.source).to_string(), "default".to_string())),
                _ => self.visit_declaration(&value, node, ExportMode::Default),
            }
            return;
        }

        let clause = named_children(node)
            .into_iter()
            .find(|n| n.kind() == "export_clause");
        match (clause, source) {
            (Some(clause), Some(source)) => {
                for spec in named_children(&clause) {
                    let Some(name) = spec.child_by_field_name("name") else {
                        continue;
                    };
                    self.references.push(
                        RawReference::new(&scope, EdgeKind::Imports, node_text(&name, self.source), line, spec.start_position().column)
                            .with_source(source.clone()),
                    );
                }
            }
            (Some(clause), None) => {
                for spec in named_children(&clause) {
                    let Some(name) = spec.child_by_field_name("name") else {
                        continue;
                    };
                    let local = node_text(&name, self.source).to_string();
                    let exported = spec
                        .child_by_field_name("alias")
                        .map(|a| node_text(&a, self.source).to_string())
                        .unwrap_or_else(|| local.clone());
                    self.pending_exports.push((local, exported));
                }
            }
            (None, Some(source)) => {
                // export * from "..."
                self.references.push(
                    RawReference::new(&scope, EdgeKind::Imports, "", line, node.start_position().column)
                        .with_source(source),
                );
            }
            (None, None) => {}
        }
    }

    fn apply_pending_exports(&mut self) {
        for (local, exported) in std::mem::take(&mut self.pending_exports) {
            let id = format!("{}.{}", self.module_id, local);
            if let Some(node) = self.nodes.iter_mut().find(|n| n.id == id) {
                if let serde_json::Value::Object(map) = &mut node.metadata {
                    map.insert("export".to_string(), exported.into());
                }
            }
        }
    }

    fn visit_import(&mut self, node: &SyntaxNode) {
        let Some(source_node) = node.child_by_field_name("source") else {
            return;
        };
        let source = strip_quotes(node_text(&source_node, self.source)).to_string();
        let scope = self.current_scope().0.clone();
        let line = node.start_position().row + 1;

        let clause = named_children(node)
            .into_iter()
            .find(|n| n.kind() == "import_clause");
        let Some(clause) = clause else {
            // Side-effect import
            self.references.push(
                RawReference::new(&scope, EdgeKind::Imports, "", line, node.start_position().column)
                    .with_source(source),
            );
            return;
        };

        for part in named_children(&clause) {
            match part.kind() {
                "identifier" => {
                    self.bind(&scope, node_text(&part, self.source), &source, ImportedName::Default, "default", &part);
                }
                "namespace_import" => {
                    let Some(alias) = named_children(&part).into_iter().find(|n| n.kind() == "identifier") else {
                        continue;
                    };
                    self.bind(&scope, node_text(&alias, self.source), &source, ImportedName::Module, "", &part);
                }
                "named_imports" => {
                    for spec in named_children(&part) {
                        if spec.kind() != "import_specifier" {
                            continue;
                        }
                        let Some(name) = spec.child_by_field_name("name") else {
                            continue;
                        };
                        let imported = node_text(&name, self.source).to_string();
                        let local = spec
                            .child_by_field_name("alias")
                            .map(|a| node_text(&a, self.source).to_string())
                            .unwrap_or_else(|| imported.clone());
                        self.bind(&scope, &local, &source, ImportedName::Named(imported.clone()), &imported, &spec);
                    }
                }
                _ => {}
            }
        }
    }

    fn bind(
        &mut self,
        scope: &str,
        local: &str,
        source: &str,
        imported: ImportedName,
        reference_name: &str,
        at: &SyntaxNode,
    ) {
        let pos = at.start_position();
        self.imports.push(ImportBinding {
            local: local.to_string(),
            source: source.to_string(),
            imported,
            line: pos.row + 1,
        });
        self.references.push(
            RawReference::new(scope, EdgeKind::Imports, reference_name, pos.row + 1, pos.column)
                .with_source(source),
        );
    }

    fn extract_calls(&mut self, root: &SyntaxNode, dialect: Dialect) {
        let Some(query) = dialect.calls_query() else {
            tracing::warn!("TypeScript calls query failed to compile");
            return;
        };
        let mut cursor = tree_sitter::QueryCursor::new();
        let mut matches = cursor.matches(query, *root, self.source.as_bytes());
        let mut found = Vec::new();
        while let Some(m) = matches.next() {
            for capture in m.captures {
                let node = capture.node;
                let name = node_text(&node, self.source);
                if is_simple_dotted(name) {
                    let pos = node.start_position();
                    found.push((node.start_byte(), name.to_string(), pos.row + 1, pos.column));
                }
            }
        }
        for (byte, name, line, column) in found {
            let from = self.owner_of(byte);
            self.references
                .push(RawReference::new(from, EdgeKind::Calls, name, line, column));
        }
    }

    /// Capitalized JSX element names are component references.
    fn extract_jsx(&mut self, root: &SyntaxNode, dialect: Dialect) {
        let Some(query) = dialect.jsx_query() else {
            return;
        };
        let mut cursor = tree_sitter::QueryCursor::new();
        let mut matches = cursor.matches(query, *root, self.source.as_bytes());
        let mut found = Vec::new();
        while let Some(m) = matches.next() {
            for capture in m.captures {
                let node = capture.node;
                let name = node_text(&node, self.source);
                let capitalized = name.chars().next().is_some_and(|c| c.is_ascii_uppercase());
                if capitalized && is_simple_dotted(name) {
                    let pos = node.start_position();
                    found.push((node.start_byte(), name.to_string(), pos.row + 1, pos.column));
                }
            }
        }
        for (byte, name, line, column) in found {
            let from = self.owner_of(byte);
            self.references
                .push(RawReference::new(from, EdgeKind::Uses, name, line, column));
        }
    }

    fn owner_of(&self, byte: usize) -> String {
        self.spans
            .iter()
            .filter(|(start, end, _)| *start <= byte && byte < *end)
            .min_by_key(|(start, end, _)| end - start)
            .map(|(_, _, id)| id.clone())
            .unwrap_or_else(|| self.module_id.clone())
    }
}

fn collect_type_names(node: &SyntaxNode, source: &str, out: &mut Vec<(String, usize, usize)>) {
    match node.kind() {
        "type_identifier" | "nested_type_identifier" => {
            let text = node_text(node, source);
            if is_simple_dotted(text) {
                let pos = node.start_position();
                out.push((text.to_string(), pos.row + 1, pos.column));
            }
        }
        _ => {
            for child in named_children(node) {
                collect_type_names(&child, source, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(path: &str, source: &str) -> ParsedFile {
        TypeScriptParser.parse(path, source).unwrap()
    }

    fn node<'a>(parsed: &'a ParsedFile, id: &str) -> &'a Node {
        parsed.nodes.iter().find(|n| n.id == id).unwrap()
    }

    #[test]
    fn test_parse_declarations_and_exports() {
        let parsed = parse(
            "src/service.ts",
            r#"import { helper } from "./utils";

/** Handles users. */
export class UserService extends BaseService implements Repo {
    save(user: User): void {
        this.validate(user);
        helper();
    }

    handle = async () => {
        await this.save(null);
    };
}

function internal() {}

export const makeService = () => new UserService();
"#,
        );
        assert_eq!(parsed.module_id, "src.service");

        let class = node(&parsed, "src.service.UserService");
        assert_eq!(class.kind, NodeKind::Class);
        assert_eq!(class.start_line, 4);
        assert_eq!(class.export_name(), Some("UserService"));
        assert_eq!(class.docstring.as_deref(), Some("Handles users."));

        let save = node(&parsed, "src.service.UserService.save");
        assert_eq!(save.kind, NodeKind::Method);
        assert_eq!(save.signature.as_deref(), Some("save(user: User): void"));

        let handle = node(&parsed, "src.service.UserService.handle");
        assert_eq!(handle.kind, NodeKind::Method);
        assert_eq!(handle.metadata["is_async"], true);

        assert_eq!(node(&parsed, "src.service.internal").export_name(), None);
        let factory = node(&parsed, "src.service.makeService");
        assert_eq!(factory.kind, NodeKind::Function);
        assert_eq!(factory.export_name(), Some("makeService"));

        let inherits: Vec<&str> = parsed
            .references
            .iter()
            .filter(|r| r.kind == EdgeKind::Inherits)
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(inherits, vec!["BaseService", "Repo"]);

        let calls: Vec<(&str, &str)> = parsed
            .references
            .iter()
            .filter(|r| r.kind == EdgeKind::Calls)
            .map(|r| (r.from_node.as_str(), r.name.as_str()))
            .collect();
        assert!(calls.contains(&("src.service.UserService.save", "this.validate")));
        assert!(calls.contains(&("src.service.UserService.save", "helper")));
        assert!(calls.contains(&("src.service.UserService.handle", "this.save")));
        assert!(calls.contains(&("src.service.makeService", "UserService")));
    }

    #[test]
    fn test_default_and_clause_exports() {
        let parsed = parse(
            "src/lib/index.ts",
            "function a() {}\nfunction b() {}\nexport { a as alpha };\nexport default b;\n",
        );
        assert_eq!(parsed.module_id, "src.lib");
        assert_eq!(node(&parsed, "src.lib.a").export_name(), Some("alpha"));
        assert_eq!(node(&parsed, "src.lib.b").export_name(), Some("default"));

        let anon = parse("src/page.tsx", "export default function () { return null; }\n");
        assert_eq!(node(&anon, "src.page.default").export_name(), Some("default"));
    }

    #[test]
    fn test_import_bindings() {
        let parsed = parse(
            "src/app.tsx",
            "import React from 'react';\nimport * as api from '@/api';\nimport { a, b as c } from './x';\nimport './styles.css';\n",
        );
        let bindings: Vec<(&str, &str, &ImportedName)> = parsed
            .imports
            .iter()
            .map(|b| (b.local.as_str(), b.source.as_str(), &b.imported))
            .collect();
        assert_eq!(
            bindings,
            vec![
                ("React", "react", &ImportedName::Default),
                ("api", "@/api", &ImportedName::Module),
                ("a", "./x", &ImportedName::Named("a".into())),
                ("c", "./x", &ImportedName::Named("b".into())),
            ]
        );
        let imports = parsed.references.iter().filter(|r| r.kind == EdgeKind::Imports).count();
        assert_eq!(imports, 5);
    }

    #[test]
    fn test_jsx_components_are_uses() {
        let parsed = parse(
            "src/App.tsx",
            "export function App() {\n  return <Layout><div /><Button label=\"x\" /></Layout>;\n}\n",
        );
        let uses: Vec<&str> = parsed
            .references
            .iter()
            .filter(|r| r.kind == EdgeKind::Uses)
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(uses, vec!["Layout", "Button"]);
        assert!(parsed.references.iter().all(|r| r.from_node == "src.App.App"));
    }

    #[test]
    fn test_nested_function_contains_edge() {
        let parsed = parse("a.ts", "function outer() {\n  const inner = () => 1;\n  return inner();\n}\n");
        assert!(parsed.declares("a.outer.inner"));
        assert_eq!(parsed.local_edges.len(), 1);
        assert_eq!(parsed.local_edges[0].from_node, "a.outer");
    }

    #[test]
    fn test_accessor_pair_gets_distinct_ids() {
        let parsed = parse(
            "a.ts",
            "class Box {\n  get size() {\n    return 1;\n  }\n  set size(v: number) {}\n}\n",
        );
        assert_eq!(node(&parsed, "a.Box.size").start_line, 2);
        assert_eq!(node(&parsed, "a.Box.size@5").kind, NodeKind::Method);
    }

    #[test]
    fn test_parse_under_explicit_module_id() {
        let parsed = TypeScriptParser
            .parse_module("api.ts", "api@ts", "export function fetch() {}\n")
            .unwrap();
        assert_eq!(parsed.module_id, "api@ts");
        assert_eq!(node(&parsed, "api@ts.fetch").export_name(), Some("fetch"));
    }

    #[test]
    fn test_fragment_checks_wrap_methods() {
        let method = "  save(user: User): void {\n    this.db.put(user);\n  }";
        assert!(TypeScriptParser.check_syntax(method, NodeKind::Method).is_ok());
        assert!(TypeScriptParser.check_syntax("save( {", NodeKind::Method).is_err());

        let construct = TypeScriptParser.outermost(method, NodeKind::Method).unwrap();
        assert_eq!(construct.kind, NodeKind::Function);
        assert_eq!(construct.name.as_deref(), Some("save"));

        let construct = TypeScriptParser
            .outermost("export class Box {}", NodeKind::Class)
            .unwrap();
        assert_eq!(construct.kind, NodeKind::Class);
        assert_eq!(construct.name.as_deref(), Some("Box"));
    }

    #[test]
    fn test_parameters() {
        let params = TypeScriptParser
            .parameters("function f(a: number, b?: string, c = 1, ...rest: any[]) {}", NodeKind::Function)
            .unwrap();
        let summary: Vec<(&str, bool)> = params.iter().map(|p| (p.name.as_str(), p.required)).collect();
        assert_eq!(
            summary,
            vec![("a", true), ("b", false), ("c", false), ("...rest", false)]
        );
    }
}
