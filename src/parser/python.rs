use once_cell::sync::OnceCell;
use tree_sitter::{Language, Node as SyntaxNode, Query, StreamingIterator};

use super::tree::{dedent, describe_error, line_span, named_children, node_text, parse_tree, slice_lines};
use super::{
    declaration_id, module_id_from_path, Construct, ImportBinding, ImportedName, LanguageParser, Param, ParsedFile,
    RawReference,
};
use crate::error::Result;
use crate::graph::models::{Confidence, Edge, EdgeKind, Node, NodeKind};

pub struct PythonParser;

static PYTHON_CALLS_QUERY: OnceCell<Query> = OnceCell::new();

const CALLS_QUERY: &str = r#"
(call
    function: [(identifier) (attribute)] @call
)
"#;

impl PythonParser {
    fn language() -> Language {
        tree_sitter_python::LANGUAGE.into()
    }

    fn calls_query() -> Option<&'static Query> {
        PYTHON_CALLS_QUERY
            .get_or_try_init(|| Query::new(&Self::language(), CALLS_QUERY))
            .ok()
    }
}

impl LanguageParser for PythonParser {
    fn name(&self) -> &'static str {
        "python"
    }

    fn extensions(&self) -> &[&'static str] {
        &["py"]
    }

    fn module_id(&self, rel_path: &str) -> String {
        module_id_from_path(rel_path, &["__init__"])
    }

    fn parse_module(&self, rel_path: &str, module_id: &str, source: &str) -> Result<ParsedFile> {
        let tree = parse_tree(&Self::language(), source)?;
        let root = tree.root_node();
        let module_id = module_id.to_string();

        let stem = rel_path
            .rsplit('/')
            .next()
            .and_then(|f| f.split('.').next())
            .unwrap_or(rel_path);
        let line_count = source.lines().count().max(1);
        let module = Node::new(&module_id, NodeKind::Module, stem, rel_path, 1, line_count, source)
            .with_docstring(docstring_of(&root, source))
            .with_meta("language", "python");

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
        };
        visitor.visit_children(&root);
        visitor.extract_blocks(&root);
        visitor.extract_calls(&root);

        Ok(ParsedFile {
            file_path: rel_path.to_string(),
            module_id,
            language: "python".to_string(),
            nodes: visitor.nodes,
            references: visitor.references,
            imports: visitor.imports,
            local_edges: visitor.local_edges,
            syntax_error: describe_error(&tree, source),
        })
    }

    fn check_syntax(&self, source: &str, _kind: NodeKind) -> std::result::Result<(), String> {
        let code = dedent(source);
        let tree = parse_tree(&Self::language(), &code).map_err(|e| e.to_string())?;
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
        let code = dedent(source);
        let tree = parse_tree(&Self::language(), &code).ok()?;
        let first = named_children(&tree.root_node())
            .into_iter()
            .find(|n| n.kind() != "comment")?;
        let def = unwrap_decorated(first);
        let name = def
            .child_by_field_name("name")
            .map(|n| node_text(&n, &code).to_string());
        let construct_kind = match def.kind() {
            "function_definition" => NodeKind::Function,
            "class_definition" => NodeKind::Class,
            _ => NodeKind::Block,
        };
        Some(Construct {
            kind: construct_kind,
            name,
        })
    }

    fn parameters(&self, source: &str, _kind: NodeKind) -> Option<Vec<Param>> {
        let code = dedent(source);
        let tree = parse_tree(&Self::language(), &code).ok()?;
        let first = named_children(&tree.root_node())
            .into_iter()
            .find(|n| n.kind() != "comment")?;
        let def = unwrap_decorated(first);
        if def.kind() != "function_definition" {
            return None;
        }
        let params = def.child_by_field_name("parameters")?;
        Some(collect_params(&params, &code))
    }
}

fn unwrap_decorated(node: SyntaxNode) -> SyntaxNode {
    if node.kind() == "decorated_definition" {
        node.child_by_field_name("definition").unwrap_or(node)
    } else {
        node
    }
}

fn collect_params(params: &SyntaxNode, source: &str) -> Vec<Param> {
    let mut out = Vec::new();
    for param in named_children(params) {
        let (name, required) = match param.kind() {
            "identifier" => (node_text(&param, source).to_string(), true),
            "typed_parameter" => {
                let Some(inner) = param.named_child(0) else {
                    continue;
                };
                let splat = matches!(inner.kind(), "list_splat_pattern" | "dictionary_splat_pattern");
                (node_text(&inner, source).to_string(), !splat)
            }
            "default_parameter" | "typed_default_parameter" => {
                let Some(name) = param.child_by_field_name("name") else {
                    continue;
                };
                (node_text(&name, source).to_string(), false)
            }
            "list_splat_pattern" | "dictionary_splat_pattern" => {
                (node_text(&param, source).to_string(), false)
            }
            _ => continue,
        };
        if name == "self" || name == "cls" {
            continue;
        }
        out.push(Param { name, required });
    }
    out
}

/// Docstring of a module, class or function body.
fn docstring_of(container: &SyntaxNode, source: &str) -> Option<String> {
    let body = if container.kind() == "module" {
        *container
    } else {
        container.child_by_field_name("body")?
    };
    let first = named_children(&body)
        .into_iter()
        .find(|n| n.kind() != "comment")?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string = first.named_child(0)?;
    if string.kind() != "string" {
        return None;
    }
    let raw = node_text(&string, source);
    let trimmed = raw.trim_start_matches(|c: char| "rRbBuUfF".contains(c));
    let inner = ["\"\"\"", "'''", "\"", "'"]
        .iter()
        .find_map(|q| trimmed.strip_prefix(q).and_then(|s| s.strip_suffix(q)))
        .unwrap_or(trimmed);
    Some(dedent(inner.trim_matches('\n')).trim().to_string())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_simple_dotted(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.')
        && !name.starts_with('.')
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
    /// Byte ranges of declared units, for attributing call sites
    spans: Vec<(usize, usize, String)>,
}

impl<'s> Visitor<'s> {
    fn current_scope(&self) -> &(String, NodeKind) {
        // The module frame is pushed first and never popped
        &self.scopes[self.scopes.len() - 1]
    }

    fn visit_children(&mut self, node: &SyntaxNode) {
        for child in named_children(node) {
            self.visit(&child);
        }
    }

    fn visit(&mut self, node: &SyntaxNode) {
        match node.kind() {
            "decorated_definition" => {
                let Some(def) = node.child_by_field_name("definition") else {
                    return;
                };
                let decorators: Vec<SyntaxNode> = named_children(node)
                    .into_iter()
                    .filter(|n| n.kind() == "decorator")
                    .collect();
                self.visit_definition(&def, node, &decorators);
            }
            "function_definition" | "class_definition" => self.visit_definition(node, node, &[]),
            "import_statement" => self.visit_import(node),
            "import_from_statement" => self.visit_import_from(node),
            _ => self.visit_children(node),
        }
    }

    fn visit_definition(&mut self, def: &SyntaxNode, span_node: &SyntaxNode, decorators: &[SyntaxNode]) {
        let Some(name_node) = def.child_by_field_name("name") else {
            return;
        };
        let name = node_text(&name_node, self.source).to_string();
        let (parent_id, parent_kind) = self.current_scope().clone();
        let (start, end) = line_span(span_node);
        let id = declaration_id(&self.nodes, &parent_id, &name, start);
        let source_code = slice_lines(self.source, start, end);

        let is_class = def.kind() == "class_definition";
        let kind = if is_class {
            NodeKind::Class
        } else if parent_kind == NodeKind::Class {
            NodeKind::Method
        } else {
            NodeKind::Function
        };

        let decorator_texts: Vec<String> = decorators
            .iter()
            .map(|d| node_text(d, self.source).trim_start_matches('@').trim().to_string())
            .collect();

        let mut node = Node::new(&id, kind, &name, self.file_path, start, end, source_code)
            .with_docstring(docstring_of(def, self.source))
            .with_meta("decorators", decorator_texts);

        if !is_class {
            let body_start = def
                .child_by_field_name("body")
                .map(|b| b.start_byte())
                .unwrap_or(def.end_byte());
            let header = &self.source[def.start_byte()..body_start];
            let signature = collapse_whitespace(header.trim_end().trim_end_matches(':'));
            let is_async = header.trim_start().starts_with("async");
            node = node.with_signature(signature).with_meta("is_async", is_async);
        }
        if parent_kind == NodeKind::Module {
            node = node.with_meta("export", name.clone());
        }
        self.nodes.push(node);
        self.spans.push((span_node.start_byte(), span_node.end_byte(), id.clone()));

        if matches!(parent_kind, NodeKind::Function | NodeKind::Method) {
            self.local_edges.push(
                Edge::new(self.file_path, &parent_id, &id, EdgeKind::Contains, Confidence::Resolved)
                    .at(start, def.start_position().column),
            );
        }

        for decorator in decorators {
            if let Some(target) = decorator_target(decorator, self.source) {
                let pos = decorator.start_position();
                self.references.push(RawReference::new(
                    &id,
                    EdgeKind::Decorates,
                    target,
                    pos.row + 1,
                    pos.column,
                ));
            }
        }

        if is_class {
            if let Some(bases) = def.child_by_field_name("superclasses") {
                for base in named_children(&bases) {
                    if !matches!(base.kind(), "identifier" | "attribute") {
                        continue;
                    }
                    let base_name = node_text(&base, self.source);
                    if base_name == "object" {
                        continue;
                    }
                    let pos = base.start_position();
                    self.references.push(RawReference::new(
                        &id,
                        EdgeKind::Inherits,
                        base_name,
                        pos.row + 1,
                        pos.column,
                    ));
                }
            }
        } else {
            self.extract_annotations(def, &id);
        }

        self.scopes.push((id, kind));
        if let Some(body) = def.child_by_field_name("body") {
            self.visit_children(&body);
        }
        self.scopes.pop();
    }

    /// `uses` references for names in parameter and return type annotations.
    fn extract_annotations(&mut self, def: &SyntaxNode, id: &str) {
        let mut type_nodes = Vec::new();
        if let Some(params) = def.child_by_field_name("parameters") {
            for param in named_children(&params) {
                if let Some(t) = param.child_by_field_name("type") {
                    type_nodes.push(t);
                }
            }
        }
        if let Some(ret) = def.child_by_field_name("return_type") {
            type_nodes.push(ret);
        }

        for t in type_nodes {
            let mut names = Vec::new();
            collect_type_names(&t, self.source, &mut names);
            for (name, line, column) in names {
                if self
                    .references
                    .iter()
                    .any(|r| r.from_node == id && r.kind == EdgeKind::Uses && r.name == name)
                {
                    continue;
                }
                self.references
                    .push(RawReference::new(id, EdgeKind::Uses, name, line, column));
            }
        }
    }

    fn visit_import(&mut self, node: &SyntaxNode) {
        let scope = self.current_scope().0.clone();
        let line = node.start_position().row + 1;
        for child in named_children(node) {
            let (module, alias) = match child.kind() {
                "dotted_name" => (node_text(&child, self.source).to_string(), None),
                "aliased_import" => {
                    let Some(name) = child.child_by_field_name("name") else {
                        continue;
                    };
                    let alias = child
                        .child_by_field_name("alias")
                        .map(|a| node_text(&a, self.source).to_string());
                    (node_text(&name, self.source).to_string(), alias)
                }
                _ => continue,
            };
            // `import a.b` binds `a`; `import a.b as x` binds `x` to `a.b`
            let (local, bound_source) = match alias {
                Some(alias) => (alias, module.clone()),
                None => {
                    let root = module.split('.').next().unwrap_or(&module).to_string();
                    (root.clone(), root)
                }
            };
            self.imports.push(ImportBinding {
                local,
                source: bound_source,
                imported: ImportedName::Module,
                line,
            });
            self.references.push(
                RawReference::new(&scope, EdgeKind::Imports, "", line, child.start_position().column)
                    .with_source(module),
            );
        }
    }

    fn visit_import_from(&mut self, node: &SyntaxNode) {
        let scope = self.current_scope().0.clone();
        let line = node.start_position().row + 1;
        let Some(module_node) = node.child_by_field_name("module_name") else {
            return;
        };
        let module = node_text(&module_node, self.source).to_string();

        for child in named_children(node) {
            if child.id() == module_node.id() {
                continue;
            }
            let (name, local) = match child.kind() {
                "dotted_name" => {
                    let name = node_text(&child, self.source).to_string();
                    (name.clone(), name)
                }
                "aliased_import" => {
                    let Some(name) = child.child_by_field_name("name") else {
                        continue;
                    };
                    let name = node_text(&name, self.source).to_string();
                    let local = child
                        .child_by_field_name("alias")
                        .map(|a| node_text(&a, self.source).to_string())
                        .unwrap_or_else(|| name.clone());
                    (name, local)
                }
                "wildcard_import" => {
                    self.imports.push(ImportBinding {
                        local: "*".to_string(),
                        source: module.clone(),
                        imported: ImportedName::Star,
                        line,
                    });
                    self.references.push(
                        RawReference::new(&scope, EdgeKind::Imports, "", line, child.start_position().column)
                            .with_source(module.clone()),
                    );
                    continue;
                }
                _ => continue,
            };
            self.imports.push(ImportBinding {
                local,
                source: module.clone(),
                imported: ImportedName::Named(name.clone()),
                line,
            });
            self.references.push(
                RawReference::new(&scope, EdgeKind::Imports, name, line, child.start_position().column)
                    .with_source(module.clone()),
            );
        }
    }

    /// Groups consecutive module-level statements that are not declarations into blocks.
    fn extract_blocks(&mut self, root: &SyntaxNode) {
        let mut pending: Vec<SyntaxNode> = Vec::new();
        let children = named_children(root);
        for stmt in children {
            match stmt.kind() {
                "comment" => continue,
                "import_statement" | "import_from_statement" | "future_import_statement"
                | "function_definition" | "class_definition" | "decorated_definition" => {
                    self.flush_block(&mut pending);
                }
                _ if contains_definition(&stmt) => self.flush_block(&mut pending),
                _ => pending.push(stmt),
            }
        }
        self.flush_block(&mut pending);
    }

    fn flush_block(&mut self, pending: &mut Vec<SyntaxNode>) {
        if pending.is_empty() {
            return;
        }
        let first = pending[0];
        let last = pending[pending.len() - 1];
        let start = line_span(&first).0;
        let end = line_span(&last).1;
        let id = format!("{}._block_{}", self.module_id, start);
        let name = block_name(pending, self.source, start);
        let kind = block_kind(pending, self.source);

        self.nodes.push(
            Node::new(&id, NodeKind::Block, name, self.file_path, start, end, slice_lines(self.source, start, end))
                .with_meta("block_kind", kind),
        );
        self.spans.push((first.start_byte(), last.end_byte(), id));
        pending.clear();
    }

    fn extract_calls(&mut self, root: &SyntaxNode) {
        let Some(query) = PythonParser::calls_query() else {
            tracing::warn!("Python calls query failed to compile");
            return;
        };
        let mut cursor = tree_sitter::QueryCursor::new();
        let mut matches = cursor.matches(query, *root, self.source.as_bytes());

        while let Some(m) = matches.next() {
            for capture in m.captures {
                let node = capture.node;
                if inside_decorator(&node) {
                    continue;
                }
                let name = node_text(&node, self.source);
                if !is_simple_dotted(name) {
                    continue;
                }
                let from = self.owner_of(node.start_byte());
                let pos = node.start_position();
                self.references.push(RawReference::new(
                    from,
                    EdgeKind::Calls,
                    name,
                    pos.row + 1,
                    pos.column,
                ));
            }
        }
    }

    /// Innermost declared unit whose span contains the byte offset.
    fn owner_of(&self, byte: usize) -> String {
        self.spans
            .iter()
            .filter(|(start, end, _)| *start <= byte && byte < *end)
            .min_by_key(|(start, end, _)| end - start)
            .map(|(_, _, id)| id.clone())
            .unwrap_or_else(|| self.module_id.clone())
    }
}

fn decorator_target(decorator: &SyntaxNode, source: &str) -> Option<String> {
    let expr = decorator.named_child(0)?;
    let target = if expr.kind() == "call" {
        expr.child_by_field_name("function")?
    } else {
        expr
    };
    let text = node_text(&target, source);
    is_simple_dotted(text).then(|| text.to_string())
}

fn inside_decorator(node: &SyntaxNode) -> bool {
    let mut current = node.parent();
    while let Some(n) = current {
        match n.kind() {
            "decorator" => return true,
            "function_definition" | "class_definition" | "module" => return false,
            _ => current = n.parent(),
        }
    }
    false
}

fn contains_definition(node: &SyntaxNode) -> bool {
    named_children(node).iter().any(|child| {
        matches!(
            child.kind(),
            "function_definition" | "class_definition" | "decorated_definition"
        ) || contains_definition(child)
    })
}

fn collect_type_names(node: &SyntaxNode, source: &str, out: &mut Vec<(String, usize, usize)>) {
    match node.kind() {
        "identifier" | "attribute" => {
            let text = node_text(node, source);
            if is_simple_dotted(text) {
                let pos = node.start_position();
                out.push((text.to_string(), pos.row + 1, pos.column));
            }
        }
        "string" => {}
        _ => {
            for child in named_children(node) {
                collect_type_names(&child, source, out);
            }
        }
    }
}

fn assigned_names(stmts: &[SyntaxNode], source: &str) -> Vec<String> {
    let mut names = Vec::new();
    for stmt in stmts {
        if stmt.kind() != "expression_statement" {
            continue;
        }
        let Some(expr) = stmt.named_child(0) else {
            continue;
        };
        if expr.kind() != "assignment" {
            continue;
        }
        if let Some(left) = expr.child_by_field_name("left") {
            if left.kind() == "identifier" {
                names.push(node_text(&left, source).to_string());
            }
        }
    }
    names
}

fn block_name(stmts: &[SyntaxNode], source: &str, start: usize) -> String {
    if stmts.len() == 1 && stmts[0].kind() == "if_statement" {
        return "guard".to_string();
    }
    let names = assigned_names(stmts, source);
    if names.is_empty() {
        return format!("block_{}", start);
    }
    let mut joined = names.iter().take(3).cloned().collect::<Vec<_>>().join(", ");
    if names.len() > 3 {
        joined.push_str("...");
    }
    joined
}

fn block_kind(stmts: &[SyntaxNode], source: &str) -> &'static str {
    if stmts.len() == 1 && stmts[0].kind() == "if_statement" {
        let condition = stmts[0]
            .child_by_field_name("condition")
            .map(|c| node_text(&c, source))
            .unwrap_or("");
        return if condition.contains("__name__") {
            "main_guard"
        } else {
            "conditional"
        };
    }
    let mut has_assign = false;
    for stmt in stmts {
        if let Some(expr) = stmt.named_child(0) {
            if expr.kind() == "assignment" {
                if expr.child_by_field_name("type").is_some() {
                    return "type_aliases";
                }
                has_assign = true;
            }
        }
    }
    if has_assign {
        "constants"
    } else {
        "statements"
    }
}
