//! Layered validation of node replacements.
//!
//! Guards run first, then syntax, structure and signature checks. The first failing
//! level rejects the edit; signature drift and renames only produce warnings.

use std::sync::Arc;

use crate::config::GuardConfig;
use crate::error::{LensError, Result};
use crate::graph::models::{Node, NodeKind};
use crate::parser::{Param, ParserRegistry};

/// Non-fatal findings from a passing validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validation {
    pub warnings: Vec<String>,
}

pub struct Validator {
    registry: Arc<ParserRegistry>,
    guards: GuardConfig,
}

fn same_kind(expected: NodeKind, actual: NodeKind) -> bool {
    expected == actual || (expected.is_callable() && actual.is_callable())
}

impl Validator {
    pub fn new(registry: Arc<ParserRegistry>, guards: GuardConfig) -> Self {
        Self { registry, guards }
    }

    /// Validates `new_source` as a replacement for `node`.
    pub fn check_replacement(&self, node: &Node, new_source: &str) -> Result<Validation> {
        self.check_guards(node, new_source)?;

        let parser = self.registry.require_for_file(&node.file_path)?;
        if new_source.trim().is_empty() {
            return Err(LensError::syntax(format!(
                "empty replacement for {} (use delete_node to remove it)",
                node.id
            )));
        }
        parser
            .check_syntax(new_source, node.kind)
            .map_err(|reason| LensError::syntax(format!("{} in replacement for {}", reason, node.id)))?;

        let mut validation = Validation::default();
        let construct = parser.outermost(new_source, node.kind).ok_or_else(|| {
            LensError::structure(format!("replacement for {} declares nothing", node.id), None)
        })?;
        if !same_kind(node.kind, construct.kind) {
            return Err(LensError::structure(
                format!(
                    "{} is a {} but the replacement is a {}",
                    node.id,
                    node.kind.as_str(),
                    construct.kind.as_str()
                ),
                None,
            ));
        }
        if let Some(name) = construct.name.as_deref() {
            if name != node.name && node.kind != NodeKind::Block {
                validation.warnings.push(format!(
                    "replacement renames `{}` to `{}`; callers are not updated, use rename instead",
                    node.name, name
                ));
            }
        }

        if node.kind.is_callable() {
            let before = parser.parameters(&node.source_code, node.kind);
            let after = parser.parameters(new_source, node.kind);
            if let (Some(before), Some(after)) = (before, after) {
                validation.warnings.extend(signature_drift(&before, &after));
            }
        }

        if !validation.warnings.is_empty() {
            tracing::debug!("{} validated with {} warnings", node.id, validation.warnings.len());
        }
        Ok(validation)
    }

    /// Validates a fragment that will be inserted into `file`.
    pub fn check_fragment(&self, file: &str, source: &str) -> Result<Validation> {
        let parser = self.registry.require_for_file(file)?;
        if source.trim().is_empty() {
            return Err(LensError::syntax("empty source"));
        }
        parser
            .check_syntax(source, NodeKind::Module)
            .map_err(|reason| LensError::syntax(format!("{} in new code for {}", reason, file)))?;
        Ok(Validation::default())
    }

    fn check_guards(&self, node: &Node, new_source: &str) -> Result<()> {
        if node.kind.is_container() && node.source_code.len() > self.guards.large_container_chars {
            return Err(LensError::structure(
                format!(
                    "{} has {} characters, too large to replace whole",
                    node.id,
                    node.source_code.len()
                ),
                Some("Edit the child nodes (methods, functions) individually"),
            ));
        }

        let old_lines = node.line_count();
        let new_lines = new_source.lines().count();
        if old_lines > self.guards.truncation_min_lines
            && (new_lines as f64) < old_lines as f64 * self.guards.truncation_ratio
        {
            return Err(LensError::structure(
                format!(
                    "replacement for {} shrinks it from {} to {} lines",
                    node.id, old_lines, new_lines
                ),
                Some("Send the complete node source, not an excerpt"),
            ));
        }
        Ok(())
    }
}

fn signature_drift(before: &[Param], after: &[Param]) -> Vec<String> {
    let mut warnings = Vec::new();
    for param in before.iter().filter(|p| p.required) {
        if !after.iter().any(|p| p.name == param.name) {
            warnings.push(format!("required parameter `{}` was removed", param.name));
        }
    }
    for param in after.iter().filter(|p| p.required) {
        if !before.iter().any(|p| p.name == param.name) {
            warnings.push(format!(
                "new required parameter `{}` breaks existing callers",
                param.name
            ));
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationLevel;

    fn validator() -> Validator {
        Validator::new(Arc::new(ParserRegistry::new()), GuardConfig::default())
    }

    fn function(source: &str) -> Node {
        let lines = source.lines().count();
        Node::new("app.greet", NodeKind::Function, "greet", "app.py", 1, lines, source)
    }

    fn level(err: LensError) -> ValidationLevel {
        match err {
            LensError::ValidationFailed { level, .. } => level,
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_accepts_body_change() {
        let node = function("def greet(name):\n    return 'hi ' + name\n");
        let result = validator()
            .check_replacement(&node, "def greet(name):\n    return f'hello {name}'\n")
            .unwrap();
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_rejects_syntax_error() {
        let node = function("def greet(name):\n    return name\n");
        let err = validator().check_replacement(&node, "def greet(name:\n    return name\n").unwrap_err();
        assert_eq!(level(err), ValidationLevel::Syntax);
    }

    #[test]
    fn test_rejects_kind_change() {
        let node = function("def greet(name):\n    return name\n");
        let err = validator()
            .check_replacement(&node, "class greet:\n    pass\n")
            .unwrap_err();
        assert_eq!(level(err), ValidationLevel::Structure);
    }

    #[test]
    fn test_method_accepts_function_construct() {
        let node = Node::new(
            "app.Greeter.greet",
            NodeKind::Method,
            "greet",
            "app.py",
            2,
            3,
            "    def greet(self):\n        return 1\n",
        );
        let result = validator()
            .check_replacement(&node, "    def greet(self):\n        return 2\n")
            .unwrap();
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_warns_on_rename_and_signature_drift() {
        let node = function("def greet(name, title=None):\n    return name\n");
        let result = validator()
            .check_replacement(&node, "def welcome(person):\n    return person\n")
            .unwrap();
        assert_eq!(result.warnings.len(), 3);
        assert!(result.warnings[0].contains("use rename"));
        assert!(result.warnings.iter().any(|w| w.contains("`name` was removed")));
        assert!(result.warnings.iter().any(|w| w.contains("`person` breaks")));
    }

    #[test]
    fn test_truncation_guard() {
        let body: String = (0..30).map(|i| format!("    x{i} = {i}\n")).collect();
        let node = function(&format!("def greet():\n{body}    return x0\n"));
        let err = validator()
            .check_replacement(&node, "def greet():\n    return 0\n")
            .unwrap_err();
        assert_eq!(level(err), ValidationLevel::Structure);
    }

    #[test]
    fn test_large_container_guard() {
        let methods: String = (0..400).map(|i| format!("    def m{i}(self):\n        return {i}\n")).collect();
        let source = format!("class Big:\n{methods}");
        let lines = source.lines().count();
        let node = Node::new("app.Big", NodeKind::Class, "Big", "app.py", 1, lines, &source);
        let err = validator().check_replacement(&node, &source).unwrap_err();
        assert!(err.hint().unwrap().contains("child nodes"));
    }

    #[test]
    fn test_fragment_check() {
        let v = validator();
        assert!(v.check_fragment("app.py", "def extra():\n    return 1\n").is_ok());
        assert!(v.check_fragment("app.py", "def extra(:\n").is_err());
        assert!(matches!(
            v.check_fragment("notes.md", "text"),
            Err(LensError::UnsupportedLanguage(_))
        ));
    }
}
