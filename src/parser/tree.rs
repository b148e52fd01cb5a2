use tree_sitter::{Language, Node, Tree};

use crate::error::{LensError, Result};

pub fn parse_tree(language: &Language, source: &str) -> Result<Tree> {
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(language)
        .map_err(|e| LensError::Parse(e.to_string()))?;
    parser
        .parse(source, None)
        .ok_or_else(|| LensError::Parse("Failed to parse source".to_string()))
}

pub fn node_text<'a>(node: &Node, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

/// 1-based inclusive line range of a syntax node.
pub fn line_span(node: &Node) -> (usize, usize) {
    let start = node.start_position().row + 1;
    let end_pos = node.end_position();
    // A node ending at column 0 finished on the previous line's newline
    let end = if end_pos.column == 0 && end_pos.row > node.start_position().row {
        end_pos.row
    } else {
        end_pos.row + 1
    };
    (start, end)
}

/// Full source lines `start..=end` (1-based), joined with `\n`.
pub fn slice_lines(source: &str, start: usize, end: usize) -> String {
    if end < start.max(1) {
        return String::new();
    }
    source
        .lines()
        .skip(start.saturating_sub(1))
        .take(end + 1 - start.max(1))
        .collect::<Vec<_>>()
        .join("\n")
}

/// First ERROR or MISSING node in document order.
pub fn first_error<'t>(node: Node<'t>) -> Option<Node<'t>> {
    if !node.has_error() {
        return None;
    }
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'t>> = node.children(&mut cursor).collect();
    children.into_iter().find_map(first_error)
}

/// Human-readable description of the first syntax error, if any.
pub fn describe_error(tree: &Tree, source: &str) -> Option<String> {
    let err = first_error(tree.root_node())?;
    let pos = err.start_position();
    let what = if err.is_missing() {
        format!("missing `{}`", err.kind())
    } else {
        let snippet: String = node_text(&err, source).chars().take(40).collect();
        format!("unexpected `{}`", snippet.trim())
    };
    Some(format!(
        "syntax error at line {}, column {}: {}",
        pos.row + 1,
        pos.column + 1,
        what
    ))
}

/// Removes the common leading whitespace of all non-blank lines.
pub fn dedent(source: &str) -> String {
    let indent = source
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    if indent == 0 {
        return source.to_string();
    }
    source
        .lines()
        .map(|l| if l.len() >= indent { &l[indent..] } else { l.trim_start() })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Leading whitespace of the first non-blank line.
pub fn leading_indent(source: &str) -> &str {
    source
        .lines()
        .find(|l| !l.trim().is_empty())
        .map(|l| &l[..l.len() - l.trim_start().len()])
        .unwrap_or("")
}

pub fn named_children<'t>(node: &Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn python() -> Language {
        tree_sitter_python::LANGUAGE.into()
    }

    #[test]
    fn test_line_span() {
        let source = "x = 1\ndef f():\n    return 2\n";
        let tree = parse_tree(&python(), source).unwrap();
        let func = tree.root_node().named_child(1).unwrap();
        assert_eq!(func.kind(), "function_definition");
        assert_eq!(line_span(&func), (2, 3));
    }

    #[test]
    fn test_slice_lines() {
        let source = "a\nb\nc\nd";
        assert_eq!(slice_lines(source, 2, 3), "b\nc");
        assert_eq!(slice_lines(source, 4, 4), "d");
    }

    #[test]
    fn test_describe_error() {
        let source = "def f(:\n    pass\n";
        let tree = parse_tree(&python(), source).unwrap();
        let msg = describe_error(&tree, source).unwrap();
        assert!(msg.starts_with("syntax error at line 1"));

        let ok = "def f():\n    pass\n";
        let tree = parse_tree(&python(), ok).unwrap();
        assert!(describe_error(&tree, ok).is_none());
    }

    #[test]
    fn test_dedent_and_indent() {
        let method = "    def run(self):\n        return 1\n";
        assert_eq!(dedent(method), "def run(self):\n    return 1");
        assert_eq!(leading_indent(method), "    ");
        assert_eq!(dedent("x = 1"), "x = 1");
    }
}
