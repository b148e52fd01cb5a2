use std::collections::{HashMap, HashSet};

use crate::graph::models::{Edge, EdgeKind, Node, NodeKind, NodeMetrics};

/// Computes derived metrics for every node.
///
/// Fan-in/out count distinct neighbours over all edge kinds except `contains`.
/// Classes also get method counts, the number of other classes their methods call
/// into, and calls between their own methods.
pub fn compute_metrics(nodes: &[Node], edges: &[Edge]) -> HashMap<String, NodeMetrics> {
    let by_id: HashMap<&str, &Node> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    let mut fan_out: HashMap<&str, HashSet<&str>> = HashMap::new();
    let mut fan_in: HashMap<&str, HashSet<&str>> = HashMap::new();

    for edge in edges.iter().filter(|e| e.kind != EdgeKind::Contains) {
        fan_out
            .entry(edge.from_node.as_str())
            .or_default()
            .insert(edge.to_node.as_str());
        fan_in
            .entry(edge.to_node.as_str())
            .or_default()
            .insert(edge.from_node.as_str());
    }

    let mut methods_by_class: HashMap<&str, Vec<&Node>> = HashMap::new();
    for node in nodes.iter().filter(|n| n.kind == NodeKind::Method) {
        if let Some(parent) = node.parent_id() {
            if by_id.get(parent).is_some_and(|p| p.kind == NodeKind::Class) {
                methods_by_class.entry(parent).or_default().push(node);
            }
        }
    }

    let mut result = HashMap::with_capacity(nodes.len());
    for node in nodes {
        let mut metrics = NodeMetrics {
            lines: node.line_count(),
            fan_in: fan_in.get(node.id.as_str()).map_or(0, |s| s.len()),
            fan_out: fan_out.get(node.id.as_str()).map_or(0, |s| s.len()),
            ..Default::default()
        };

        if node.kind == NodeKind::Class {
            let methods = methods_by_class
                .get(node.id.as_str())
                .map(|m| m.as_slice())
                .unwrap_or(&[]);
            let method_ids: HashSet<&str> = methods.iter().map(|m| m.id.as_str()).collect();

            let mut dependencies: HashSet<&str> = HashSet::new();
            let mut internal_calls = 0;
            for method in methods {
                for target in fan_out.get(method.id.as_str()).into_iter().flatten() {
                    if method_ids.contains(target) {
                        internal_calls += 1;
                        continue;
                    }
                    let Some(target_node) = by_id.get(target) else {
                        continue;
                    };
                    if target_node.kind == NodeKind::Method {
                        if let Some(owner) = target_node.parent_id() {
                            if owner != node.id {
                                dependencies.insert(owner);
                            }
                        }
                    }
                }
            }

            metrics.method_count = Some(methods.len());
            metrics.public_methods = Some(methods.iter().filter(|m| !m.name.starts_with('_')).count());
            metrics.dependency_count = Some(dependencies.len());
            metrics.internal_calls = Some(internal_calls);
        }

        result.insert(node.id.clone(), metrics);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::models::Confidence;

    #[test]
    fn test_class_metrics() {
        let nodes = vec![
            Node::new("m.A", NodeKind::Class, "A", "m.py", 1, 10, ""),
            Node::new("m.A.run", NodeKind::Method, "run", "m.py", 2, 4, ""),
            Node::new("m.A._step", NodeKind::Method, "_step", "m.py", 5, 6, ""),
            Node::new("m.B", NodeKind::Class, "B", "m.py", 11, 14, ""),
            Node::new("m.B.go", NodeKind::Method, "go", "m.py", 12, 13, ""),
        ];
        let edges = vec![
            Edge::new("m.py", "m.A.run", "m.A._step", EdgeKind::Calls, Confidence::Resolved),
            Edge::new("m.py", "m.A.run", "m.B.go", EdgeKind::Calls, Confidence::Resolved),
            Edge::new("m.py", "m.A.run", "print", EdgeKind::Calls, Confidence::External),
        ];

        let metrics = compute_metrics(&nodes, &edges);
        let a = &metrics["m.A"];
        assert_eq!(a.lines, 10);
        assert_eq!(a.method_count, Some(2));
        assert_eq!(a.public_methods, Some(1));
        assert_eq!(a.dependency_count, Some(1));
        assert_eq!(a.internal_calls, Some(1));

        assert_eq!(metrics["m.A.run"].fan_out, 3);
        assert_eq!(metrics["m.B.go"].fan_in, 1);
        assert_eq!(metrics["m.B.go"].method_count, None);
    }

    #[test]
    fn test_contains_edges_ignored() {
        let nodes = vec![
            Node::new("m.outer", NodeKind::Function, "outer", "m.py", 1, 4, ""),
            Node::new("m.outer.inner", NodeKind::Function, "inner", "m.py", 2, 3, ""),
        ];
        let edges = vec![Edge::new(
            "m.py",
            "m.outer",
            "m.outer.inner",
            EdgeKind::Contains,
            Confidence::Resolved,
        )];
        let metrics = compute_metrics(&nodes, &edges);
        assert_eq!(metrics["m.outer"].fan_out, 0);
        assert_eq!(metrics["m.outer.inner"].fan_in, 0);
    }
}
