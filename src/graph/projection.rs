use std::collections::HashMap;

use crate::graph::models::{Edge, EdgeKind, Node, NodeKind};

/// Read-only in-memory view of the stored graph.
///
/// Nodes and edges live in flat arenas; adjacency is kept as arena indices keyed by
/// node id, so edges may point at ids that have no node (external or phantom targets).
/// A projection is never mutated after construction: a write produces a new one.
#[derive(Debug, Default)]
pub struct GraphProjection {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    index: HashMap<String, usize>,
    outgoing: HashMap<String, Vec<usize>>,
    incoming: HashMap<String, Vec<usize>>,
}

impl GraphProjection {
    pub fn build(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();

        let mut outgoing: HashMap<String, Vec<usize>> = HashMap::new();
        let mut incoming: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, edge) in edges.iter().enumerate() {
            outgoing.entry(edge.from_node.clone()).or_default().push(i);
            incoming.entry(edge.to_node.clone()).or_default().push(i);
        }

        Self {
            nodes,
            edges,
            index,
            outgoing,
            incoming,
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edges_from(&self, id: &str) -> impl Iterator<Item = &Edge> {
        self.outgoing
            .get(id)
            .into_iter()
            .flatten()
            .map(move |&i| &self.edges[i])
    }

    pub fn edges_to(&self, id: &str) -> impl Iterator<Item = &Edge> {
        self.incoming
            .get(id)
            .into_iter()
            .flatten()
            .map(move |&i| &self.edges[i])
    }

    /// Nodes whose id is directly nested under `id`.
    pub fn children(&self, id: &str) -> Vec<&Node> {
        let prefix = format!("{}.", id);
        self.nodes
            .iter()
            .filter(|n| {
                n.id
                    .strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.contains('.'))
            })
            .collect()
    }

    pub fn nodes_of_kind(&self, kind: NodeKind) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.kind == kind)
    }

    /// Module node owning the given file.
    pub fn module_for_file(&self, file_path: &str) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|n| n.kind == NodeKind::Module && n.file_path == file_path)
    }

    pub fn edges_of_kind(&self, kind: EdgeKind) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::models::Confidence;

    fn sample() -> GraphProjection {
        let nodes = vec![
            Node::new("m", NodeKind::Module, "m", "m.py", 1, 9, ""),
            Node::new("m.C", NodeKind::Class, "C", "m.py", 1, 5, ""),
            Node::new("m.C.run", NodeKind::Method, "run", "m.py", 2, 3, ""),
            Node::new("m.f", NodeKind::Function, "f", "m.py", 7, 8, ""),
        ];
        let edges = vec![
            Edge::new("m.py", "m.f", "m.C.run", EdgeKind::Calls, Confidence::Resolved),
            Edge::new("m.py", "m.f", "json.dumps", EdgeKind::Calls, Confidence::External),
        ];
        GraphProjection::build(nodes, edges)
    }

    #[test]
    fn test_lookup_and_adjacency() {
        let graph = sample();
        assert_eq!(graph.node_count(), 4);
        assert!(graph.contains("m.C.run"));
        assert_eq!(graph.edges_from("m.f").count(), 2);
        assert_eq!(graph.edges_to("m.C.run").count(), 1);
        assert_eq!(graph.edges_to("json.dumps").count(), 1);
        assert!(!graph.contains("json.dumps"));
        assert_eq!(graph.edges_from("missing").count(), 0);
    }

    #[test]
    fn test_children_are_direct_only() {
        let graph = sample();
        let ids: Vec<&str> = graph.children("m").iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["m.C", "m.f"]);
        assert_eq!(graph.children("m.C").len(), 1);
    }

    #[test]
    fn test_module_for_file() {
        let graph = sample();
        assert_eq!(graph.module_for_file("m.py").map(|n| n.id.as_str()), Some("m"));
        assert!(graph.module_for_file("x.py").is_none());
    }
}
