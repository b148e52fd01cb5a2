//! Read-only graph algorithms over a [`GraphProjection`].

pub mod entry_points;

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::{LensError, Result};
use crate::graph::models::{Confidence, EdgeKind, NodeKind};
use crate::graph::GraphProjection;

pub use entry_points::{detect_entry_points, EntryPoint, EntryType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Any inheritor is critical; otherwise banded by the number of affected nodes.
    pub fn classify(total_affected: usize, has_inheritors: bool) -> Self {
        if has_inheritors || total_affected > 20 {
            Severity::Critical
        } else if total_affected > 10 {
            Severity::High
        } else if total_affected > 5 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

/// Reference into the node that static resolution could not confirm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UntrackedRef {
    pub from_node: String,
    pub name: String,
    pub reason: Option<String>,
    pub file: String,
    pub line: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactZone {
    pub node_id: String,
    pub depth: usize,
    /// `levels[k]` holds ancestors first reached at hop `k + 1`
    pub levels: Vec<Vec<String>>,
    pub direct_callers: Vec<String>,
    pub inheritors: Vec<String>,
    pub untracked: Vec<UntrackedRef>,
    pub total_affected: usize,
    pub severity: Severity,
}

impl ImpactZone {
    /// Every affected node, nearest first.
    pub fn affected(&self) -> Vec<String> {
        self.levels.iter().flatten().cloned().collect()
    }
}

/// Everything that may break when `node_id` changes, up to `depth` hops away.
pub fn impact_zone(graph: &GraphProjection, node_id: &str, depth: usize) -> Result<ImpactZone> {
    let node = graph
        .node(node_id)
        .ok_or_else(|| LensError::NodeNotFound(node_id.to_string()))?;

    let mut inheritors: BTreeSet<String> = BTreeSet::new();
    let mut untracked = Vec::new();
    for edge in graph.edges_to(node_id) {
        if edge.kind == EdgeKind::Inherits {
            inheritors.insert(edge.from_node.clone());
        }
    }
    // Unresolved references carry the raw name, so match them by their last segment
    for edge in graph.edges() {
        let named_here = edge.to_node == node_id
            || edge.to_node.rsplit('.').next() == Some(node.name.as_str());
        if edge.confidence == Confidence::Unresolved && named_here && edge.from_node != node_id {
            untracked.push(UntrackedRef {
                from_node: edge.from_node.clone(),
                name: edge.to_node.clone(),
                reason: edge.untracked_reason.clone(),
                file: edge.origin_file.clone(),
                line: edge.line,
            });
        }
    }

    let mut seen: HashSet<&str> = HashSet::from([node_id]);
    let mut frontier: Vec<&str> = vec![node_id];
    let mut levels: Vec<Vec<String>> = Vec::new();
    for _ in 0..depth {
        let mut next: BTreeSet<&str> = BTreeSet::new();
        for current in &frontier {
            for edge in graph.edges_to(current) {
                if seen.insert(edge.from_node.as_str()) {
                    next.insert(edge.from_node.as_str());
                }
            }
        }
        if next.is_empty() {
            break;
        }
        levels.push(next.iter().map(|s| s.to_string()).collect());
        frontier = next.into_iter().collect();
    }

    let direct_callers = levels
        .first()
        .map(|first| {
            first
                .iter()
                .filter(|id| !inheritors.contains(*id))
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    let total_affected = seen.len() - 1;

    Ok(ImpactZone {
        node_id: node_id.to_string(),
        depth,
        levels,
        direct_callers,
        severity: Severity::classify(total_affected, !inheritors.is_empty()),
        inheritors: inheritors.into_iter().collect(),
        untracked,
        total_affected,
    })
}

/// Function, method and class nodes unreachable from `entry_points`, sorted.
///
/// Reaching a class also reaches its methods; dispatch through instances is rarely
/// visible as a resolved edge.
pub fn dead_code(graph: &GraphProjection, entry_points: &[String]) -> Vec<String> {
    let mut methods_of: HashMap<&str, Vec<&str>> = HashMap::new();
    for node in graph.nodes_of_kind(NodeKind::Method) {
        if let Some(parent) = node.parent_id() {
            methods_of.entry(parent).or_default().push(node.id.as_str());
        }
    }

    let mut reached: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    for entry in entry_points {
        if let Some(node) = graph.node(entry) {
            if reached.insert(node.id.as_str()) {
                queue.push_back(node.id.as_str());
            }
        }
    }

    while let Some(current) = queue.pop_front() {
        let structural = methods_of.get(current).into_iter().flatten().copied();
        let followed = graph.edges_from(current).map(|e| e.to_node.as_str());
        for next in followed.chain(structural) {
            if graph.contains(next) && reached.insert(next) {
                queue.push_back(next);
            }
        }
    }

    let mut dead: Vec<String> = graph
        .nodes()
        .iter()
        .filter(|n| matches!(n.kind, NodeKind::Function | NodeKind::Method | NodeKind::Class))
        .filter(|n| !reached.contains(n.id.as_str()))
        .map(|n| n.id.clone())
        .collect();
    dead.sort();
    dead
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyNode {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge_kind: Option<EdgeKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    pub dependencies: Vec<DependencyNode>,
    /// Expansion stopped here because of the depth limit
    pub truncated: bool,
}

/// What `node_id` depends on, following outgoing edges up to `depth` levels.
pub fn dependency_tree(graph: &GraphProjection, node_id: &str, depth: usize) -> Result<DependencyNode> {
    if !graph.contains(node_id) {
        return Err(LensError::NodeNotFound(node_id.to_string()));
    }
    let mut visited = HashSet::new();
    Ok(expand(graph, node_id, None, None, depth, &mut visited))
}

fn expand(
    graph: &GraphProjection,
    id: &str,
    edge_kind: Option<EdgeKind>,
    confidence: Option<Confidence>,
    depth: usize,
    visited: &mut HashSet<String>,
) -> DependencyNode {
    let mut node = DependencyNode {
        id: id.to_string(),
        edge_kind,
        confidence,
        dependencies: Vec::new(),
        truncated: false,
    };
    if depth == 0 {
        node.truncated = graph.edges_from(id).next().is_some();
        return node;
    }
    if !visited.insert(id.to_string()) {
        return node;
    }
    let mut targets: Vec<_> = graph
        .edges_from(id)
        .filter(|e| e.kind != EdgeKind::Contains)
        .map(|e| (e.to_node.as_str(), e.kind, e.confidence))
        .collect();
    targets.sort_by(|a, b| a.0.cmp(b.0));
    targets.dedup_by(|a, b| a.0 == b.0 && a.1 == b.1);
    for (target, kind, confidence) in targets {
        node.dependencies
            .push(expand(graph, target, Some(kind), Some(confidence), depth - 1, visited));
    }
    node
}

/// Shortest path from `from` to `to` along outgoing edges. Empty when unreachable.
pub fn find_path(graph: &GraphProjection, from: &str, to: &str) -> Result<Vec<String>> {
    for id in [from, to] {
        if !graph.contains(id) {
            return Err(LensError::NodeNotFound(id.to_string()));
        }
    }
    if from == to {
        return Ok(vec![from.to_string()]);
    }

    let mut parent: HashMap<&str, &str> = HashMap::new();
    let mut queue: VecDeque<&str> = VecDeque::from([from]);
    while let Some(current) = queue.pop_front() {
        let mut next: Vec<&str> = graph.edges_from(current).map(|e| e.to_node.as_str()).collect();
        next.sort_unstable();
        for target in next {
            if target == from || parent.contains_key(target) {
                continue;
            }
            parent.insert(target, current);
            if target == to {
                let mut path = vec![to.to_string()];
                let mut cursor = to;
                while let Some(&prev) = parent.get(cursor) {
                    path.push(prev.to_string());
                    cursor = prev;
                }
                path.reverse();
                return Ok(path);
            }
            queue.push_back(target);
        }
    }
    Ok(Vec::new())
}

/// Cycles between modules through resolved import edges, each rotated to start at its
/// smallest module id.
pub fn circular_imports(graph: &GraphProjection) -> Vec<Vec<String>> {
    // Collapse symbol-level imports onto the modules that own both ends
    let module_of = |id: &str| -> Option<String> {
        let node = graph.node(id)?;
        graph.module_for_file(&node.file_path).map(|m| m.id.clone())
    };
    let mut adjacency: HashMap<String, BTreeSet<String>> = HashMap::new();
    for edge in graph.edges_of_kind(EdgeKind::Imports) {
        if edge.confidence != Confidence::Resolved {
            continue;
        }
        let (Some(from), Some(to)) = (module_of(&edge.from_node), module_of(&edge.to_node)) else {
            continue;
        };
        if from != to {
            adjacency.entry(from).or_default().insert(to);
        }
    }

    let mut modules: Vec<&String> = adjacency.keys().collect();
    modules.sort();

    let mut cycles: BTreeSet<Vec<String>> = BTreeSet::new();
    let mut state: HashMap<String, u8> = HashMap::new();
    let mut stack: Vec<String> = Vec::new();
    for start in modules {
        if !state.contains_key(start.as_str()) {
            visit(start, &adjacency, &mut state, &mut stack, &mut cycles);
        }
    }
    cycles.into_iter().collect()
}

const VISITING: u8 = 1;
const DONE: u8 = 2;

fn visit(
    module: &str,
    adjacency: &HashMap<String, BTreeSet<String>>,
    state: &mut HashMap<String, u8>,
    stack: &mut Vec<String>,
    cycles: &mut BTreeSet<Vec<String>>,
) {
    state.insert(module.to_string(), VISITING);
    stack.push(module.to_string());

    for next in adjacency.get(module).into_iter().flatten() {
        match state.get(next.as_str()).copied() {
            Some(VISITING) => {
                if let Some(pos) = stack.iter().position(|m| m == next) {
                    cycles.insert(canonical_cycle(&stack[pos..]));
                }
            }
            Some(_) => {}
            None => visit(next, adjacency, state, stack, cycles),
        }
    }

    stack.pop();
    state.insert(module.to_string(), DONE);
}

fn canonical_cycle(cycle: &[String]) -> Vec<String> {
    let min = cycle
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    cycle[min..].iter().chain(&cycle[..min]).cloned().collect()
}
