use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;

use codelens::graph::{Direction, SearchField};
use codelens::impact::{self, detect_entry_points};
use codelens::{OpResponse, ProjectContext};

#[derive(Parser)]
#[command(name = "codelens")]
#[command(about = "Structural code graph with safe, validated node edits")]
#[command(version)]
#[command(after_long_help = r#"
EXAMPLES:
    # Build the graph for the current directory
    codelens init

    # Pick up working-tree changes
    codelens sync

    # Who breaks if utils.helper changes?
    codelens impact utils.helper --depth 3

    # Replace a function with the contents of a file
    codelens update utils.helper --file new_helper.py --reason "handle empty input"

    # Machine-readable output
    codelens --json search helper
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Project root
    #[arg(long, global = true, default_value = ".")]
    pub root: PathBuf,

    /// Print responses as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create .lens/ and build the graph from scratch
    Init {
        /// Reset the config and drop the stored graph first
        #[arg(long)]
        force: bool,
    },

    /// Bring the graph up to date with the working tree
    Sync {
        /// Rebuild everything instead of diffing fingerprints
        #[arg(long)]
        full: bool,
    },

    /// Show whether the graph is initialized and current
    Status,

    /// Show one node with its edges
    Node {
        /// Node id, e.g. `app.models.User.save`
        id: String,

        /// Include the node's source code
        #[arg(long)]
        source: bool,
    },

    /// Search nodes by name, code or docstring
    Search {
        query: String,

        /// Field to search: name, code, docstring, all
        #[arg(short, long, default_value = "name")]
        field: String,

        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Everything that may break when a node changes
    Impact {
        id: String,

        #[arg(short, long, default_value = "3")]
        depth: usize,
    },

    /// Functions, methods and classes unreachable from any entry point
    DeadCode {
        /// Entry point ids (auto-detected when omitted)
        #[arg(short, long)]
        entry: Vec<String>,
    },

    /// Replace a node's source (read from --file or stdin)
    Update {
        id: String,

        /// File holding the new source; stdin when omitted
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Why the change is made, stored in history
        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Show recorded changes
    History {
        /// Only changes to this node
        #[arg(short, long)]
        node: Option<String>,

        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Session notes
    Notes {
        #[command(subcommand)]
        command: NotesCommands,
    },

    /// Circular imports between modules
    Cycles,

    /// Shortest dependency path between two nodes
    Path { from: String, to: String },

    /// Node and edge counts
    Stats,
}

#[derive(Subcommand)]
pub enum NotesCommands {
    List,
    Get { key: String },
    Set { key: String, value: String },
    Delete { key: String },
}

fn open(root: &Path) -> anyhow::Result<ProjectContext> {
    Ok(ProjectContext::open(root)?)
}

fn print_json(response: OpResponse) {
    println!("{}", response.to_json());
}

fn emit<T: Serialize>(json: bool, value: &T) -> bool {
    if json {
        print_json(OpResponse::ok(value));
    }
    json
}

pub fn init(root: &Path, force: bool, json: bool) -> anyhow::Result<()> {
    let (ctx, result) = ProjectContext::init(root, force)?;
    if emit(json, &result) {
        return Ok(());
    }
    println!("Initialized {}", ctx.root().display());
    println!("  Files parsed: {}", result.files_parsed);
    println!("  Nodes: {}", result.added.len());
    for warning in &result.warnings {
        println!("  Warning: {}", warning);
    }
    Ok(())
}

pub fn sync(root: &Path, full: bool, json: bool) -> anyhow::Result<()> {
    let ctx = open(root)?;
    let result = if full {
        ctx.sync().full_sync()?
    } else {
        ctx.sync().ensure_synced()?
    };
    if emit(json, &result) {
        return Ok(());
    }
    if result.is_empty() {
        println!("Graph is up to date");
        return Ok(());
    }
    println!(
        "Synced {} files: {} added, {} modified, {} deleted",
        result.files_parsed,
        result.added.len(),
        result.modified.len(),
        result.deleted.len()
    );
    for warning in &result.warnings {
        println!("  Warning: {}", warning);
    }
    Ok(())
}

#[derive(Serialize)]
struct Status {
    root: PathBuf,
    initialized: bool,
    stale: bool,
    nodes: usize,
    edges: usize,
    files: usize,
}

pub fn status(root: &Path, json: bool) -> anyhow::Result<()> {
    let ctx = match ProjectContext::open(root) {
        Ok(ctx) => ctx,
        Err(codelens::LensError::NotInitialized(path)) => {
            let status = Status {
                root: path,
                initialized: false,
                stale: false,
                nodes: 0,
                edges: 0,
                files: 0,
            };
            if !emit(json, &status) {
                println!("Not initialized (run `codelens init`)");
            }
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    let stats = ctx.store().stats()?;
    let status = Status {
        root: ctx.root().to_path_buf(),
        initialized: true,
        stale: ctx.sync().is_stale(),
        nodes: stats.total_nodes,
        edges: stats.total_edges,
        files: stats.files,
    };
    if emit(json, &status) {
        return Ok(());
    }
    println!("Project: {}", status.root.display());
    println!("  Nodes: {}  Edges: {}  Files: {}", status.nodes, status.edges, status.files);
    if status.stale {
        println!("  Graph was built by an older parser; next sync rebuilds it");
    }
    Ok(())
}

pub fn show_node(root: &Path, id: &str, source: bool, json: bool) -> anyhow::Result<()> {
    let ctx = open(root)?;
    ctx.sync().ensure_synced()?;
    let node = ctx
        .store()
        .get_node(id)?
        .ok_or_else(|| codelens::LensError::NodeNotFound(id.to_string()))?;
    let edges = ctx.store().get_edges(id, Direction::Both)?;
    if json {
        print_json(OpResponse::ok(serde_json::json!({ "node": node, "edges": edges })));
        return Ok(());
    }

    println!("{} ({})", node.id, node.kind.as_str());
    println!("  Location: {}:{}-{}", node.file_path, node.start_line, node.end_line);
    if let Some(sig) = &node.signature {
        println!("  Signature: {}", sig);
    }
    if let Some(doc) = &node.docstring {
        println!("  Docstring: {}", doc.lines().next().unwrap_or_default());
    }
    for edge in &edges {
        let arrow = if edge.from_node == node.id {
            format!("-> {}", edge.to_node)
        } else {
            format!("<- {}", edge.from_node)
        };
        println!("  {} {} [{}]", edge.kind.as_str(), arrow, edge.confidence.as_str());
    }
    if source {
        println!("\n{}", node.source_code);
    }
    Ok(())
}

pub fn search(root: &Path, query: &str, field: &str, limit: usize, json: bool) -> anyhow::Result<()> {
    let ctx = open(root)?;
    ctx.sync().ensure_synced()?;
    let field = SearchField::from_str(field)
        .with_context(|| format!("unknown search field `{}` (name, code, docstring, all)", field))?;
    let nodes = ctx.store().search(query, field, limit)?;
    if json {
        let summary: Vec<_> = nodes
            .iter()
            .map(|n| serde_json::json!({ "id": n.id, "kind": n.kind.as_str(), "file": n.file_path, "line": n.start_line }))
            .collect();
        print_json(OpResponse::ok(summary));
        return Ok(());
    }
    if nodes.is_empty() {
        println!("No nodes match: {}", query);
        return Ok(());
    }
    for node in nodes {
        println!("{} ({}) - {}:{}", node.id, node.kind.as_str(), node.file_path, node.start_line);
    }
    Ok(())
}

pub fn impact(root: &Path, id: &str, depth: usize, json: bool) -> anyhow::Result<()> {
    let ctx = open(root)?;
    let graph = ctx.graph()?;
    let zone = impact::impact_zone(&graph, id, depth)?;
    if json {
        print_json(OpResponse::ok(&zone).with_affected(zone.affected()));
        return Ok(());
    }
    println!("Impact of {} ({}, {} affected)", id, zone.severity.as_str(), zone.total_affected);
    for (hop, level) in zone.levels.iter().enumerate() {
        println!("  Hop {}:", hop + 1);
        for node in level {
            println!("    {}", node);
        }
    }
    if !zone.inheritors.is_empty() {
        println!("  Inheritors: {}", zone.inheritors.join(", "));
    }
    for untracked in &zone.untracked {
        println!(
            "  Untracked: {} in {} ({})",
            untracked.name,
            untracked.from_node,
            untracked.reason.as_deref().unwrap_or("unresolved")
        );
    }
    Ok(())
}

pub fn dead_code(root: &Path, entry: Vec<String>, json: bool) -> anyhow::Result<()> {
    let ctx = open(root)?;
    let graph = ctx.graph()?;
    let entries = if entry.is_empty() {
        detect_entry_points(&graph).into_iter().map(|e| e.node_id).collect()
    } else {
        entry
    };
    let dead = impact::dead_code(&graph, &entries);
    if emit(json, &dead) {
        return Ok(());
    }
    println!("{} unreachable nodes ({} entry points)", dead.len(), entries.len());
    for id in dead {
        println!("  {}", id);
    }
    Ok(())
}

pub fn update(root: &Path, id: &str, file: Option<&Path>, reason: Option<String>, json: bool) -> anyhow::Result<()> {
    let new_source = match file {
        Some(path) => fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let ctx = open(root)?;
    let outcome = ctx.mutation().update_node(id, &new_source, reason)?;
    if json {
        print_json(outcome.into());
        return Ok(());
    }
    println!("Updated {} ({})", outcome.node_id, outcome.severity.as_str());
    for warning in &outcome.warnings {
        println!("  Warning: {}", warning);
    }
    if !outcome.affected.is_empty() {
        println!("  Review: {}", outcome.affected.join(", "));
    }
    Ok(())
}

pub fn history(root: &Path, node: Option<&str>, limit: usize, json: bool) -> anyhow::Result<()> {
    let ctx = open(root)?;
    let changes = ctx.history().list(node, limit)?;
    if emit(json, &changes) {
        return Ok(());
    }
    if changes.is_empty() {
        println!("No recorded changes");
        return Ok(());
    }
    for change in changes {
        println!(
            "{} {} {} - {}",
            change.timestamp.format("%Y-%m-%d %H:%M:%S"),
            change.action.as_str(),
            change.node_id,
            change.description
        );
        if let Some(reasoning) = &change.reasoning {
            println!("  Reason: {}", reasoning);
        }
    }
    Ok(())
}

pub fn notes_list(root: &Path, json: bool) -> anyhow::Result<()> {
    let ctx = open(root)?;
    let notes = ctx.notes().list()?;
    if emit(json, &notes) {
        return Ok(());
    }
    for note in notes {
        println!("{} = {}", note.key, note.value);
    }
    Ok(())
}

pub fn notes_get(root: &Path, key: &str, json: bool) -> anyhow::Result<()> {
    let ctx = open(root)?;
    let value = ctx.notes().get(key)?;
    if emit(json, &value) {
        return Ok(());
    }
    match value {
        Some(value) => println!("{}", value),
        None => println!("No note named {}", key),
    }
    Ok(())
}

pub fn notes_set(root: &Path, key: &str, value: &str, json: bool) -> anyhow::Result<()> {
    let ctx = open(root)?;
    ctx.notes().set(key, value)?;
    if !emit(json, &key) {
        println!("Saved {}", key);
    }
    Ok(())
}

pub fn notes_delete(root: &Path, key: &str, json: bool) -> anyhow::Result<()> {
    let ctx = open(root)?;
    let removed = ctx.notes().delete(key)?;
    if !emit(json, &removed) {
        println!("{}", if removed { "Deleted" } else { "No such note" });
    }
    Ok(())
}

pub fn cycles(root: &Path, json: bool) -> anyhow::Result<()> {
    let ctx = open(root)?;
    let graph = ctx.graph()?;
    let cycles = impact::circular_imports(&graph);
    if emit(json, &cycles) {
        return Ok(());
    }
    if cycles.is_empty() {
        println!("No circular imports");
    }
    for cycle in cycles {
        println!("{} -> {}", cycle.join(" -> "), cycle[0]);
    }
    Ok(())
}

pub fn path(root: &Path, from: &str, to: &str, json: bool) -> anyhow::Result<()> {
    let ctx = open(root)?;
    let graph = ctx.graph()?;
    let path = impact::find_path(&graph, from, to)?;
    if emit(json, &path) {
        return Ok(());
    }
    if path.is_empty() {
        println!("No path from {} to {}", from, to);
    } else {
        println!("{}", path.join(" -> "));
    }
    Ok(())
}

pub fn stats(root: &Path, json: bool) -> anyhow::Result<()> {
    let ctx = open(root)?;
    ctx.sync().ensure_synced()?;
    let stats = ctx.store().stats()?;
    if emit(json, &stats) {
        return Ok(());
    }
    println!("Graph Statistics:");
    println!("  Files: {}", stats.files);
    println!("  Nodes: {}", stats.total_nodes);
    println!("  Edges: {}", stats.total_edges);
    println!("  Revision: {}", stats.revision);

    if !stats.nodes_by_kind.is_empty() {
        println!("\n  Nodes by kind:");
        for (kind, count) in &stats.nodes_by_kind {
            println!("    {}: {}", kind, count);
        }
    }
    if !stats.edges_by_confidence.is_empty() {
        println!("\n  Edges by confidence:");
        for (confidence, count) in &stats.edges_by_confidence {
            println!("    {}: {}", confidence, count);
        }
    }
    let resolver = ctx.sync().resolver_stats();
    println!("\n  Resolver cache: {} entries", resolver.cached_entries);
    Ok(())
}
