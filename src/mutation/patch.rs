//! Line-range patches and the buffer that applies them.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{LensError, Result};
use crate::graph::models::NodeKind;
use crate::parser::tree::{dedent, leading_indent};
use crate::parser::ParserRegistry;

/// Replacement of lines `start_line..=end_line` (1-based) of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub start_line: usize,
    pub end_line: usize,
    pub new_source: String,
    pub node_id: String,
}

impl Patch {
    pub fn new(start_line: usize, end_line: usize, new_source: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            start_line,
            end_line,
            new_source: new_source.into(),
            node_id: node_id.into(),
        }
    }

    /// Net change in the file's line count once applied.
    pub fn line_delta(&self) -> isize {
        let old = self.end_line + 1 - self.start_line;
        self.new_source.lines().count() as isize - old as isize
    }
}

/// Shifts `source` so its first line carries `indent`, keeping relative indentation.
pub fn reindent(source: &str, indent: &str) -> String {
    if leading_indent(source) == indent {
        return source.to_string();
    }
    dedent(source)
        .lines()
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else {
                format!("{}{}", indent, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn chunk_lines(source: &str) -> Vec<String> {
    let mut chunk = source.to_string();
    if !chunk.ends_with('\n') {
        chunk.push('\n');
    }
    chunk.split_inclusive('\n').map(String::from).collect()
}

/// Restores the original file's trailing-newline state.
fn finish(mut lines: Vec<String>, trailing_newline: bool) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut out: String = lines.drain(..).collect();
    if trailing_newline && !out.ends_with('\n') {
        out.push('\n');
    } else if !trailing_newline && out.ends_with('\n') {
        out.pop();
    }
    out
}

/// Applies `patches` bottom-up so earlier ranges keep their line numbers.
///
/// Overlapping ranges are rejected before anything is applied.
pub fn apply_patches(file: &str, content: &str, patches: &[Patch]) -> Result<String> {
    let mut sorted: Vec<&Patch> = patches.iter().collect();
    sorted.sort_by(|a, b| b.start_line.cmp(&a.start_line));

    for pair in sorted.windows(2) {
        let (later, earlier) = (pair[0], pair[1]);
        if earlier.end_line >= later.start_line {
            return Err(LensError::PatchConflict {
                file: file.to_string(),
                first: (earlier.start_line, earlier.end_line),
                second: (later.start_line, later.end_line),
            });
        }
    }

    let mut lines: Vec<String> = content.split_inclusive('\n').map(String::from).collect();
    for patch in sorted {
        if patch.start_line == 0 || patch.start_line > patch.end_line || patch.start_line > lines.len() {
            return Err(LensError::structure(
                format!(
                    "lines {}-{} are outside {} ({} lines)",
                    patch.start_line,
                    patch.end_line,
                    file,
                    lines.len()
                ),
                Some("Sync and retry with the current node id"),
            ));
        }
        let end = patch.end_line.min(lines.len());
        lines.splice(patch.start_line - 1..end, chunk_lines(&patch.new_source));
    }
    Ok(finish(lines, content.ends_with('\n')))
}

/// Inserts `source` after line `after_line` (0 = top), separated by blank lines.
pub fn insert_after(content: &str, after_line: usize, source: &str) -> String {
    let mut lines: Vec<String> = content.split_inclusive('\n').map(String::from).collect();
    let len = lines.len();
    let at = after_line.min(len);
    if let Some(last) = lines.last_mut() {
        if at == len && !last.ends_with('\n') {
            last.push('\n');
        }
    }
    let mut block = vec!["\n".to_string()];
    block.extend(chunk_lines(source));
    if at < lines.len() {
        block.push("\n".to_string());
    }
    lines.splice(at..at, block);
    finish(lines, true)
}

/// Removes lines `start_line..=end_line` (1-based).
pub fn remove_lines(content: &str, start_line: usize, end_line: usize) -> String {
    let mut lines: Vec<String> = content.split_inclusive('\n').map(String::from).collect();
    let start = start_line.saturating_sub(1).min(lines.len());
    let end = end_line.min(lines.len()).max(start);
    lines.drain(start..end);
    finish(lines, content.ends_with('\n'))
}

/// Accumulates patches per file and writes them together.
#[derive(Debug)]
pub struct PatchBuffer {
    root: PathBuf,
    pending: BTreeMap<String, Vec<Patch>>,
}

impl PatchBuffer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            pending: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, file: impl Into<String>, patch: Patch) {
        self.pending.entry(file.into()).or_default().push(patch);
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_files(&self) -> Vec<String> {
        self.pending.keys().cloned().collect()
    }

    pub fn discard(&mut self) {
        self.pending.clear();
    }

    /// Applies every pending patch and writes the results. Returns the written files.
    ///
    /// All files are patched and syntax-checked in memory first; on any failure the
    /// buffer is discarded and nothing is written.
    pub fn flush(&mut self, registry: &ParserRegistry) -> Result<Vec<String>> {
        let pending = std::mem::take(&mut self.pending);
        let mut staged: Vec<(String, String)> = Vec::with_capacity(pending.len());

        for (file, patches) in &pending {
            let path = self.root.join(file);
            let content = fs::read_to_string(&path)?;
            let patched = apply_patches(file, &content, patches)?;

            let parser = registry.require_for_file(file)?;
            if let Err(reason) = parser.check_syntax(&patched, NodeKind::Module) {
                let nodes: Vec<&str> = patches.iter().map(|p| p.node_id.as_str()).collect();
                return Err(LensError::syntax(format!(
                    "{} after patching {} ({})",
                    reason,
                    file,
                    nodes.join(", ")
                )));
            }
            staged.push((file.clone(), patched));
        }

        let mut written = Vec::with_capacity(staged.len());
        for (file, content) in staged {
            write_file(&self.root.join(&file), &content)?;
            tracing::debug!("Patched {}", file);
            written.push(file);
        }
        Ok(written)
    }
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content)?;
    Ok(())
}
