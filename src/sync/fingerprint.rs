use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use crate::error::Result;
use crate::graph::models::{content_hash, Fingerprint};

/// Outcome of comparing the working tree against stored fingerprints.
#[derive(Debug, Default)]
pub struct FileDiff {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    /// Files whose mtime or size moved but whose content did not
    pub touched: Vec<Fingerprint>,
}

impl FileDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Added and modified files, in path order.
    pub fn changed(&self) -> Vec<String> {
        let mut changed: Vec<String> = self.added.iter().chain(&self.modified).cloned().collect();
        changed.sort();
        changed
    }
}

fn stat(path: &Path) -> Result<(i64, u64)> {
    let meta = fs::metadata(path)?;
    let mtime_ns = meta
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default();
    Ok((mtime_ns, meta.len()))
}

/// Reads a file and fingerprints the exact bytes that were read.
pub fn read_source(root: &Path, rel: &str) -> Result<(String, Fingerprint)> {
    let path = root.join(rel);
    let (mtime_ns, size) = stat(&path)?;
    let bytes = fs::read(&path)?;
    let source = String::from_utf8_lossy(&bytes).into_owned();
    let fingerprint = Fingerprint {
        path: rel.to_string(),
        mtime_ns,
        size,
        content_hash: content_hash(&source),
    };
    Ok((source, fingerprint))
}

/// Classifies `current` files against `stored` fingerprints.
///
/// A changed mtime or size only makes a file a candidate; it counts as modified when
/// its content hash differs too.
pub fn diff(root: &Path, current: &[String], stored: &HashMap<String, Fingerprint>) -> FileDiff {
    let mut out = FileDiff::default();

    for rel in current {
        let Some(previous) = stored.get(rel) else {
            out.added.push(rel.clone());
            continue;
        };
        let Ok((mtime_ns, size)) = stat(&root.join(rel)) else {
            out.modified.push(rel.clone());
            continue;
        };
        if mtime_ns == previous.mtime_ns && size == previous.size {
            continue;
        }
        match read_source(root, rel) {
            Ok((_, fingerprint)) if fingerprint.content_hash == previous.content_hash => {
                out.touched.push(fingerprint);
            }
            _ => out.modified.push(rel.clone()),
        }
    }

    let present: HashSet<&str> = current.iter().map(String::as_str).collect();
    out.deleted = stored
        .keys()
        .filter(|path| !present.contains(path.as_str()))
        .cloned()
        .collect();
    out.deleted.sort();
    out
}
