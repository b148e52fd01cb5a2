use std::path::Path;

use ignore::WalkBuilder;

use super::ParserRegistry;
use crate::config::DEFAULT_SKIP_DIRS;
use crate::error::Result;

/// Enumerates parseable project files as sorted, `/`-separated relative paths.
pub struct FileWalker {
    extensions: Vec<String>,
    excludes: Vec<glob::Pattern>,
}

impl FileWalker {
    pub fn new(registry: &ParserRegistry, exclude: &[String]) -> Self {
        let excludes = exclude
            .iter()
            .filter_map(|pattern| match glob::Pattern::new(pattern) {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::warn!("Ignoring invalid exclude pattern {}: {}", pattern, e);
                    None
                }
            })
            .collect();
        Self {
            extensions: registry.extensions().into_iter().map(String::from).collect(),
            excludes,
        }
    }

    pub fn walk(&self, root: &Path) -> Result<Vec<String>> {
        let mut files = Vec::new();

        let walker = WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .ignore(true)
            .filter_entry(|entry| {
                let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
                !(is_dir && entry.depth() > 0 && is_skipped_dir(&entry.file_name().to_string_lossy()))
            })
            .build();

        for entry in walker.flatten() {
            let path = entry.path();
            if !path.is_file() || !self.is_supported(path) {
                continue;
            }
            let Some(rel) = relative_path(root, path) else {
                continue;
            };
            if self.is_excluded(&rel) {
                tracing::debug!("Excluded {}", rel);
                continue;
            }
            files.push(rel);
        }

        files.sort();
        Ok(files)
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|e| e == ext))
    }

    pub fn is_excluded(&self, rel_path: &str) -> bool {
        self.excludes.iter().any(|p| p.matches(rel_path))
    }
}

/// Skip list plus virtualenv-style names (`proj-venv`, `py_env`, ...).
fn is_skipped_dir(name: &str) -> bool {
    DEFAULT_SKIP_DIRS.contains(&name)
        || ["-env", "-venv", "_env", "_venv"]
            .iter()
            .any(|suffix| name.ends_with(suffix))
}

/// Project-relative path with `/` separators.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}
