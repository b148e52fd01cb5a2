//! Project configuration stored in `.lens/config.json`.
//!
//! Every field has a default, so a config written by an older build (or by hand with only
//! a few keys) still loads. The `version` stamp records which parser version produced the
//! stored graph; a mismatch forces a full rebuild.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LensError, Result};

/// Bumped whenever parser output changes shape.
pub const PARSER_VERSION: &str = "2";

pub const LENS_DIR: &str = ".lens";

/// Directory names never descended into, wherever they appear.
pub const DEFAULT_SKIP_DIRS: &[&str] = &[
    "__pycache__",
    ".git",
    ".lens",
    ".venv",
    "venv",
    "env",
    "node_modules",
    ".mypy_cache",
    ".pytest_cache",
    ".ruff_cache",
    "dist",
    "build",
    ".eggs",
    ".tox",
    "site-packages",
    ".next",
    ".nuxt",
    "coverage",
];

/// Locations of every persisted artifact of one project.
#[derive(Debug, Clone)]
pub struct LensPaths {
    pub root: PathBuf,
    pub dir: PathBuf,
    pub graph_db: PathBuf,
    pub history_db: PathBuf,
    pub session_db: PathBuf,
    pub config: PathBuf,
}

impl LensPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let dir = root.join(LENS_DIR);
        Self {
            graph_db: dir.join("graph.db"),
            history_db: dir.join("history.db"),
            session_db: dir.join("session.db"),
            config: dir.join("config.json"),
            dir,
            root,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.config.is_file()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub version: String,
    /// Glob patterns (relative to the root) excluded from parsing
    pub exclude: Vec<String>,
    pub python: PythonConfig,
    pub typescript: TypeScriptConfig,
    pub semantic: Option<SemanticConfig>,
    pub tests: TestConfig,
    pub guards: GuardConfig,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            version: PARSER_VERSION.to_string(),
            exclude: Vec::new(),
            python: PythonConfig::default(),
            typescript: TypeScriptConfig::default(),
            semantic: None,
            tests: TestConfig::default(),
            guards: GuardConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PythonConfig {
    /// Extra directories absolute imports are resolved against (e.g. "src")
    pub source_roots: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeScriptConfig {
    pub base_url: Option<String>,
    /// Ordered alias rules; the first matching prefix wins
    pub paths: Vec<PathAlias>,
    /// Bare specifiers always treated as third-party
    pub external_packages: Vec<String>,
    /// Read `baseUrl`/`paths` from tsconfig.json or jsconfig.json when present
    pub read_tsconfig: bool,
}

impl Default for TypeScriptConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            paths: Vec::new(),
            external_packages: Vec::new(),
            read_tsconfig: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathAlias {
    /// Pattern such as `@/*` or `~lib`
    pub pattern: String,
    /// Replacements such as `src/*`, tried in order
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticConfig {
    /// Program and arguments of the analyzer subprocess
    pub command: Vec<String>,
    pub language: String,
    pub timeout_ms: u64,
    pub batch_size: usize,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            language: "python".to_string(),
            timeout_ms: 10_000,
            batch_size: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "pytest".to_string(),
                "-q".to_string(),
                "--tb=no".to_string(),
                "-rf".to_string(),
            ],
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Containers with more source characters than this cannot be replaced whole
    pub large_container_chars: usize,
    /// Truncation guard applies only to nodes longer than this many lines
    pub truncation_min_lines: usize,
    /// Minimum ratio of new to old line count for a non-trivial node
    pub truncation_ratio: f64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            large_container_chars: 10_000,
            truncation_min_lines: 20,
            truncation_ratio: 0.3,
        }
    }
}

impl ProjectConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn is_current(&self) -> bool {
        self.version == PARSER_VERSION
    }

    /// Merges `baseUrl`/`paths` from the project's tsconfig.json (or jsconfig.json).
    ///
    /// Explicit settings in this config take precedence; aliases from the file are
    /// appended after configured ones, preserving their declaration order.
    pub fn with_tsconfig(mut self, root: &Path) -> Result<Self> {
        if !self.typescript.read_tsconfig {
            return Ok(self);
        }
        let Some(path) = ["tsconfig.json", "jsconfig.json"]
            .iter()
            .map(|name| root.join(name))
            .find(|p| p.is_file())
        else {
            return Ok(self);
        };

        let raw = fs::read_to_string(&path)?;
        let value: serde_json::Value = serde_json::from_str(&strip_json_comments(&raw))
            .map_err(|e| LensError::Parse(format!("{}: {}", path.display(), e)))?;
        let Some(options) = value.get("compilerOptions") else {
            return Ok(self);
        };

        if self.typescript.base_url.is_none() {
            self.typescript.base_url = options
                .get("baseUrl")
                .and_then(|v| v.as_str())
                .map(|s| s.trim_start_matches("./").to_string());
        }
        if let Some(paths) = options.get("paths").and_then(|v| v.as_object()) {
            for (pattern, targets) in paths {
                if self.typescript.paths.iter().any(|a| &a.pattern == pattern) {
                    continue;
                }
                let targets = targets
                    .as_array()
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|t| t.as_str())
                            .map(|t| t.trim_start_matches("./").to_string())
                            .collect()
                    })
                    .unwrap_or_default();
                self.typescript.paths.push(PathAlias {
                    pattern: pattern.clone(),
                    targets,
                });
            }
        }
        Ok(self)
    }
}

/// Removes `//` and `/* */` comments and trailing commas outside of string literals.
pub fn strip_json_comments(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    let mut in_string = false;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if c == '\\' && i + 1 < chars.len() {
                out.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match (c, chars.get(i + 1)) {
            ('"', _) => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            ('/', Some('/')) => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            ('/', Some('*')) => {
                i += 2;
                while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                    i += 1;
                }
                i += 2;
            }
            (',', _) => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
                i += 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}
