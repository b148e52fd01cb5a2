use std::path::PathBuf;

use thiserror::Error;

/// Which validation level rejected a replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationLevel {
    Syntax,
    Structure,
}

impl ValidationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationLevel::Syntax => "syntax",
            ValidationLevel::Structure => "structure",
        }
    }
}

#[derive(Error, Debug)]
pub enum LensError {
    #[error("Project not initialized at {0} (run init first)")]
    NotInitialized(PathBuf),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Validation failed ({}): {reason}", level.as_str())]
    ValidationFailed {
        level: ValidationLevel,
        reason: String,
        hint: Option<String>,
    },

    #[error("Patch conflict in {file}: lines {}-{} overlap lines {}-{}", first.0, first.1, second.0, second.1)]
    PatchConflict {
        file: String,
        first: (usize, usize),
        second: (usize, usize),
    },

    #[error("Edit rolled back: {reason}")]
    PatchRollback {
        reason: String,
        restored: Vec<String>,
    },

    #[error("Resolution degraded: {0}")]
    ResolutionDegraded(String),

    #[error("Store error: {0}")]
    StoreIo(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Language not supported: {0}")]
    UnsupportedLanguage(String),

    #[error("Test gate error: {0}")]
    TestGate(String),

    #[error("Duplicate node id {id} in {file}")]
    DuplicateNode { id: String, file: String },
}

impl LensError {
    pub fn syntax(reason: impl Into<String>) -> Self {
        LensError::ValidationFailed {
            level: ValidationLevel::Syntax,
            reason: reason.into(),
            hint: None,
        }
    }

    pub fn structure(reason: impl Into<String>, hint: Option<&str>) -> Self {
        LensError::ValidationFailed {
            level: ValidationLevel::Structure,
            reason: reason.into(),
            hint: hint.map(str::to_string),
        }
    }

    /// Clean rejections leave no trace on disk or in the store.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            LensError::ValidationFailed { .. }
                | LensError::PatchConflict { .. }
                | LensError::NodeNotFound(_)
        )
    }

    /// Suggested remedial operation for the caller.
    pub fn hint(&self) -> Option<String> {
        match self {
            LensError::NotInitialized(_) => Some("Run `init` on the project root".into()),
            LensError::NodeNotFound(_) => {
                Some("Use `search` or `list_nodes` to find the correct node id".into())
            }
            LensError::ValidationFailed { hint: Some(h), .. } => Some(h.clone()),
            LensError::ValidationFailed { level, .. } => match level {
                ValidationLevel::Syntax => {
                    Some("Fix the syntax error in the replacement and retry".into())
                }
                ValidationLevel::Structure => {
                    Some("Keep the same construct kind, or delete and add the node".into())
                }
            },
            LensError::PatchConflict { .. } => {
                Some("Submit edits to overlapping nodes separately".into())
            }
            LensError::PatchRollback { .. } => {
                Some("Files were restored; inspect the reason and retry the edit".into())
            }
            LensError::StoreIo(_) => Some("Run `init --force` to rebuild the graph".into()),
            LensError::DuplicateNode { .. } => {
                Some("Rename one of the declarations or exclude one of the files".into())
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, LensError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = LensError::syntax("unexpected indent at line 3");
        assert_eq!(
            err.to_string(),
            "Validation failed (syntax): unexpected indent at line 3"
        );
        assert!(err.is_rejection());
    }

    #[test]
    fn test_structure_hint_overrides_default() {
        let err = LensError::structure("class too large", Some("Edit methods individually"));
        assert_eq!(err.hint().as_deref(), Some("Edit methods individually"));
    }

    #[test]
    fn test_patch_conflict_display() {
        let err = LensError::PatchConflict {
            file: "app.py".into(),
            first: (10, 20),
            second: (15, 25),
        };
        assert!(err.to_string().contains("lines 10-20 overlap lines 15-25"));
        assert!(err.hint().is_some());
    }

    #[test]
    fn test_rollback_is_not_rejection() {
        let err = LensError::PatchRollback {
            reason: "reparse failed".into(),
            restored: vec!["a.py".into()],
        };
        assert!(!err.is_rejection());
    }
}
