//! Uniform result shape handed to a tool-dispatch layer.

use serde::Serialize;

use crate::error::LensError;
use crate::mutation::{BatchOutcome, EditOutcome, RenameOutcome};

#[derive(Debug, Clone, Serialize)]
pub struct OpResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Suggested next operation when the call failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected_nodes: Vec<String>,
}

impl OpResponse {
    pub fn ok(data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                success: true,
                data: Some(value),
                error: None,
                hint: None,
                warnings: Vec::new(),
                affected_nodes: Vec::new(),
            },
            Err(e) => Self::from_error(&LensError::Config(e)),
        }
    }

    pub fn from_error(err: &LensError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.to_string()),
            hint: err.hint(),
            warnings: Vec::new(),
            affected_nodes: Vec::new(),
        }
    }

    pub fn from_result<T: Into<OpResponse>>(result: crate::Result<T>) -> Self {
        match result {
            Ok(outcome) => outcome.into(),
            Err(e) => Self::from_error(&e),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn with_affected(mut self, affected: Vec<String>) -> Self {
        self.affected_nodes = affected;
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"success\":false,\"error\":\"{}\"}}", e))
    }
}

impl From<LensError> for OpResponse {
    fn from(err: LensError) -> Self {
        Self::from_error(&err)
    }
}

impl From<EditOutcome> for OpResponse {
    fn from(outcome: EditOutcome) -> Self {
        let warnings = outcome.warnings.clone();
        let affected = outcome.affected.clone();
        Self::ok(&outcome).with_warnings(warnings).with_affected(affected)
    }
}

impl From<BatchOutcome> for OpResponse {
    fn from(outcome: BatchOutcome) -> Self {
        let warnings = outcome
            .edits
            .iter()
            .flat_map(|e| e.warnings.iter().map(move |w| format!("{}: {}", e.node_id, w)))
            .collect();
        let mut affected: Vec<String> = outcome.edits.iter().flat_map(|e| e.affected.iter().cloned()).collect();
        affected.sort();
        affected.dedup();
        Self::ok(&outcome).with_warnings(warnings).with_affected(affected)
    }
}

impl From<RenameOutcome> for OpResponse {
    fn from(outcome: RenameOutcome) -> Self {
        let warnings = if outcome.needs_review.is_empty() {
            Vec::new()
        } else {
            vec![format!(
                "{} textual matches were not rewritten; review them",
                outcome.needs_review.len()
            )]
        };
        Self::ok(&outcome).with_warnings(warnings)
    }
}
