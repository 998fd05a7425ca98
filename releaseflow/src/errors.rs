//! Error types for the releaseflow orchestrator.
//!
//! Validation problems carry a [`ContractErrorInfo`] so that operators get a
//! stable error code and a fix hint alongside the message.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for releaseflow operations.
#[derive(Debug, Error)]
pub enum ReleaseflowError {
    /// A pipeline validation error occurred.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A cycle was detected in the pipeline.
    #[error("{0}")]
    CycleDetected(#[from] CycleDetectedError),

    /// A manifest could not be rewritten or published.
    #[error("{0}")]
    Manifest(#[from] ManifestError),

    /// The configuration is incomplete or malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An external command could not be started.
    #[error("Failed to spawn '{program}': {source}")]
    CommandSpawn {
        /// The program that failed to start.
        program: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A re-run was requested for a run number that is still executing.
    #[error("Run {run_number} is already active for trigger '{trigger}'")]
    RunAlreadyActive {
        /// The trigger key.
        trigger: String,
        /// The run that is still executing.
        run_number: u64,
    },

    /// A re-run was requested for a run number that was never issued.
    #[error("Run {run_number} was never issued for trigger '{trigger}'")]
    UnknownRun {
        /// The trigger key.
        trigger: String,
        /// The requested run number.
        run_number: u64,
    },

    /// The trigger was not a push to the designated branch.
    #[error("Branch '{branch}' does not trigger releases (expected '{expected}')")]
    UndesignatedBranch {
        /// The branch that was pushed.
        branch: String,
        /// The designated release branch.
        expected: String,
    },

    /// A stage needed an artifact no predecessor produced.
    #[error("Stage '{stage}' requires an image artifact but none was produced")]
    MissingArtifact {
        /// The consuming stage.
        stage: String,
    },

    /// A stage status change broke the state machine.
    #[error("Illegal transition for stage '{stage}': {from} -> {to}")]
    IllegalTransition {
        /// The stage name.
        stage: String,
        /// The current status.
        from: String,
        /// The requested status.
        to: String,
    },

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for ReleaseflowError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<serde_json::Error> for ReleaseflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "CONTRACT-004-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when pipeline validation fails.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the contract error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Error raised when a cycle is detected in the pipeline graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in pipeline: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of stages forming the cycle.
    pub cycle_path: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ContractErrorInfo::new(
            "CONTRACT-004-CYCLE",
            format!("Pipeline contains a dependency cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the dependencies in the cycle to break it.");

        Self {
            cycle_path,
            error_info: info,
        }
    }
}

impl From<CycleDetectedError> for PipelineValidationError {
    fn from(err: CycleDetectedError) -> Self {
        Self {
            message: err.to_string(),
            stages: err.cycle_path.clone(),
            error_info: Some(err.error_info),
        }
    }
}

/// Errors raised while rewriting or publishing Kubernetes manifests.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// No `image:` line referenced the configured image repository.
    #[error("No image line for '{repository}' found in {file}")]
    ImageLineNotFound {
        /// The manifest file that was searched.
        file: String,
        /// The image repository that was expected.
        repository: String,
    },

    /// The manifest repository refused the push (usually a non-fast-forward).
    #[error("Manifest push to '{branch}' rejected: {detail}")]
    PushRejected {
        /// The branch that was pushed.
        branch: String,
        /// The remote's explanation.
        detail: String,
    },

    /// The image repository could not be turned into a pattern.
    #[error("Invalid image pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_message() {
        let err = CycleDetectedError::new(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "Cycle detected in pipeline: a -> b -> a");
        assert_eq!(err.error_info.code, "CONTRACT-004-CYCLE");
    }

    #[test]
    fn test_cycle_into_validation_error() {
        let err: PipelineValidationError =
            CycleDetectedError::new(vec!["x".into(), "x".into()]).into();
        assert_eq!(err.code(), Some("CONTRACT-004-CYCLE"));
        assert_eq!(err.stages, vec!["x".to_string(), "x".to_string()]);
    }

    #[test]
    fn test_contract_info_serialization_skips_empty() {
        let info = ContractErrorInfo::new("CODE", "summary");
        let json = serde_json::to_value(&info).unwrap();
        assert!(json.get("fix_hint").is_none());
        assert!(json.get("context").is_none());

        let info = info.with_context_entry("stage", "deploy");
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["context"]["stage"], "deploy");
    }

    #[test]
    fn test_run_errors_display() {
        let err = ReleaseflowError::RunAlreadyActive {
            trigger: "main".into(),
            run_number: 7,
        };
        assert!(err.to_string().contains("Run 7"));

        let err = ReleaseflowError::UndesignatedBranch {
            branch: "feature".into(),
            expected: "main".into(),
        };
        assert!(err.to_string().contains("'feature'"));
    }

    #[test]
    fn test_manifest_push_rejected_display() {
        let err = ManifestError::PushRejected {
            branch: "main".into(),
            detail: "non-fast-forward".into(),
        };
        assert_eq!(
            err.to_string(),
            "Manifest push to 'main' rejected: non-fast-forward"
        );
    }
}
