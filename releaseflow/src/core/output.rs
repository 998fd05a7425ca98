//! Stage output type with factory methods.

use super::{CompensationRecord, ImageArtifact, StageStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The output of a stage execution.
///
/// A stage only ever reports `succeeded` or `failed`; skipping is decided by
/// the executor before a stage runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutput {
    /// The status of the stage execution.
    pub status: StageStatus,

    /// Output data made available to downstream stages.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, serde_json::Value>,

    /// Image produced by the stage. The executor takes ownership of it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ImageArtifact>,

    /// Error message (for failed executions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Exit code of the command that failed, when there was one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Compensation that ran after a failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation: Option<CompensationRecord>,
}

impl Default for StageOutput {
    fn default() -> Self {
        Self::succeeded_empty()
    }
}

impl StageOutput {
    /// Creates a successful output with data.
    #[must_use]
    pub fn succeeded(data: HashMap<String, serde_json::Value>) -> Self {
        Self {
            status: StageStatus::Succeeded,
            data,
            artifact: None,
            error: None,
            exit_code: None,
            compensation: None,
        }
    }

    /// Creates a successful output with no data.
    #[must_use]
    pub fn succeeded_empty() -> Self {
        Self::succeeded(HashMap::new())
    }

    /// Creates a successful output with a single value.
    #[must_use]
    pub fn succeeded_value(key: impl Into<String>, value: serde_json::Value) -> Self {
        Self::succeeded_empty().with_value(key, value)
    }

    /// Creates a failure output with an error message.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Failed,
            data: HashMap::new(),
            artifact: None,
            error: Some(error.into()),
            exit_code: None,
            compensation: None,
        }
    }

    /// Creates a failure output for a command that exited non-zero.
    #[must_use]
    pub fn failed_with_exit(error: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self {
            exit_code,
            ..Self::failed(error)
        }
    }

    /// Adds a data entry.
    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Attaches the produced image.
    #[must_use]
    pub fn with_artifact(mut self, artifact: ImageArtifact) -> Self {
        self.artifact = Some(artifact);
        self
    }

    /// Attaches a compensation record.
    #[must_use]
    pub fn with_compensation(mut self, record: CompensationRecord) -> Self {
        self.compensation = Some(record);
        self
    }

    /// Returns true if the stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns true if the stage failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status == StageStatus::Failed
    }

    /// Gets a data value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }
}
