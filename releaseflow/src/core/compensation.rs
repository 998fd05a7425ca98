//! Records of compensating actions run after a stage failure.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a compensating action resolved a failed stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationOutcome {
    /// The system reached a healthy state on its own; nothing was reverted.
    Recovered,
    /// The previous revision was restored.
    RolledBack,
    /// Reverting was attempted and failed.
    RollbackFailed,
}

impl fmt::Display for CompensationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recovered => write!(f, "recovered"),
            Self::RolledBack => write!(f, "rolled_back"),
            Self::RollbackFailed => write!(f, "rollback_failed"),
        }
    }
}

/// What a compensation did, attached to the failed stage's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationRecord {
    /// Name of the compensation that ran.
    pub name: String,
    /// The outcome.
    pub outcome: CompensationOutcome,
    /// Commands issued, in order, with secrets redacted.
    #[serde(default)]
    pub commands: Vec<String>,
    /// Extra detail (usually the last error output).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CompensationRecord {
    /// Creates a new compensation record.
    #[must_use]
    pub fn new(name: impl Into<String>, outcome: CompensationOutcome) -> Self {
        Self {
            name: name.into(),
            outcome,
            commands: Vec::new(),
            detail: None,
        }
    }

    /// Sets the issued commands.
    #[must_use]
    pub fn with_commands(mut self, commands: Vec<String>) -> Self {
        self.commands = commands;
        self
    }

    /// Sets the detail message.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
