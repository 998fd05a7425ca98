//! Run identity for tracking pipeline executions.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A push event that can start a release.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// The pushed branch, with or without the `refs/heads/` prefix.
    pub branch: String,
    /// The pushed commit, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

impl TriggerEvent {
    /// Creates a push trigger for a branch.
    #[must_use]
    pub fn push(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            commit: None,
        }
    }

    /// Pins the trigger to a commit.
    #[must_use]
    pub fn with_commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = Some(commit.into());
        self
    }

    /// Returns the short branch name; runs are numbered per key.
    #[must_use]
    pub fn key(&self) -> &str {
        self.branch
            .strip_prefix("refs/heads/")
            .unwrap_or(&self.branch)
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.commit {
            Some(commit) => write!(f, "push to {} at {}", self.key(), commit),
            None => write!(f, "push to {}", self.key()),
        }
    }
}

/// Identifies a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    /// Monotonic run number within the trigger; image tags derive from it.
    pub run_number: u64,
    /// Unique correlation id of this execution (differs between re-runs).
    pub pipeline_run_id: Uuid,
    /// The trigger that started the run.
    pub trigger: TriggerEvent,
}

impl RunIdentity {
    /// Creates a run identity with a fresh correlation id.
    #[must_use]
    pub fn new(run_number: u64, trigger: TriggerEvent) -> Self {
        Self {
            run_number,
            pipeline_run_id: Uuid::new_v4(),
            trigger,
        }
    }

    /// Returns the image tag for this run.
    #[must_use]
    pub fn image_tag(&self) -> String {
        self.run_number.to_string()
    }
}
