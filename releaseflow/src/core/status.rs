//! Stage and run status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The execution status of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage has not been scheduled yet.
    Pending,
    /// Stage is currently running.
    Running,
    /// Stage completed successfully.
    Succeeded,
    /// Stage failed.
    Failed,
    /// Stage was never executed because a dependency did not succeed.
    Skipped,
}

impl Default for StageStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Returns true if the status indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Returns true if the stage can move from this status to `next`.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Skipped)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
        )
    }
}

/// The overall outcome of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every stage succeeded.
    Success,
    /// At least one stage failed or was skipped.
    Failure,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

impl RunStatus {
    /// Folds per-stage statuses into a run status.
    #[must_use]
    pub fn from_stages<'a>(statuses: impl IntoIterator<Item = &'a StageStatus>) -> Self {
        if statuses.into_iter().all(StageStatus::is_success) {
            Self::Success
        } else {
            Self::Failure
        }
    }

    /// Returns true for [`RunStatus::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_status_display() {
        assert_eq!(StageStatus::Pending.to_string(), "pending");
        assert_eq!(StageStatus::Succeeded.to_string(), "succeeded");
        assert_eq!(StageStatus::Skipped.to_string(), "skipped");
    }

    #[test]
    fn test_stage_status_is_terminal() {
        assert!(StageStatus::Succeeded.is_terminal());
        assert!(StageStatus::Skipped.is_terminal());
        assert!(StageStatus::Failed.is_terminal());
        assert!(!StageStatus::Pending.is_terminal());
        assert!(!StageStatus::Running.is_terminal());
    }

    #[test]
    fn test_legal_transitions() {
        assert!(StageStatus::Pending.can_transition_to(StageStatus::Running));
        assert!(StageStatus::Pending.can_transition_to(StageStatus::Skipped));
        assert!(StageStatus::Running.can_transition_to(StageStatus::Failed));
        assert!(!StageStatus::Pending.can_transition_to(StageStatus::Succeeded));
        assert!(!StageStatus::Running.can_transition_to(StageStatus::Skipped));
        assert!(!StageStatus::Failed.can_transition_to(StageStatus::Running));
        assert!(!StageStatus::Succeeded.can_transition_to(StageStatus::Failed));
    }

    #[test]
    fn test_run_status_from_stages() {
        let all_ok = [StageStatus::Succeeded, StageStatus::Succeeded];
        assert_eq!(RunStatus::from_stages(&all_ok), RunStatus::Success);

        let skipped = [StageStatus::Succeeded, StageStatus::Skipped];
        assert_eq!(RunStatus::from_stages(&skipped), RunStatus::Failure);
    }

    #[test]
    fn test_status_serialize() {
        let json = serde_json::to_string(&StageStatus::Succeeded).unwrap();
        assert_eq!(json, r#""succeeded""#);

        let deserialized: StageStatus = serde_json::from_str(r#""skipped""#).unwrap();
        assert_eq!(deserialized, StageStatus::Skipped);

        assert_eq!(serde_json::to_string(&RunStatus::Failure).unwrap(), r#""failure""#);
    }
}
