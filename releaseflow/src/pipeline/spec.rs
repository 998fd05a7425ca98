//! Stage specifications.

use crate::errors::{ContractErrorInfo, PipelineValidationError};
use crate::stages::{Compensation, Stage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// When a stage becomes eligible to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunCondition {
    /// Every dependency succeeded. A failed or skipped dependency skips the
    /// stage.
    #[default]
    AllSucceeded,
    /// Every dependency reached a terminal state, whatever it was.
    AllTerminal,
}

impl fmt::Display for RunCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllSucceeded => write!(f, "all_succeeded"),
            Self::AllTerminal => write!(f, "all_terminal"),
        }
    }
}

/// Specification for a single stage in a pipeline.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// The unique name of the stage.
    pub name: String,
    /// The stage implementation.
    pub runner: Arc<dyn Stage>,
    /// Names of stages this stage depends on.
    pub dependencies: BTreeSet<String>,
    /// When the stage may run.
    pub run_condition: RunCondition,
    /// Action run when the stage fails, before it is recorded terminal.
    pub compensation: Option<Arc<dyn Compensation>>,
}

impl StageSpec {
    /// Creates a new stage specification.
    #[must_use]
    pub fn new(name: impl Into<String>, runner: Arc<dyn Stage>) -> Self {
        Self {
            name: name.into(),
            runner,
            dependencies: BTreeSet::new(),
            run_condition: RunCondition::AllSucceeded,
            compensation: None,
        }
    }

    /// Sets the dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a dependency.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.insert(dep.into());
        self
    }

    /// Sets the run condition.
    #[must_use]
    pub fn with_run_condition(mut self, condition: RunCondition) -> Self {
        self.run_condition = condition;
        self
    }

    /// Attaches a compensation to the failure transition.
    #[must_use]
    pub fn with_compensation(mut self, compensation: Arc<dyn Compensation>) -> Self {
        self.compensation = Some(compensation);
        self
    }

    /// Validates the stage specification.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the stage depends on itself.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        if self.name.trim().is_empty() {
            return Err(PipelineValidationError::new("Stage name cannot be empty")
                .with_error_info(ContractErrorInfo::new(
                    "CONTRACT-004-EMPTY_NAME",
                    "Every stage needs a non-empty name",
                )));
        }
        if self.dependencies.contains(&self.name) {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' cannot depend on itself",
                self.name
            ))
            .with_stages(vec![self.name.clone()])
            .with_error_info(
                ContractErrorInfo::new(
                    "CONTRACT-004-SELF_DEP",
                    format!("Stage '{}' lists itself as a dependency", self.name),
                )
                .with_fix_hint("Remove the stage from its own dependency list."),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::NoOpStage;

    fn noop(name: &str) -> Arc<dyn Stage> {
        Arc::new(NoOpStage::new(name))
    }

    #[test]
    fn test_stage_spec_defaults() {
        let spec = StageSpec::new("build", noop("build")).with_dependencies(["checkout", "audit"]);

        assert_eq!(spec.run_condition, RunCondition::AllSucceeded);
        assert!(spec.compensation.is_none());
        assert_eq!(
            spec.dependencies.iter().collect::<Vec<_>>(),
            vec!["audit", "checkout"]
        );
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_self_dependency_rejected() {
        let err = StageSpec::new("build", noop("build"))
            .with_dependency("build")
            .validate()
            .unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-004-SELF_DEP"));
        assert_eq!(err.stages, vec!["build"]);
    }

    #[test]
    fn test_empty_name_rejected() {
        let err = StageSpec::new(" ", noop("x")).validate().unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-004-EMPTY_NAME"));
    }

    #[test]
    fn test_run_condition_serde() {
        assert_eq!(
            serde_json::to_string(&RunCondition::AllTerminal).unwrap(),
            "\"all_terminal\""
        );
        assert_eq!(RunCondition::AllSucceeded.to_string(), "all_succeeded");
    }
}
