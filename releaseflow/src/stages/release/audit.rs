//! Dependency audit. Findings are reported, never fatal.

use super::DEPENDENCY_AUDIT;
use crate::context::StageContext;
use crate::core::StageOutput;
use crate::exec::{CommandInvocation, CommandRunner};
use crate::stages::Stage;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Runs the configured audit tool inside the source checkout.
///
/// A non-zero exit means the tool found something: the findings are logged
/// and the stage still succeeds. Only a tool that cannot be started fails
/// the stage.
pub struct DependencyAuditStage {
    runner: Arc<dyn CommandRunner>,
}

impl DependencyAuditStage {
    /// Creates an audit stage.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl std::fmt::Debug for DependencyAuditStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyAuditStage").finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for DependencyAuditStage {
    fn name(&self) -> &str {
        DEPENDENCY_AUDIT
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        let config = ctx.run().config();
        let Some((program, args)) = config.audit.command.split_first() else {
            return StageOutput::failed("No audit command configured");
        };

        let invocation = CommandInvocation::new(program)
            .args(args)
            .current_dir(ctx.run().source_dir())
            .timeout(config.command_timeout());

        match self.runner.run(&invocation).await {
            Ok(output) if output.is_success() => {
                info!(stage = %ctx.stage_name(), "Dependency audit clean");
                StageOutput::succeeded_value("findings", serde_json::json!(false))
            }
            Ok(output) => {
                let summary = output.failure_summary();
                warn!(
                    stage = %ctx.stage_name(),
                    command = %invocation,
                    summary = %summary,
                    "Dependency audit reported findings; continuing"
                );
                StageOutput::succeeded_value("findings", serde_json::json!(true))
                    .with_value("summary", serde_json::json!(summary))
                    .with_value("report", serde_json::json!(output.stdout))
            }
            Err(err) => StageOutput::failed(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TriggerEvent;
    use crate::errors::ReleaseflowError;
    use crate::exec::CommandOutput;
    use crate::testing::{stage_context_for, ScriptedCommandRunner};

    #[tokio::test]
    async fn test_clean_audit() {
        let workspace = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedCommandRunner::new());
        let ctx = stage_context_for(DEPENDENCY_AUDIT, workspace.path(), TriggerEvent::push("main"));

        let output = DependencyAuditStage::new(runner.clone()).execute(&ctx).await;

        assert!(output.is_success());
        assert_eq!(output.get("findings"), Some(&serde_json::json!(false)));
        let call = &runner.invocations()[0];
        assert_eq!(call.program, "npm");
        assert_eq!(call.cwd, Some(ctx.run().source_dir()));
    }

    #[tokio::test]
    async fn test_findings_are_not_fatal() {
        let workspace = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedCommandRunner::new());
        runner.respond(
            "npm",
            "audit",
            CommandOutput {
                exit_code: Some(1),
                stdout: "3 high severity vulnerabilities".to_string(),
                ..CommandOutput::default()
            },
        );
        let ctx = stage_context_for(DEPENDENCY_AUDIT, workspace.path(), TriggerEvent::push("main"));

        let output = DependencyAuditStage::new(runner).execute(&ctx).await;

        assert!(output.is_success());
        assert_eq!(output.get("findings"), Some(&serde_json::json!(true)));
        assert_eq!(
            output.get("report"),
            Some(&serde_json::json!("3 high severity vulnerabilities"))
        );
    }

    #[tokio::test]
    async fn test_missing_tool_fails() {
        let workspace = tempfile::tempdir().unwrap();
        let mut runner = crate::exec::MockCommandRunner::new();
        runner.expect_run().times(1).returning(|inv| {
            Err(ReleaseflowError::CommandSpawn {
                program: inv.program.clone(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        });
        let ctx = stage_context_for(DEPENDENCY_AUDIT, workspace.path(), TriggerEvent::push("main"));

        let output = DependencyAuditStage::new(Arc::new(runner)).execute(&ctx).await;

        assert!(output.is_failure());
        assert!(output.error.unwrap().contains("npm"));
    }
}
