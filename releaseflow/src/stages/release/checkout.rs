//! Source checkout.

use super::{git_with_auth, reset_dir, run_step, CHECKOUT};
use crate::context::StageContext;
use crate::core::StageOutput;
use crate::exec::{CommandInvocation, CommandRunner};
use crate::stages::Stage;
use async_trait::async_trait;
use std::sync::Arc;

/// Clones the pushed branch (pinned to the pushed commit when known).
pub struct CheckoutStage {
    runner: Arc<dyn CommandRunner>,
}

impl CheckoutStage {
    /// Creates a checkout stage.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn checkout(&self, ctx: &StageContext) -> Result<StageOutput, StageOutput> {
        let run = ctx.run();
        let trigger = &run.identity().trigger;
        let dir = run.source_dir();
        reset_dir(&dir).await?;

        let mut clone = git_with_auth(run.config()).args(["clone", "--branch", trigger.key()]);
        // A pinned commit may not be the branch tip, so it needs history.
        if trigger.commit.is_none() {
            clone = clone.args(["--depth", "1"]);
        }
        let clone = clone
            .arg(&run.config().source.repository_url)
            .path_arg(&dir);
        run_step(self.runner.as_ref(), ctx, clone).await?;

        if let Some(commit) = &trigger.commit {
            let pin = CommandInvocation::new("git")
                .arg("-C")
                .path_arg(&dir)
                .args(["checkout", "--detach", commit.as_str()]);
            run_step(self.runner.as_ref(), ctx, pin).await?;
        }

        let head = CommandInvocation::new("git")
            .arg("-C")
            .path_arg(&dir)
            .args(["rev-parse", "HEAD"]);
        let head = run_step(self.runner.as_ref(), ctx, head).await?;
        let commit = match head.stdout.trim() {
            "" => trigger.commit.clone().unwrap_or_default(),
            sha => sha.to_string(),
        };

        Ok(StageOutput::succeeded_value("commit", serde_json::json!(commit))
            .with_value("source_dir", serde_json::json!(dir.display().to_string())))
    }
}

impl std::fmt::Debug for CheckoutStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutStage").finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for CheckoutStage {
    fn name(&self) -> &str {
        CHECKOUT
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        match self.checkout(ctx).await {
            Ok(output) | Err(output) => output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RunContext, RunIdentity, StageInputs, TriggerEvent};
    use crate::exec::CommandOutput;
    use crate::testing::{stage_context_for, test_config, ScriptedCommandRunner};

    #[tokio::test]
    async fn test_checkout_records_head() {
        let workspace = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedCommandRunner::new());
        runner.respond("git", "rev-parse", CommandOutput::success_with_stdout("deadbeef\n"));

        let ctx = stage_context_for(CHECKOUT, workspace.path(), TriggerEvent::push("refs/heads/main"));
        let output = CheckoutStage::new(runner.clone()).execute(&ctx).await;

        assert!(output.is_success());
        assert_eq!(output.get("commit"), Some(&serde_json::json!("deadbeef")));

        let clone = &runner.invocations()[0];
        assert_eq!(clone.args[..5], ["clone", "--branch", "main", "--depth", "1"]);
    }

    #[tokio::test]
    async fn test_private_source_clone_uses_token() {
        let workspace = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedCommandRunner::new());

        let mut config = test_config(workspace.path());
        config.credentials.access_token = Some("ghp_source".to_string());
        let run = RunContext::new(
            RunIdentity::new(7, TriggerEvent::push("main")),
            Arc::new(config),
        );
        let ctx = StageContext::new(Arc::new(run), CHECKOUT, StageInputs::default());

        let output = CheckoutStage::new(runner.clone()).execute(&ctx).await;
        assert!(output.is_success());

        let clone = runner.find("git", "clone").unwrap();
        assert!(clone.has_arg("http.extraheader=AUTHORIZATION: basic"));
        assert!(clone.to_string().starts_with("git -c *** clone --branch main"));
        assert!(!clone.to_string().contains("ghp_source"));
    }

    #[tokio::test]
    async fn test_checkout_pins_commit() {
        let workspace = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedCommandRunner::new());

        let trigger = TriggerEvent::push("main").with_commit("abc123");
        let ctx = stage_context_for(CHECKOUT, workspace.path(), trigger);
        let output = CheckoutStage::new(runner.clone()).execute(&ctx).await;

        assert!(output.is_success());
        assert_eq!(output.get("commit"), Some(&serde_json::json!("abc123")));
        assert_eq!(runner.count("git", "--detach"), 1);
        assert_eq!(runner.count("git", "--depth"), 0);
    }

    #[tokio::test]
    async fn test_clone_failure_fails_stage() {
        let workspace = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedCommandRunner::new());
        runner.fail("git", "clone", 128, "fatal: repository not found");

        let ctx = stage_context_for(CHECKOUT, workspace.path(), TriggerEvent::push("main"));
        let output = CheckoutStage::new(runner.clone()).execute(&ctx).await;

        assert!(output.is_failure());
        assert_eq!(output.exit_code, Some(128));
        assert!(output.error.unwrap().contains("repository not found"));
        assert_eq!(runner.count("git", "rev-parse"), 0);
    }
}
