//! Cluster deployment and its rollback compensation.

use super::{run_step, DEPLOY};
use crate::config::ClusterConfig;
use crate::context::StageContext;
use crate::core::{CompensationOutcome, CompensationRecord, StageOutput};
use crate::exec::{CommandInvocation, CommandRunner};
use crate::manifest::manifest_paths;
use crate::stages::{Compensation, Stage};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Slack on top of the rollout timeout before the wait is killed.
const ROLLOUT_GRACE: Duration = Duration::from_secs(15);

/// Fetches cluster credentials and applies the four manifests.
pub struct DeployStage {
    runner: Arc<dyn CommandRunner>,
}

impl DeployStage {
    /// Creates a deploy stage.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn deploy(&self, ctx: &StageContext) -> Result<StageOutput, StageOutput> {
        let run = ctx.run();
        let config = run.config();

        let credentials = CommandInvocation::new("gcloud")
            .args(["container", "clusters", "get-credentials", config.cluster.name.as_str()])
            .args(["--zone", config.cluster.zone.as_str()])
            .args(["--project", config.registry.project.as_str()]);
        run_step(self.runner.as_ref(), ctx, credentials).await?;

        let mut apply = CommandInvocation::new("kubectl").arg("apply");
        for path in manifest_paths(&run.manifest_dir()) {
            apply = apply.arg("-f").path_arg(&path);
        }
        run_step(self.runner.as_ref(), ctx, apply).await?;

        Ok(
            StageOutput::succeeded_value("deployment", serde_json::json!(config.cluster.deployment))
                .with_value("image", serde_json::json!(run.image().to_string())),
        )
    }
}

impl std::fmt::Debug for DeployStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployStage").finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for DeployStage {
    fn name(&self) -> &str {
        DEPLOY
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        match self.deploy(ctx).await {
            Ok(output) | Err(output) => output,
        }
    }
}

/// Runs after a failed deploy: waits for the rollout with a bounded
/// timeout and, if the wait fails too, rolls back to the previous revision.
///
/// A healthy rollout after a failed apply is reported as
/// [`CompensationOutcome::Recovered`]; the deploy stays failed.
pub struct RolloutCompensation {
    runner: Arc<dyn CommandRunner>,
}

impl RolloutCompensation {
    /// Creates the compensation.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn kubectl(cluster: &ClusterConfig) -> CommandInvocation {
        let kubectl = CommandInvocation::new("kubectl");
        match cluster.namespace.as_deref() {
            Some(namespace) if !namespace.is_empty() => kubectl.args(["--namespace", namespace]),
            _ => kubectl,
        }
    }
}

impl std::fmt::Debug for RolloutCompensation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RolloutCompensation").finish_non_exhaustive()
    }
}

#[async_trait]
impl Compensation for RolloutCompensation {
    fn name(&self) -> &str {
        "rollout-rollback"
    }

    async fn compensate(&self, ctx: &StageContext, failure: &StageOutput) -> CompensationRecord {
        let cluster = &ctx.run().config().cluster;
        let target = format!("deployment/{}", cluster.deployment);
        let timeout = cluster.rollout_timeout();
        let mut commands = Vec::new();

        warn!(
            stage = %ctx.stage_name(),
            error = ?failure.error,
            timeout_secs = timeout.as_secs(),
            "Deploy failed; waiting for rollout"
        );

        let wait = Self::kubectl(cluster)
            .args(["rollout", "status", target.as_str()])
            .arg(format!("--timeout={}s", timeout.as_secs()))
            .timeout(Some(timeout + ROLLOUT_GRACE));
        commands.push(wait.to_string());

        let wait_detail = match self.runner.run(&wait).await {
            Ok(output) if output.is_success() => {
                info!(stage = %ctx.stage_name(), deployment = %cluster.deployment, "Rollout healthy; no rollback");
                return CompensationRecord::new(self.name(), CompensationOutcome::Recovered)
                    .with_commands(commands)
                    .with_detail(output.stdout.trim().to_string());
            }
            Ok(output) => output.failure_summary(),
            Err(err) => err.to_string(),
        };

        warn!(stage = %ctx.stage_name(), detail = %wait_detail, "Rollout wait failed; rolling back");

        let undo = Self::kubectl(cluster).args(["rollout", "undo", target.as_str()]);
        commands.push(undo.to_string());

        match self.runner.run(&undo).await {
            Ok(output) if output.is_success() => {
                CompensationRecord::new(self.name(), CompensationOutcome::RolledBack)
                    .with_commands(commands)
                    .with_detail(wait_detail)
            }
            Ok(output) => {
                let detail = output.failure_summary();
                error!(stage = %ctx.stage_name(), detail = %detail, "Rollback failed");
                CompensationRecord::new(self.name(), CompensationOutcome::RollbackFailed)
                    .with_commands(commands)
                    .with_detail(detail)
            }
            Err(err) => {
                error!(stage = %ctx.stage_name(), error = %err, "Rollback could not start");
                CompensationRecord::new(self.name(), CompensationOutcome::RollbackFailed)
                    .with_commands(commands)
                    .with_detail(err.to_string())
            }
        }
    }
}
