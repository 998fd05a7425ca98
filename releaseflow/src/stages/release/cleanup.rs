//! Run cleanup. Scheduled whatever happened upstream.

use super::CLEANUP;
use crate::context::StageContext;
use crate::core::StageOutput;
use crate::exec::{CommandInvocation, CommandRunner};
use crate::stages::Stage;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Removes the local image and the run's workspace.
///
/// Upstream stages may have failed at any point, so every step tolerates
/// missing state. A leftover local image only warns; a workspace that
/// cannot be removed fails the stage.
pub struct CleanupStage {
    runner: Arc<dyn CommandRunner>,
}

impl CleanupStage {
    /// Creates a cleanup stage.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl std::fmt::Debug for CleanupStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupStage").finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for CleanupStage {
    fn name(&self) -> &str {
        CLEANUP
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        let run = ctx.run();
        let mut image_removed = false;

        if let Some(image) = ctx.inputs().image() {
            let remove = CommandInvocation::new("docker")
                .args(["image", "rm", "--force"])
                .arg(image.reference.to_string())
                .timeout(run.config().command_timeout());
            match self.runner.run(&remove).await {
                Ok(output) if output.is_success() => image_removed = true,
                Ok(output) => warn!(
                    stage = %ctx.stage_name(),
                    image = %image.reference,
                    detail = %output.failure_summary(),
                    "Could not remove local image"
                ),
                Err(err) => warn!(stage = %ctx.stage_name(), error = %err, "Could not remove local image"),
            }
        }

        let workspace = run.workspace_dir();
        let workspace_removed = if run.config().workspace.keep {
            info!(stage = %ctx.stage_name(), workspace = %workspace.display(), "Keeping workspace");
            false
        } else {
            match tokio::fs::remove_dir_all(workspace).await {
                Ok(()) => true,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
                Err(err) => {
                    return StageOutput::failed(format!(
                        "Cannot remove workspace {}: {err}",
                        workspace.display()
                    ));
                }
            }
        };

        StageOutput::succeeded_value("image_removed", serde_json::json!(image_removed))
            .with_value("workspace_removed", serde_json::json!(workspace_removed))
    }
}
