//! Image build.

use super::{run_step, BUILD_IMAGE};
use crate::context::StageContext;
use crate::core::{archive_digest, ImageArtifact, StageOutput};
use crate::exec::{CommandInvocation, CommandRunner};
use crate::stages::Stage;
use async_trait::async_trait;
use std::sync::Arc;

/// Builds the image from the checkout and saves it to a file archive.
///
/// The archive's digest identifies the artifact; the push stage verifies it
/// before loading the archive.
pub struct BuildImageStage {
    runner: Arc<dyn CommandRunner>,
}

impl BuildImageStage {
    /// Creates a build stage.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn build(&self, ctx: &StageContext) -> Result<StageOutput, StageOutput> {
        let run = ctx.run();
        let reference = run.image().clone();
        let archive = run.archive_path();

        let build = CommandInvocation::new("docker")
            .args(["build", "--tag"])
            .arg(reference.to_string())
            .arg("--label")
            .arg(format!("releaseflow.run={}", run.run_number()))
            .path_arg(&run.source_dir());
        run_step(self.runner.as_ref(), ctx, build).await?;

        let save = CommandInvocation::new("docker")
            .args(["save", "--output"])
            .path_arg(&archive)
            .arg(reference.to_string());
        run_step(self.runner.as_ref(), ctx, save).await?;

        let digest = archive_digest(&archive).await.map_err(|err| {
            StageOutput::failed(format!("Cannot digest {}: {err}", archive.display()))
        })?;

        let artifact = ImageArtifact::new(reference.clone(), archive, digest.clone(), ctx.stage_name());
        Ok(StageOutput::succeeded_value("image", serde_json::json!(reference.to_string()))
            .with_value("digest", serde_json::json!(digest))
            .with_artifact(artifact))
    }
}

impl std::fmt::Debug for BuildImageStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildImageStage").finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for BuildImageStage {
    fn name(&self) -> &str {
        BUILD_IMAGE
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        match self.build(ctx).await {
            Ok(output) | Err(output) => output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TriggerEvent;
    use crate::testing::{stage_context_for, ScriptedCommandRunner};

    #[tokio::test]
    async fn test_build_produces_artifact() {
        let workspace = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedCommandRunner::new());
        let ctx = stage_context_for(BUILD_IMAGE, workspace.path(), TriggerEvent::push("main"));

        let output = BuildImageStage::new(runner.clone()).execute(&ctx).await;

        assert!(output.is_success(), "{:?}", output.error);
        let artifact = output.artifact.expect("artifact");
        assert_eq!(artifact.reference.tag, "42");
        assert_eq!(artifact.archive_path, ctx.run().archive_path());
        assert_eq!(
            artifact.digest,
            archive_digest(&ctx.run().archive_path()).await.unwrap()
        );
        assert_eq!(artifact.produced_by, BUILD_IMAGE);
        assert_eq!(runner.count("docker", "build"), 1);
    }

    #[tokio::test]
    async fn test_build_failure_skips_save() {
        let workspace = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedCommandRunner::new());
        runner.fail("docker", "build", 1, "failed to solve: dockerfile parse error");
        let ctx = stage_context_for(BUILD_IMAGE, workspace.path(), TriggerEvent::push("main"));

        let output = BuildImageStage::new(runner.clone()).execute(&ctx).await;

        assert!(output.is_failure());
        assert!(output.artifact.is_none());
        assert_eq!(runner.count("docker", "save"), 0);
    }
}
