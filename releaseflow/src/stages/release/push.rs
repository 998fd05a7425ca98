//! Image push.

use super::{run_step, PUSH_IMAGE};
use crate::context::StageContext;
use crate::core::{archive_digest, StageOutput};
use crate::exec::{CommandInvocation, CommandRunner};
use crate::stages::Stage;
use async_trait::async_trait;
use std::sync::Arc;

/// Loads the saved archive and pushes the tag to the registry.
pub struct PushImageStage {
    runner: Arc<dyn CommandRunner>,
}

impl PushImageStage {
    /// Creates a push stage.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn push(&self, ctx: &StageContext) -> Result<StageOutput, StageOutput> {
        let image = ctx
            .inputs()
            .require_image(ctx.stage_name())
            .map_err(|err| StageOutput::failed(err.to_string()))?;

        let digest = archive_digest(&image.archive_path).await.map_err(|err| {
            StageOutput::failed(format!(
                "Cannot read archive {}: {err}",
                image.archive_path.display()
            ))
        })?;
        if digest != image.digest {
            return Err(StageOutput::failed(format!(
                "Archive digest mismatch for {}: expected {}, found {digest}",
                image.reference, image.digest
            )));
        }

        let config = ctx.run().config();
        if let Some(key_file) = &config.credentials.service_account_key {
            let activate = CommandInvocation::new("gcloud")
                .args(["auth", "activate-service-account", "--quiet"])
                .arg(format!("--key-file={}", key_file.display()));
            run_step(self.runner.as_ref(), ctx, activate).await?;

            let configure = CommandInvocation::new("gcloud")
                .args(["auth", "configure-docker", config.registry.host.as_str(), "--quiet"]);
            run_step(self.runner.as_ref(), ctx, configure).await?;
        }

        let load = CommandInvocation::new("docker")
            .args(["load", "--input"])
            .path_arg(&image.archive_path);
        run_step(self.runner.as_ref(), ctx, load).await?;

        let push = CommandInvocation::new("docker")
            .arg("push")
            .arg(image.reference.to_string());
        run_step(self.runner.as_ref(), ctx, push).await?;

        Ok(StageOutput::succeeded_value("pushed", serde_json::json!(image.reference.to_string()))
            .with_value("digest", serde_json::json!(image.digest)))
    }
}

impl std::fmt::Debug for PushImageStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushImageStage").finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for PushImageStage {
    fn name(&self) -> &str {
        PUSH_IMAGE
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        match self.push(ctx).await {
            Ok(output) | Err(output) => output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TriggerEvent;
    use crate::core::ImageArtifact;
    use crate::testing::{stage_context_with_image, ScriptedCommandRunner};

    async fn saved_artifact(dir: &std::path::Path, bytes: &[u8]) -> ImageArtifact {
        let archive = dir.join("image-42.tar");
        tokio::fs::write(&archive, bytes).await.unwrap();
        let digest = archive_digest(&archive).await.unwrap();
        ImageArtifact::new(
            crate::core::ImageReference::new("gcr.io", "acme", "web", "irys-ui-img", "42"),
            archive,
            digest,
            "build-image",
        )
    }

    #[tokio::test]
    async fn test_push_loads_and_pushes() {
        let workspace = tempfile::tempdir().unwrap();
        let artifact = saved_artifact(workspace.path(), b"image").await;
        let runner = Arc::new(ScriptedCommandRunner::new());
        let ctx = stage_context_with_image(PUSH_IMAGE, workspace.path(), TriggerEvent::push("main"), artifact);

        let output = PushImageStage::new(runner.clone()).execute(&ctx).await;

        assert!(output.is_success(), "{:?}", output.error);
        let programs: Vec<String> = runner
            .invocations()
            .iter()
            .map(|inv| format!("{} {}", inv.program, inv.args[0]))
            .collect();
        assert_eq!(programs, vec!["docker load", "docker push"]);
        assert_eq!(
            output.get("pushed"),
            Some(&serde_json::json!("gcr.io/acme/web/irys-ui-img:42"))
        );
    }

    #[tokio::test]
    async fn test_push_rejects_tampered_archive() {
        let workspace = tempfile::tempdir().unwrap();
        let artifact = saved_artifact(workspace.path(), b"image").await;
        tokio::fs::write(&artifact.archive_path, b"tampered").await.unwrap();
        let runner = Arc::new(ScriptedCommandRunner::new());
        let ctx = stage_context_with_image(PUSH_IMAGE, workspace.path(), TriggerEvent::push("main"), artifact);

        let output = PushImageStage::new(runner.clone()).execute(&ctx).await;

        assert!(output.is_failure());
        assert!(output.error.unwrap().contains("digest mismatch"));
        assert!(runner.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_push_without_artifact_fails() {
        let workspace = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedCommandRunner::new());
        let ctx = crate::testing::stage_context_for(PUSH_IMAGE, workspace.path(), TriggerEvent::push("main"));

        let output = PushImageStage::new(runner).execute(&ctx).await;

        assert!(output.is_failure());
        assert!(output.error.unwrap().contains("requires an image artifact"));
    }
}
