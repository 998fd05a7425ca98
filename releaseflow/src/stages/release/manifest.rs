//! Manifest repository update.

use super::{git_with_auth, reset_dir, run_step, UPDATE_MANIFEST};
use crate::context::StageContext;
use crate::core::StageOutput;
use crate::errors::ManifestError;
use crate::exec::{CommandInvocation, CommandRunner};
use crate::manifest::{commit_message, update_deployment_manifest, ManifestChange};
use crate::stages::Stage;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Points `deployment.yaml` at the pushed image and publishes the change.
///
/// When the manifest already references the image (a re-run of the same
/// run number) nothing is committed.
pub struct UpdateManifestStage {
    runner: Arc<dyn CommandRunner>,
}

impl UpdateManifestStage {
    /// Creates a manifest update stage.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn update(&self, ctx: &StageContext) -> Result<StageOutput, StageOutput> {
        let image = ctx
            .inputs()
            .require_image(ctx.stage_name())
            .map_err(|err| StageOutput::failed(err.to_string()))?;
        let run = ctx.run();
        let config = run.config();
        let repo_dir = run.manifest_repo_dir();
        reset_dir(&repo_dir).await?;

        let clone = git_with_auth(config)
            .args(["clone", "--depth", "1", "--branch", config.manifests.branch.as_str()])
            .arg(&config.manifests.repository_url)
            .path_arg(&repo_dir);
        run_step(self.runner.as_ref(), ctx, clone).await?;

        let change = update_deployment_manifest(&run.manifest_dir(), &image.reference)
            .await
            .map_err(|err| StageOutput::failed(err.to_string()))?;
        let output = StageOutput::succeeded_value("image", serde_json::json!(image.reference.to_string()));

        if change == ManifestChange::Unchanged {
            info!(stage = %ctx.stage_name(), image = %image.reference, "Manifest already up to date");
            return Ok(output.with_value("changed", serde_json::json!(false)));
        }

        let message = commit_message(run.run_number());
        let commit = CommandInvocation::new("git")
            .arg("-C")
            .path_arg(&repo_dir)
            .arg("-c")
            .arg(format!("user.name={}", config.manifests.author_name))
            .arg("-c")
            .arg(format!("user.email={}", config.manifests.author_email))
            .args(["commit", "--all", "--message", message.as_str()]);
        run_step(self.runner.as_ref(), ctx, commit).await?;

        let push = git_with_auth(config)
            .arg("-C")
            .path_arg(&repo_dir)
            .args(["push", "origin"])
            .arg(format!("HEAD:{}", config.manifests.branch));
        if let Err(failed) = run_step(self.runner.as_ref(), ctx, push).await {
            let rejected = ManifestError::PushRejected {
                branch: config.manifests.branch.clone(),
                detail: failed.error.unwrap_or_default(),
            };
            return Err(StageOutput::failed_with_exit(rejected.to_string(), failed.exit_code));
        }

        Ok(output
            .with_value("changed", serde_json::json!(true))
            .with_value("commit_message", serde_json::json!(message)))
    }
}

impl std::fmt::Debug for UpdateManifestStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateManifestStage").finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for UpdateManifestStage {
    fn name(&self) -> &str {
        UPDATE_MANIFEST
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        match self.update(ctx).await {
            Ok(output) | Err(output) => output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TriggerEvent;
    use crate::core::{ImageArtifact, ImageReference};
    use crate::manifest::DEPLOYMENT_MANIFEST;
    use crate::testing::{stage_context_with_image, ScriptedCommandRunner, SAMPLE_DEPLOYMENT};

    fn artifact() -> ImageArtifact {
        ImageArtifact::new(
            ImageReference::new("gcr.io", "acme", "web", "irys-ui-img", "42"),
            "/unused.tar",
            "sha256:00",
            "build-image",
        )
    }

    fn runner_with_manifests(deployment: &str) -> Arc<ScriptedCommandRunner> {
        Arc::new(
            ScriptedCommandRunner::new()
                .with_clone_file("irys-manifests", DEPLOYMENT_MANIFEST, deployment),
        )
    }

    #[tokio::test]
    async fn test_commits_and_pushes_new_tag() {
        let workspace = tempfile::tempdir().unwrap();
        let runner = runner_with_manifests(SAMPLE_DEPLOYMENT);
        let ctx = stage_context_with_image(UPDATE_MANIFEST, workspace.path(), TriggerEvent::push("main"), artifact());

        let output = UpdateManifestStage::new(runner.clone()).execute(&ctx).await;

        assert!(output.is_success(), "{:?}", output.error);
        assert_eq!(output.get("changed"), Some(&serde_json::json!(true)));

        let content = std::fs::read_to_string(ctx.run().manifest_dir().join(DEPLOYMENT_MANIFEST)).unwrap();
        assert!(content.contains("image: gcr.io/acme/web/irys-ui-img:42"));

        let commit = runner.find("git", "commit").expect("commit");
        assert_eq!(commit.arg_after("--message"), Some("Updated image tag to 42"));
        assert_eq!(runner.count("git", "HEAD:main"), 1);
    }

    #[tokio::test]
    async fn test_unchanged_manifest_is_not_committed() {
        let workspace = tempfile::tempdir().unwrap();
        let current = SAMPLE_DEPLOYMENT.replace("irys-ui-img:1", "irys-ui-img:42");
        let runner = runner_with_manifests(&current);
        let ctx = stage_context_with_image(UPDATE_MANIFEST, workspace.path(), TriggerEvent::push("main"), artifact());

        let output = UpdateManifestStage::new(runner.clone()).execute(&ctx).await;

        assert!(output.is_success());
        assert_eq!(output.get("changed"), Some(&serde_json::json!(false)));
        assert_eq!(runner.count("git", "commit"), 0);
        assert_eq!(runner.count("git", "push"), 0);
    }

    #[tokio::test]
    async fn test_rejected_push_is_fatal() {
        let workspace = tempfile::tempdir().unwrap();
        let runner = runner_with_manifests(SAMPLE_DEPLOYMENT);
        runner.fail("git", "push", 1, "! [rejected] HEAD -> main (fetch first)");
        let ctx = stage_context_with_image(UPDATE_MANIFEST, workspace.path(), TriggerEvent::push("main"), artifact());

        let output = UpdateManifestStage::new(runner).execute(&ctx).await;

        assert!(output.is_failure());
        let error = output.error.unwrap();
        assert!(error.starts_with("Manifest push to 'main' rejected"));
        assert!(error.contains("fetch first"));
    }
}
