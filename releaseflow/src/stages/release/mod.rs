//! The stages of the release pipeline.
//!
//! `checkout -> dependency-audit -> build-image -> push-image ->
//! update-manifest -> deploy -> cleanup`. Each stage drives external tools
//! through a [`CommandRunner`] and turns their exit status into a
//! [`StageOutput`].

mod audit;
mod build;
mod checkout;
mod cleanup;
mod deploy;
mod manifest;
mod push;

pub use audit::DependencyAuditStage;
pub use build::BuildImageStage;
pub use checkout::CheckoutStage;
pub use cleanup::CleanupStage;
pub use deploy::{DeployStage, RolloutCompensation};
pub use manifest::UpdateManifestStage;
pub use push::PushImageStage;

use crate::config::ReleaseConfig;
use crate::context::StageContext;
use crate::core::StageOutput;
use crate::exec::{CommandInvocation, CommandOutput, CommandRunner};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::path::Path;
use tracing::info;

/// Stage checking out the pushed source.
pub const CHECKOUT: &str = "checkout";
/// Stage auditing third-party dependencies.
pub const DEPENDENCY_AUDIT: &str = "dependency-audit";
/// Stage building and saving the container image.
pub const BUILD_IMAGE: &str = "build-image";
/// Stage pushing the image to the registry.
pub const PUSH_IMAGE: &str = "push-image";
/// Stage committing the new image tag to the manifest repository.
pub const UPDATE_MANIFEST: &str = "update-manifest";
/// Stage applying the manifests to the cluster.
pub const DEPLOY: &str = "deploy";
/// Stage removing run-local state; always runs.
pub const CLEANUP: &str = "cleanup";

/// All release stages in pipeline order.
pub const RELEASE_STAGES: [&str; 7] = [
    CHECKOUT,
    DEPENDENCY_AUDIT,
    BUILD_IMAGE,
    PUSH_IMAGE,
    UPDATE_MANIFEST,
    DEPLOY,
    CLEANUP,
];

/// Runs one command of a stage.
///
/// A spawn error or a non-zero exit becomes the stage's failed output, so
/// callers can bail out with `?`.
pub(crate) async fn run_step(
    runner: &dyn CommandRunner,
    ctx: &StageContext,
    invocation: CommandInvocation,
) -> Result<CommandOutput, StageOutput> {
    let timeout = invocation
        .timeout
        .or_else(|| ctx.run().config().command_timeout());
    let invocation = invocation.timeout(timeout);

    info!(stage = %ctx.stage_name(), command = %invocation, "Running step");

    match runner.run(&invocation).await {
        Ok(output) if output.is_success() => Ok(output),
        Ok(output) => Err(StageOutput::failed_with_exit(
            format!("`{invocation}` failed: {}", output.failure_summary()),
            output.exit_code,
        )),
        Err(err) => Err(StageOutput::failed(err.to_string())),
    }
}

/// Starts a `git` invocation that authenticates with the access token, if
/// one is configured. The header is a secret argument.
pub(crate) fn git_with_auth(config: &ReleaseConfig) -> CommandInvocation {
    let git = CommandInvocation::new("git");
    match config.credentials.access_token.as_deref() {
        Some(token) if !token.is_empty() => {
            let basic = STANDARD.encode(format!("x-access-token:{token}"));
            git.arg("-c")
                .secret_arg(format!("http.extraheader=AUTHORIZATION: basic {basic}"))
        }
        _ => git,
    }
}

/// Removes a previous clone target so a re-run starts from a clean slate.
pub(crate) async fn reset_dir(dir: &Path) -> Result<(), StageOutput> {
    let result = async {
        if tokio::fs::try_exists(dir).await? {
            tokio::fs::remove_dir_all(dir).await?;
        }
        if let Some(parent) = dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok::<(), std::io::Error>(())
    }
    .await;

    result.map_err(|err| StageOutput::failed(format!("Cannot prepare {}: {err}", dir.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_with_auth_redacts_token() {
        let mut config = ReleaseConfig::default();
        assert_eq!(git_with_auth(&config).to_string(), "git");

        config.credentials.access_token = Some("ghp_secret".to_string());
        let git = git_with_auth(&config).args(["push", "origin", "main"]);

        assert_eq!(git.to_string(), "git -c *** push origin main");
        let expected = STANDARD.encode("x-access-token:ghp_secret");
        assert!(git.args[1].ends_with(&expected));
    }

    #[tokio::test]
    async fn test_reset_dir_removes_previous_clone() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("run-1").join("source");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("stale.txt"), "old").await.unwrap();

        reset_dir(&dir).await.unwrap();

        assert!(!dir.exists());
        assert!(dir.parent().unwrap().exists());
    }
}
