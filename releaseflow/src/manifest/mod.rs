//! Kubernetes manifest handling.
//!
//! The release only ever touches one line: the `image:` line of
//! `deployment.yaml`. Everything else in the manifest repository is applied
//! as-is.

use crate::core::ImageReference;
use crate::errors::{ManifestError, ReleaseflowError};
use regex::{Captures, Regex};
use std::path::{Path, PathBuf};

/// The deployment manifest whose image line is rewritten.
pub const DEPLOYMENT_MANIFEST: &str = "deployment.yaml";

/// Manifests applied by the deploy stage, in apply order.
pub const MANIFEST_FILES: [&str; 4] = [
    "name_space.yaml",
    DEPLOYMENT_MANIFEST,
    "service.yaml",
    "hpa.yaml",
];

/// Whether a rewrite changed the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestChange {
    /// The image line now points at the new reference.
    Updated,
    /// The manifest already pointed at the reference.
    Unchanged,
}

/// Returns the commit message recorded in the manifest repository.
#[must_use]
pub fn commit_message(run_number: u64) -> String {
    format!("Updated image tag to {run_number}")
}

/// Returns the manifest paths in apply order.
#[must_use]
pub fn manifest_paths(dir: &Path) -> Vec<PathBuf> {
    MANIFEST_FILES.iter().map(|file| dir.join(file)).collect()
}

/// Rewrites every `image:` line that points into `reference`'s repository.
///
/// Indentation, list markers, quoting and trailing comments are preserved;
/// any previous tag or `@sha256:` digest pin is replaced by the new tag.
/// Lines referencing other images are left alone.
pub fn rewrite_image_line(
    content: &str,
    reference: &ImageReference,
) -> Result<(String, ManifestChange), ManifestError> {
    let repository = reference.repository_path();
    let pattern = Regex::new(&format!(
        r#"(?m)^(?P<prefix>[ \t]*(?:-[ \t]+)?image:[ \t]*)(?P<open>["']?){}(?::[A-Za-z0-9_.\-]+)?(?:@sha256:[0-9A-Fa-f]+)?(?P<close>["']?)(?P<trail>[ \t]*(?:#[^\r\n]*)?\r?)$"#,
        regex::escape(&repository)
    ))?;

    if !pattern.is_match(content) {
        return Err(ManifestError::ImageLineNotFound {
            file: DEPLOYMENT_MANIFEST.to_string(),
            repository,
        });
    }

    let new_reference = reference.to_string();
    let rewritten = pattern
        .replace_all(content, |caps: &Captures<'_>| {
            format!(
                "{}{}{}{}{}",
                &caps["prefix"], &caps["open"], new_reference, &caps["close"], &caps["trail"]
            )
        })
        .into_owned();

    let change = if rewritten == content {
        ManifestChange::Unchanged
    } else {
        ManifestChange::Updated
    };
    Ok((rewritten, change))
}

/// Rewrites `deployment.yaml` in `dir` on disk.
pub async fn update_deployment_manifest(
    dir: &Path,
    reference: &ImageReference,
) -> Result<ManifestChange, ReleaseflowError> {
    let path = dir.join(DEPLOYMENT_MANIFEST);
    let content = tokio::fs::read_to_string(&path).await?;

    let (rewritten, change) = rewrite_image_line(&content, reference).map_err(|err| match err {
        ManifestError::ImageLineNotFound { repository, .. } => ManifestError::ImageLineNotFound {
            file: path.display().to_string(),
            repository,
        },
        other => other,
    })?;

    if change == ManifestChange::Updated {
        tokio::fs::write(&path, rewritten).await?;
    }
    Ok(change)
}
