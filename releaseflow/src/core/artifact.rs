//! Container image artifacts handed between stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

/// A fully qualified registry reference, e.g. `gcr.io/acme/web/irys-ui-img:42`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    /// Registry host (e.g., "gcr.io").
    pub registry: String,
    /// Cloud project identifier.
    pub project: String,
    /// Repository path inside the project.
    pub repository: String,
    /// Image name.
    pub image: String,
    /// Image tag.
    pub tag: String,
}

impl ImageReference {
    /// Creates a new image reference.
    #[must_use]
    pub fn new(
        registry: impl Into<String>,
        project: impl Into<String>,
        repository: impl Into<String>,
        image: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            registry: registry.into(),
            project: project.into(),
            repository: repository.into(),
            image: image.into(),
            tag: tag.into(),
        }
    }

    /// Returns the reference without its tag.
    #[must_use]
    pub fn repository_path(&self) -> String {
        [
            self.registry.as_str(),
            self.project.as_str(),
            self.repository.as_str(),
            self.image.as_str(),
        ]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/")
    }

    /// Returns a copy of this reference with a different tag.
    #[must_use]
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..self.clone()
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository_path(), self.tag)
    }
}

/// A built image, identified by the digest of its saved archive.
///
/// The build stage produces it, the orchestrator takes ownership and hands
/// it to downstream stages behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageArtifact {
    /// Registry reference the image is tagged with.
    pub reference: ImageReference,
    /// Location of the `docker save` archive.
    pub archive_path: PathBuf,
    /// Content digest of the archive (`sha256:<hex>`).
    pub digest: String,
    /// The stage that produced the artifact.
    pub produced_by: String,
    /// When the artifact was created.
    pub created_at: DateTime<Utc>,
}

impl ImageArtifact {
    /// Creates a new image artifact.
    #[must_use]
    pub fn new(
        reference: ImageReference,
        archive_path: impl Into<PathBuf>,
        digest: impl Into<String>,
        produced_by: impl Into<String>,
    ) -> Self {
        Self {
            reference,
            archive_path: archive_path.into(),
            digest: digest.into(),
            produced_by: produced_by.into(),
            created_at: Utc::now(),
        }
    }
}

/// Computes the `sha256:<hex>` digest of an archive on disk.
pub async fn archive_digest(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0_u8; 64 * 1024];

    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}
