//! Release configuration.
//!
//! Values are opaque to the orchestrator: they are only threaded into the
//! commands each stage invokes. A config is usually loaded from a TOML file
//! and then overridden from `RELEASEFLOW_*` environment variables.

use crate::core::ImageReference;
use crate::errors::ReleaseflowError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "RELEASEFLOW_";

/// Top-level configuration of a release pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseConfig {
    /// Source checkout settings.
    #[serde(default)]
    pub source: SourceConfig,
    /// Container registry coordinates.
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Manifest repository settings.
    #[serde(default)]
    pub manifests: ManifestRepoConfig,
    /// Target cluster settings.
    #[serde(default)]
    pub cluster: ClusterConfig,
    /// Dependency audit settings.
    #[serde(default)]
    pub audit: AuditConfig,
    /// Workspace and cleanup settings.
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    /// Credentials handed to external tools.
    #[serde(default)]
    pub credentials: Credentials,
}

/// Where the application source comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Clone URL of the application repository.
    #[serde(default)]
    pub repository_url: String,
    /// The branch whose pushes trigger releases.
    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_branch() -> String {
    "main".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            repository_url: String::new(),
            branch: default_branch(),
        }
    }
}

/// Container registry coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry host.
    #[serde(default = "default_registry_host")]
    pub host: String,
    /// Cloud project identifier.
    #[serde(default)]
    pub project: String,
    /// Repository path within the project.
    #[serde(default)]
    pub repository: String,
    /// Image name.
    #[serde(default = "default_image")]
    pub image: String,
}

fn default_registry_host() -> String {
    "gcr.io".to_string()
}

fn default_image() -> String {
    "irys-ui-img".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            host: default_registry_host(),
            project: String::new(),
            repository: String::new(),
            image: default_image(),
        }
    }
}

/// The repository holding the Kubernetes manifests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestRepoConfig {
    /// Clone URL of the manifest repository.
    #[serde(default)]
    pub repository_url: String,
    /// Branch that receives the image tag commit.
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Directory inside the repository holding the manifests.
    #[serde(default)]
    pub path: String,
    /// Commit author name.
    #[serde(default = "default_author_name")]
    pub author_name: String,
    /// Commit author email.
    #[serde(default = "default_author_email")]
    pub author_email: String,
}

fn default_author_name() -> String {
    "releaseflow".to_string()
}

fn default_author_email() -> String {
    "releaseflow@users.noreply.github.com".to_string()
}

impl Default for ManifestRepoConfig {
    fn default() -> Self {
        Self {
            repository_url: String::new(),
            branch: default_branch(),
            path: String::new(),
            author_name: default_author_name(),
            author_email: default_author_email(),
        }
    }
}

/// The cluster the release is deployed to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cluster name.
    #[serde(default)]
    pub name: String,
    /// Cluster zone.
    #[serde(default)]
    pub zone: String,
    /// Deployment to watch and roll back.
    #[serde(default)]
    pub deployment: String,
    /// Namespace of the deployment, if not the default one.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Bound on the rollout wait after a failed deploy, in seconds.
    #[serde(default = "default_rollout_timeout")]
    pub rollout_timeout_secs: u64,
}

fn default_rollout_timeout() -> u64 {
    120
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            zone: String::new(),
            deployment: String::new(),
            namespace: None,
            rollout_timeout_secs: default_rollout_timeout(),
        }
    }
}

impl ClusterConfig {
    /// Returns the rollout timeout.
    #[must_use]
    pub fn rollout_timeout(&self) -> Duration {
        Duration::from_secs(self.rollout_timeout_secs)
    }
}

/// Dependency audit settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Command line of the audit tool, run inside the source checkout.
    #[serde(default = "default_audit_command")]
    pub command: Vec<String>,
}

fn default_audit_command() -> Vec<String> {
    vec![
        "npm".to_string(),
        "audit".to_string(),
        "--audit-level=high".to_string(),
    ]
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            command: default_audit_command(),
        }
    }
}

/// Workspace layout and cleanup behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Root directory; each run works in `<root>/run-<number>`.
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,
    /// Keep the run directory after cleanup (for debugging).
    #[serde(default)]
    pub keep: bool,
    /// Upper bound for any single external command, in seconds.
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from(".releaseflow")
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
            keep: false,
            command_timeout_secs: None,
        }
    }
}

/// Credentials passed to external tools. Never printed.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    /// Service account key file for the cloud CLI.
    #[serde(default)]
    pub service_account_key: Option<PathBuf>,
    /// Personal access token for the manifest repository.
    #[serde(default)]
    pub access_token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("service_account_key", &self.service_account_key)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl ReleaseConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from TOML.
    pub fn from_toml_str(content: &str) -> Result<Self, ReleaseflowError> {
        Ok(toml::from_str(content)?)
    }

    /// Loads a configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ReleaseflowError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReleaseflowError::Config(format!("Cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Applies overrides from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary lookup, keyed by full variable name.
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = var("SOURCE_REPOSITORY") {
            self.source.repository_url = v;
        }
        if let Some(v) = var("BRANCH") {
            self.source.branch = v;
        }
        if let Some(v) = var("REGISTRY_HOST") {
            self.registry.host = v;
        }
        if let Some(v) = var("PROJECT_ID") {
            self.registry.project = v;
        }
        if let Some(v) = var("REPOSITORY") {
            self.registry.repository = v;
        }
        if let Some(v) = var("IMAGE_NAME") {
            self.registry.image = v;
        }
        if let Some(v) = var("MANIFEST_REPOSITORY") {
            self.manifests.repository_url = v;
        }
        if let Some(v) = var("CLUSTER_NAME") {
            self.cluster.name = v;
        }
        if let Some(v) = var("CLUSTER_ZONE") {
            self.cluster.zone = v;
        }
        if let Some(v) = var("DEPLOYMENT_NAME") {
            self.cluster.deployment = v;
        }
        if let Some(v) = var("NAMESPACE") {
            self.cluster.namespace = Some(v);
        }
        if let Some(v) = var("SERVICE_ACCOUNT_KEY") {
            self.credentials.service_account_key = Some(PathBuf::from(v));
        }
        if let Some(v) = var("ACCESS_TOKEN") {
            self.credentials.access_token = Some(v);
        }
        self
    }

    /// Sets the registry coordinates.
    #[must_use]
    pub fn with_registry(
        mut self,
        project: impl Into<String>,
        repository: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        self.registry.project = project.into();
        self.registry.repository = repository.into();
        self.registry.image = image.into();
        self
    }

    /// Sets the workspace root.
    #[must_use]
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace.root = root.into();
        self
    }

    /// Returns the image reference for a tag.
    #[must_use]
    pub fn image_reference(&self, tag: impl Into<String>) -> ImageReference {
        ImageReference::new(
            &self.registry.host,
            &self.registry.project,
            &self.registry.repository,
            &self.registry.image,
            tag,
        )
    }

    /// Returns the per-command timeout, if configured.
    #[must_use]
    pub fn command_timeout(&self) -> Option<Duration> {
        self.workspace.command_timeout_secs.map(Duration::from_secs)
    }

    /// Checks that every value the stages need is present.
    pub fn validate(&self) -> Result<(), ReleaseflowError> {
        let required = [
            ("source.repository_url", &self.source.repository_url),
            ("source.branch", &self.source.branch),
            ("registry.host", &self.registry.host),
            ("registry.project", &self.registry.project),
            ("registry.image", &self.registry.image),
            ("manifests.repository_url", &self.manifests.repository_url),
            ("cluster.name", &self.cluster.name),
            ("cluster.zone", &self.cluster.zone),
            ("cluster.deployment", &self.cluster.deployment),
        ];

        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();

        if !missing.is_empty() {
            return Err(ReleaseflowError::Config(format!(
                "missing required values: {}",
                missing.join(", ")
            )));
        }

        if self.audit.command.is_empty() {
            return Err(ReleaseflowError::Config(
                "audit.command must name a program".to_string(),
            ));
        }

        Ok(())
    }
}
