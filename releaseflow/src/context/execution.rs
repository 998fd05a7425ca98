//! Immutable run context and per-stage contexts.

use super::{RunIdentity, StageInputs};
use crate::config::ReleaseConfig;
use crate::core::ImageReference;
use crate::events::{EventSink, NoOpEventSink, PipelineEvent};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything a run knows up front, built once when the run starts.
///
/// Stages receive it behind an `Arc` and cannot change it; anything a stage
/// learns travels through its [`StageOutput`](crate::core::StageOutput).
pub struct RunContext {
    identity: RunIdentity,
    config: Arc<ReleaseConfig>,
    image: ImageReference,
    workspace: PathBuf,
    event_sink: Arc<dyn EventSink>,
    started_at: DateTime<Utc>,
}

impl RunContext {
    /// Creates a run context. The image tag and workspace derive from the
    /// run number, so re-runs of the same number see the same values.
    #[must_use]
    pub fn new(identity: RunIdentity, config: Arc<ReleaseConfig>) -> Self {
        let image = config.image_reference(identity.image_tag());
        let workspace = config
            .workspace
            .root
            .join(format!("run-{}", identity.run_number));

        Self {
            identity,
            config,
            image,
            workspace,
            event_sink: Arc::new(NoOpEventSink),
            started_at: Utc::now(),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Returns the run identity.
    #[must_use]
    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    /// Returns the run number.
    #[must_use]
    pub fn run_number(&self) -> u64 {
        self.identity.run_number
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ReleaseConfig {
        &self.config
    }

    /// Returns the image reference this run builds and deploys.
    #[must_use]
    pub fn image(&self) -> &ImageReference {
        &self.image
    }

    /// Returns when the run started.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Returns the run's private working directory.
    #[must_use]
    pub fn workspace_dir(&self) -> &Path {
        &self.workspace
    }

    /// Returns where the application source is checked out.
    #[must_use]
    pub fn source_dir(&self) -> PathBuf {
        self.workspace.join("source")
    }

    /// Returns where the manifest repository is cloned.
    #[must_use]
    pub fn manifest_repo_dir(&self) -> PathBuf {
        self.workspace.join("manifests")
    }

    /// Returns the directory holding the manifest files.
    #[must_use]
    pub fn manifest_dir(&self) -> PathBuf {
        let path = self.config.manifests.path.trim_matches('/');
        if path.is_empty() {
            self.manifest_repo_dir()
        } else {
            self.manifest_repo_dir().join(path)
        }
    }

    /// Returns the path of the saved image archive.
    #[must_use]
    pub fn archive_path(&self) -> PathBuf {
        self.workspace.join(format!("image-{}.tar", self.image.tag))
    }

    /// Emits an event tagged with this run's identity.
    pub fn emit(&self, event_type: &str, stage: Option<&str>, data: Option<serde_json::Value>) {
        self.event_sink.emit(PipelineEvent {
            event_type: event_type.to_string(),
            run_number: self.identity.run_number,
            pipeline_run_id: self.identity.pipeline_run_id,
            stage: stage.map(String::from),
            data,
            timestamp: Utc::now(),
        });
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("identity", &self.identity)
            .field("image", &self.image.to_string())
            .field("workspace", &self.workspace)
            .finish_non_exhaustive()
    }
}

/// The context handed to a single stage execution.
#[derive(Debug, Clone)]
pub struct StageContext {
    run: Arc<RunContext>,
    stage_name: String,
    inputs: StageInputs,
}

impl StageContext {
    /// Creates a stage context.
    #[must_use]
    pub fn new(run: Arc<RunContext>, stage_name: impl Into<String>, inputs: StageInputs) -> Self {
        Self {
            run,
            stage_name: stage_name.into(),
            inputs,
        }
    }

    /// Returns the run context.
    #[must_use]
    pub fn run(&self) -> &RunContext {
        &self.run
    }

    /// Returns the stage name.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    /// Returns the outputs of upstream stages.
    #[must_use]
    pub fn inputs(&self) -> &StageInputs {
        &self.inputs
    }

    /// Emits an event for this stage.
    pub fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.run.emit(event_type, Some(&self.stage_name), data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TriggerEvent;
    use crate::events::CollectingEventSink;

    fn config() -> Arc<ReleaseConfig> {
        Arc::new(
            ReleaseConfig::default()
                .with_registry("acme", "web", "irys-ui-img")
                .with_workspace_root("/var/releaseflow"),
        )
    }

    #[test]
    fn test_paths_derive_from_run_number() {
        let ctx = RunContext::new(RunIdentity::new(42, TriggerEvent::push("main")), config());

        assert_eq!(ctx.image().to_string(), "gcr.io/acme/web/irys-ui-img:42");
        assert_eq!(ctx.workspace_dir(), Path::new("/var/releaseflow/run-42"));
        assert_eq!(ctx.source_dir(), PathBuf::from("/var/releaseflow/run-42/source"));
        assert_eq!(
            ctx.archive_path(),
            PathBuf::from("/var/releaseflow/run-42/image-42.tar")
        );
        assert_eq!(ctx.manifest_dir(), ctx.manifest_repo_dir());
    }

    #[test]
    fn test_manifest_subdirectory() {
        let mut config = ReleaseConfig::default();
        config.manifests.path = "/k8s/irys-ui/".to_string();
        let ctx = RunContext::new(
            RunIdentity::new(1, TriggerEvent::push("main")),
            Arc::new(config),
        );
        assert_eq!(ctx.manifest_dir(), ctx.manifest_repo_dir().join("k8s/irys-ui"));
    }

    #[test]
    fn test_stage_emit_carries_identity() {
        let sink = Arc::new(CollectingEventSink::new());
        let identity = RunIdentity::new(3, TriggerEvent::push("main"));
        let run_id = identity.pipeline_run_id;
        let run = Arc::new(RunContext::new(identity, config()).with_event_sink(sink.clone()));

        let stage = StageContext::new(run, "checkout", StageInputs::default());
        stage.emit("stage.started", None);

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].run_number, 3);
        assert_eq!(events[0].pipeline_run_id, run_id);
        assert_eq!(events[0].stage.as_deref(), Some("checkout"));
    }
}
