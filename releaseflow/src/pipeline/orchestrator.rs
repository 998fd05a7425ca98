//! Run orchestration: trigger validation, run numbering, graph execution
//! and reporting.

use super::{release_pipeline, RunRegistry, StageGraph, StageRecord};
use crate::config::ReleaseConfig;
use crate::context::{RunContext, RunIdentity, TriggerEvent};
use crate::core::{RunStatus, StageStatus};
use crate::errors::ReleaseflowError;
use crate::events::{EventSink, NoOpEventSink, RUN_COMPLETED, RUN_STARTED};
use crate::exec::CommandRunner;
use crate::observability::run_span;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

/// The outcome of one run, as printed by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Run number; the image tag.
    pub run_number: u64,
    /// Correlation id of this execution.
    pub pipeline_run_id: Uuid,
    /// The trigger that started the run.
    pub trigger: TriggerEvent,
    /// Whether this execution re-ran an earlier run number.
    pub rerun: bool,
    /// The image reference the run builds and deploys.
    pub image: String,
    /// Digest of the saved image archive, if one was built.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_digest: Option<String>,
    /// Overall status.
    pub status: RunStatus,
    /// Per-stage records in execution order.
    pub stages: Vec<StageRecord>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Total execution time in milliseconds.
    pub duration_ms: f64,
}

impl RunReport {
    /// Returns true if every stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns the record of a stage.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Returns the final status of a stage.
    #[must_use]
    pub fn stage_status(&self, name: &str) -> Option<StageStatus> {
        self.stage(name).map(|s| s.status)
    }

    /// Serializes the report as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String, ReleaseflowError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Runs a stage graph for push triggers on the designated branch.
pub struct Orchestrator {
    config: Arc<ReleaseConfig>,
    graph: Arc<StageGraph>,
    registry: RunRegistry,
    event_sink: Arc<dyn EventSink>,
}

impl Orchestrator {
    /// Creates an orchestrator for an arbitrary graph.
    #[must_use]
    pub fn new(config: ReleaseConfig, graph: StageGraph) -> Self {
        Self {
            config: Arc::new(config),
            graph: Arc::new(graph),
            registry: RunRegistry::new(),
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Creates an orchestrator for the release pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is incomplete.
    pub fn release(config: ReleaseConfig, runner: Arc<dyn CommandRunner>) -> Result<Self, ReleaseflowError> {
        config.validate()?;
        Ok(Self::new(config, release_pipeline(runner)?))
    }

    /// Sets the run registry.
    #[must_use]
    pub fn with_registry(mut self, registry: RunRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Returns the run registry.
    #[must_use]
    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    /// Returns the stage graph.
    #[must_use]
    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    /// Starts a new run for a push.
    ///
    /// # Errors
    ///
    /// Returns an error if the branch is not the designated one or the
    /// scheduler fails. Earlier runs still executing on the branch do not
    /// block a new push. A failed stage is
    /// not an error: it is reported in the [`RunReport`].
    pub async fn run(&self, trigger: TriggerEvent) -> Result<RunReport, ReleaseflowError> {
        self.execute(trigger, None).await
    }

    /// Runs an already issued run number again.
    ///
    /// The image tag and workspace derive from the run number, so a re-run
    /// with unchanged inputs reproduces the same image and manifest.
    ///
    /// # Errors
    ///
    /// As [`run`](Self::run), plus [`ReleaseflowError::UnknownRun`] and
    /// [`ReleaseflowError::RunAlreadyActive`] when run `run_number` is
    /// still executing.
    pub async fn rerun(&self, trigger: TriggerEvent, run_number: u64) -> Result<RunReport, ReleaseflowError> {
        self.execute(trigger, Some(run_number)).await
    }

    async fn execute(&self, trigger: TriggerEvent, rerun: Option<u64>) -> Result<RunReport, ReleaseflowError> {
        let expected = &self.config.source.branch;
        if trigger.key() != expected.as_str() {
            warn!(branch = %trigger.key(), expected = %expected, "Ignoring push to undesignated branch");
            return Err(ReleaseflowError::UndesignatedBranch {
                branch: trigger.key().to_string(),
                expected: expected.clone(),
            });
        }

        let ticket = self.registry.begin(&trigger, rerun)?;
        let identity = RunIdentity::new(ticket.run_number(), trigger);
        let ctx = Arc::new(
            RunContext::new(identity, self.config.clone()).with_event_sink(self.event_sink.clone()),
        );

        info!(
            run_number = ctx.run_number(),
            pipeline_run_id = %ctx.identity().pipeline_run_id,
            trigger = %ctx.identity().trigger,
            image = %ctx.image(),
            rerun = ticket.is_rerun(),
            "Run started"
        );
        ctx.emit(
            RUN_STARTED,
            None,
            Some(serde_json::json!({
                "trigger": &ctx.identity().trigger,
                "image": ctx.image().to_string(),
                "rerun": ticket.is_rerun(),
            })),
        );

        let result = self
            .graph
            .execute(ctx.clone())
            .instrument(run_span(ctx.identity()))
            .await?;

        ctx.emit(
            RUN_COMPLETED,
            None,
            Some(serde_json::json!({
                "status": result.status,
                "failed_stages": result.failed_stages(),
                "duration_ms": result.duration_ms,
            })),
        );
        match result.status {
            RunStatus::Success => info!(run_number = ctx.run_number(), "Run succeeded"),
            RunStatus::Failure => warn!(
                run_number = ctx.run_number(),
                failed = ?result.failed_stages(),
                "Run failed"
            ),
        }

        let image_digest = result.artifacts.values().next().map(|a| a.digest.clone());
        Ok(RunReport {
            run_number: ctx.run_number(),
            pipeline_run_id: ctx.identity().pipeline_run_id,
            trigger: ctx.identity().trigger.clone(),
            rerun: ticket.is_rerun(),
            image: ctx.image().to_string(),
            image_digest,
            status: result.status,
            stages: result.records,
            started_at: ctx.started_at(),
            finished_at: Utc::now(),
            duration_ms: result.duration_ms,
        })
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("graph", &self.graph.name())
            .field("branch", &self.config.source.branch)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::pipeline::PipelineBuilder;
    use crate::testing::{test_config, MockStage};
    use std::time::Duration;

    fn orchestrator(stage: MockStage) -> Orchestrator {
        let graph = PipelineBuilder::new("single")
            .stage("only", Arc::new(stage), &[])
            .unwrap()
            .build()
            .unwrap();
        Orchestrator::new(test_config(&std::env::temp_dir().join("releaseflow-orch")), graph)
    }

    #[tokio::test]
    async fn test_rejects_undesignated_branch() {
        let orchestrator = orchestrator(MockStage::new("only"));

        let err = orchestrator.run(TriggerEvent::push("feature/x")).await.unwrap_err();

        assert!(matches!(err, ReleaseflowError::UndesignatedBranch { .. }));
        assert_eq!(orchestrator.registry().last_issued("feature/x"), None);
    }

    #[tokio::test]
    async fn test_run_numbers_increase() {
        let sink = Arc::new(CollectingEventSink::new());
        let orchestrator = orchestrator(MockStage::new("only")).with_event_sink(sink.clone());

        let first = orchestrator.run(TriggerEvent::push("refs/heads/main")).await.unwrap();
        let second = orchestrator.run(TriggerEvent::push("main")).await.unwrap();

        assert_eq!((first.run_number, second.run_number), (1, 2));
        assert_ne!(first.pipeline_run_id, second.pipeline_run_id);
        assert!(first.is_success());
        assert_eq!(first.image, "gcr.io/acme/web/irys-ui-img:1");
        assert_eq!(sink.events_of_type(RUN_STARTED).len(), 2);
        assert_eq!(sink.events_of_type(RUN_COMPLETED).len(), 2);
    }

    #[tokio::test]
    async fn test_overlapping_pushes_run_independently() {
        let orchestrator =
            orchestrator(MockStage::new("only").with_delay(Duration::from_millis(100)));

        let (first, second) = tokio::join!(
            orchestrator.run(TriggerEvent::push("main").with_commit("aaa")),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                orchestrator.run(TriggerEvent::push("main").with_commit("bbb")).await
            }
        );

        let (first, second) = (first.unwrap(), second.unwrap());
        assert_eq!((first.run_number, second.run_number), (1, 2));
        assert_ne!(first.pipeline_run_id, second.pipeline_run_id);
        assert!(first.is_success() && second.is_success());
        assert_eq!(first.trigger.commit.as_deref(), Some("aaa"));
        assert_eq!(second.trigger.commit.as_deref(), Some("bbb"));
        assert_eq!(second.image, "gcr.io/acme/web/irys-ui-img:2");
        assert!(orchestrator.registry().active_runs("main").is_empty());
    }

    #[tokio::test]
    async fn test_rerun_of_executing_run_rejected() {
        let orchestrator =
            orchestrator(MockStage::new("only").with_delay(Duration::from_millis(100)));

        let (first, rerun) = tokio::join!(
            orchestrator.run(TriggerEvent::push("main")),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                orchestrator.rerun(TriggerEvent::push("main"), 1).await
            }
        );

        assert_eq!(first.unwrap().run_number, 1);
        assert!(matches!(
            rerun.unwrap_err(),
            ReleaseflowError::RunAlreadyActive { run_number: 1, .. }
        ));
        assert!(orchestrator.registry().active_runs("main").is_empty());
    }

    #[tokio::test]
    async fn test_failed_stage_is_reported_not_raised() {
        let orchestrator = orchestrator(MockStage::failing("only", "boom"));

        let report = orchestrator.run(TriggerEvent::push("main")).await.unwrap();

        assert!(!report.is_success());
        assert_eq!(report.stage_status("only"), Some(StageStatus::Failed));
        assert_eq!(report.stage("only").unwrap().error(), Some("boom"));

        let json: serde_json::Value = serde_json::from_str(&report.to_json_pretty().unwrap()).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["stages"][0]["status"], "failed");
    }

    #[test]
    fn test_release_requires_complete_config() {
        let err = Orchestrator::release(
            ReleaseConfig::default(),
            Arc::new(crate::testing::ScriptedCommandRunner::new()),
        )
        .unwrap_err();
        assert!(matches!(err, ReleaseflowError::Config(_)));
    }
}
