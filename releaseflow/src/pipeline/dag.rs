//! StageGraph DAG execution engine.
//!
//! Executes stages as soon as their run condition holds, allowing for
//! maximum parallelism. Failures skip dependents instead of aborting the
//! graph, so stages with [`RunCondition::AllTerminal`] always run.

use super::{RunCondition, StageSpec};
use crate::context::{RunContext, StageContext, StageInputs};
use crate::core::{ImageArtifact, RunStatus, StageOutput, StageStatus};
use crate::errors::ReleaseflowError;
use crate::events::{STAGE_COMPENSATED, STAGE_FAILED, STAGE_SKIPPED, STAGE_STARTED, STAGE_SUCCEEDED};
use crate::observability::stage_span;
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinError;
use tracing::{debug, info, warn, Instrument};

/// What happened to one stage during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    /// Stage name.
    pub name: String,
    /// Final status.
    pub status: StageStatus,
    /// When the stage started; `None` for skipped stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the stage reached its terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Execution time in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    /// The stage's output; `None` for skipped stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<StageOutput>,
    /// Why the stage was skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl StageRecord {
    fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: StageStatus::Pending,
            started_at: None,
            ended_at: None,
            duration_ms: None,
            output: None,
            skip_reason: None,
        }
    }

    /// Returns the error of a failed stage.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.output.as_ref().and_then(|o| o.error.as_deref())
    }
}

/// Result of executing a stage graph.
#[derive(Debug)]
pub struct GraphExecutionResult {
    /// Per-stage records in execution order.
    pub records: Vec<StageRecord>,
    /// Images produced during the run, keyed by producing stage.
    pub artifacts: HashMap<String, Arc<ImageArtifact>>,
    /// Overall status: success only when every stage succeeded.
    pub status: RunStatus,
    /// Total execution time in milliseconds.
    pub duration_ms: f64,
}

impl GraphExecutionResult {
    /// Returns the record of a stage.
    #[must_use]
    pub fn record(&self, stage: &str) -> Option<&StageRecord> {
        self.records.iter().find(|r| r.name == stage)
    }

    /// Returns the final status of a stage.
    #[must_use]
    pub fn status_of(&self, stage: &str) -> Option<StageStatus> {
        self.record(stage).map(|r| r.status)
    }

    /// Returns the names of failed stages.
    #[must_use]
    pub fn failed_stages(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter(|r| r.status == StageStatus::Failed)
            .map(|r| r.name.as_str())
            .collect()
    }
}

/// A directed acyclic graph of stages for execution.
#[derive(Debug)]
pub struct StageGraph {
    name: String,
    stages: HashMap<String, StageSpec>,
    /// Execution order (topologically sorted).
    execution_order: Vec<String>,
    /// Transitive dependencies of every stage.
    ancestors: HashMap<String, BTreeSet<String>>,
}

impl StageGraph {
    /// Creates a new stage graph. `stages` must already be validated.
    #[must_use]
    pub fn new(name: String, stages: HashMap<String, StageSpec>, stage_order: Vec<String>) -> Self {
        let execution_order = topological_sort(&stages, &stage_order);
        let ancestors = transitive_ancestors(&stages, &execution_order);

        Self {
            name,
            stages,
            execution_order,
            ancestors,
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns the execution order.
    #[must_use]
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Returns the specification of a stage.
    #[must_use]
    pub fn spec(&self, stage: &str) -> Option<&StageSpec> {
        self.stages.get(stage)
    }

    /// Returns every stage `stage` transitively depends on.
    #[must_use]
    pub fn ancestors(&self, stage: &str) -> Option<&BTreeSet<String>> {
        self.ancestors.get(stage)
    }

    /// Executes the stage graph.
    ///
    /// Every stage ends up `succeeded`, `failed` or `skipped`. A stage runs
    /// once its run condition holds; if a dependency of an
    /// [`RunCondition::AllSucceeded`] stage fails or is skipped, the stage is
    /// skipped without running.
    ///
    /// # Errors
    ///
    /// Returns an error only if the scheduler itself breaks an invariant.
    pub async fn execute(&self, ctx: Arc<RunContext>) -> Result<GraphExecutionResult, ReleaseflowError> {
        let start = Instant::now();
        let mut state = RunState::new(&self.execution_order);
        let mut active = FuturesUnordered::new();

        info!(
            pipeline = %self.name,
            run_number = ctx.run_number(),
            stages = self.stages.len(),
            "Executing stage graph"
        );

        loop {
            for stage_name in self.schedule(&ctx, &mut state)? {
                active.push(self.spawn_stage_task(stage_name, &ctx, &state));
            }

            let Some((stage_name, joined)) = active.next().await else {
                break;
            };
            let output = match joined {
                Ok(output) => output,
                Err(err) => {
                    warn!(stage = %stage_name, error = %err, "Stage task panicked");
                    StageOutput::failed(format!("Stage task panicked: {err}"))
                }
            };
            self.finish_stage(&ctx, &mut state, &stage_name, output)?;
        }

        let pending: Vec<&str> = self
            .execution_order
            .iter()
            .filter(|name| !state.status(name).is_terminal())
            .map(String::as_str)
            .collect();
        if !pending.is_empty() {
            return Err(ReleaseflowError::Internal(format!(
                "Deadlocked stage graph; remaining stages: {pending:?}"
            )));
        }

        let records: Vec<StageRecord> = self
            .execution_order
            .iter()
            .filter_map(|name| state.records.remove(name))
            .collect();
        let status = RunStatus::from_stages(records.iter().map(|r| &r.status));

        Ok(GraphExecutionResult {
            records,
            artifacts: state.artifacts,
            status,
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
        })
    }

    /// Skips stages whose dependencies can no longer satisfy them and
    /// returns the stages that are ready to start.
    fn schedule(&self, ctx: &RunContext, state: &mut RunState) -> Result<Vec<String>, ReleaseflowError> {
        let mut ready = Vec::new();

        // Topological order makes skips cascade in a single pass.
        for name in &self.execution_order {
            if state.status(name) != StageStatus::Pending {
                continue;
            }
            let Some(spec) = self.stages.get(name) else {
                continue;
            };

            match readiness(spec, self.ancestors.get(name), state) {
                Readiness::Wait => {}
                Readiness::Ready => {
                    state.transition(name, StageStatus::Running)?;
                    ready.push(name.clone());
                }
                Readiness::Skip(reason) => {
                    state.transition(name, StageStatus::Skipped)?;
                    info!(stage = %name, reason = %reason, "Skipping stage");
                    ctx.emit(
                        STAGE_SKIPPED,
                        Some(name.as_str()),
                        Some(serde_json::json!({ "reason": &reason })),
                    );
                    if let Some(record) = state.records.get_mut(name) {
                        record.skip_reason = Some(reason);
                        record.ended_at = Some(Utc::now());
                    }
                }
            }
        }

        Ok(ready)
    }

    /// Spawns a task to execute a single stage and its compensation.
    fn spawn_stage_task(
        &self,
        stage_name: String,
        ctx: &Arc<RunContext>,
        state: &RunState,
    ) -> impl Future<Output = (String, Result<StageOutput, JoinError>)> {
        let spec = self.stages.get(&stage_name).cloned();
        let inputs = self.inputs_for(&stage_name, state);
        let stage_ctx = StageContext::new(ctx.clone(), stage_name.clone(), inputs);
        let span = stage_span(ctx.run_number(), &stage_name);

        debug!(stage = %stage_name, "Spawning stage task");
        ctx.emit(STAGE_STARTED, Some(stage_name.as_str()), None);

        let handle = tokio::spawn(async move {
            let Some(spec) = spec else {
                return StageOutput::failed(format!("Stage '{}' is not defined", stage_ctx.stage_name()));
            };

            let output = spec.runner.execute(&stage_ctx).await;
            if output.is_success() {
                return output;
            }

            match spec.compensation {
                Some(compensation) => {
                    let record = compensation.compensate(&stage_ctx, &output).await;
                    stage_ctx.emit(
                        STAGE_COMPENSATED,
                        Some(serde_json::json!({
                            "compensation": &record.name,
                            "outcome": record.outcome,
                            "commands": &record.commands,
                        })),
                    );
                    output.with_compensation(record)
                }
                None => output,
            }
        }
        .instrument(span));

        handle.map(move |joined| (stage_name, joined))
    }

    /// Records a finished stage.
    fn finish_stage(
        &self,
        ctx: &RunContext,
        state: &mut RunState,
        stage_name: &str,
        mut output: StageOutput,
    ) -> Result<(), ReleaseflowError> {
        let status = if output.is_success() {
            StageStatus::Succeeded
        } else {
            StageStatus::Failed
        };
        output.status = status;
        state.transition(stage_name, status)?;

        if let Some(artifact) = output.artifact.take() {
            if status == StageStatus::Succeeded {
                state.artifacts.insert(stage_name.to_string(), Arc::new(artifact));
            }
        }
        if status == StageStatus::Succeeded {
            state.data.insert(stage_name.to_string(), output.data.clone());
        }

        let now = Utc::now();
        let duration_ms = state.started.get(stage_name).map(|t| t.elapsed().as_secs_f64() * 1000.0);

        if status == StageStatus::Succeeded {
            info!(stage = %stage_name, duration_ms = ?duration_ms, "Stage succeeded");
            ctx.emit(
                STAGE_SUCCEEDED,
                Some(stage_name),
                Some(serde_json::json!({ "duration_ms": duration_ms })),
            );
        } else {
            warn!(stage = %stage_name, error = ?output.error, exit_code = ?output.exit_code, "Stage failed");
            ctx.emit(
                STAGE_FAILED,
                Some(stage_name),
                Some(serde_json::json!({
                    "error": &output.error,
                    "exit_code": output.exit_code,
                    "duration_ms": duration_ms,
                })),
            );
        }

        if let Some(record) = state.records.get_mut(stage_name) {
            record.ended_at = Some(now);
            record.duration_ms = duration_ms;
            record.output = Some(output);
        }
        Ok(())
    }

    /// Collects the outputs of the succeeded ancestors of a stage.
    fn inputs_for(&self, stage_name: &str, state: &RunState) -> StageInputs {
        let Some(ancestors) = self.ancestors.get(stage_name) else {
            return StageInputs::default();
        };

        let artifacts = ancestors
            .iter()
            .filter_map(|a| state.artifacts.get(a).map(|art| (a.clone(), art.clone())))
            .collect();
        let data = ancestors
            .iter()
            .filter_map(|a| state.data.get(a).map(|d| (a.clone(), d.clone())))
            .collect();
        StageInputs::new(artifacts, data)
    }
}

enum Readiness {
    Wait,
    Ready,
    Skip(String),
}

/// `AllTerminal` stages wait for every transitive ancestor, not only their
/// direct dependencies: a dependency may be skipped early while a sibling
/// branch further up is still running.
fn readiness(spec: &StageSpec, ancestors: Option<&BTreeSet<String>>, state: &RunState) -> Readiness {
    match spec.run_condition {
        RunCondition::AllSucceeded => {
            for dep in &spec.dependencies {
                match state.status(dep) {
                    StageStatus::Succeeded => {}
                    StageStatus::Failed => return Readiness::Skip(format!("dependency '{dep}' failed")),
                    StageStatus::Skipped => {
                        return Readiness::Skip(format!("dependency '{dep}' was skipped"));
                    }
                    StageStatus::Pending | StageStatus::Running => return Readiness::Wait,
                }
            }
            Readiness::Ready
        }
        RunCondition::AllTerminal => {
            let upstream = ancestors.unwrap_or(&spec.dependencies);
            if upstream.iter().all(|stage| state.status(stage).is_terminal()) {
                Readiness::Ready
            } else {
                Readiness::Wait
            }
        }
    }
}

/// Mutable bookkeeping of one graph execution, owned by the scheduler.
struct RunState {
    records: HashMap<String, StageRecord>,
    started: HashMap<String, Instant>,
    artifacts: HashMap<String, Arc<ImageArtifact>>,
    data: HashMap<String, HashMap<String, serde_json::Value>>,
}

impl RunState {
    fn new(order: &[String]) -> Self {
        Self {
            records: order.iter().map(|n| (n.clone(), StageRecord::pending(n))).collect(),
            started: HashMap::new(),
            artifacts: HashMap::new(),
            data: HashMap::new(),
        }
    }

    fn status(&self, stage: &str) -> StageStatus {
        self.records.get(stage).map_or(StageStatus::Pending, |r| r.status)
    }

    /// Moves a stage to `next`, refusing anything but the legal transitions.
    fn transition(&mut self, stage: &str, next: StageStatus) -> Result<(), ReleaseflowError> {
        let record = self
            .records
            .get_mut(stage)
            .ok_or_else(|| ReleaseflowError::Internal(format!("Unknown stage '{stage}'")))?;

        if !record.status.can_transition_to(next) {
            return Err(ReleaseflowError::IllegalTransition {
                stage: stage.to_string(),
                from: record.status.to_string(),
                to: next.to_string(),
            });
        }
        record.status = next;
        if next == StageStatus::Running {
            record.started_at = Some(Utc::now());
            self.started.insert(stage.to_string(), Instant::now());
        }
        Ok(())
    }
}

/// Performs topological sort on the stage graph.
fn topological_sort(stages: &HashMap<String, StageSpec>, stage_order: &[String]) -> Vec<String> {
    fn visit(
        node: &str,
        stages: &HashMap<String, StageSpec>,
        visited: &mut HashSet<String>,
        temp_visited: &mut HashSet<String>,
        result: &mut Vec<String>,
    ) {
        if visited.contains(node) || temp_visited.contains(node) {
            return;
        }
        temp_visited.insert(node.to_string());

        if let Some(spec) = stages.get(node) {
            for dep in &spec.dependencies {
                visit(dep, stages, visited, temp_visited, result);
            }
        }

        temp_visited.remove(node);
        visited.insert(node.to_string());
        result.push(node.to_string());
    }

    let mut result = Vec::new();
    let mut visited = HashSet::new();
    let mut temp_visited = HashSet::new();

    // Visit in insertion order for determinism
    for name in stage_order {
        visit(name, stages, &mut visited, &mut temp_visited, &mut result);
    }

    result
}

fn transitive_ancestors(
    stages: &HashMap<String, StageSpec>,
    order: &[String],
) -> HashMap<String, BTreeSet<String>> {
    let mut ancestors: HashMap<String, BTreeSet<String>> = HashMap::new();

    // Dependencies come first in `order`, so their sets are complete.
    for name in order {
        let mut set = BTreeSet::new();
        if let Some(spec) = stages.get(name) {
            for dep in &spec.dependencies {
                set.insert(dep.clone());
                if let Some(inherited) = ancestors.get(dep) {
                    set.extend(inherited.iter().cloned());
                }
            }
        }
        ancestors.insert(name.clone(), set);
    }
    ancestors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CompensationOutcome, CompensationRecord, ImageReference};
    use crate::events::CollectingEventSink;
    use crate::pipeline::PipelineBuilder;
    use crate::stages::{Compensation, FnStage, Stage};
    use crate::testing::{test_run_context, MockStage};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn run_context(sink: Arc<CollectingEventSink>) -> Arc<RunContext> {
        Arc::new(test_run_context(&std::env::temp_dir().join("releaseflow-fixture")).with_event_sink(sink))
    }

    #[derive(Debug)]
    struct PanickingStage;

    #[async_trait]
    impl Stage for PanickingStage {
        fn name(&self) -> &str {
            "panics"
        }

        async fn execute(&self, _ctx: &StageContext) -> StageOutput {
            panic!("stage blew up")
        }
    }

    #[derive(Debug, Default)]
    struct CountingCompensation {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl Compensation for CountingCompensation {
        fn name(&self) -> &str {
            "counting"
        }

        async fn compensate(&self, _ctx: &StageContext, failure: &StageOutput) -> CompensationRecord {
            *self.calls.lock() += 1;
            CompensationRecord::new(self.name(), CompensationOutcome::RolledBack)
                .with_detail(failure.error.clone().unwrap_or_default())
        }
    }

    fn chain(failing: Option<&str>) -> StageGraph {
        let stage = |name: &str| -> Arc<dyn Stage> {
            if Some(name) == failing {
                Arc::new(MockStage::failing(name, format!("{name} broke")))
            } else {
                Arc::new(MockStage::new(name))
            }
        };
        PipelineBuilder::new("chain")
            .stage("a", stage("a"), &[])
            .unwrap()
            .stage("b", stage("b"), &["a"])
            .unwrap()
            .stage("c", stage("c"), &["b"])
            .unwrap()
            .spec(
                StageSpec::new("finally", stage("finally"))
                    .with_dependency("c")
                    .with_run_condition(RunCondition::AllTerminal),
            )
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_topological_order_and_ancestors() {
        let graph = chain(None);
        assert_eq!(graph.execution_order(), ["a", "b", "c", "finally"]);
        assert_eq!(
            graph.ancestors("finally").unwrap().iter().collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
        assert!(graph.ancestors("a").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_all_stages_succeed() {
        let sink = Arc::new(CollectingEventSink::new());
        let result = chain(None).execute(run_context(sink.clone())).await.unwrap();

        assert_eq!(result.status, RunStatus::Success);
        assert!(result.records.iter().all(|r| r.status == StageStatus::Succeeded));
        assert_eq!(sink.events_of_type(STAGE_STARTED).len(), 4);
        assert_eq!(sink.events_of_type(STAGE_SUCCEEDED).len(), 4);
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_but_not_finally() {
        let sink = Arc::new(CollectingEventSink::new());
        let result = chain(Some("a")).execute(run_context(sink.clone())).await.unwrap();

        assert_eq!(result.status, RunStatus::Failure);
        assert_eq!(result.status_of("a"), Some(StageStatus::Failed));
        assert_eq!(result.status_of("b"), Some(StageStatus::Skipped));
        assert_eq!(result.status_of("c"), Some(StageStatus::Skipped));
        assert_eq!(result.status_of("finally"), Some(StageStatus::Succeeded));
        assert_eq!(
            result.record("b").unwrap().skip_reason.as_deref(),
            Some("dependency 'a' failed")
        );
        assert_eq!(
            result.record("c").unwrap().skip_reason.as_deref(),
            Some("dependency 'b' was skipped")
        );
        assert_eq!(result.failed_stages(), vec!["a"]);
        assert_eq!(sink.count_for_stage(STAGE_SUCCEEDED, "finally"), 1);
        assert_eq!(sink.count_for_stage(STAGE_STARTED, "b"), 0);
    }

    #[tokio::test]
    async fn test_finally_failure_fails_run() {
        let result = chain(Some("finally"))
            .execute(run_context(Arc::new(CollectingEventSink::new())))
            .await
            .unwrap();
        assert_eq!(result.status, RunStatus::Failure);
        assert_eq!(result.failed_stages(), vec!["finally"]);
    }

    #[tokio::test]
    async fn test_finally_waits_for_every_ancestor() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let stage = |mock: MockStage| -> Arc<dyn Stage> { Arc::new(mock.with_journal(journal.clone())) };

        let graph = PipelineBuilder::new("fan-in")
            .stage("root", stage(MockStage::new("root")), &[])
            .unwrap()
            .stage(
                "slow",
                stage(MockStage::new("slow").with_delay(Duration::from_millis(200))),
                &["root"],
            )
            .unwrap()
            .stage("bad", stage(MockStage::failing("bad", "broken")), &["root"])
            .unwrap()
            .stage("deploy", stage(MockStage::new("deploy")), &["slow", "bad"])
            .unwrap()
            .spec(
                StageSpec::new("cleanup", stage(MockStage::new("cleanup")))
                    .with_dependency("deploy")
                    .with_run_condition(RunCondition::AllTerminal),
            )
            .unwrap()
            .build()
            .unwrap();

        let result = graph
            .execute(run_context(Arc::new(CollectingEventSink::new())))
            .await
            .unwrap();

        assert_eq!(result.status_of("deploy"), Some(StageStatus::Skipped));
        assert_eq!(result.status_of("slow"), Some(StageStatus::Succeeded));
        assert_eq!(result.status_of("cleanup"), Some(StageStatus::Succeeded));

        let journal = journal.lock().clone();
        let position = |entry: &str| journal.iter().position(|e| e == entry).unwrap();
        assert!(position("slow:end") < position("cleanup:start"));
        assert_eq!(journal.last().map(String::as_str), Some("cleanup:end"));
    }

    #[tokio::test]
    async fn test_independent_stages_run_concurrently() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let slow = |name: &str| -> Arc<dyn Stage> {
            Arc::new(
                MockStage::new(name)
                    .with_delay(Duration::from_millis(50))
                    .with_journal(journal.clone()),
            )
        };
        let graph = PipelineBuilder::new("fan")
            .stage("root", slow("root"), &[])
            .unwrap()
            .stage("left", slow("left"), &["root"])
            .unwrap()
            .stage("right", slow("right"), &["root"])
            .unwrap()
            .stage("join", slow("join"), &["left", "right"])
            .unwrap()
            .build()
            .unwrap();

        let result = graph
            .execute(run_context(Arc::new(CollectingEventSink::new())))
            .await
            .unwrap();
        assert_eq!(result.status, RunStatus::Success);

        let journal = journal.lock().clone();
        let pos = |entry: &str| journal.iter().position(|e| e == entry).unwrap();
        assert!(pos("root:end") < pos("left:start"));
        assert!(pos("left:start") < pos("right:end"));
        assert!(pos("right:start") < pos("left:end"));
        assert!(pos("left:end") < pos("join:start"));
        assert!(pos("right:end") < pos("join:start"));
    }

    #[tokio::test]
    async fn test_panicking_stage_is_failed() {
        let graph = PipelineBuilder::new("panic")
            .stage("panics", Arc::new(PanickingStage), &[])
            .unwrap()
            .stage("after", Arc::new(MockStage::new("after")), &["panics"])
            .unwrap()
            .build()
            .unwrap();

        let result = graph
            .execute(run_context(Arc::new(CollectingEventSink::new())))
            .await
            .unwrap();

        assert_eq!(result.status_of("panics"), Some(StageStatus::Failed));
        assert!(result.record("panics").unwrap().error().unwrap().contains("panicked"));
        assert_eq!(result.status_of("after"), Some(StageStatus::Skipped));
    }

    #[tokio::test]
    async fn test_compensation_runs_once_before_terminal() {
        let compensation = Arc::new(CountingCompensation::default());
        let graph = PipelineBuilder::new("comp")
            .spec(
                StageSpec::new("deploy", Arc::new(MockStage::failing("deploy", "apply failed")))
                    .with_compensation(compensation.clone()),
            )
            .unwrap()
            .build()
            .unwrap();
        let sink = Arc::new(CollectingEventSink::new());

        let result = graph.execute(run_context(sink.clone())).await.unwrap();

        assert_eq!(*compensation.calls.lock(), 1);
        let record = result.record("deploy").unwrap();
        assert_eq!(record.status, StageStatus::Failed);
        let comp = record.output.as_ref().unwrap().compensation.as_ref().unwrap();
        assert_eq!(comp.outcome, CompensationOutcome::RolledBack);
        assert_eq!(comp.detail.as_deref(), Some("apply failed"));

        let types: Vec<String> = sink.events().into_iter().map(|e| e.event_type).collect();
        assert_eq!(types, vec![STAGE_STARTED, STAGE_COMPENSATED, STAGE_FAILED]);
    }

    #[tokio::test]
    async fn test_artifacts_flow_to_descendants_only() {
        let seen = Arc::new(Mutex::new(HashMap::new()));
        let producer = FnStage::new("produce", |_ctx| {
            StageOutput::succeeded_empty().with_artifact(ImageArtifact::new(
                ImageReference::new("gcr.io", "acme", "web", "img", "42"),
                "/tmp/img.tar",
                "sha256:00",
                "produce",
            ))
        });
        let observer = |name: &'static str| -> Arc<dyn Stage> {
            let seen = seen.clone();
            Arc::new(FnStage::new(name, move |ctx| {
                seen.lock()
                    .insert(name, ctx.inputs().image().map(|a| a.reference.to_string()));
                StageOutput::succeeded_empty()
            }))
        };
        let graph = PipelineBuilder::new("artifacts")
            .stage("produce", Arc::new(producer), &[])
            .unwrap()
            .stage("direct", observer("direct"), &["produce"])
            .unwrap()
            .stage("transitive", observer("transitive"), &["direct"])
            .unwrap()
            .stage("unrelated", observer("unrelated"), &[])
            .unwrap()
            .build()
            .unwrap();

        let result = graph
            .execute(run_context(Arc::new(CollectingEventSink::new())))
            .await
            .unwrap();

        let seen = seen.lock();
        let image = Some("gcr.io/acme/web/img:42".to_string());
        assert_eq!(seen["direct"], image);
        assert_eq!(seen["transitive"], image);
        assert_eq!(seen["unrelated"], None);
        assert!(result.record("produce").unwrap().output.as_ref().unwrap().artifact.is_none());
        assert!(result.artifacts.contains_key("produce"));
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let mut state = RunState::new(&["a".to_string()]);
        state.transition("a", StageStatus::Skipped).unwrap();

        let err = state.transition("a", StageStatus::Running).unwrap_err();
        assert!(matches!(err, ReleaseflowError::IllegalTransition { .. }));
    }
}
