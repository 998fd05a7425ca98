//! The release pipeline topology.

use super::{PipelineBuilder, RunCondition, StageGraph, StageSpec};
use crate::errors::PipelineValidationError;
use crate::exec::CommandRunner;
use crate::stages::Stage;
use crate::stages::release::{
    BuildImageStage, CheckoutStage, CleanupStage, DependencyAuditStage, DeployStage, PushImageStage,
    RolloutCompensation, UpdateManifestStage, BUILD_IMAGE, CHECKOUT, CLEANUP, DEPENDENCY_AUDIT, DEPLOY,
    PUSH_IMAGE, UPDATE_MANIFEST,
};
use std::sync::Arc;

/// Name of the release pipeline.
pub const RELEASE_PIPELINE: &str = "release";

/// Assembles `checkout -> dependency-audit -> build-image -> push-image ->
/// update-manifest -> deploy -> cleanup`.
///
/// `deploy` carries the rollout/rollback compensation and `cleanup` runs
/// once every other stage is terminal, whatever its status.
///
/// # Errors
///
/// Returns an error if the topology fails validation.
pub fn release_pipeline(runner: Arc<dyn CommandRunner>) -> Result<StageGraph, PipelineValidationError> {
    let step = |name: &str, stage: Arc<dyn Stage>, after: Option<&str>| {
        StageSpec::new(name, stage).with_dependencies(after)
    };

    let specs = [
        step(CHECKOUT, Arc::new(CheckoutStage::new(runner.clone())), None),
        step(
            DEPENDENCY_AUDIT,
            Arc::new(DependencyAuditStage::new(runner.clone())),
            Some(CHECKOUT),
        ),
        step(
            BUILD_IMAGE,
            Arc::new(BuildImageStage::new(runner.clone())),
            Some(DEPENDENCY_AUDIT),
        ),
        step(
            PUSH_IMAGE,
            Arc::new(PushImageStage::new(runner.clone())),
            Some(BUILD_IMAGE),
        ),
        step(
            UPDATE_MANIFEST,
            Arc::new(UpdateManifestStage::new(runner.clone())),
            Some(PUSH_IMAGE),
        ),
        step(DEPLOY, Arc::new(DeployStage::new(runner.clone())), Some(UPDATE_MANIFEST))
            .with_compensation(Arc::new(RolloutCompensation::new(runner.clone()))),
        step(CLEANUP, Arc::new(CleanupStage::new(runner)), Some(DEPLOY))
            .with_run_condition(RunCondition::AllTerminal),
    ];

    PipelineBuilder::from_specs(RELEASE_PIPELINE, specs)?.build()
}
