//! Ready-made configurations and contexts.

use crate::config::ReleaseConfig;
use crate::context::{RunContext, RunIdentity, StageContext, StageInputs, TriggerEvent};
use crate::core::ImageArtifact;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Run number used by the fixture contexts.
pub const TEST_RUN_NUMBER: u64 = 42;

/// A deployment manifest referencing `gcr.io/acme/web/irys-ui-img:1`.
pub const SAMPLE_DEPLOYMENT: &str = "\
apiVersion: apps/v1
kind: Deployment
metadata:
  name: irys-ui
  namespace: irys
spec:
  replicas: 2
  template:
    spec:
      containers:
        - name: irys-ui
          image: gcr.io/acme/web/irys-ui-img:1
          ports:
            - containerPort: 80
";

/// A complete configuration rooted at `workspace_root`.
#[must_use]
pub fn test_config(workspace_root: &Path) -> ReleaseConfig {
    let mut config = ReleaseConfig::new()
        .with_registry("acme", "web", "irys-ui-img")
        .with_workspace_root(workspace_root);
    config.source.repository_url = "https://github.com/acme/irys-ui.git".to_string();
    config.manifests.repository_url = "https://github.com/acme/irys-manifests.git".to_string();
    config.cluster.name = "prod".to_string();
    config.cluster.zone = "us-central1-a".to_string();
    config.cluster.deployment = "irys-ui".to_string();
    config.cluster.namespace = Some("irys".to_string());
    config
}

/// A run context for run 42 on `main` with its workspace under `workspace_root`.
#[must_use]
pub fn test_run_context(workspace_root: &Path) -> RunContext {
    RunContext::new(
        RunIdentity::new(TEST_RUN_NUMBER, TriggerEvent::push("main")),
        Arc::new(test_config(workspace_root)),
    )
}

/// A stage context for run 42 that touches no files.
#[must_use]
pub fn stage_context(stage: &str) -> StageContext {
    stage_context_for(
        stage,
        &std::env::temp_dir().join("releaseflow-fixture"),
        TriggerEvent::push("main"),
    )
}

/// A stage context for run 42 with its workspace under `workspace_root`.
#[must_use]
pub fn stage_context_for(stage: &str, workspace_root: &Path, trigger: TriggerEvent) -> StageContext {
    stage_context_with_inputs(stage, workspace_root, trigger, StageInputs::default())
}

/// Like [`stage_context_for`], with an image produced by `build-image`.
#[must_use]
pub fn stage_context_with_image(
    stage: &str,
    workspace_root: &Path,
    trigger: TriggerEvent,
    artifact: ImageArtifact,
) -> StageContext {
    let mut artifacts = HashMap::new();
    artifacts.insert(artifact.produced_by.clone(), Arc::new(artifact));
    stage_context_with_inputs(
        stage,
        workspace_root,
        trigger,
        StageInputs::new(artifacts, HashMap::new()),
    )
}

fn stage_context_with_inputs(
    stage: &str,
    workspace_root: &Path,
    trigger: TriggerEvent,
    inputs: StageInputs,
) -> StageContext {
    let run = RunContext::new(
        RunIdentity::new(TEST_RUN_NUMBER, trigger),
        Arc::new(test_config(workspace_root)),
    );
    StageContext::new(Arc::new(run), stage, inputs)
}
