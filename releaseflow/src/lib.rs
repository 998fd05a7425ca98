//! # Releaseflow
//!
//! A release pipeline orchestrator for containerised web applications.
//!
//! A push to the designated branch starts a run of a fixed DAG of stages:
//!
//! - **checkout**: clone the pushed commit
//! - **dependency-audit**: report vulnerable dependencies (never fatal)
//! - **build-image**: build the image and save it to a content-addressed archive
//! - **push-image**: load the archive and push it to the registry
//! - **update-manifest**: point `deployment.yaml` at the new tag and commit
//! - **deploy**: apply the manifests; on failure wait for the rollout and
//!   roll back if it does not become healthy
//! - **cleanup**: remove local state, whatever happened before
//!
//! The image tag is the run number, so re-running a run reproduces its
//! image reference and manifest.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use releaseflow::prelude::*;
//!
//! let config = ReleaseConfig::from_file(Path::new("releaseflow.toml"))?.with_env_overrides();
//! let orchestrator = Orchestrator::release(config, Arc::new(ProcessCommandRunner::new()))?;
//!
//! let report = orchestrator.run(TriggerEvent::push("main")).await?;
//! println!("{}", report.to_json_pretty()?);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod exec;
pub mod manifest;
pub mod observability;
pub mod pipeline;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::ReleaseConfig;
    pub use crate::context::{RunContext, RunIdentity, StageContext, StageInputs, TriggerEvent};
    pub use crate::core::{
        CompensationOutcome, CompensationRecord, ImageArtifact, ImageReference, RunStatus,
        StageOutput, StageStatus,
    };
    pub use crate::errors::{
        ContractErrorInfo, CycleDetectedError, ManifestError, PipelineValidationError,
        ReleaseflowError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::exec::{CommandInvocation, CommandOutput, CommandRunner, ProcessCommandRunner};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{
        release_pipeline, Orchestrator, PipelineBuilder, RunCondition, RunRegistry, RunReport,
        StageGraph, StageSpec,
    };
    pub use crate::stages::{Compensation, Stage};
    pub use std::sync::Arc;
}
