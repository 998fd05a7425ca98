//! Pipeline building and execution.
//!
//! This module provides:
//! - Stage specifications and the validating builder
//! - The DAG execution engine
//! - Run numbering per trigger
//! - The release topology and the orchestrator driving it

mod builder;
mod dag;
mod orchestrator;
mod registry;
mod release;
mod spec;

pub use builder::PipelineBuilder;
pub use dag::{GraphExecutionResult, StageGraph, StageRecord};
pub use orchestrator::{Orchestrator, RunReport};
pub use registry::{RunRegistry, RunTicket};
pub use release::{release_pipeline, RELEASE_PIPELINE};
pub use spec::{RunCondition, StageSpec};
