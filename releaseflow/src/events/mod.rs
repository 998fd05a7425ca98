//! Event sink system for observability.
//!
//! The executor reports every state change of a run as a [`PipelineEvent`].
//! Sinks are handed to a run explicitly through its
//! [`RunContext`](crate::context::RunContext); there is no global sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, PipelineEvent};

/// Event emitted when a run starts.
pub const RUN_STARTED: &str = "run.started";
/// Event emitted when a run finishes.
pub const RUN_COMPLETED: &str = "run.completed";
/// Event emitted when a stage starts running.
pub const STAGE_STARTED: &str = "stage.started";
/// Event emitted when a stage succeeds.
pub const STAGE_SUCCEEDED: &str = "stage.succeeded";
/// Event emitted when a stage fails.
pub const STAGE_FAILED: &str = "stage.failed";
/// Event emitted when a stage is skipped.
pub const STAGE_SKIPPED: &str = "stage.skipped";
/// Event emitted after a compensation ran.
pub const STAGE_COMPENSATED: &str = "stage.compensation";
