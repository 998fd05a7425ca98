//! Event sink trait and implementations.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn, Level};
use uuid::Uuid;

/// A single observable change in a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// The event type (e.g., "stage.started").
    pub event_type: String,
    /// Run number within the trigger.
    pub run_number: u64,
    /// Correlation id of the run.
    pub pipeline_run_id: Uuid,
    /// The stage the event concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Event payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
}

/// Trait for event sinks that can receive events.
///
/// Emission must never fail or block the executor; sinks swallow their own
/// errors.
pub trait EventSink: Send + Sync {
    /// Emits an event.
    fn emit(&self, event: PipelineEvent);
}

/// A no-op event sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event: PipelineEvent) {}
}

/// An event sink that logs events using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    /// The log level to use for non-failure events.
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl EventSink for LoggingEventSink {
    fn emit(&self, event: PipelineEvent) {
        let stage = event.stage.as_deref().unwrap_or("-");

        // Failures are always worth a warning, whatever the configured level.
        if event.event_type.ends_with(".failed") {
            warn!(
                event_type = %event.event_type,
                run_number = event.run_number,
                pipeline_run_id = %event.pipeline_run_id,
                stage = %stage,
                event_data = ?event.data,
                "Event: {}", event.event_type
            );
            return;
        }

        if self.level == Level::DEBUG {
            debug!(
                event_type = %event.event_type,
                run_number = event.run_number,
                pipeline_run_id = %event.pipeline_run_id,
                stage = %stage,
                event_data = ?event.data,
                "Event: {}", event.event_type
            );
        } else {
            info!(
                event_type = %event.event_type,
                run_number = event.run_number,
                pipeline_run_id = %event.pipeline_run_id,
                stage = %stage,
                event_data = ?event.data,
                "Event: {}", event.event_type
            );
        }
    }
}

/// A collecting event sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<PipelineEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns events matching a type prefix.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<PipelineEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type.starts_with(type_prefix))
            .cloned()
            .collect()
    }

    /// Counts events of an exact type for one stage.
    #[must_use]
    pub fn count_for_stage(&self, event_type: &str, stage: &str) -> usize {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type == event_type && e.stage.as_deref() == Some(stage))
            .count()
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event: PipelineEvent) {
        self.events.write().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: &str, stage: Option<&str>) -> PipelineEvent {
        PipelineEvent {
            event_type: event_type.to_string(),
            run_number: 1,
            pipeline_run_id: Uuid::new_v4(),
            stage: stage.map(String::from),
            data: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_noop_and_logging_sinks() {
        NoOpEventSink.emit(event("run.started", None));
        LoggingEventSink::default().emit(event("stage.failed", Some("deploy")));
        LoggingEventSink::debug().emit(event("stage.started", Some("deploy")));
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit(event("stage.started", Some("checkout")));
        sink.emit(event("stage.succeeded", Some("checkout")));
        sink.emit(event("run.completed", None));

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.events_of_type("stage.").len(), 2);
        assert_eq!(sink.count_for_stage("stage.started", "checkout"), 1);
        assert_eq!(sink.count_for_stage("stage.started", "deploy"), 0);
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(event("run.started", None)).unwrap();
        assert_eq!(json["event_type"], "run.started");
        assert!(json.get("stage").is_none());
    }
}
