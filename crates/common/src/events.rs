//! Observability sink for workflow lifecycle events.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

/// A lifecycle event emitted by an orchestrator.
pub trait WorkflowEvent: Serialize + Send + Sync {
    /// Returns the event type name (e.g. "StepCompleted").
    fn event_type(&self) -> &'static str;
}

/// Consumer of workflow events.
///
/// Orchestrators emit every transition through a sink; what happens to
/// the event (logging, metrics, forwarding) is up to the implementation.
pub trait EventSink<E>: Send + Sync {
    /// Receives one event.
    fn emit(&self, event: &E);
}

/// Sink that writes each event as a structured `tracing` record.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl<E: WorkflowEvent> EventSink<E> for TracingEventSink {
    fn emit(&self, event: &E) {
        let payload = serde_json::to_string(event).unwrap_or_default();
        tracing::info!(event_type = event.event_type(), %payload, "workflow event");
    }
}

/// Sink that keeps every event in memory, for assertions in tests.
#[derive(Debug)]
pub struct RecordingEventSink<E> {
    events: Arc<Mutex<Vec<E>>>,
}

impl<E> Default for RecordingEventSink<E> {
    fn default() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<E> Clone for RecordingEventSink<E> {
    fn clone(&self) -> Self {
        Self {
            events: Arc::clone(&self.events),
        }
    }
}

impl<E: Clone> RecordingEventSink<E> {
    /// Creates an empty recording sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all recorded events in emission order.
    pub fn events(&self) -> Vec<E> {
        self.events.lock().clone()
    }

    /// Returns the number of recorded events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns true if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl<E: WorkflowEvent + Clone> RecordingEventSink<E> {
    /// Returns the recorded event type names in emission order.
    pub fn event_types(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.event_type()).collect()
    }
}

impl<E: Clone + Send + Sync> EventSink<E> for RecordingEventSink<E> {
    fn emit(&self, event: &E) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Serialize)]
    enum Probe {
        Started,
        Finished,
    }

    impl WorkflowEvent for Probe {
        fn event_type(&self) -> &'static str {
            match self {
                Probe::Started => "Started",
                Probe::Finished => "Finished",
            }
        }
    }

    #[test]
    fn recording_sink_keeps_order_across_clones() {
        let sink = RecordingEventSink::new();
        let other = sink.clone();

        sink.emit(&Probe::Started);
        other.emit(&Probe::Finished);

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.event_types(), vec!["Started", "Finished"]);
    }

    #[test]
    fn tracing_sink_accepts_any_workflow_event() {
        let sink: &dyn EventSink<Probe> = &TracingEventSink;
        sink.emit(&Probe::Started);
    }
}
