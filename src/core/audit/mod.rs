//! Human-facing events for allocation outcomes
//!
//! Provides:
//! - One `Normal` event per namespace when its ranges are first created
//! - `Warning` events when the UID range is full
//! - Recorders that keep events in memory or mirror them to the log

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

/// Object an event is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectReference {
    pub kind: String,
    pub name: String,
}

impl ObjectReference {
    pub fn namespace(name: impl Into<String>) -> Self {
        ObjectReference {
            kind: "Namespace".to_string(),
            name: name.into(),
        }
    }

    pub fn range_allocation(name: impl Into<String>) -> Self {
        ObjectReference {
            kind: "RangeAllocation".to_string(),
            name: name.into(),
        }
    }
}

/// Single recorded event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
    pub involved_object: ObjectReference,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create a new event with the current timestamp
    pub fn new(
        involved_object: ObjectReference,
        event_type: EventType,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Event {
            event_type,
            reason: reason.into(),
            message: message.into(),
            involved_object,
            timestamp: Utc::now(),
        }
    }
}

/// Sink for events
pub trait EventRecorder: Send + Sync {
    fn record(&self, event: Event);

    fn event(
        &self,
        object: ObjectReference,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) {
        self.record(Event::new(object, event_type, reason, message));
    }
}

impl<R: EventRecorder + ?Sized> EventRecorder for Arc<R> {
    fn record(&self, event: Event) {
        (**self).record(event)
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    events: Mutex<Vec<Event>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Events with the given reason
    pub fn with_reason(&self, reason: &str) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.reason == reason)
            .cloned()
            .collect()
    }
}

impl EventRecorder for MemoryRecorder {
    fn record(&self, event: Event) {
        self.events.lock().push(event);
    }
}

/// Mirrors events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRecorder;

impl EventRecorder for LogRecorder {
    fn record(&self, event: Event) {
        match event.event_type {
            EventType::Normal => tracing::info!(
                kind = %event.involved_object.kind,
                object = %event.involved_object.name,
                reason = %event.reason,
                "{}",
                event.message
            ),
            EventType::Warning => tracing::warn!(
                kind = %event.involved_object.kind,
                object = %event.involved_object.name,
                reason = %event.reason,
                "{}",
                event.message
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = Event::new(
            ObjectReference::namespace("team-a"),
            EventType::Normal,
            "CreatedSCCRanges",
            "created SCC ranges",
        );
        assert_eq!(event.involved_object.kind, "Namespace");
        assert_eq!(event.involved_object.name, "team-a");
        assert_eq!(event.event_type, EventType::Normal);
        assert!(event.timestamp <= Utc::now());
    }

    #[test]
    fn test_memory_recorder() {
        let recorder = MemoryRecorder::new();
        recorder.event(
            ObjectReference::namespace("a"),
            EventType::Normal,
            "CreatedSCCRanges",
            "created SCC ranges",
        );
        recorder.event(
            ObjectReference::range_allocation("scc-uid"),
            EventType::Warning,
            "UIDRangeFull",
            "full",
        );

        assert_eq!(recorder.events().len(), 2);
        assert_eq!(recorder.with_reason("UIDRangeFull").len(), 1);
    }
}
