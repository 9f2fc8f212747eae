// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Trace Sink
//!
//! Fire-and-forget audit trail shared by the router, gateway, control dispatch and
//! dispatcher. Implementations must return promptly; none of the callers wait on
//! delivery or inspect a failure.
//!
//! The sink is constructed once at process start and injected as
//! `Arc<dyn TraceSink>`. See [`crate::infrastructure::event_bus::EventBus`] for the
//! broadcasting implementation.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One recorded trace entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub payload: Value,
    pub recorded_at: DateTime<Utc>,
}

impl TraceEvent {
    pub fn event(trace_id: &str, event_type: &str, payload: Value) -> Self {
        Self {
            trace_id: trace_id.to_string(),
            context_id: None,
            event_type: event_type.to_string(),
            message: None,
            payload,
            recorded_at: Utc::now(),
        }
    }

    pub fn trace(trace_id: &str, context_id: &str, kind: &str, message: &str, data: Value) -> Self {
        Self {
            trace_id: trace_id.to_string(),
            context_id: Some(context_id.to_string()),
            event_type: kind.to_string(),
            message: Some(message.to_string()),
            payload: data,
            recorded_at: Utc::now(),
        }
    }
}

pub trait TraceSink: Send + Sync {
    fn record_event(&self, trace_id: &str, event_type: &str, payload: Value);

    fn record_trace(&self, trace_id: &str, context_id: &str, kind: &str, message: &str, data: Value);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTraceSink;

impl TraceSink for NoopTraceSink {
    fn record_event(&self, _trace_id: &str, _event_type: &str, _payload: Value) {}

    fn record_trace(&self, _trace_id: &str, _context_id: &str, _kind: &str, _message: &str, _data: Value) {}
}

/// Keeps every event in arrival order. Used by tests and for local introspection.
#[derive(Debug, Default)]
pub struct InMemoryTraceSink {
    events: RwLock<Vec<TraceEvent>>,
}

impl InMemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.read().clone()
    }

    pub fn events_for(&self, trace_id: &str) -> Vec<TraceEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.trace_id == trace_id)
            .cloned()
            .collect()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events.read().iter().map(|e| e.event_type.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

impl TraceSink for InMemoryTraceSink {
    fn record_event(&self, trace_id: &str, event_type: &str, payload: Value) {
        self.events.write().push(TraceEvent::event(trace_id, event_type, payload));
    }

    fn record_trace(&self, trace_id: &str, context_id: &str, kind: &str, message: &str, data: Value) {
        self.events
            .write()
            .push(TraceEvent::trace(trace_id, context_id, kind, message, data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_in_memory_sink_keeps_order() {
        let sink = InMemoryTraceSink::new();
        sink.record_event("t1", "first", json!({}));
        sink.record_trace("t2", "ctx", "second", "hello", json!({"k": 1}));
        sink.record_event("t1", "third", json!(null));

        assert_eq!(sink.event_types(), vec!["first", "second", "third"]);
        assert_eq!(sink.events_for("t1").len(), 2);
        let second = &sink.events()[1];
        assert_eq!(second.context_id.as_deref(), Some("ctx"));
        assert_eq!(second.message.as_deref(), Some("hello"));
    }
}
