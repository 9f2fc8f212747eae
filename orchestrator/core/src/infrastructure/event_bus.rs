// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Domain Events
//
// Provides in-memory event streaming using tokio broadcast channels.
// Carries the trace stream of every ACP component and the inbound agent
// messages the Router has accepted, so a host can bridge them elsewhere
// (e.g. into the task dispatcher).
//
// In-memory only: events published with no subscriber, or overwritten while a
// subscriber lags, are gone.

use crate::domain::message::AcpMessage;
use crate::domain::trace::{TraceEvent, TraceSink};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Unified domain event type for the event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Trace(TraceEvent),
    AgentMessage(AcpMessage),
}

/// Event bus for publishing and subscribing to domain events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    /// Capacity determines how many events can be buffered before dropping old ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish_trace_event(&self, event: TraceEvent) {
        self.publish(DomainEvent::Trace(event));
    }

    /// Publish an inbound agent message after routing
    pub fn publish_agent_message(&self, message: AcpMessage) {
        self.publish(DomainEvent::AgentMessage(message));
    }

    fn publish(&self, event: DomainEvent) {
        // send() only fails when nobody is subscribed
        if self.sender.send(event).is_err() {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all domain events
    pub fn subscribe(&self) -> EventReceiver {
        let receiver = self.sender.subscribe();
        EventReceiver { receiver }
    }

    /// Subscribe and filter for one trace id
    pub fn subscribe_trace(&self, trace_id: impl Into<String>) -> TraceEventReceiver {
        let receiver = self.sender.subscribe();
        TraceEventReceiver {
            receiver,
            trace_id: trace_id.into(),
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl TraceSink for EventBus {
    fn record_event(&self, trace_id: &str, event_type: &str, payload: Value) {
        self.publish_trace_event(TraceEvent::event(trace_id, event_type, payload));
    }

    fn record_trace(&self, trace_id: &str, context_id: &str, kind: &str, message: &str, data: Value) {
        self.publish_trace_event(TraceEvent::trace(trace_id, context_id, kind, message, data));
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all domain events
pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver for the trace events of a single trace id (filtered)
pub struct TraceEventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
    trace_id: String,
}

impl TraceEventReceiver {
    pub async fn recv(&mut self) -> Result<TraceEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if let DomainEvent::Trace(trace) = event {
                if trace.trace_id == self.trace_id {
                    return Ok(trace);
                }
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::MessageType;
    use serde_json::json;

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        event_bus.record_event("trace-1", "gateway_received", json!({"size": 12}));

        match receiver.recv().await.unwrap() {
            DomainEvent::Trace(event) => {
                assert_eq!(event.trace_id, "trace-1");
                assert_eq!(event.event_type, "gateway_received");
            }
            _ => panic!("Wrong event type received"),
        }
    }

    #[tokio::test]
    async fn test_trace_filtering() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe_trace("mine");

        // Different trace id and a non-trace event are both filtered out
        event_bus.record_event("other", "x", json!({}));
        event_bus.publish_agent_message(AcpMessage::builder(MessageType::State).build());
        event_bus.record_trace("mine", "ctx", "behavior_dispatched", "hi", json!({}));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.trace_id, "mine");
        assert_eq!(received.context_id.as_deref(), Some("ctx"));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();

        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus.publish_agent_message(AcpMessage::builder(MessageType::Heartbeat).sender("a").build());

        // Both receivers should get the event
        let _ = receiver1.recv().await.unwrap();
        let _ = receiver2.recv().await.unwrap();
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let event_bus = EventBus::new(2);
        event_bus.record_event("t", "nobody_listening", json!(null));
        assert_eq!(event_bus.subscriber_count(), 0);
    }
}
