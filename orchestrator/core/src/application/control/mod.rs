// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Control Dispatch
//!
//! Receiving-side execution of delivered actions. Adapters are kept in
//! registration order and the first one whose [`ControlAdapter::matches`] accepts
//! the payload's action type runs it. Later adapters may overlap earlier ones on
//! purpose and only see actions nobody before them claimed.
//!
//! Nothing here returns an error to the caller: every failure is a
//! [`ControlResult`] with `status = error`.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Adapter registry and first-match dispatch

pub mod api_call;
pub mod model_call;
pub mod tool_exec;

pub use api_call::ApiCallAdapter;
pub use model_call::{ModelCallAdapter, SimulatedModelBackend};
pub use tool_exec::ToolExecAdapter;

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::control::{ActionPayload, ControlResult};
use crate::domain::tool::{ModelBackend, ToolRegistry};
use crate::domain::trace::{NoopTraceSink, TraceSink};

#[async_trait]
pub trait ControlAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn supported_actions(&self) -> Vec<String>;

    fn matches(&self, action_type: &str) -> bool {
        self.supported_actions().iter().any(|a| a == action_type)
    }

    /// `control_id` is the id the result must carry.
    async fn execute(&self, control_id: &str, payload: &ActionPayload) -> ControlResult;
}

pub struct ControlDispatcher {
    adapters: Vec<Arc<dyn ControlAdapter>>,
    trace_sink: Arc<dyn TraceSink>,
}

impl ControlDispatcher {
    pub fn new(trace_sink: Arc<dyn TraceSink>) -> Self {
        Self {
            adapters: Vec::new(),
            trace_sink,
        }
    }

    /// API call, tool exec and model call adapters, in that order.
    pub fn with_builtin_adapters(
        trace_sink: Arc<dyn TraceSink>,
        tools: Arc<dyn ToolRegistry>,
        backend: Arc<dyn ModelBackend>,
    ) -> Self {
        Self::with_tool_adapter(trace_sink, Arc::new(ToolExecAdapter::new(tools)), backend)
    }

    /// Same adapters as [`ControlDispatcher::with_builtin_adapters`], around a
    /// caller-held tool adapter so tools can be bound after construction.
    pub fn with_tool_adapter(
        trace_sink: Arc<dyn TraceSink>,
        tool_adapter: Arc<ToolExecAdapter>,
        backend: Arc<dyn ModelBackend>,
    ) -> Self {
        let mut dispatcher = Self::new(trace_sink);
        dispatcher.register_adapter(Arc::new(ApiCallAdapter::new()));
        dispatcher.register_adapter(tool_adapter);
        dispatcher.register_adapter(Arc::new(ModelCallAdapter::new(backend)));
        dispatcher
    }

    pub fn register_adapter(&mut self, adapter: Arc<dyn ControlAdapter>) {
        debug!(adapter = adapter.name(), "Registered control adapter");
        self.adapters.push(adapter);
    }

    /// Union of adapter actions in registration order, without duplicates.
    pub fn get_supported_actions(&self) -> Vec<String> {
        let mut actions: Vec<String> = Vec::new();
        for action in self.adapters.iter().flat_map(|a| a.supported_actions()) {
            if !actions.contains(&action) {
                actions.push(action);
            }
        }
        actions
    }

    pub async fn dispatch_value(&self, payload: Value) -> ControlResult {
        self.dispatch(&ActionPayload::from_value(payload)).await
    }

    pub async fn dispatch(&self, payload: &ActionPayload) -> ControlResult {
        let started = Instant::now();
        let control_id = payload
            .trace_id()
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let Some(action_type) = payload.action_type() else {
            warn!(control_id = %control_id, "Control payload has no action_type");
            let result = ControlResult::error(&control_id, "missing action_type in payload", started);
            self.record_result(&result);
            return result;
        };

        let mut resolved = None;
        for adapter in &self.adapters {
            let matched = adapter.matches(action_type);
            self.trace_sink.record_event(
                &control_id,
                "control_match_attempt",
                json!({ "adapter": adapter.name(), "action_type": action_type, "matched": matched }),
            );
            if matched {
                resolved = Some(adapter);
                break;
            }
        }

        let result = match resolved {
            Some(adapter) => {
                self.trace_sink.record_event(
                    &control_id,
                    "control_adapter_resolved",
                    json!({ "adapter": adapter.name(), "action_type": action_type }),
                );
                adapter.execute(&control_id, payload).await
            }
            None => {
                warn!(control_id = %control_id, action_type, "No control adapter matched");
                ControlResult::error(
                    &control_id,
                    format!("no adapter for action_type {}", action_type),
                    started,
                )
            }
        };

        self.record_result(&result);
        result
    }

    fn record_result(&self, result: &ControlResult) {
        self.trace_sink.record_event(
            &result.control_id,
            "control_result",
            json!({
                "status": result.status,
                "duration_ms": result.trace.duration_ms,
                "error_message": result.error_message,
            }),
        );
    }
}

impl Default for ControlDispatcher {
    fn default() -> Self {
        Self::new(Arc::new(NoopTraceSink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::control::ControlStatus;
    use crate::domain::trace::InMemoryTraceSink;

    struct EchoAdapter;

    #[async_trait]
    impl ControlAdapter for EchoAdapter {
        fn name(&self) -> &str {
            "echo"
        }

        fn supported_actions(&self) -> Vec<String> {
            vec!["echo".to_string(), "api_call".to_string()]
        }

        async fn execute(&self, control_id: &str, payload: &ActionPayload) -> ControlResult {
            ControlResult::success(control_id, payload.as_map().clone(), Instant::now())
        }
    }

    #[tokio::test]
    async fn test_missing_action_type() {
        let dispatcher = ControlDispatcher::default();
        let result = dispatcher.dispatch_value(json!({"data": {}})).await;
        assert_eq!(result.status, ControlStatus::Error);
        assert_eq!(result.error_message.as_deref(), Some("missing action_type in payload"));
    }

    #[tokio::test]
    async fn test_supported_actions_deduplicated() {
        let mut dispatcher = ControlDispatcher::default();
        dispatcher.register_adapter(Arc::new(EchoAdapter));
        dispatcher.register_adapter(Arc::new(ApiCallAdapter::new()));
        assert_eq!(dispatcher.get_supported_actions(), vec!["echo", "api_call"]);
    }

    #[tokio::test]
    async fn test_trace_steps_recorded() {
        let sink = Arc::new(InMemoryTraceSink::new());
        let mut dispatcher = ControlDispatcher::new(sink.clone());
        dispatcher.register_adapter(Arc::new(ApiCallAdapter::new()));
        dispatcher.register_adapter(Arc::new(EchoAdapter));

        let result = dispatcher
            .dispatch_value(json!({"action_type": "echo", "trace_id": "trace-x"}))
            .await;
        assert!(result.is_success());
        assert_eq!(result.control_id, "trace-x");
        assert_eq!(
            sink.event_types(),
            vec![
                "control_match_attempt",
                "control_match_attempt",
                "control_adapter_resolved",
                "control_result"
            ]
        );
        assert!(sink.events().iter().all(|e| e.trace_id == "trace-x"));
    }
}
