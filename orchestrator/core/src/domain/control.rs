// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Control Payloads and Results
//!
//! [`ActionPayload`] is the receiving-side view of a delivered executable action.
//! Senders place `action_type` either at the root of the payload object or under a
//! nested `payload` object; the variants make that explicit and
//! [`ActionPayload::action_type`] encodes the root-then-nested lookup once.
//!
//! [`ControlResult`] is the normalized, immutable outcome of one Control Dispatch
//! invocation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Instant;

use crate::domain::message::AcpMessage;

#[derive(Debug, Clone, PartialEq)]
pub enum ActionPayload {
    /// `action_type` present at the root.
    TopLevel(Map<String, Value>),
    /// `action_type` only present under `payload`.
    Nested(Map<String, Value>),
    /// No action type anywhere.
    Untyped(Map<String, Value>),
}

impl ActionPayload {
    pub fn from_value(value: Value) -> Self {
        let map = match value {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self::from_map(map)
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        if non_empty_str(map.get("action_type")).is_some() {
            Self::TopLevel(map)
        } else if map
            .get("payload")
            .and_then(Value::as_object)
            .and_then(|nested| non_empty_str(nested.get("action_type")))
            .is_some()
        {
            Self::Nested(map)
        } else {
            Self::Untyped(map)
        }
    }

    /// Flattens an envelope into the root-level payload form. The envelope's
    /// `trace_id` becomes the payload's `trace_id`.
    pub fn from_message(message: &AcpMessage) -> Self {
        let mut map = Map::new();
        map.insert("action_type".to_string(), Value::String(message.payload.action_type.clone()));
        map.insert("command_type".to_string(), Value::String(message.payload.command_type.clone()));
        map.insert("trace_id".to_string(), Value::String(message.meta.trace_id.clone()));
        map.insert("data".to_string(), Value::Object(message.payload.data.clone()));
        map.insert("parameters".to_string(), Value::Object(message.payload.parameters.clone()));
        map.insert("metadata".to_string(), Value::Object(message.payload.metadata.clone()));
        Self::from_map(map)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        match self {
            Self::TopLevel(map) | Self::Nested(map) | Self::Untyped(map) => map,
        }
    }

    fn nested(&self) -> Option<&Map<String, Value>> {
        self.as_map().get("payload").and_then(Value::as_object)
    }

    pub fn action_type(&self) -> Option<&str> {
        match self {
            Self::TopLevel(map) => non_empty_str(map.get("action_type")),
            Self::Nested(_) => self.nested().and_then(|n| non_empty_str(n.get("action_type"))),
            Self::Untyped(_) => None,
        }
    }

    /// Trace id of the originating message, root first then nested.
    pub fn trace_id(&self) -> Option<&str> {
        non_empty_str(self.as_map().get("trace_id"))
            .or_else(|| self.nested().and_then(|n| non_empty_str(n.get("trace_id"))))
    }

    /// Looks a field up at the root, then under the nested payload, then under
    /// `data` and `parameters` of whichever level holds the action.
    pub fn field(&self, key: &str) -> Option<&Value> {
        let scopes: [Option<&Map<String, Value>>; 2] = match self {
            Self::Nested(_) => [self.nested(), Some(self.as_map())],
            _ => [Some(self.as_map()), self.nested()],
        };
        for scope in scopes.into_iter().flatten() {
            if let Some(value) = scope.get(key) {
                return Some(value);
            }
            for section in ["parameters", "data"] {
                if let Some(value) = scope.get(section).and_then(Value::as_object).and_then(|s| s.get(key)) {
                    return Some(value);
                }
            }
        }
        None
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(Value::as_str)
    }

    /// Arguments handed to tools and backends: `arguments`, else `parameters`, else
    /// an empty object.
    pub fn arguments(&self) -> Value {
        self.field("arguments")
            .or_else(|| self.field("parameters"))
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlTrace {
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResult {
    /// Trace id of the originating message.
    pub control_id: String,
    pub status: ControlStatus,
    #[serde(default)]
    pub output: Map<String, Value>,
    pub trace: ControlTrace,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ControlResult {
    pub fn success(control_id: impl Into<String>, output: Map<String, Value>, started: Instant) -> Self {
        Self {
            control_id: control_id.into(),
            status: ControlStatus::Success,
            output,
            trace: ControlTrace::since(started),
            error_message: None,
        }
    }

    pub fn error(control_id: impl Into<String>, message: impl Into<String>, started: Instant) -> Self {
        Self {
            control_id: control_id.into(),
            status: ControlStatus::Error,
            output: Map::new(),
            trace: ControlTrace::since(started),
            error_message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ControlStatus::Success
    }
}

impl ControlTrace {
    pub fn since(started: Instant) -> Self {
        Self {
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_top_level_action_wins() {
        let payload = ActionPayload::from_value(json!({
            "action_type": "api_call",
            "payload": {"action_type": "tool_exec"}
        }));
        assert!(matches!(payload, ActionPayload::TopLevel(_)));
        assert_eq!(payload.action_type(), Some("api_call"));
    }

    #[test]
    fn test_nested_fallback() {
        let payload = ActionPayload::from_value(json!({
            "trace_id": "trace-1",
            "payload": {"action_type": "tool_exec", "tool_name": "grep"}
        }));
        assert!(matches!(payload, ActionPayload::Nested(_)));
        assert_eq!(payload.action_type(), Some("tool_exec"));
        assert_eq!(payload.str_field("tool_name"), Some("grep"));
        assert_eq!(payload.trace_id(), Some("trace-1"));
    }

    #[test]
    fn test_empty_action_type_is_untyped() {
        let payload = ActionPayload::from_value(json!({"action_type": ""}));
        assert!(matches!(payload, ActionPayload::Untyped(_)));
        assert_eq!(payload.action_type(), None);
    }

    #[test]
    fn test_field_searches_parameters_and_data() {
        let payload = ActionPayload::from_value(json!({
            "action_type": "api_call",
            "parameters": {"url": "https://example.test"},
            "data": {"method": "POST"}
        }));
        assert_eq!(payload.str_field("url"), Some("https://example.test"));
        assert_eq!(payload.str_field("method"), Some("POST"));
        assert_eq!(payload.str_field("missing"), None);
    }

    #[test]
    fn test_result_serialises_status() {
        let result = ControlResult::error("trace-9", "boom", Instant::now());
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], json!("error"));
        assert_eq!(value["error_message"], json!("boom"));
        assert_eq!(value["control_id"], json!("trace-9"));
    }
}
