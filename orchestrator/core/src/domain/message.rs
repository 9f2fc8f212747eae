// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # ACP Wire Envelope
//!
//! Every frame on an ACP connection is one JSON object with three sections:
//!
//! ```text
//! { "meta": {...}, "context": {...}, "payload": {...} }
//! ```
//!
//! [`AcpMessage`] is the typed form. Messages are built once (usually through
//! [`AcpMessageBuilder`]) and then moved to whichever component is transmitting
//! them. The pre-envelope flat shape is still accepted on ingress as
//! [`LegacyMessage`]; [`InboundFrame`] decodes either.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::domain::behavior::BehaviorPackage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Register,
    Task,
    Execute,
    Result,
    State,
    Heartbeat,
    Ack,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Task => "task",
            Self::Execute => "execute",
            Self::Result => "result",
            Self::State => "state",
            Self::Heartbeat => "heartbeat",
            Self::Ack => "ack",
            Self::Error => "error",
        }
    }

    /// Wire name to variant; `None` for names outside the protocol.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "register" => Some(Self::Register),
            "task" => Some(Self::Task),
            "execute" => Some(Self::Execute),
            "result" => Some(Self::Result),
            "state" => Some(Self::State),
            "heartbeat" => Some(Self::Heartbeat),
            "ack" => Some(Self::Ack),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Maps a legacy `command` string onto an envelope message type.
    fn infer_from_command(command: &str) -> Self {
        match command {
            "register" => Self::Register,
            "heartbeat" => Self::Heartbeat,
            "state" => Self::State,
            "ack" => Self::Ack,
            "result" => Self::Result,
            "error" => Self::Error,
            "execute" => Self::Execute,
            _ => Self::Task,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery priority, carried on the wire as an integer in `1..=4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MessagePriority {
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl MessagePriority {
    /// Clamps a scheduler priority onto the wire range.
    pub fn from_task_priority(priority: i32) -> Self {
        match priority {
            i32::MIN..=1 => Self::Low,
            2 => Self::Normal,
            3 => Self::High,
            _ => Self::Critical,
        }
    }
}

impl Default for MessagePriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl TryFrom<u8> for MessagePriority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Low),
            2 => Ok(Self::Normal),
            3 => Ok(Self::High),
            4 => Ok(Self::Critical),
            other => Err(format!("priority must be between 1 and 4, got {}", other)),
        }
    }
}

impl From<MessagePriority> for u8 {
    fn from(priority: MessagePriority) -> Self {
        priority as u8
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMeta {
    #[serde(default = "new_id")]
    pub message_id: String,
    pub message_type: MessageType,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub receiver_id: String,
    #[serde(default = "new_id")]
    pub trace_id: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub priority: MessagePriority,
    #[serde(default)]
    pub ttl: Option<u64>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageContext {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub agent_capabilities: Vec<String>,
    #[serde(default)]
    pub environment: Map<String, Value>,
    #[serde(default)]
    pub security_context: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    #[serde(default)]
    pub command_type: String,
    #[serde(default)]
    pub action_type: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcpMessage {
    pub meta: MessageMeta,
    #[serde(default)]
    pub context: MessageContext,
    pub payload: MessagePayload,
}

impl AcpMessage {
    pub fn builder(message_type: MessageType) -> AcpMessageBuilder {
        AcpMessageBuilder::new(message_type)
    }

    pub fn message_type(&self) -> MessageType {
        self.meta.message_type
    }

    pub fn trace_id(&self) -> &str {
        &self.meta.trace_id
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Acknowledgement of `original`, correlated by its message id.
    pub fn ack(original: &AcpMessage, sender_id: &str) -> Self {
        Self::builder(MessageType::Ack)
            .sender(sender_id)
            .receiver(&original.meta.sender_id)
            .trace_id(&original.meta.trace_id)
            .correlation_id(&original.meta.message_id)
            .command("ack")
            .data_field("acknowledged", Value::String(original.meta.message_type.to_string()))
            .build()
    }

    /// Error frame sent back on a connection whose input could not be processed.
    pub fn error_frame(sender_id: &str, receiver_id: &str, trace_id: Option<&str>, reason: &str) -> Self {
        let mut builder = Self::builder(MessageType::Error)
            .sender(sender_id)
            .receiver(receiver_id)
            .command("error")
            .data_field("error", Value::String(reason.to_string()));
        if let Some(trace_id) = trace_id {
            builder = builder.trace_id(trace_id);
        }
        builder.build()
    }

    /// Pre-filled `task` message for a scheduler assignment. Callers add the task
    /// body, priority and retry counters.
    pub fn task_assignment(sender_id: &str, agent_id: &str, task_id: &str, task_type: &str) -> AcpMessageBuilder {
        Self::builder(MessageType::Task)
            .sender(sender_id)
            .receiver(agent_id)
            .command("execute_task")
            .action(task_type)
            .data_field("task_id", Value::String(task_id.to_string()))
            .data_field("task_type", Value::String(task_type.to_string()))
    }

    /// 1:1 transport form of a behavior package, addressed to `package.to_agent`.
    pub fn from_behavior(package: &BehaviorPackage, fallback_sender: &str) -> Self {
        let sender = if package.from_agent.is_empty() {
            fallback_sender
        } else {
            package.from_agent.as_str()
        };
        let mut builder = Self::builder(MessageType::Task)
            .sender(sender)
            .receiver(&package.to_agent)
            .trace_id(&package.trace_id)
            .priority(MessagePriority::from_task_priority(package.priority))
            .session(&package.context_id)
            .command("behavior")
            .action(package.intent_type.as_str())
            .data_field("intent", Value::String(package.intent.clone()))
            .data_field("intent_type", Value::String(package.intent_type.to_string()))
            .data_field("context_id", Value::String(package.context_id.clone()))
            .data_field("timestamp", Value::from(package.timestamp))
            .parameters(package.payload.clone());
        if let Some(timeout) = package.timeout {
            builder = builder.ttl(timeout);
        }
        builder.build()
    }
}

/// Fluent constructor for [`AcpMessage`]. `message_id` and `trace_id` are generated
/// unless set explicitly.
#[derive(Debug, Clone)]
pub struct AcpMessageBuilder {
    meta: MessageMeta,
    context: MessageContext,
    payload: MessagePayload,
}

impl AcpMessageBuilder {
    pub fn new(message_type: MessageType) -> Self {
        Self {
            meta: MessageMeta {
                message_id: new_id(),
                message_type,
                timestamp: Utc::now(),
                sender_id: String::new(),
                receiver_id: String::new(),
                trace_id: new_id(),
                correlation_id: None,
                priority: MessagePriority::default(),
                ttl: None,
                retry_count: 0,
                max_retries: default_max_retries(),
            },
            context: MessageContext::default(),
            payload: MessagePayload::default(),
        }
    }

    pub fn sender(mut self, sender_id: impl Into<String>) -> Self {
        self.meta.sender_id = sender_id.into();
        self
    }

    pub fn receiver(mut self, receiver_id: impl Into<String>) -> Self {
        self.meta.receiver_id = receiver_id.into();
        self
    }

    pub fn trace_id(mut self, trace_id: impl Into<String>) -> Self {
        let trace_id = trace_id.into();
        if !trace_id.is_empty() {
            self.meta.trace_id = trace_id;
        }
        self
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.meta.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn priority(mut self, priority: MessagePriority) -> Self {
        self.meta.priority = priority;
        self
    }

    pub fn ttl(mut self, ttl: u64) -> Self {
        self.meta.ttl = Some(ttl);
        self
    }

    pub fn retries(mut self, retry_count: u32, max_retries: u32) -> Self {
        self.meta.retry_count = retry_count;
        self.meta.max_retries = max_retries;
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.context.session_id = Some(session_id.into());
        self
    }

    pub fn capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.context.agent_capabilities = capabilities;
        self
    }

    pub fn command(mut self, command_type: impl Into<String>) -> Self {
        self.payload.command_type = command_type.into();
        self
    }

    pub fn action(mut self, action_type: impl Into<String>) -> Self {
        self.payload.action_type = action_type.into();
        self
    }

    pub fn data(mut self, data: Map<String, Value>) -> Self {
        self.payload.data = data;
        self
    }

    pub fn data_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.data.insert(key.into(), value);
        self
    }

    pub fn parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.payload.parameters = parameters;
        self
    }

    pub fn metadata_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.metadata.insert(key.into(), value);
        self
    }

    pub fn build(self) -> AcpMessage {
        AcpMessage {
            meta: self.meta,
            context: self.context,
            payload: self.payload,
        }
    }
}

/// Flat frame shape used before the meta/context/payload envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyMessage {
    pub command: String,
    #[serde(default)]
    pub meta: Map<String, Value>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub context_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub source_id: Option<String>,
}

impl LegacyMessage {
    fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta.get(key).and_then(Value::as_str)
    }

    pub fn into_envelope(self) -> AcpMessage {
        let message_type = self
            .meta_str("message_type")
            .and_then(MessageType::parse)
            .unwrap_or_else(|| MessageType::infer_from_command(&self.command));

        let sender = self
            .source_id
            .clone()
            .or_else(|| self.meta_str("sender_id").map(str::to_string))
            .unwrap_or_default();
        let receiver = self
            .meta_str("receiver_id")
            .or_else(|| self.meta_str("to_agent"))
            .map(str::to_string)
            .unwrap_or_default();

        let mut builder = AcpMessage::builder(message_type)
            .sender(sender)
            .receiver(receiver)
            .trace_id(self.trace_id.clone().unwrap_or_default())
            .command(self.command.clone())
            .data(self.context.clone());

        if let Some(action) = self.meta_str("action_type") {
            builder = builder.action(action);
        }
        if let Some(context_id) = &self.context_id {
            builder = builder.session(context_id.clone());
        }
        if let Some(timestamp) = &self.timestamp {
            builder = builder.metadata_field("legacy_timestamp", timestamp.clone());
        }
        for (key, value) in &self.meta {
            builder = builder.metadata_field(key.clone(), value.clone());
        }

        let mut message = builder.build();
        if let Some(capabilities) = self.meta.get("capabilities").and_then(Value::as_array) {
            message.context.agent_capabilities = capabilities
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
        }
        if !self.permissions.is_empty() {
            message.context.security_context.insert(
                "permissions".to_string(),
                Value::from(self.permissions),
            );
        }
        message
    }
}

/// Either accepted ingress shape. The envelope is tried first.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InboundFrame {
    Envelope(AcpMessage),
    Legacy(LegacyMessage),
}

impl InboundFrame {
    pub fn into_message(self) -> AcpMessage {
        match self {
            Self::Envelope(message) => message,
            Self::Legacy(legacy) => legacy.into_envelope(),
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Legacy(_))
    }
}
