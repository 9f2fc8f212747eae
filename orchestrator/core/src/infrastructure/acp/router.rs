// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::connection::ConnectionHandle;
use super::container::AgentContainer;
use crate::application::control::ControlDispatcher;
use crate::domain::control::ActionPayload;
use crate::domain::message::{AcpMessage, MessageType};
use crate::infrastructure::event_bus::EventBus;

/// Second pipeline stage: acts on `meta.message_type`.
///
/// Every routed message is forwarded to the agent-message channel, which
/// applies backpressure and never drops, and then published on the event bus
/// for observers, which may lag.
pub struct AcpRouter {
    node_id: String,
    container: Arc<AgentContainer>,
    control: Option<Arc<ControlDispatcher>>,
    event_bus: Option<EventBus>,
    agent_messages: Option<mpsc::Sender<AcpMessage>>,
}

impl AcpRouter {
    pub fn new(node_id: impl Into<String>, container: Arc<AgentContainer>) -> Self {
        Self {
            node_id: node_id.into(),
            container,
            control: None,
            event_bus: None,
            agent_messages: None,
        }
    }

    pub fn with_control_dispatcher(mut self, control: Arc<ControlDispatcher>) -> Self {
        self.control = Some(control);
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_agent_messages(mut self, sender: mpsc::Sender<AcpMessage>) -> Self {
        self.agent_messages = Some(sender);
        self
    }

    pub async fn route(&self, connection: &ConnectionHandle, message: AcpMessage) {
        match message.meta.message_type {
            MessageType::Register => {
                if !self.handle_register(connection, &message) {
                    return;
                }
            }
            MessageType::Task => {
                let receiver = message.meta.receiver_id.clone();
                if receiver.is_empty() {
                    warn!(trace_id = %message.meta.trace_id, "Task message without receiver_id dropped");
                    return;
                }
                // Delivery failures are already logged by the container
                let _ = self.container.dispatch_task(&receiver, &message);
            }
            MessageType::State | MessageType::Heartbeat => {
                self.container.update_agent_state(&message.meta.sender_id, &message);
            }
            MessageType::Execute => self.handle_execute(connection, &message).await,
            MessageType::Ack | MessageType::Result => {
                debug!(
                    message_type = %message.meta.message_type,
                    sender_id = %message.meta.sender_id,
                    correlation_id = ?message.meta.correlation_id,
                    "Agent acknowledgement received"
                );
            }
            MessageType::Error => {
                warn!(
                    sender_id = %message.meta.sender_id,
                    error = ?message.payload.data.get("error"),
                    "Agent reported an error"
                );
            }
        }

        if let Some(sender) = &self.agent_messages {
            if sender.send(message.clone()).await.is_err() {
                debug!(
                    message_type = %message.meta.message_type,
                    "Agent message consumer is gone, message not forwarded"
                );
            }
        }
        if let Some(bus) = &self.event_bus {
            bus.publish_agent_message(message);
        }
    }

    fn handle_register(&self, connection: &ConnectionHandle, message: &AcpMessage) -> bool {
        let agent_id = message.meta.sender_id.as_str();
        if agent_id.is_empty() {
            let error = AcpMessage::error_frame(
                &self.node_id,
                "",
                Some(&message.meta.trace_id),
                "register requires meta.sender_id",
            );
            let _ = self.container.reply(connection, &error);
            return false;
        }

        self.container.register_agent(
            agent_id,
            connection.clone(),
            message.context.agent_capabilities.clone(),
            message.payload.data.clone(),
        );
        info!(
            agent_id,
            capabilities = ?message.context.agent_capabilities,
            "Agent registered"
        );
        let _ = self.container.reply(connection, &AcpMessage::ack(message, &self.node_id));
        true
    }

    async fn handle_execute(&self, connection: &ConnectionHandle, message: &AcpMessage) {
        let Some(control) = &self.control else {
            let error = AcpMessage::error_frame(
                &self.node_id,
                &message.meta.sender_id,
                Some(&message.meta.trace_id),
                "execute is not supported on this node",
            );
            let _ = self.container.reply(connection, &error);
            return;
        };

        let result = control.dispatch(&ActionPayload::from_message(message)).await;
        let data = match serde_json::to_value(&result) {
            Ok(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        let reply = AcpMessage::builder(MessageType::Result)
            .sender(&self.node_id)
            .receiver(&message.meta.sender_id)
            .trace_id(&message.meta.trace_id)
            .correlation_id(&message.meta.message_id)
            .command("control_result")
            .action(&message.payload.action_type)
            .data(data)
            .build();
        let _ = self.container.reply(connection, &reply);
    }
}
