// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use super::connection::ConnectionHandle;
use super::container::AgentContainer;
use super::router::AcpRouter;
use crate::domain::message::{AcpMessage, InboundFrame, MessageType};
use crate::domain::trace::TraceSink;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid JSON frame: {0}")]
    Json(#[source] serde_json::Error),

    #[error("frame matches neither the envelope nor the legacy shape: {0}")]
    Shape(#[source] serde_json::Error),

    #[error("unknown message type '{0}'")]
    UnknownMessageType(String),
}

/// Decodes one text frame. An envelope whose `meta.message_type` is outside the
/// protocol is reported separately so the caller can drop it quietly.
pub fn decode_frame(text: &str) -> Result<InboundFrame, FrameError> {
    let value: Value = serde_json::from_str(text).map_err(FrameError::Json)?;
    if let Some(name) = value
        .get("meta")
        .and_then(|meta| meta.get("message_type"))
        .and_then(Value::as_str)
    {
        if MessageType::parse(name).is_none() {
            return Err(FrameError::UnknownMessageType(name.to_string()));
        }
    }
    serde_json::from_value(value).map_err(FrameError::Shape)
}

/// First pipeline stage: decode, audit, hand to the Router.
pub struct AcpGateway {
    node_id: String,
    router: Arc<AcpRouter>,
    container: Arc<AgentContainer>,
    trace_sink: Arc<dyn TraceSink>,
}

impl AcpGateway {
    pub fn new(
        node_id: impl Into<String>,
        router: Arc<AcpRouter>,
        container: Arc<AgentContainer>,
        trace_sink: Arc<dyn TraceSink>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            router,
            container,
            trace_sink,
        }
    }

    pub async fn handle_frame(&self, connection: &ConnectionHandle, text: &str) {
        let frame = match decode_frame(text) {
            Ok(frame) => frame,
            Err(FrameError::UnknownMessageType(name)) => {
                warn!(connection_id = %connection.id(), message_type = %name, "Dropping frame with unknown message type");
                return;
            }
            Err(e) => {
                self.reject(connection, &e.to_string());
                return;
            }
        };

        let legacy = frame.is_legacy();
        let message = frame.into_message();
        debug!(
            connection_id = %connection.id(),
            message_type = %message.meta.message_type,
            sender_id = %message.meta.sender_id,
            legacy,
            "Frame decoded"
        );
        self.trace_sink.record_event(
            &message.meta.trace_id,
            "gateway_received",
            json!({
                "message_id": message.meta.message_id,
                "message_type": message.meta.message_type,
                "sender_id": message.meta.sender_id,
                "receiver_id": message.meta.receiver_id,
                "legacy": legacy,
            }),
        );

        self.router.route(connection, message).await;
    }

    /// Sends one `error` frame back on `connection`. The connection stays open.
    pub fn reject(&self, connection: &ConnectionHandle, reason: &str) {
        warn!(connection_id = %connection.id(), reason, "Rejected inbound frame");
        let error = AcpMessage::error_frame(&self.node_id, "", None, reason);
        let _ = self.container.reply(connection, &error);
    }
}
