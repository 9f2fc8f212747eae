// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Delivery seams between the routing/scheduling services and the ACP transport.
//!
//! Delivery is at-most-once: implementations never retry internally. Retrying is
//! the task dispatcher's job.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::behavior::BehaviorPackage;
use crate::domain::message::AcpMessage;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Agent not connected: {0}")]
    AgentNotConnected(String),

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

/// Channel the dispatcher uses to reach assigned agents.
#[async_trait]
pub trait TaskTransport: Send + Sync {
    async fn send_task(&self, agent_id: &str, message: AcpMessage) -> Result<(), TransportError>;

    /// Best-effort cancellation notice. Callers ignore the outcome beyond logging.
    async fn notify_cancel(&self, agent_id: &str, message: AcpMessage) -> Result<(), TransportError>;
}

/// Send hook used by the intent router.
#[async_trait]
pub trait BehaviorTransport: Send + Sync {
    async fn deliver(&self, package: &BehaviorPackage) -> Result<(), TransportError>;
}
