// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent Container
//!
//! Authoritative `agent_id → connection` map. Delivery is at-most-once: a frame
//! for an unknown or disconnected agent is logged and reported, never queued or
//! retried here.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::connection::ConnectionHandle;
use crate::domain::message::AcpMessage;
use crate::domain::transport::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

/// Snapshot of one bound agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConnectionInfo {
    pub agent_id: String,
    pub connection_id: Uuid,
    pub status: ConnectionStatus,
    pub capabilities: Vec<String>,
    pub metadata: Map<String, Value>,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Last state reported by the agent (`payload.data.status`), if any.
    pub reported_state: Option<String>,
}

struct AgentEntry {
    handle: ConnectionHandle,
    info: AgentConnectionInfo,
}

#[derive(Default)]
pub struct AgentContainer {
    agents: RwLock<HashMap<String, AgentEntry>>,
}

impl AgentContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `agent_id` to `handle`. A reconnect replaces the previous handle.
    /// Returns `true` when an existing binding was replaced.
    pub fn register_agent(
        &self,
        agent_id: &str,
        handle: ConnectionHandle,
        capabilities: Vec<String>,
        metadata: Map<String, Value>,
    ) -> bool {
        let now = Utc::now();
        let info = AgentConnectionInfo {
            agent_id: agent_id.to_string(),
            connection_id: handle.id(),
            status: ConnectionStatus::Connected,
            capabilities,
            metadata,
            registered_at: now,
            last_seen: now,
            reported_state: None,
        };
        let previous = self
            .agents
            .write()
            .insert(agent_id.to_string(), AgentEntry { handle, info });

        match previous {
            Some(old) => {
                info!(
                    agent_id,
                    old_connection = %old.info.connection_id,
                    "Agent rebound to new connection"
                );
                true
            }
            None => {
                info!(agent_id, "Agent registered with container");
                false
            }
        }
    }

    /// Writes `message` on the agent's live connection.
    pub fn dispatch_task(&self, agent_id: &str, message: &AcpMessage) -> Result<(), TransportError> {
        let frame = message.to_json()?;
        let agents = self.agents.read();
        let Some(entry) = agents.get(agent_id) else {
            error!(agent_id, trace_id = %message.meta.trace_id, "Dispatch to unknown agent dropped");
            return Err(TransportError::AgentNotConnected(agent_id.to_string()));
        };
        if entry.info.status == ConnectionStatus::Disconnected {
            error!(agent_id, trace_id = %message.meta.trace_id, "Dispatch to disconnected agent dropped");
            return Err(TransportError::AgentNotConnected(agent_id.to_string()));
        }
        entry.handle.send(frame).inspect_err(|e| {
            error!(agent_id, error = %e, "Connection write failed");
        })?;
        debug!(agent_id, message_type = %message.meta.message_type, "Frame dispatched");
        Ok(())
    }

    /// Writes on a connection regardless of registration (acks, error frames).
    pub fn reply(&self, handle: &ConnectionHandle, message: &AcpMessage) -> Result<(), TransportError> {
        let frame = message.to_json()?;
        handle.send(frame).inspect_err(|e| {
            warn!(connection_id = %handle.id(), error = %e, "Reply could not be written");
        })
    }

    /// Refreshes liveness from a `state`/`heartbeat` message. Returns `false` for
    /// unknown agents.
    pub fn update_agent_state(&self, agent_id: &str, message: &AcpMessage) -> bool {
        let mut agents = self.agents.write();
        let Some(entry) = agents.get_mut(agent_id) else {
            warn!(agent_id, "State update for unknown agent ignored");
            return false;
        };
        entry.info.last_seen = Utc::now();
        if let Some(state) = message.payload.data.get("status").and_then(Value::as_str) {
            entry.info.reported_state = Some(state.to_string());
        }
        true
    }

    /// Marks whichever agent is bound to `connection_id` as disconnected. A
    /// binding that was already replaced by a newer connection is left alone.
    pub fn mark_disconnected(&self, connection_id: Uuid) -> Option<String> {
        let mut agents = self.agents.write();
        let entry = agents
            .values_mut()
            .find(|entry| entry.info.connection_id == connection_id)?;
        entry.info.status = ConnectionStatus::Disconnected;
        Some(entry.info.agent_id.clone())
    }

    pub fn get_agent_info(&self, agent_id: &str) -> Option<AgentConnectionInfo> {
        self.agents.read().get(agent_id).map(|entry| entry.info.clone())
    }

    /// All bound agents ordered by id.
    pub fn get_all_agents(&self) -> Vec<AgentConnectionInfo> {
        let mut all: Vec<AgentConnectionInfo> =
            self.agents.read().values().map(|entry| entry.info.clone()).collect();
        all.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        all
    }

    pub fn connected_count(&self) -> usize {
        self.agents
            .read()
            .values()
            .filter(|entry| entry.info.status == ConnectionStatus::Connected)
            .count()
    }
}
