// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Online,
    Offline,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => f.write_str("online"),
            Self::Offline => f.write_str("offline"),
        }
    }
}

/// A scheduling target.
///
/// # Invariants
///
/// - `current_load <= max_load` once `max_load` has been settled at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub agent_id: String,
    pub capabilities: Vec<String>,
    pub current_load: u32,
    pub max_load: u32,
    pub status: AgentStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl AgentInfo {
    pub fn new(
        agent_id: impl Into<String>,
        capabilities: Vec<String>,
        max_load: u32,
        metadata: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            capabilities,
            current_load: 0,
            max_load,
            status: AgentStatus::Online,
            last_heartbeat: now,
            registered_at: now,
            metadata,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == AgentStatus::Online && self.current_load < self.max_load
    }

    /// Superset check. An empty requirement matches every agent.
    pub fn has_capabilities(&self, required: &[String]) -> bool {
        required.iter().all(|cap| self.capabilities.contains(cap))
    }

    pub fn matched_capabilities(&self, required: &[String]) -> usize {
        required.iter().filter(|cap| self.capabilities.contains(cap)).count()
    }

    /// Fraction of free slots in `[0, 1]`.
    pub fn free_capacity(&self) -> f64 {
        if self.max_load == 0 {
            return 0.0;
        }
        1.0 - (self.current_load as f64 / self.max_load as f64)
    }

    /// Takes a load slot. Returns `false` without changes when the agent is full.
    pub fn acquire_slot(&mut self) -> bool {
        if self.current_load >= self.max_load {
            return false;
        }
        self.current_load += 1;
        true
    }

    pub fn release_slot(&mut self) {
        self.current_load = self.current_load.saturating_sub(1);
    }

    pub fn heartbeat_age_ms(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.last_heartbeat).num_milliseconds()
    }
}
