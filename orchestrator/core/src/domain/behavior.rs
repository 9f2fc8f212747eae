// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Behavior Packages
//!
//! A [`BehaviorPackage`] is one resolved intent instance produced by the
//! [`crate::application::intent_router::IntentRouter`]. Packages are immutable once
//! built; the transport layer and the scheduler only ever read them.
//!
//! Trace identifiers have the form `trace-{context_id}-{8 hex}` and are minted by a
//! [`TraceIdGenerator`] owned by the router.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Classification of a free-text intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentType {
    TaskExecution,
    DataQuery,
    ToolCall,
    StatusUpdate,
    Collaboration,
}

impl IntentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskExecution => "TASK_EXECUTION",
            Self::DataQuery => "DATA_QUERY",
            Self::ToolCall => "TOOL_CALL",
            Self::StatusUpdate => "STATUS_UPDATE",
            Self::Collaboration => "COLLABORATION",
        }
    }
}

impl Default for IntentType {
    fn default() -> Self {
        Self::TaskExecution
    }
}

impl fmt::Display for IntentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One routable unit of behavior addressed from one agent to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorPackage {
    /// Raw intent text as supplied by the caller.
    pub intent: String,
    pub from_agent: String,
    pub to_agent: String,
    pub context_id: String,
    /// `trace-{context_id}-{8 hex}`
    pub trace_id: String,
    /// Unix seconds.
    pub timestamp: i64,
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
    pub intent_type: IntentType,
    #[serde(default)]
    pub priority: i32,
    /// Optional delivery timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl BehaviorPackage {
    /// Required-field presence check. Callers run this before committing to a send.
    pub fn is_valid(&self) -> bool {
        !self.trace_id.is_empty()
            && !self.from_agent.is_empty()
            && !self.to_agent.is_empty()
            && !self.context_id.is_empty()
            && !self.intent.is_empty()
    }

    /// Names of the required fields that are empty, in declaration order.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.intent.is_empty() {
            missing.push("intent");
        }
        if self.from_agent.is_empty() {
            missing.push("from_agent");
        }
        if self.to_agent.is_empty() {
            missing.push("to_agent");
        }
        if self.context_id.is_empty() {
            missing.push("context_id");
        }
        if self.trace_id.is_empty() {
            missing.push("trace_id");
        }
        missing
    }
}

/// Mints `trace-{context_id}-{8 hex}` identifiers.
///
/// The suffix is a bijective scramble of `seed + n`, so a single generator never
/// repeats a suffix within 2^32 generations, while separate generators start from
/// unrelated random seeds.
#[derive(Debug)]
pub struct TraceIdGenerator {
    seed: u32,
    counter: AtomicU32,
}

impl TraceIdGenerator {
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    pub fn with_seed(seed: u32) -> Self {
        Self {
            seed,
            counter: AtomicU32::new(0),
        }
    }

    pub fn generate(&self, context_id: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let mixed = self.seed.wrapping_add(n).wrapping_mul(0x9E37_79B1) ^ 0x5BD1_E995;
        format!("trace-{}-{:08x}", context_id, mixed)
    }
}

impl Default for TraceIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// True when `trace_id` has the `trace-{context_id}-{8 hex}` shape for this context.
pub fn is_trace_id_for(trace_id: &str, context_id: &str) -> bool {
    let Some(rest) = trace_id.strip_prefix("trace-") else {
        return false;
    };
    let Some(suffix) = rest.strip_prefix(context_id).and_then(|s| s.strip_prefix('-')) else {
        return false;
    };
    suffix.len() == 8 && suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

pub(crate) fn unix_now() -> i64 {
    Utc::now().timestamp()
}
