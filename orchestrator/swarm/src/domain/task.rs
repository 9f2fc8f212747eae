// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Task Aggregate
//!
//! [`TaskInfo`] is one schedulable unit of work and owns its state machine:
//!
//! ```text
//! PENDING → ASSIGNED → EXECUTING → COMPLETED | FAILED | TIMEOUT | CANCELLED
//!    ↑          │           │
//!    └──────────┴───────────┘  retry while retry_count < max_retries
//! ```
//!
//! Transition methods return [`DomainError::InvalidStateTransition`] on misuse and
//! leave the task untouched in that case.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Executing,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Timeout | Self::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Assigned | Self::Executing)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Assigned => "ASSIGNED",
            Self::Executing => "EXECUTING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// What a caller submits. Unset timeout and retry budget fall back to the
/// dispatcher's configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task_type: String,
    #[serde(default)]
    pub task_data: Map<String, Value>,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl TaskRequest {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            ..Self::default()
        }
    }

    pub fn with_data(mut self, task_data: Map<String, Value>) -> Self {
        self.task_data = task_data;
        self
    }

    pub fn requiring<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: TaskId,
    pub task_type: String,
    pub task_data: Map<String, Value>,
    pub priority: i32,
    /// Seconds allowed between assignment and result.
    pub timeout_seconds: u64,
    pub required_capabilities: Vec<String>,
    pub assigned_agent: Option<String>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl TaskInfo {
    pub fn new(
        request: TaskRequest,
        default_timeout_seconds: u64,
        default_max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: TaskId::new(),
            task_type: request.task_type,
            task_data: request.task_data,
            priority: request.priority,
            timeout_seconds: request.timeout_seconds.unwrap_or(default_timeout_seconds),
            required_capabilities: request.required_capabilities,
            assigned_agent: None,
            status: TaskStatus::Pending,
            created_at: now,
            assigned_at: None,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            retry_count: 0,
            max_retries: request.max_retries.unwrap_or(default_max_retries),
        }
    }

    fn invalid(&self, to: TaskStatus) -> DomainError {
        DomainError::InvalidStateTransition {
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }

    pub fn assign(&mut self, agent_id: &str, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.status != TaskStatus::Pending {
            return Err(self.invalid(TaskStatus::Assigned));
        }
        self.status = TaskStatus::Assigned;
        self.assigned_agent = Some(agent_id.to_string());
        self.assigned_at = Some(now);
        Ok(())
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.status != TaskStatus::Assigned {
            return Err(self.invalid(TaskStatus::Executing));
        }
        self.status = TaskStatus::Executing;
        self.started_at = Some(now);
        Ok(())
    }

    pub fn complete(&mut self, result: Option<Value>, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.status.is_active() {
            return Err(self.invalid(TaskStatus::Completed));
        }
        self.status = TaskStatus::Completed;
        self.result = result;
        self.error = None;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Remote failure. Returns `true` when the task went back to `PENDING`.
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> Result<bool, DomainError> {
        self.retry_or(TaskStatus::Failed, error.into(), now)
    }

    /// No result within the timeout. Returns `true` when the task went back to `PENDING`.
    pub fn time_out(&mut self, now: DateTime<Utc>) -> Result<bool, DomainError> {
        let error = format!("task timed out after {}s", self.timeout_seconds);
        self.retry_or(TaskStatus::Timeout, error, now)
    }

    /// The assigned agent went away for good. Returns `true` when re-queued,
    /// otherwise the task ends `CANCELLED`.
    pub fn abandon(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<bool, DomainError> {
        self.retry_or(TaskStatus::Cancelled, reason.into(), now)
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(self.invalid(TaskStatus::Cancelled));
        }
        self.status = TaskStatus::Cancelled;
        self.error = Some("cancelled".to_string());
        self.completed_at = Some(now);
        Ok(())
    }

    fn retry_or(&mut self, terminal: TaskStatus, error: String, now: DateTime<Utc>) -> Result<bool, DomainError> {
        if !self.status.is_active() {
            return Err(self.invalid(terminal));
        }
        self.error = Some(error);
        if self.retry_count < self.max_retries {
            self.retry_count += 1;
            self.status = TaskStatus::Pending;
            self.assigned_agent = None;
            self.assigned_at = None;
            self.started_at = None;
            Ok(true)
        } else {
            self.status = terminal;
            self.completed_at = Some(now);
            Ok(false)
        }
    }

    /// Strictly more than `timeout_seconds` since assignment.
    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        match (self.status.is_active(), self.assigned_at) {
            (true, Some(assigned_at)) => {
                now.signed_duration_since(assigned_at).num_milliseconds()
                    > (self.timeout_seconds as i64).saturating_mul(1000)
            }
            _ => false,
        }
    }

    /// Assignment-to-completion time in milliseconds, once completed.
    pub fn duration_ms(&self) -> Option<f64> {
        let start = self.assigned_at?;
        let end = self.completed_at?;
        Some(end.signed_duration_since(start).num_milliseconds().max(0) as f64)
    }
}
