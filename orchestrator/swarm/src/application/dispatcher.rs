// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Task Dispatcher
//!
//! Owns the agent table, the priority queue of pending tasks and the maps of
//! active and finished tasks. All of it sits behind one [`parking_lot::Mutex`];
//! every operation decides under the lock and performs transport I/O after
//! releasing it.
//!
//! ## Queue order
//!
//! Higher `priority` first, then submission order. Re-queued tasks join the back
//! of their priority band.
//!
//! ## Delivery
//!
//! A failed `send_task` counts as a task failure and goes through the normal
//! retry policy. The re-queued task waits for the next monitor tick or the next
//! submission rather than being retried inline. When the transport reports the
//! agent unreachable, the agent is taken offline as well, so the retry lands on
//! another agent; its next heartbeat brings it back.
//!
//! Flushes are serialized. Each assignment is re-checked against the current
//! state right before it is sent, so a task cancelled or re-placed in the
//! meantime never reaches its old agent after the cancel notice.

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use acp_core::domain::message::{AcpMessage, MessagePriority, MessageType};
use acp_core::domain::node_config::{DispatcherSettings, SchedulingStrategy};
use acp_core::domain::trace::{NoopTraceSink, TraceSink};
use acp_core::domain::transport::{TaskTransport, TransportError};

use super::monitor::MonitorHandle;
use crate::domain::agent::{AgentInfo, AgentStatus};
use crate::domain::strategy::AgentSelector;
use crate::domain::task::{TaskId, TaskInfo, TaskRequest, TaskStatus};

/// Point-in-time copy of a task. `queue_position` is 0-based and only set while
/// the task is pending.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    #[serde(flatten)]
    pub task: TaskInfo,
    pub queue_position: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatcherStats {
    pub strategy: SchedulingStrategy,
    pub total_agents: usize,
    pub online_agents: usize,
    pub pending_tasks: usize,
    pub active_tasks: usize,
    pub finished_tasks: usize,
    pub tasks_submitted: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_timed_out: u64,
    pub tasks_cancelled: u64,
    pub tasks_retried: u64,
    pub average_task_duration_ms: f64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: u64,
    completed: u64,
    failed: u64,
    timed_out: u64,
    cancelled: u64,
    retried: u64,
    durations_recorded: u64,
    average_duration_ms: f64,
}

impl Counters {
    fn record_duration(&mut self, duration_ms: f64) {
        self.durations_recorded += 1;
        self.average_duration_ms +=
            (duration_ms - self.average_duration_ms) / self.durations_recorded as f64;
    }
}

struct DispatcherState {
    agents: HashMap<String, AgentInfo>,
    /// Registration order, used for selection tie-breaks.
    agent_order: Vec<String>,
    pending: Vec<TaskInfo>,
    active: HashMap<TaskId, TaskInfo>,
    finished: HashMap<TaskId, TaskInfo>,
    selector: AgentSelector,
    counters: Counters,
}

/// One placement of a task. Every re-placement bumps `retry_count`.
#[derive(Debug, Clone, PartialEq)]
struct Placement {
    task_id: TaskId,
    agent_id: String,
    retry_count: u32,
}

struct Assignment {
    placement: Placement,
    message: AcpMessage,
}

struct CancelNotice {
    agent_id: String,
    message: AcpMessage,
}

/// Transport work collected under the lock.
#[derive(Default)]
struct Outbox {
    assignments: Vec<Assignment>,
    cancels: Vec<CancelNotice>,
}

pub struct TaskDispatcher {
    settings: DispatcherSettings,
    state: Mutex<DispatcherState>,
    transport: Option<Arc<dyn TaskTransport>>,
    trace_sink: Arc<dyn TraceSink>,
    /// Held for the whole of a flush.
    delivery: tokio::sync::Mutex<()>,
    pub(crate) monitor: Mutex<Option<MonitorHandle>>,
}

impl TaskDispatcher {
    pub fn new(settings: DispatcherSettings) -> Self {
        let selector = AgentSelector::new(&settings);
        Self {
            settings,
            state: Mutex::new(DispatcherState {
                agents: HashMap::new(),
                agent_order: Vec::new(),
                pending: Vec::new(),
                active: HashMap::new(),
                finished: HashMap::new(),
                selector,
                counters: Counters::default(),
            }),
            transport: None,
            trace_sink: Arc::new(NoopTraceSink),
            delivery: tokio::sync::Mutex::new(()),
            monitor: Mutex::new(None),
        }
    }

    /// Without a transport, assignments are recorded but never sent.
    pub fn with_transport(mut self, transport: Arc<dyn TaskTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_trace_sink(mut self, trace_sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = trace_sink;
        self
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    /// Adds or refreshes an agent. Re-registration keeps the current load and never
    /// lowers `max_load` below it.
    pub async fn register_agent(
        &self,
        agent_id: &str,
        capabilities: Vec<String>,
        max_load: u32,
        metadata: Map<String, Value>,
    ) -> bool {
        if agent_id.is_empty() {
            warn!("Rejected agent registration without an agent id");
            return false;
        }
        let now = Utc::now();
        let outbox = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            match state.agents.get_mut(agent_id) {
                Some(agent) => {
                    if max_load < agent.current_load {
                        warn!(
                            agent_id = %agent_id,
                            requested = max_load,
                            current_load = agent.current_load,
                            "Requested max_load below current load, keeping current load as the limit"
                        );
                    }
                    agent.capabilities = capabilities;
                    agent.max_load = max_load.max(agent.current_load);
                    agent.metadata = metadata;
                    agent.status = AgentStatus::Online;
                    agent.last_heartbeat = now;
                    info!(agent_id = %agent_id, max_load = agent.max_load, "Agent re-registered");
                }
                None => {
                    let agent = AgentInfo::new(agent_id, capabilities, max_load, metadata, now);
                    info!(
                        agent_id = %agent_id,
                        capabilities = ?agent.capabilities,
                        max_load,
                        "Agent registered"
                    );
                    state.agents.insert(agent_id.to_string(), agent);
                    state.agent_order.push(agent_id.to_string());
                }
            }
            let mut outbox = Outbox::default();
            self.dispatch_pending(state, now, &mut outbox);
            publish_gauges(state);
            outbox
        };
        self.trace_sink
            .record_event(agent_id, "agent_registered", json!({ "max_load": max_load }));
        self.flush(outbox).await;
        true
    }

    /// Removes an agent. Its in-flight tasks are re-queued while retries remain,
    /// otherwise they end `CANCELLED`.
    pub async fn unregister_agent(&self, agent_id: &str) -> bool {
        let now = Utc::now();
        let outbox = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.agents.remove(agent_id).is_none() {
                debug!(agent_id = %agent_id, "Unregister for unknown agent");
                return false;
            }
            state.agent_order.retain(|id| id != agent_id);

            let reason = format!("agent {} unregistered", agent_id);
            for task_id in tasks_on_agent(state, agent_id) {
                if let Some(mut task) = state.active.remove(&task_id) {
                    if let Err(e) = task.abandon(reason.clone(), now) {
                        warn!(task_id = %task_id, error = %e, "Could not release task from agent");
                    }
                    self.settle(state, task);
                }
            }
            info!(agent_id = %agent_id, "Agent unregistered");

            let mut outbox = Outbox::default();
            self.dispatch_pending(state, now, &mut outbox);
            publish_gauges(state);
            outbox
        };
        self.flush(outbox).await;
        true
    }

    /// Refreshes `last_heartbeat`. A reported `Offline` has the same effect as a
    /// missed heartbeat.
    pub async fn update_agent_heartbeat(&self, agent_id: &str, status: AgentStatus) -> bool {
        let now = Utc::now();
        let outbox = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(agent) = state.agents.get_mut(agent_id) else {
                debug!(agent_id = %agent_id, "Heartbeat from unknown agent");
                return false;
            };
            agent.last_heartbeat = now;
            match status {
                AgentStatus::Online => {
                    if agent.status == AgentStatus::Offline {
                        info!(agent_id = %agent_id, "Agent back online");
                    }
                    agent.status = AgentStatus::Online;
                }
                AgentStatus::Offline => {
                    self.take_agent_offline(state, agent_id, now);
                }
            }
            let mut outbox = Outbox::default();
            self.dispatch_pending(state, now, &mut outbox);
            publish_gauges(state);
            outbox
        };
        self.flush(outbox).await;
        true
    }

    /// Queues a task and attempts immediate placement.
    pub async fn submit_task(&self, request: TaskRequest) -> TaskId {
        let now = Utc::now();
        let task = TaskInfo::new(
            request,
            self.settings.default_timeout_seconds,
            self.settings.default_max_retries,
            now,
        );
        let task_id = task.task_id;
        counter!("acp_tasks_submitted_total").increment(1);
        info!(
            task_id = %task_id,
            task_type = %task.task_type,
            priority = task.priority,
            required_capabilities = ?task.required_capabilities,
            "Task submitted"
        );
        self.trace_sink.record_event(
            &task_id.to_string(),
            "task_submitted",
            json!({ "task_type": task.task_type, "priority": task.priority }),
        );

        let outbox = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.counters.submitted += 1;
            enqueue(&mut state.pending, task);
            let mut outbox = Outbox::default();
            self.dispatch_pending(state, now, &mut outbox);
            publish_gauges(state);
            outbox
        };
        self.flush(outbox).await;
        task_id
    }

    pub fn get_task_status(&self, task_id: &TaskId) -> Option<TaskSnapshot> {
        let state = self.state.lock();
        if let Some((position, task)) = state
            .pending
            .iter()
            .enumerate()
            .find(|(_, t)| t.task_id == *task_id)
        {
            return Some(TaskSnapshot {
                task: task.clone(),
                queue_position: Some(position),
            });
        }
        state
            .active
            .get(task_id)
            .or_else(|| state.finished.get(task_id))
            .map(|task| TaskSnapshot {
                task: task.clone(),
                queue_position: None,
            })
    }

    /// Pending task ids in dispatch order.
    pub fn queued_tasks(&self) -> Vec<TaskId> {
        self.state.lock().pending.iter().map(|t| t.task_id).collect()
    }

    /// Cancels a pending or active task. Active tasks get a best-effort
    /// `cancel_task` notice. Returns `false` for unknown or finished tasks.
    pub async fn cancel_task(&self, task_id: &TaskId) -> bool {
        let now = Utc::now();
        let outbox = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let mut outbox = Outbox::default();
            if let Some(position) = state.pending.iter().position(|t| t.task_id == *task_id) {
                let mut task = state.pending.remove(position);
                if let Err(e) = task.cancel(now) {
                    warn!(task_id = %task_id, error = %e, "Could not cancel pending task");
                }
                self.settle(state, task);
            } else if let Some(mut task) = take_active(state, task_id) {
                if let Err(e) = task.cancel(now) {
                    warn!(task_id = %task_id, error = %e, "Could not cancel active task");
                }
                if let Some(agent_id) = task.assigned_agent.clone() {
                    let message = self.cancel_message(&task, &agent_id, "cancelled");
                    outbox.cancels.push(CancelNotice { agent_id, message });
                }
                self.settle(state, task);
                self.dispatch_pending(state, now, &mut outbox);
            } else {
                debug!(task_id = %task_id, "Cancel for unknown or finished task");
                return false;
            }
            info!(task_id = %task_id, "Task cancelled");
            publish_gauges(state);
            outbox
        };
        self.flush(outbox).await;
        true
    }

    /// Applies a result reported by the executing agent. Returns `false` when the
    /// task is not active, e.g. already timed out or cancelled.
    pub async fn handle_task_result(
        &self,
        task_id: &TaskId,
        success: bool,
        result: Option<Value>,
        error: Option<String>,
    ) -> bool {
        let now = Utc::now();
        let outbox = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(mut task) = take_active(state, task_id) else {
                warn!(task_id = %task_id, success, "Result for a task that is not active, ignoring");
                return false;
            };
            let transition = if success {
                task.complete(result, now)
            } else {
                let error = error.unwrap_or_else(|| "task failed".to_string());
                task.fail(error, now).map(|_| ())
            };
            if let Err(e) = transition {
                warn!(task_id = %task_id, error = %e, "Could not apply task result");
            }
            self.settle(state, task);
            let mut outbox = Outbox::default();
            self.dispatch_pending(state, now, &mut outbox);
            publish_gauges(state);
            outbox
        };
        self.flush(outbox).await;
        true
    }

    /// `ASSIGNED → EXECUTING`, when the agent reports that work began.
    pub fn mark_task_started(&self, task_id: &TaskId) -> bool {
        let mut state = self.state.lock();
        let Some(task) = state.active.get_mut(task_id) else {
            return false;
        };
        match task.start(Utc::now()) {
            Ok(()) => {
                debug!(task_id = %task_id, "Task started");
                true
            }
            Err(e) => {
                debug!(task_id = %task_id, error = %e, "Ignoring start report");
                false
            }
        }
    }

    pub fn get_agent(&self, agent_id: &str) -> Option<AgentInfo> {
        self.state.lock().agents.get(agent_id).cloned()
    }

    /// All agents in registration order.
    pub fn list_agents(&self) -> Vec<AgentInfo> {
        let state = self.state.lock();
        state
            .agent_order
            .iter()
            .filter_map(|id| state.agents.get(id).cloned())
            .collect()
    }

    pub fn get_dispatcher_stats(&self) -> DispatcherStats {
        let state = self.state.lock();
        DispatcherStats {
            strategy: state.selector.strategy(),
            total_agents: state.agents.len(),
            online_agents: online_agents(&state),
            pending_tasks: state.pending.len(),
            active_tasks: state.active.len(),
            finished_tasks: state.finished.len(),
            tasks_submitted: state.counters.submitted,
            tasks_completed: state.counters.completed,
            tasks_failed: state.counters.failed,
            tasks_timed_out: state.counters.timed_out,
            tasks_cancelled: state.counters.cancelled,
            tasks_retried: state.counters.retried,
            average_task_duration_ms: state.counters.average_duration_ms,
        }
    }

    pub async fn monitor_tick(&self) {
        self.monitor_tick_at(Utc::now()).await;
    }

    /// One monitor pass at `now`: place pending tasks, expire overdue tasks, then
    /// mark agents whose heartbeat is older than the threshold offline.
    pub async fn monitor_tick_at(&self, now: DateTime<Utc>) {
        let outbox = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let mut outbox = Outbox::default();
            self.dispatch_pending(state, now, &mut outbox);
            self.expire_overdue(state, now, &mut outbox);
            self.check_heartbeats(state, now);
            publish_gauges(state);
            outbox
        };
        self.flush(outbox).await;
    }

    fn dispatch_pending(&self, state: &mut DispatcherState, now: DateTime<Utc>, outbox: &mut Outbox) {
        if state.pending.is_empty() || !state.agents.values().any(AgentInfo::is_available) {
            return;
        }
        let DispatcherState {
            agents,
            agent_order,
            pending,
            active,
            selector,
            ..
        } = state;

        for mut task in std::mem::take(pending) {
            let chosen = {
                let candidates: Vec<&AgentInfo> = agent_order
                    .iter()
                    .filter_map(|id| agents.get(id))
                    .filter(|a| a.is_available() && a.has_capabilities(&task.required_capabilities))
                    .collect();
                selector
                    .select(&candidates, &task.required_capabilities)
                    .map(|index| candidates[index].agent_id.clone())
            };
            let Some(agent_id) = chosen else {
                pending.push(task);
                continue;
            };
            let Some(agent) = agents.get_mut(&agent_id) else {
                pending.push(task);
                continue;
            };
            if !agent.acquire_slot() {
                pending.push(task);
                continue;
            }
            if let Err(e) = task.assign(&agent_id, now) {
                agent.release_slot();
                warn!(task_id = %task.task_id, error = %e, "Skipping task that cannot be assigned");
                pending.push(task);
                continue;
            }

            info!(
                task_id = %task.task_id,
                agent_id = %agent_id,
                strategy = %selector.strategy(),
                agent_load = agent.current_load,
                "Task assigned"
            );
            self.trace_sink.record_event(
                &task.task_id.to_string(),
                "task_assigned",
                json!({ "agent_id": agent_id, "retry_count": task.retry_count }),
            );
            outbox.assignments.push(Assignment {
                placement: Placement {
                    task_id: task.task_id,
                    agent_id: agent_id.clone(),
                    retry_count: task.retry_count,
                },
                message: self.task_message(&task, &agent_id),
            });
            active.insert(task.task_id, task);
        }
    }

    fn expire_overdue(&self, state: &mut DispatcherState, now: DateTime<Utc>, outbox: &mut Outbox) {
        let overdue: Vec<TaskId> = state
            .active
            .values()
            .filter(|t| t.is_timed_out(now))
            .map(|t| t.task_id)
            .collect();
        for task_id in overdue {
            let Some(mut task) = take_active(state, &task_id) else {
                continue;
            };
            let agent_id = task.assigned_agent.clone();
            match task.time_out(now) {
                Ok(retried) => warn!(
                    task_id = %task_id,
                    agent_id = ?agent_id,
                    timeout_seconds = task.timeout_seconds,
                    retried,
                    "Task timed out"
                ),
                Err(e) => warn!(task_id = %task_id, error = %e, "Could not time out task"),
            }
            if let Some(agent_id) = agent_id {
                let message = self.cancel_message(&task, &agent_id, "timeout");
                outbox.cancels.push(CancelNotice { agent_id, message });
            }
            self.settle(state, task);
        }
    }

    fn check_heartbeats(&self, state: &mut DispatcherState, now: DateTime<Utc>) {
        let threshold_ms = (self.settings.heartbeat_timeout_seconds as i64).saturating_mul(1000);
        let stale: Vec<String> = state
            .agent_order
            .iter()
            .filter(|id| {
                state.agents.get(*id).is_some_and(|a| {
                    a.status == AgentStatus::Online && a.heartbeat_age_ms(now) > threshold_ms
                })
            })
            .cloned()
            .collect();
        for agent_id in stale {
            warn!(
                agent_id = %agent_id,
                heartbeat_timeout_seconds = self.settings.heartbeat_timeout_seconds,
                "Agent missed heartbeat window"
            );
            self.take_agent_offline(state, &agent_id, now);
        }
    }

    /// Marks the agent offline and fails its in-flight tasks through the retry policy.
    fn take_agent_offline(&self, state: &mut DispatcherState, agent_id: &str, now: DateTime<Utc>) {
        if let Some(agent) = state.agents.get_mut(agent_id) {
            agent.status = AgentStatus::Offline;
        }
        self.trace_sink.record_event(agent_id, "agent_offline", json!({}));
        let reason = format!("agent {} went offline", agent_id);
        for task_id in tasks_on_agent(state, agent_id) {
            if let Some(mut task) = take_active(state, &task_id) {
                if let Err(e) = task.fail(reason.clone(), now) {
                    warn!(task_id = %task_id, error = %e, "Could not fail task of offline agent");
                }
                self.settle(state, task);
            }
        }
    }

    /// Files a task that just left the active map.
    fn settle(&self, state: &mut DispatcherState, task: TaskInfo) {
        let trace_id = task.task_id.to_string();
        match task.status {
            TaskStatus::Pending => {
                state.counters.retried += 1;
                counter!("acp_tasks_retried_total").increment(1);
                debug!(task_id = %trace_id, retry_count = task.retry_count, "Task re-queued");
                self.trace_sink.record_event(
                    &trace_id,
                    "task_requeued",
                    json!({ "retry_count": task.retry_count, "error": task.error }),
                );
                enqueue(&mut state.pending, task);
            }
            TaskStatus::Assigned | TaskStatus::Executing => {
                state.active.insert(task.task_id, task);
            }
            status => {
                let event_type = match status {
                    TaskStatus::Completed => {
                        state.counters.completed += 1;
                        counter!("acp_tasks_completed_total").increment(1);
                        if let Some(duration_ms) = task.duration_ms() {
                            state.counters.record_duration(duration_ms);
                        }
                        "task_completed"
                    }
                    TaskStatus::Timeout => {
                        state.counters.timed_out += 1;
                        counter!("acp_tasks_timed_out_total").increment(1);
                        "task_timed_out"
                    }
                    TaskStatus::Cancelled => {
                        state.counters.cancelled += 1;
                        counter!("acp_tasks_cancelled_total").increment(1);
                        "task_cancelled"
                    }
                    _ => {
                        state.counters.failed += 1;
                        counter!("acp_tasks_failed_total").increment(1);
                        "task_failed"
                    }
                };
                self.trace_sink.record_event(
                    &trace_id,
                    event_type,
                    json!({ "retry_count": task.retry_count, "error": task.error }),
                );
                state.finished.insert(task.task_id, task);
            }
        }
    }

    fn task_message(&self, task: &TaskInfo, agent_id: &str) -> AcpMessage {
        let task_id = task.task_id.to_string();
        AcpMessage::task_assignment(&self.settings.dispatcher_id, agent_id, &task_id, &task.task_type)
            .trace_id(task_id.as_str())
            .priority(MessagePriority::from_task_priority(task.priority))
            .retries(task.retry_count, task.max_retries)
            .ttl(task.timeout_seconds)
            .capabilities(task.required_capabilities.clone())
            .data_field("task_data", Value::Object(task.task_data.clone()))
            .data_field("timeout", Value::from(task.timeout_seconds))
            .data_field("retry_count", Value::from(task.retry_count))
            .build()
    }

    fn cancel_message(&self, task: &TaskInfo, agent_id: &str, reason: &str) -> AcpMessage {
        let task_id = task.task_id.to_string();
        AcpMessage::builder(MessageType::Task)
            .sender(self.settings.dispatcher_id.as_str())
            .receiver(agent_id)
            .trace_id(task_id.as_str())
            .command("cancel_task")
            .action(task.task_type.as_str())
            .data_field("task_id", Value::String(task_id.clone()))
            .data_field("reason", Value::String(reason.to_string()))
            .build()
    }

    async fn flush(&self, outbox: Outbox) {
        let Some(transport) = self.transport.as_ref() else {
            if !outbox.assignments.is_empty() {
                debug!(
                    assignments = outbox.assignments.len(),
                    "No task transport configured, assignments are not delivered"
                );
            }
            return;
        };
        let _delivery = self.delivery.lock().await;
        for notice in outbox.cancels {
            if let Err(e) = transport.notify_cancel(&notice.agent_id, notice.message).await {
                debug!(agent_id = %notice.agent_id, error = %e, "Cancel notice not delivered");
            }
        }
        for Assignment { placement, message } in outbox.assignments {
            if !self.is_current(&placement) {
                debug!(
                    task_id = %placement.task_id,
                    agent_id = %placement.agent_id,
                    "Assignment superseded before delivery, not sent"
                );
                continue;
            }
            if let Err(e) = transport.send_task(&placement.agent_id, message).await {
                warn!(
                    task_id = %placement.task_id,
                    agent_id = %placement.agent_id,
                    error = %e,
                    "Task delivery failed"
                );
                self.handle_send_failure(&placement, &e);
            }
        }
    }

    /// Whether the task still sits `ASSIGNED` on the agent from this placement.
    fn is_current(&self, placement: &Placement) -> bool {
        let state = self.state.lock();
        is_assigned_to(&state, placement)
    }

    fn handle_send_failure(&self, placement: &Placement, error: &TransportError) {
        let unreachable = matches!(
            error,
            TransportError::AgentNotConnected(_) | TransportError::ConnectionClosed(_)
        );
        let agent_id = placement.agent_id.as_str();
        let now = Utc::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !is_assigned_to(state, placement) {
            return;
        }
        if let Some(mut task) = take_active(state, &placement.task_id) {
            let reason = format!("failed to deliver task to agent {}: {}", agent_id, error);
            if let Err(e) = task.fail(reason, now) {
                warn!(task_id = %placement.task_id, error = %e, "Could not fail undelivered task");
            }
            self.settle(state, task);
        }
        if unreachable && state.agents.contains_key(agent_id) {
            warn!(agent_id = %agent_id, "Agent unreachable, marking offline until its next heartbeat");
            self.take_agent_offline(state, agent_id, now);
        }
        publish_gauges(state);
    }
}

fn is_assigned_to(state: &DispatcherState, placement: &Placement) -> bool {
    state.active.get(&placement.task_id).is_some_and(|t| {
        t.status == TaskStatus::Assigned
            && t.retry_count == placement.retry_count
            && t.assigned_agent.as_deref() == Some(placement.agent_id.as_str())
    })
}

fn enqueue(pending: &mut Vec<TaskInfo>, task: TaskInfo) {
    let position = pending
        .iter()
        .position(|queued| queued.priority < task.priority)
        .unwrap_or(pending.len());
    pending.insert(position, task);
}

/// Removes a task from the active map and frees its agent's slot.
fn take_active(state: &mut DispatcherState, task_id: &TaskId) -> Option<TaskInfo> {
    let task = state.active.remove(task_id)?;
    if let Some(agent) = task
        .assigned_agent
        .as_deref()
        .and_then(|id| state.agents.get_mut(id))
    {
        agent.release_slot();
    }
    Some(task)
}

fn tasks_on_agent(state: &DispatcherState, agent_id: &str) -> Vec<TaskId> {
    state
        .active
        .values()
        .filter(|t| t.assigned_agent.as_deref() == Some(agent_id))
        .map(|t| t.task_id)
        .collect()
}

fn online_agents(state: &DispatcherState) -> usize {
    state
        .agents
        .values()
        .filter(|a| a.status == AgentStatus::Online)
        .count()
}

fn publish_gauges(state: &DispatcherState) {
    gauge!("acp_pending_tasks").set(state.pending.len() as f64);
    gauge!("acp_active_tasks").set(state.active.len() as f64);
    gauge!("acp_agents_online").set(online_agents(state) as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> TaskDispatcher {
        TaskDispatcher::new(DispatcherSettings::default())
    }

    #[tokio::test]
    async fn test_queue_position_follows_priority_then_submission() {
        let d = dispatcher();
        let low = d.submit_task(TaskRequest::new("t").with_priority(1)).await;
        let high = d.submit_task(TaskRequest::new("t").with_priority(5)).await;
        let low_again = d.submit_task(TaskRequest::new("t").with_priority(1)).await;

        assert_eq!(d.queued_tasks(), vec![high, low, low_again]);
        assert_eq!(d.get_task_status(&low_again).unwrap().queue_position, Some(2));
        assert_eq!(d.get_task_status(&high).unwrap().task.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_reregistration_keeps_load() {
        let d = dispatcher();
        d.register_agent("a", vec!["x".into()], 3, Map::new()).await;
        d.submit_task(TaskRequest::new("t")).await;
        d.submit_task(TaskRequest::new("t")).await;
        assert_eq!(d.get_agent("a").unwrap().current_load, 2);

        assert!(d.register_agent("a", vec!["y".into()], 1, Map::new()).await);
        let agent = d.get_agent("a").unwrap();
        assert_eq!(agent.current_load, 2);
        assert_eq!(agent.max_load, 2);
        assert_eq!(agent.capabilities, vec!["y".to_string()]);
        assert_eq!(d.list_agents().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_agent_id_is_rejected() {
        let d = dispatcher();
        assert!(!d.register_agent("", vec![], 1, Map::new()).await);
        assert!(d.list_agents().is_empty());
    }

    #[tokio::test]
    async fn test_result_for_unknown_task_is_ignored() {
        let d = dispatcher();
        assert!(!d.handle_task_result(&TaskId::new(), true, None, None).await);
        assert!(!d.cancel_task(&TaskId::new()).await);
        assert!(!d.mark_task_started(&TaskId::new()));
    }

    #[tokio::test]
    async fn test_average_duration_is_running_mean() {
        let mut counters = Counters::default();
        counters.record_duration(100.0);
        counters.record_duration(300.0);
        counters.record_duration(200.0);
        assert!((counters.average_duration_ms - 200.0).abs() < 1e-9);
    }
}
