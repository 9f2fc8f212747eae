// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use acp_core::domain::message::{AcpMessage, MessagePriority, MessageType};
use acp_core::domain::node_config::{DispatcherSettings, SchedulingStrategy};
use acp_core::domain::trace::InMemoryTraceSink;
use acp_core::domain::transport::{TaskTransport, TransportError};
use acp_swarm::{AgentStatus, TaskDispatcher, TaskId, TaskRequest, TaskStatus};
use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use parking_lot::Mutex;
use serde_json::{json, Map};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Records every outbound message; task delivery to `unreachable` agents fails.
#[derive(Default)]
struct RecordingTransport {
    unreachable: Vec<String>,
    tasks: Mutex<Vec<(String, AcpMessage)>>,
    cancels: Mutex<Vec<(String, AcpMessage)>>,
}

impl RecordingTransport {
    fn refusing(agents: &[&str]) -> Self {
        Self {
            unreachable: caps(agents),
            ..Self::default()
        }
    }
}

#[async_trait]
impl TaskTransport for RecordingTransport {
    async fn send_task(&self, agent_id: &str, message: AcpMessage) -> Result<(), TransportError> {
        if self.unreachable.iter().any(|id| id == agent_id) {
            return Err(TransportError::AgentNotConnected(agent_id.to_string()));
        }
        self.tasks.lock().push((agent_id.to_string(), message));
        Ok(())
    }

    async fn notify_cancel(&self, agent_id: &str, message: AcpMessage) -> Result<(), TransportError> {
        self.cancels.lock().push((agent_id.to_string(), message));
        Ok(())
    }
}

/// Holds the first task delivery until `release` is notified. Records task ids.
#[derive(Default)]
struct GatedTransport {
    holding: AtomicBool,
    release: Notify,
    tasks: Mutex<Vec<String>>,
    cancels: Mutex<Vec<String>>,
}

fn task_id_field(message: &AcpMessage) -> String {
    message.payload.data["task_id"].as_str().unwrap_or_default().to_string()
}

#[async_trait]
impl TaskTransport for GatedTransport {
    async fn send_task(&self, _agent_id: &str, message: AcpMessage) -> Result<(), TransportError> {
        if !self.holding.swap(true, Ordering::SeqCst) {
            self.release.notified().await;
        }
        self.tasks.lock().push(task_id_field(&message));
        Ok(())
    }

    async fn notify_cancel(&self, _agent_id: &str, message: AcpMessage) -> Result<(), TransportError> {
        self.cancels.lock().push(task_id_field(&message));
        Ok(())
    }
}

fn caps(names: &[&str]) -> Vec<String> {
    names.iter().map(|c| c.to_string()).collect()
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

fn dispatcher_with(transport: Arc<RecordingTransport>) -> TaskDispatcher {
    TaskDispatcher::new(DispatcherSettings::default()).with_transport(transport)
}

#[tokio::test]
async fn test_second_task_waits_for_free_capacity() {
    let transport = Arc::new(RecordingTransport::default());
    let dispatcher = dispatcher_with(transport.clone());
    dispatcher.register_agent("A", caps(&["math"]), 1, Map::new()).await;

    let first = dispatcher
        .submit_task(TaskRequest::new("add").requiring(["math"]))
        .await;
    let snapshot = dispatcher.get_task_status(&first).unwrap();
    assert_eq!(snapshot.task.status, TaskStatus::Assigned);
    assert_eq!(snapshot.task.assigned_agent.as_deref(), Some("A"));
    assert_eq!(dispatcher.get_agent("A").unwrap().current_load, 1);

    let second = dispatcher
        .submit_task(TaskRequest::new("add").requiring(["math"]))
        .await;
    let waiting = dispatcher.get_task_status(&second).unwrap();
    assert_eq!(waiting.task.status, TaskStatus::Pending);
    assert_eq!(waiting.queue_position, Some(0));

    assert!(dispatcher.handle_task_result(&first, true, Some(json!(4)), None).await);
    assert_eq!(dispatcher.get_task_status(&first).unwrap().task.status, TaskStatus::Completed);
    assert_eq!(dispatcher.get_task_status(&second).unwrap().task.status, TaskStatus::Assigned);
    assert_eq!(dispatcher.get_agent("A").unwrap().current_load, 1);

    let sent = transport.tasks.lock();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].0, "A");
    assert_eq!(sent[0].1.meta.message_type, MessageType::Task);
    assert_eq!(sent[0].1.payload.data["task_id"], json!(first.to_string()));
}

#[tokio::test]
async fn test_timeout_retries_then_goes_terminal() {
    let dispatcher = dispatcher_with(Arc::new(RecordingTransport::default()));
    dispatcher.register_agent("A", caps(&["math"]), 1, Map::new()).await;
    let t0 = Utc::now();

    let task_id = dispatcher
        .submit_task(
            TaskRequest::new("slow")
                .requiring(["math"])
                .with_timeout(1)
                .with_max_retries(1),
        )
        .await;
    assert_eq!(dispatcher.get_task_status(&task_id).unwrap().task.status, TaskStatus::Assigned);

    dispatcher.monitor_tick_at(t0 + TimeDelta::seconds(2)).await;
    let retried = dispatcher.get_task_status(&task_id).unwrap();
    assert_eq!(retried.task.status, TaskStatus::Pending);
    assert_eq!(retried.task.retry_count, 1);
    assert_eq!(dispatcher.get_agent("A").unwrap().current_load, 0);

    dispatcher.monitor_tick_at(t0 + TimeDelta::seconds(4)).await;
    assert_eq!(dispatcher.get_task_status(&task_id).unwrap().task.status, TaskStatus::Assigned);

    dispatcher.monitor_tick_at(t0 + TimeDelta::seconds(6)).await;
    let done = dispatcher.get_task_status(&task_id).unwrap();
    assert_eq!(done.task.status, TaskStatus::Timeout);
    assert_eq!(done.task.retry_count, 1);

    let stats = dispatcher.get_dispatcher_stats();
    assert_eq!(stats.tasks_timed_out, 1);
    assert_eq!(stats.tasks_retried, 1);
    assert_eq!(stats.active_tasks, 0);
}

#[tokio::test]
async fn test_cancel_active_task_notifies_agent_and_frees_slot() {
    let transport = Arc::new(RecordingTransport::default());
    let dispatcher = dispatcher_with(transport.clone());
    dispatcher.register_agent("A", vec![], 1, Map::new()).await;

    let task_id = dispatcher.submit_task(TaskRequest::new("work")).await;
    assert!(dispatcher.mark_task_started(&task_id));
    assert_eq!(dispatcher.get_task_status(&task_id).unwrap().task.status, TaskStatus::Executing);

    assert!(dispatcher.cancel_task(&task_id).await);
    assert_eq!(dispatcher.get_task_status(&task_id).unwrap().task.status, TaskStatus::Cancelled);
    assert_eq!(dispatcher.get_agent("A").unwrap().current_load, 0);
    assert!(!dispatcher.cancel_task(&task_id).await);
    assert!(!dispatcher.handle_task_result(&task_id, true, None, None).await);

    let cancels = transport.cancels.lock();
    assert_eq!(cancels.len(), 1);
    assert_eq!(cancels[0].0, "A");
    assert_eq!(cancels[0].1.payload.command_type, "cancel_task");
    assert_eq!(cancels[0].1.payload.data["task_id"], json!(task_id.to_string()));
}

#[tokio::test]
async fn test_cancel_pending_task_is_silent() {
    let transport = Arc::new(RecordingTransport::default());
    let dispatcher = dispatcher_with(transport.clone());
    let task_id = dispatcher.submit_task(TaskRequest::new("orphan")).await;

    assert!(dispatcher.cancel_task(&task_id).await);
    let snapshot = dispatcher.get_task_status(&task_id).unwrap();
    assert_eq!(snapshot.task.status, TaskStatus::Cancelled);
    assert_eq!(snapshot.queue_position, None);
    assert!(transport.cancels.lock().is_empty());
}

#[tokio::test]
async fn test_unregister_requeues_onto_remaining_agent() {
    let dispatcher = dispatcher_with(Arc::new(RecordingTransport::default()));
    dispatcher.register_agent("A", caps(&["x"]), 1, Map::new()).await;
    let task_id = dispatcher
        .submit_task(TaskRequest::new("t").requiring(["x"]).with_max_retries(1))
        .await;
    dispatcher.register_agent("B", caps(&["x"]), 1, Map::new()).await;

    assert!(dispatcher.unregister_agent("A").await);
    let moved = dispatcher.get_task_status(&task_id).unwrap();
    assert_eq!(moved.task.status, TaskStatus::Assigned);
    assert_eq!(moved.task.assigned_agent.as_deref(), Some("B"));
    assert_eq!(moved.task.retry_count, 1);

    assert!(dispatcher.unregister_agent("B").await);
    let dropped = dispatcher.get_task_status(&task_id).unwrap();
    assert_eq!(dropped.task.status, TaskStatus::Cancelled);
    assert_eq!(dropped.task.error.as_deref(), Some("agent B unregistered"));

    assert!(!dispatcher.unregister_agent("B").await);
    assert!(dispatcher.list_agents().is_empty());
}

#[tokio::test]
async fn test_heartbeat_loss_marks_offline_and_fails_tasks() {
    let dispatcher = dispatcher_with(Arc::new(RecordingTransport::default()));
    dispatcher.register_agent("A", vec![], 2, Map::new()).await;
    let task_id = dispatcher
        .submit_task(TaskRequest::new("t").with_max_retries(0).with_timeout(3600))
        .await;

    dispatcher.monitor_tick_at(Utc::now() + TimeDelta::seconds(61)).await;

    let agent = dispatcher.get_agent("A").unwrap();
    assert_eq!(agent.status, AgentStatus::Offline);
    assert_eq!(agent.current_load, 0);
    let failed = dispatcher.get_task_status(&task_id).unwrap();
    assert_eq!(failed.task.status, TaskStatus::Failed);
    assert_eq!(failed.task.error.as_deref(), Some("agent A went offline"));

    // offline agents receive nothing until they heartbeat again
    let queued = dispatcher.submit_task(TaskRequest::new("t")).await;
    assert_eq!(dispatcher.get_task_status(&queued).unwrap().task.status, TaskStatus::Pending);

    assert!(dispatcher.update_agent_heartbeat("A", AgentStatus::Online).await);
    assert_eq!(dispatcher.get_task_status(&queued).unwrap().task.status, TaskStatus::Assigned);
    assert!(!dispatcher.update_agent_heartbeat("ghost", AgentStatus::Online).await);
}

#[tokio::test]
async fn test_failed_delivery_goes_through_retry_policy() {
    let dispatcher = dispatcher_with(Arc::new(RecordingTransport::refusing(&["A"])));
    dispatcher.register_agent("A", vec![], 1, Map::new()).await;

    let task_id = dispatcher
        .submit_task(TaskRequest::new("t").with_max_retries(1))
        .await;
    let retried = dispatcher.get_task_status(&task_id).unwrap();
    assert_eq!(retried.task.status, TaskStatus::Pending);
    assert_eq!(retried.task.retry_count, 1);
    assert!(retried.task.error.unwrap().contains("failed to deliver task to agent A"));
    let agent = dispatcher.get_agent("A").unwrap();
    assert_eq!(agent.current_load, 0);
    assert_eq!(agent.status, AgentStatus::Offline);

    // nothing to place on until A heartbeats again
    dispatcher.monitor_tick().await;
    assert_eq!(dispatcher.get_task_status(&task_id).unwrap().task.status, TaskStatus::Pending);

    assert!(dispatcher.update_agent_heartbeat("A", AgentStatus::Online).await);
    let failed = dispatcher.get_task_status(&task_id).unwrap();
    assert_eq!(failed.task.status, TaskStatus::Failed);
    assert_eq!(failed.task.retry_count, 1);
    assert_eq!(dispatcher.get_agent("A").unwrap().status, AgentStatus::Offline);
}

#[tokio::test]
async fn test_unreachable_agent_is_skipped_on_retry() {
    let transport = Arc::new(RecordingTransport::refusing(&["A"]));
    let dispatcher = TaskDispatcher::new(DispatcherSettings::with_strategy(
        SchedulingStrategy::CapabilityMatch,
    ))
    .with_transport(transport.clone());
    dispatcher.register_agent("A", caps(&["math"]), 1, Map::new()).await;
    dispatcher.register_agent("B", caps(&["math", "x"]), 1, Map::new()).await;

    let task_id = dispatcher
        .submit_task(TaskRequest::new("add").requiring(["math"]).with_max_retries(2))
        .await;
    assert_eq!(dispatcher.get_agent("A").unwrap().status, AgentStatus::Offline);

    for _ in 0..3 {
        dispatcher.monitor_tick().await;
    }
    let placed = dispatcher.get_task_status(&task_id).unwrap();
    assert_eq!(placed.task.status, TaskStatus::Assigned);
    assert_eq!(placed.task.assigned_agent.as_deref(), Some("B"));
    assert_eq!(placed.task.retry_count, 1);

    let sent = transport.tasks.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "B");
}

#[tokio::test]
async fn test_assignment_cancelled_before_delivery_is_never_sent() {
    let transport = Arc::new(GatedTransport::default());
    let traces = Arc::new(InMemoryTraceSink::new());
    let dispatcher = Arc::new(
        TaskDispatcher::new(DispatcherSettings::default())
            .with_transport(transport.clone())
            .with_trace_sink(traces.clone()),
    );
    dispatcher.register_agent("A", vec![], 2, Map::new()).await;

    let first = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.submit_task(TaskRequest::new("first")).await }
    });
    wait_for(|| transport.holding.load(Ordering::SeqCst)).await;

    // placed while the first delivery is still in flight
    let second = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.submit_task(TaskRequest::new("second")).await }
    });
    wait_for(|| traces.event_types().iter().filter(|t| *t == "task_assigned").count() == 2).await;
    let second_id: TaskId = traces
        .events()
        .into_iter()
        .filter(|e| e.event_type == "task_submitted")
        .nth(1)
        .unwrap()
        .trace_id
        .parse()
        .unwrap();

    let cancel = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.cancel_task(&second_id).await }
    });
    wait_for(|| {
        dispatcher
            .get_task_status(&second_id)
            .is_some_and(|s| s.task.status == TaskStatus::Cancelled)
    })
    .await;

    transport.release.notify_one();
    let first_id = first.await.unwrap();
    assert_eq!(second.await.unwrap(), second_id);
    assert!(cancel.await.unwrap());

    assert_eq!(*transport.tasks.lock(), vec![first_id.to_string()]);
    assert_eq!(*transport.cancels.lock(), vec![second_id.to_string()]);
}

#[tokio::test]
async fn test_remote_failure_retries_and_records_error() {
    let dispatcher = dispatcher_with(Arc::new(RecordingTransport::default()));
    dispatcher.register_agent("A", vec![], 1, Map::new()).await;
    let task_id = dispatcher
        .submit_task(TaskRequest::new("t").with_max_retries(1))
        .await;

    assert!(dispatcher.handle_task_result(&task_id, false, None, Some("bad input".into())).await);
    let again = dispatcher.get_task_status(&task_id).unwrap();
    assert_eq!(again.task.status, TaskStatus::Assigned);
    assert_eq!(again.task.retry_count, 1);

    assert!(dispatcher.handle_task_result(&task_id, false, None, Some("bad input".into())).await);
    let failed = dispatcher.get_task_status(&task_id).unwrap();
    assert_eq!(failed.task.status, TaskStatus::Failed);
    assert_eq!(failed.task.error.as_deref(), Some("bad input"));

    let stats = dispatcher.get_dispatcher_stats();
    assert_eq!(stats.tasks_failed, 1);
    assert_eq!(stats.tasks_submitted, 1);
    assert_eq!(stats.finished_tasks, 1);
}

#[tokio::test]
async fn test_capability_match_prefers_specialist() {
    let settings = DispatcherSettings::with_strategy(SchedulingStrategy::CapabilityMatch);
    let dispatcher = TaskDispatcher::new(settings);
    dispatcher
        .register_agent("generalist", caps(&["math", "text", "vision"]), 4, Map::new())
        .await;
    dispatcher.register_agent("specialist", caps(&["math"]), 4, Map::new()).await;

    let task_id = dispatcher
        .submit_task(TaskRequest::new("add").requiring(["math"]))
        .await;
    assert_eq!(
        dispatcher.get_task_status(&task_id).unwrap().task.assigned_agent.as_deref(),
        Some("specialist")
    );
}

#[tokio::test]
async fn test_assignment_message_carries_task_fields() {
    let transport = Arc::new(RecordingTransport::default());
    let traces = Arc::new(InMemoryTraceSink::new());
    let dispatcher = TaskDispatcher::new(DispatcherSettings::default())
        .with_transport(transport.clone())
        .with_trace_sink(traces.clone());
    dispatcher.register_agent("A", vec![], 1, Map::new()).await;

    let mut data = Map::new();
    data.insert("a".to_string(), json!(2));
    let task_id = dispatcher
        .submit_task(
            TaskRequest::new("add")
                .with_data(data)
                .with_priority(3)
                .with_timeout(30)
                .with_max_retries(2),
        )
        .await;

    let sent = transport.tasks.lock();
    let message = &sent[0].1;
    assert_eq!(message.meta.sender_id, "task-dispatcher");
    assert_eq!(message.meta.receiver_id, "A");
    assert_eq!(message.meta.trace_id, task_id.to_string());
    assert_eq!(message.meta.priority, MessagePriority::High);
    assert_eq!(message.meta.ttl, Some(30));
    assert_eq!(message.meta.max_retries, 2);
    assert_eq!(message.payload.command_type, "execute_task");
    assert_eq!(message.payload.action_type, "add");
    assert_eq!(message.payload.data["task_data"], json!({"a": 2}));
    assert_eq!(message.payload.data["timeout"], json!(30));

    let events: Vec<String> = traces
        .events_for(&task_id.to_string())
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(events, vec!["task_submitted", "task_assigned"]);
}
