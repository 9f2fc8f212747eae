// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Feeds inbound agent messages into the task dispatcher.
//!
//! Messages arrive on the server's agent-message channel, not the event bus,
//! so a burst of traces cannot make the dispatcher miss a register or result.
//!
//! | Message | Dispatcher call |
//! |---------|-----------------|
//! | `register` | `register_agent` (capabilities from context, `data.max_load`, default 1) |
//! | `state` / `heartbeat` | `update_agent_heartbeat` (`data.status == "offline"` reports offline), plus `mark_task_started` when `data.task_id` is given with status `executing` |
//! | `result` | `handle_task_result` (`data.task_id`, `data.success`, `data.result`, `data.error`) |

use std::sync::Arc;

use acp_core::domain::message::{AcpMessage, MessageType};
use acp_swarm::{AgentStatus, TaskDispatcher, TaskId};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Applies one message. Returns `true` when the dispatcher accepted it.
pub async fn apply_agent_message(dispatcher: &TaskDispatcher, message: &AcpMessage) -> bool {
    let sender = message.meta.sender_id.as_str();
    let data = &message.payload.data;
    match message.meta.message_type {
        MessageType::Register => {
            let max_load = data
                .get("max_load")
                .and_then(Value::as_u64)
                .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
                .unwrap_or(1);
            dispatcher
                .register_agent(
                    sender,
                    message.context.agent_capabilities.clone(),
                    max_load,
                    message.payload.metadata.clone(),
                )
                .await
        }
        MessageType::State | MessageType::Heartbeat => {
            let status = match data.get("status").and_then(Value::as_str) {
                Some("offline") => AgentStatus::Offline,
                _ => AgentStatus::Online,
            };
            if let Some(task_id) = task_id_of(data) {
                if data.get("status").and_then(Value::as_str) == Some("executing") {
                    dispatcher.mark_task_started(&task_id);
                }
            }
            dispatcher.update_agent_heartbeat(sender, status).await
        }
        MessageType::Result => {
            let Some(task_id) = task_id_of(data) else {
                debug!(sender_id = %sender, "Result without a task id, not a dispatcher task");
                return false;
            };
            let error = data.get("error").and_then(Value::as_str).map(String::from);
            let success = data
                .get("success")
                .and_then(Value::as_bool)
                .unwrap_or(error.is_none());
            let result = data.get("result").cloned();
            dispatcher.handle_task_result(&task_id, success, result, error).await
        }
        _ => false,
    }
}

fn task_id_of(data: &Map<String, Value>) -> Option<TaskId> {
    let raw = data.get("task_id")?.as_str()?;
    match raw.parse() {
        Ok(task_id) => Some(task_id),
        Err(e) => {
            warn!(task_id = %raw, error = %e, "Ignoring malformed task id");
            None
        }
    }
}

/// Runs until `cancel` fires or every sender is dropped.
pub async fn run_bridge(
    dispatcher: Arc<TaskDispatcher>,
    mut messages: mpsc::Receiver<AcpMessage>,
    cancel: CancellationToken,
) {
    info!("Agent message bridge started");
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = messages.recv() => message,
        };
        let Some(message) = message else {
            break;
        };
        apply_agent_message(&dispatcher, &message).await;
    }
    info!("Agent message bridge stopped");
}
