// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Property tests for the task dispatcher
//!
//! Each case drives a fresh dispatcher on its own runtime and checks the
//! scheduling invariants after every step.

use acp_core::domain::message::AcpMessage;
use acp_core::domain::node_config::{DispatcherSettings, SchedulingStrategy};
use acp_core::domain::transport::{TaskTransport, TransportError};
use acp_swarm::{TaskDispatcher, TaskId, TaskRequest, TaskStatus};
use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::Map;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const CAPABILITIES: [&str; 4] = ["a", "b", "c", "d"];

#[derive(Default)]
struct OrderRecorder {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl TaskTransport for OrderRecorder {
    async fn send_task(&self, _agent_id: &str, message: AcpMessage) -> Result<(), TransportError> {
        self.sent.lock().push(message.meta.trace_id);
        Ok(())
    }

    async fn notify_cancel(&self, _agent_id: &str, _message: AcpMessage) -> Result<(), TransportError> {
        Ok(())
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

fn strategy_strategy() -> impl Strategy<Value = SchedulingStrategy> {
    prop_oneof![
        Just(SchedulingStrategy::RoundRobin),
        Just(SchedulingStrategy::LeastLoaded),
        Just(SchedulingStrategy::CapabilityMatch),
        Just(SchedulingStrategy::Random),
    ]
}

fn capability_set() -> impl Strategy<Value = Vec<String>> {
    proptest::sample::subsequence(CAPABILITIES.to_vec(), 0..=CAPABILITIES.len())
        .prop_map(|caps| caps.into_iter().map(String::from).collect())
}

#[derive(Debug, Clone)]
enum Op {
    Submit { priority: i32, max_retries: u32 },
    Complete(usize),
    Fail(usize),
    Cancel(usize),
    Tick { seconds: i64 },
    Register(usize),
    Unregister(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0i32..5, 0u32..3).prop_map(|(priority, max_retries)| Op::Submit { priority, max_retries }),
        2 => any::<usize>().prop_map(Op::Complete),
        2 => any::<usize>().prop_map(Op::Fail),
        1 => any::<usize>().prop_map(Op::Cancel),
        1 => (0i64..120).prop_map(|seconds| Op::Tick { seconds }),
        1 => (0usize..3).prop_map(Op::Register),
        1 => (0usize..3).prop_map(Op::Unregister),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_dispatch_follows_priority(priorities in prop::collection::hash_set(-50i32..50, 1..16)) {
        let rt = runtime();
        rt.block_on(async {
            let recorder = Arc::new(OrderRecorder::default());
            let dispatcher = TaskDispatcher::new(DispatcherSettings::default())
                .with_transport(recorder.clone());

            let mut by_id = HashMap::new();
            for priority in &priorities {
                let id = dispatcher.submit_task(TaskRequest::new("t").with_priority(*priority)).await;
                by_id.insert(id.to_string(), *priority);
            }
            dispatcher
                .register_agent("worker", vec![], priorities.len() as u32, Map::new())
                .await;

            let sent: Vec<i32> = recorder.sent.lock().iter().map(|id| by_id[id]).collect();
            prop_assert_eq!(sent.len(), priorities.len());
            prop_assert!(sent.windows(2).all(|w| w[0] >= w[1]), "order {:?}", sent);
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_concurrent_submits_respect_load_and_capabilities(
        strategy in strategy_strategy(),
        agents in prop::collection::vec((capability_set(), 1u32..4), 1..5),
        tasks in prop::collection::vec((capability_set(), 0i32..3), 1..40),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let dispatcher = Arc::new(TaskDispatcher::new(DispatcherSettings::with_strategy(strategy)));
            for (i, (caps, max_load)) in agents.iter().enumerate() {
                dispatcher.register_agent(&format!("agent-{}", i), caps.clone(), *max_load, Map::new()).await;
            }

            let handles: Vec<_> = tasks
                .iter()
                .cloned()
                .map(|(required, priority)| {
                    let dispatcher = dispatcher.clone();
                    tokio::spawn(async move {
                        dispatcher
                            .submit_task(TaskRequest::new("t").requiring(required).with_priority(priority))
                            .await
                    })
                })
                .collect();
            let mut ids = Vec::new();
            for handle in handles {
                ids.push(handle.await.unwrap());
            }

            let agents_by_id: HashMap<String, _> = dispatcher
                .list_agents()
                .into_iter()
                .map(|a| (a.agent_id.clone(), a))
                .collect();
            let mut load_seen: HashMap<String, u32> = HashMap::new();
            for id in &ids {
                let snapshot = dispatcher.get_task_status(id).unwrap();
                if snapshot.task.status == TaskStatus::Assigned {
                    let agent_id = snapshot.task.assigned_agent.clone().unwrap();
                    let agent = &agents_by_id[&agent_id];
                    prop_assert!(agent.has_capabilities(&snapshot.task.required_capabilities));
                    *load_seen.entry(agent_id).or_default() += 1;
                } else {
                    prop_assert_eq!(snapshot.task.status, TaskStatus::Pending);
                }
            }
            for agent in agents_by_id.values() {
                prop_assert!(agent.current_load <= agent.max_load);
                prop_assert_eq!(agent.current_load, load_seen.get(&agent.agent_id).copied().unwrap_or(0));
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_retry_budget_is_exact(max_retries in 0u32..6) {
        let rt = runtime();
        rt.block_on(async {
            let dispatcher = TaskDispatcher::new(DispatcherSettings::default());
            dispatcher.register_agent("worker", vec![], 1, Map::new()).await;
            let id = dispatcher
                .submit_task(TaskRequest::new("t").with_max_retries(max_retries))
                .await;

            let mut failures = 0;
            while dispatcher.handle_task_result(&id, false, None, Some("nope".into())).await {
                failures += 1;
                prop_assert!(failures <= max_retries + 1);
            }
            let snapshot = dispatcher.get_task_status(&id).unwrap();
            prop_assert_eq!(failures, max_retries + 1);
            prop_assert_eq!(snapshot.task.status, TaskStatus::Failed);
            prop_assert_eq!(snapshot.task.retry_count, max_retries);
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_no_task_is_lost(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let rt = runtime();
        rt.block_on(async {
            let dispatcher = TaskDispatcher::new(DispatcherSettings::default());
            let mut ids: Vec<TaskId> = Vec::new();
            let mut last_total = 0;

            for op in ops {
                match op {
                    Op::Submit { priority, max_retries } => {
                        let request = TaskRequest::new("t")
                            .with_priority(priority)
                            .with_max_retries(max_retries)
                            .with_timeout(30);
                        ids.push(dispatcher.submit_task(request).await);
                    }
                    Op::Complete(i) if !ids.is_empty() => {
                        dispatcher.handle_task_result(&ids[i % ids.len()], true, None, None).await;
                    }
                    Op::Fail(i) if !ids.is_empty() => {
                        dispatcher.handle_task_result(&ids[i % ids.len()], false, None, None).await;
                    }
                    Op::Cancel(i) if !ids.is_empty() => {
                        dispatcher.cancel_task(&ids[i % ids.len()]).await;
                    }
                    Op::Tick { seconds } => {
                        dispatcher.monitor_tick_at(Utc::now() + TimeDelta::seconds(seconds)).await;
                    }
                    Op::Register(i) => {
                        dispatcher.register_agent(&format!("agent-{}", i), vec![], 2, Map::new()).await;
                    }
                    Op::Unregister(i) => {
                        dispatcher.unregister_agent(&format!("agent-{}", i)).await;
                    }
                    _ => {}
                }

                let stats = dispatcher.get_dispatcher_stats();
                let total = stats.pending_tasks + stats.active_tasks + stats.finished_tasks;
                prop_assert_eq!(total, ids.len());
                prop_assert!(total >= last_total);
                last_total = total;

                let queued: HashSet<TaskId> = dispatcher.queued_tasks().into_iter().collect();
                for id in &ids {
                    let snapshot = dispatcher.get_task_status(id);
                    prop_assert!(snapshot.is_some());
                    let snapshot = snapshot.unwrap();
                    prop_assert_eq!(queued.contains(id), snapshot.task.status == TaskStatus::Pending);
                }
                for agent in dispatcher.list_agents() {
                    prop_assert!(agent.current_load <= agent.max_load);
                }
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_unregister_is_idempotent(names in prop::collection::hash_set("[a-z]{1,8}", 1..6)) {
        let rt = runtime();
        rt.block_on(async {
            let dispatcher = TaskDispatcher::new(DispatcherSettings::default());
            for name in &names {
                dispatcher.register_agent(name, vec![], 1, Map::new()).await;
            }
            let victim = names.iter().next().unwrap().clone();

            prop_assert!(dispatcher.unregister_agent(&victim).await);
            let after_first = dispatcher.list_agents();
            prop_assert!(!dispatcher.unregister_agent(&victim).await);
            prop_assert_eq!(dispatcher.list_agents(), after_first);
            prop_assert_eq!(dispatcher.list_agents().len(), names.len() - 1);
            Ok::<(), TestCaseError>(())
        })?;
    }
}
