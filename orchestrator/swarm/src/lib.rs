// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `acp-swarm`: Capability-Aware Task Scheduling
//!
//! Places submitted tasks on registered agents by capability, load and priority,
//! then tracks each task through assignment, execution, retry and timeout.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `TaskInfo`, `TaskId`, `AgentInfo`, `AgentSelector` |
//! | [`application`] | Application | `TaskDispatcher` service and its monitor loop |
//!
//! ## Key Concepts
//!
//! - **Assignment**: a pending task goes to an online agent whose capabilities
//!   cover the task's requirements and whose load is below `max_load`.
//! - **Retry**: failures, timeouts and agent loss put the task back in the queue
//!   until `max_retries` is spent.
//! - **Monitor**: a periodic tick that re-runs assignment, expires overdue tasks and
//!   marks silent agents offline.
//!
//! Delivery goes through [`acp_core::domain::transport::TaskTransport`]; the
//! dispatcher itself never touches sockets.

pub mod application;
pub mod domain;

pub use application::*;
pub use domain::*;
