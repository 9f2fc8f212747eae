// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Scheduling Domain Layer
//!
//! Pure domain types for task placement. No I/O dependencies.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`task`] | `TaskInfo`, `TaskId`, `TaskStatus`, `TaskRequest` |
//! | [`agent`] | `AgentInfo`, `AgentStatus` |
//! | [`strategy`] | `AgentSelector` |

pub mod agent;
pub mod strategy;
pub mod task;

pub use agent::*;
pub use strategy::*;
pub use task::*;
