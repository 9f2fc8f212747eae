// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! ACP Orchestrator Core
//!
//! Behavior routing and the Agent Communication Protocol (ACP) stack.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Message model, Intent Router, Control Dispatch and the
//!   Gateway → Router → Container transport pipeline
//!
//! The task scheduler lives in `acp_swarm` and reaches agents through the
//! [`domain::transport::TaskTransport`] seam implemented by
//! [`infrastructure::acp::AcpServer`].

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
