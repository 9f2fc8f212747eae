// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! ACP Transport Stack
//!
//! Per inbound frame: [`gateway::AcpGateway`] (decode) → [`router::AcpRouter`]
//! (act on message type) → [`container::AgentContainer`] (write to the target
//! agent's connection). [`server::AcpServer`] owns the WebSocket listener and the
//! per-connection tasks.

pub mod connection;
pub mod container;
pub mod gateway;
pub mod router;
pub mod server;

pub use connection::ConnectionHandle;
pub use container::{AgentConnectionInfo, AgentContainer, ConnectionStatus};
pub use gateway::{AcpGateway, FrameError};
pub use router::AcpRouter;
pub use server::{AcpServer, AcpServerError};
