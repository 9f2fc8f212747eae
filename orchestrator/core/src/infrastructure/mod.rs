// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod acp;
pub mod event_bus;
pub mod tool_registry;

pub use acp::{AcpServer, AcpServerError};
pub use event_bus::{DomainEvent, EventBus};
pub use tool_registry::InMemoryToolRegistry;
