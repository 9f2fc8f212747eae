// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod control;
pub mod intent_router;

// Re-export services for convenience
pub use control::{ControlAdapter, ControlDispatcher};
pub use intent_router::{ClassificationRule, IntentRouter, RouteDescriptor};
