// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Collaborator interfaces for Control Dispatch: concrete tools and the reasoning
//! backend live outside the core and plug in here.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// A concrete tool implementation. Errors are reported as plain messages and
/// end up in `ControlResult::error_message`.
pub type ToolFn = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

pub trait ToolRegistry: Send + Sync {
    fn get_tool(&self, name: &str) -> Option<ToolFn>;

    fn tool_names(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Opaque request/response access to an LLM backend.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn invoke(&self, request: Value) -> anyhow::Result<Value>;
}
