// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::ControlAdapter;
use crate::domain::control::{ActionPayload, ControlResult};
use crate::domain::tool::{ToolFn, ToolRegistry};

/// Runs a named tool. Tools bound through [`ToolExecAdapter::register_tool`] shadow
/// those of the injected registry.
pub struct ToolExecAdapter {
    registry: Arc<dyn ToolRegistry>,
    local_tools: RwLock<HashMap<String, ToolFn>>,
}

impl ToolExecAdapter {
    pub fn new(registry: Arc<dyn ToolRegistry>) -> Self {
        Self {
            registry,
            local_tools: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_tool(&self, name: impl Into<String>, tool: ToolFn) {
        let name = name.into();
        info!(tool = %name, "Bound tool");
        self.local_tools.write().insert(name, tool);
    }

    fn resolve(&self, name: &str) -> Option<ToolFn> {
        if let Some(tool) = self.local_tools.read().get(name) {
            return Some(tool.clone());
        }
        self.registry.get_tool(name)
    }
}

#[async_trait]
impl ControlAdapter for ToolExecAdapter {
    fn name(&self) -> &str {
        "tool_exec"
    }

    fn supported_actions(&self) -> Vec<String> {
        vec!["tool_exec".to_string(), "tool_call".to_string()]
    }

    async fn execute(&self, control_id: &str, payload: &ActionPayload) -> ControlResult {
        let started = Instant::now();

        let Some(tool_name) = payload.str_field("tool_name").or_else(|| payload.str_field("tool")) else {
            return ControlResult::error(control_id, "tool_exec requires a tool_name", started);
        };

        let Some(tool) = self.resolve(tool_name) else {
            return ControlResult::error(
                control_id,
                format!("tool '{}' is not registered", tool_name),
                started,
            );
        };

        debug!(control_id, tool = tool_name, "Executing tool");
        match tool(payload.arguments()) {
            Ok(value) => {
                let mut output = Map::new();
                output.insert("tool_name".to_string(), Value::String(tool_name.to_string()));
                output.insert("result".to_string(), value);
                ControlResult::success(control_id, output, started)
            }
            Err(message) => ControlResult::error(
                control_id,
                format!("tool '{}' failed: {}", tool_name, message),
                started,
            ),
        }
    }
}
