// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::info;

use crate::domain::tool::{ToolFn, ToolRegistry};

/// Process-local tool table
#[derive(Default)]
pub struct InMemoryToolRegistry {
    tools: RwLock<HashMap<String, ToolFn>>,
}

impl InMemoryToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any tool already bound under `name`
    pub fn register(&self, name: impl Into<String>, tool: ToolFn) {
        let name = name.into();
        info!(tool = %name, "Registered tool");
        self.tools.write().insert(name, tool);
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.tools.write().remove(name).is_some()
    }
}

impl ToolRegistry for InMemoryToolRegistry {
    fn get_tool(&self, name: &str) -> Option<ToolFn> {
        self.tools.read().get(name).cloned()
    }

    fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().keys().cloned().collect();
        names.sort();
        names
    }
}
