// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::ControlAdapter;
use crate::domain::control::{ActionPayload, ControlResult};
use crate::domain::tool::ModelBackend;

/// Stand-in backend that answers without contacting a model.
#[derive(Debug, Default)]
pub struct SimulatedModelBackend;

#[async_trait]
impl ModelBackend for SimulatedModelBackend {
    async fn invoke(&self, request: Value) -> anyhow::Result<Value> {
        let prompt = request["prompt"].as_str().unwrap_or_default();
        Ok(json!({
            "model": request["model"],
            "text": format!("simulated response to: {}", prompt),
            "simulated": true,
        }))
    }
}

pub struct ModelCallAdapter {
    backend: Arc<dyn ModelBackend>,
}

impl ModelCallAdapter {
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        Self { backend }
    }

    pub fn simulated() -> Self {
        Self::new(Arc::new(SimulatedModelBackend))
    }
}

#[async_trait]
impl ControlAdapter for ModelCallAdapter {
    fn name(&self) -> &str {
        "model_call"
    }

    fn supported_actions(&self) -> Vec<String> {
        vec!["model_call".to_string(), "llm_call".to_string()]
    }

    async fn execute(&self, control_id: &str, payload: &ActionPayload) -> ControlResult {
        let started = Instant::now();
        let model = payload.str_field("model").unwrap_or("default");
        let request = json!({
            "model": model,
            "prompt": payload.str_field("prompt").unwrap_or_default(),
            "arguments": payload.arguments(),
        });

        debug!(control_id, model, "Invoking model backend");
        match self.backend.invoke(request).await {
            Ok(response) => {
                let mut output = Map::new();
                output.insert("model".to_string(), Value::String(model.to_string()));
                output.insert("response".to_string(), response);
                ControlResult::success(control_id, output, started)
            }
            Err(e) => {
                warn!(control_id, error = %e, "Model backend failed");
                ControlResult::error(control_id, format!("model backend error: {}", e), started)
            }
        }
    }
}
