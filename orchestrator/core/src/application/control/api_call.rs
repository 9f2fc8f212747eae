// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Instant;
use tracing::debug;

use super::ControlAdapter;
use crate::domain::control::{ActionPayload, ControlResult};

/// Simulated HTTP call. No request leaves the process; the response echoes what
/// would have been sent with status 200.
#[derive(Debug, Default)]
pub struct ApiCallAdapter;

impl ApiCallAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ControlAdapter for ApiCallAdapter {
    fn name(&self) -> &str {
        "api_call"
    }

    fn supported_actions(&self) -> Vec<String> {
        vec!["api_call".to_string()]
    }

    async fn execute(&self, control_id: &str, payload: &ActionPayload) -> ControlResult {
        let started = Instant::now();

        let Some(url) = payload.str_field("url").or_else(|| payload.str_field("endpoint")) else {
            return ControlResult::error(control_id, "api_call requires a url", started);
        };
        let method = payload
            .str_field("method")
            .map(str::to_uppercase)
            .unwrap_or_else(|| "GET".to_string());
        let body = payload
            .field("body")
            .cloned()
            .unwrap_or_else(|| payload.arguments());

        debug!(control_id, method = %method, url, "Simulated API call");

        let mut output = Map::new();
        output.insert("method".to_string(), Value::String(method));
        output.insert("url".to_string(), Value::String(url.to_string()));
        output.insert("status_code".to_string(), Value::from(200));
        output.insert("body".to_string(), body);
        output.insert("simulated".to_string(), Value::Bool(true));
        ControlResult::success(control_id, output, started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_simulated_response() {
        let payload = ActionPayload::from_value(json!({
            "action_type": "api_call",
            "parameters": {"url": "https://svc.internal/items", "method": "post"},
            "body": {"name": "widget"}
        }));
        let result = ApiCallAdapter::new().execute("c1", &payload).await;
        assert!(result.is_success());
        assert_eq!(result.output["status_code"], json!(200));
        assert_eq!(result.output["method"], json!("POST"));
        assert_eq!(result.output["body"], json!({"name": "widget"}));
    }

    #[tokio::test]
    async fn test_missing_url() {
        let payload = ActionPayload::from_value(json!({"action_type": "api_call"}));
        let result = ApiCallAdapter::new().execute("c1", &payload).await;
        assert!(!result.is_success());
    }
}
