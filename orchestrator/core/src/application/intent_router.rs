// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Intent Router
//!
//! Turns free text plus routing metadata into a [`BehaviorPackage`]. Classification
//! is an ordered, case-insensitive keyword match: the first rule with a keyword
//! contained in the intent wins, and nothing matching means
//! [`IntentType::TaskExecution`].
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Behavior classification, trace id minting, optional delivery

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::domain::behavior::{unix_now, BehaviorPackage, IntentType, TraceIdGenerator};
use crate::domain::trace::{NoopTraceSink, TraceSink};
use crate::domain::transport::BehaviorTransport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationRule {
    pub intent_type: IntentType,
    /// Lowercase keywords, matched as substrings.
    pub keywords: Vec<String>,
}

impl ClassificationRule {
    pub fn new(intent_type: IntentType, keywords: &[&str]) -> Self {
        Self {
            intent_type,
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    fn matches(&self, lowered_intent: &str) -> bool {
        self.keywords.iter().any(|k| lowered_intent.contains(k.as_str()))
    }
}

pub fn default_rules() -> Vec<ClassificationRule> {
    vec![
        ClassificationRule::new(
            IntentType::DataQuery,
            &["query", "search", "lookup", "look up", "retrieve", "fetch"],
        ),
        ClassificationRule::new(IntentType::ToolCall, &["tool", "invoke", "api call"]),
        ClassificationRule::new(IntentType::StatusUpdate, &["status", "progress", "heartbeat"]),
        ClassificationRule::new(
            IntentType::Collaboration,
            &["collaborat", "coordinate", "delegate", "assist", "together"],
        ),
    ]
}

/// Where a package is headed. Deterministic in the package alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDescriptor {
    pub route_id: String,
    pub target_agent: String,
    pub intent_type: IntentType,
    pub trace_id: String,
}

pub struct IntentRouter {
    rules: Vec<ClassificationRule>,
    trace_ids: TraceIdGenerator,
    transport: Option<Arc<dyn BehaviorTransport>>,
    trace_sink: Arc<dyn TraceSink>,
}

impl IntentRouter {
    pub fn new() -> Self {
        Self::with_rules(default_rules())
    }

    pub fn with_rules(rules: Vec<ClassificationRule>) -> Self {
        Self {
            rules,
            trace_ids: TraceIdGenerator::new(),
            transport: None,
            trace_sink: Arc::new(NoopTraceSink),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn BehaviorTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_trace_sink(mut self, trace_sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = trace_sink;
        self
    }

    pub fn with_trace_ids(mut self, generator: TraceIdGenerator) -> Self {
        self.trace_ids = generator;
        self
    }

    pub fn classify(&self, intent: &str) -> IntentType {
        let lowered = intent.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&lowered))
            .map(|rule| rule.intent_type)
            .unwrap_or_default()
    }

    /// Builds a package without sending it.
    pub fn build_package(
        &self,
        intent: &str,
        from_agent: &str,
        to_agent: &str,
        context_id: &str,
        payload: Map<String, Value>,
        priority: i32,
    ) -> BehaviorPackage {
        BehaviorPackage {
            intent: intent.to_string(),
            from_agent: from_agent.to_string(),
            to_agent: to_agent.to_string(),
            context_id: context_id.to_string(),
            trace_id: self.trace_ids.generate(context_id),
            timestamp: unix_now(),
            payload,
            intent_type: self.classify(intent),
            priority,
            timeout: None,
        }
    }

    /// Classifies and stamps a package, then hands it to the transport when one is
    /// configured. Transport failures are logged; the package is returned either way.
    pub async fn dispatch(
        &self,
        intent: &str,
        from_agent: &str,
        to_agent: &str,
        context_id: &str,
        payload: Map<String, Value>,
        priority: i32,
    ) -> BehaviorPackage {
        let package = self.build_package(intent, from_agent, to_agent, context_id, payload, priority);

        if !self.validate(&package) {
            let missing = package.missing_fields();
            warn!(
                trace_id = %package.trace_id,
                missing = ?missing,
                "Behavior package rejected, not sending"
            );
            self.trace_sink.record_event(
                &package.trace_id,
                "behavior_rejected",
                json!({ "missing_fields": missing }),
            );
            return package;
        }

        self.trace_sink.record_trace(
            &package.trace_id,
            &package.context_id,
            "behavior_dispatched",
            &package.intent,
            json!({
                "from_agent": package.from_agent,
                "to_agent": package.to_agent,
                "intent_type": package.intent_type,
                "priority": package.priority,
            }),
        );
        debug!(
            trace_id = %package.trace_id,
            intent_type = %package.intent_type,
            to_agent = %package.to_agent,
            "Behavior dispatched"
        );

        if let Some(transport) = &self.transport {
            if let Err(e) = transport.deliver(&package).await {
                error!(trace_id = %package.trace_id, error = %e, "Behavior delivery failed");
            }
        }

        package
    }

    pub fn validate(&self, package: &BehaviorPackage) -> bool {
        package.is_valid()
    }

    pub fn route_behavior(&self, package: &BehaviorPackage) -> RouteDescriptor {
        RouteDescriptor {
            route_id: format!("route-{}", package.to_agent),
            target_agent: package.to_agent.clone(),
            intent_type: package.intent_type,
            trace_id: package.trace_id.clone(),
        }
    }
}

impl Default for IntentRouter {
    fn default() -> Self {
        Self::new()
    }
}
