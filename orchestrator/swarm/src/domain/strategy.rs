// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent selection policies.
//!
//! Candidates arrive already filtered to available, capable agents and in
//! registration order; "first found" tie-breaks follow that order.

use acp_core::domain::node_config::{DispatcherSettings, SchedulingStrategy};
use rand::Rng;

use super::agent::AgentInfo;

#[derive(Debug, Clone)]
pub struct AgentSelector {
    strategy: SchedulingStrategy,
    capability_weight: f64,
    load_weight: f64,
    rr_index: usize,
}

impl AgentSelector {
    pub fn new(settings: &DispatcherSettings) -> Self {
        Self {
            strategy: settings.strategy,
            capability_weight: settings.capability_weight,
            load_weight: settings.load_weight,
            rr_index: 0,
        }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Index into `candidates` of the chosen agent.
    pub fn select(&mut self, candidates: &[&AgentInfo], required: &[String]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        let index = match self.strategy {
            SchedulingStrategy::RoundRobin => {
                let index = self.rr_index % candidates.len();
                self.rr_index = self.rr_index.wrapping_add(1);
                index
            }
            SchedulingStrategy::LeastLoaded => {
                let mut best = 0;
                for (i, agent) in candidates.iter().enumerate().skip(1) {
                    if agent.current_load < candidates[best].current_load {
                        best = i;
                    }
                }
                best
            }
            SchedulingStrategy::CapabilityMatch => {
                let mut best = 0;
                let mut best_score = self.score(candidates[0], required);
                for (i, agent) in candidates.iter().enumerate().skip(1) {
                    let score = self.score(agent, required);
                    if score > best_score {
                        best = i;
                        best_score = score;
                    }
                }
                best
            }
            SchedulingStrategy::Random => rand::rng().random_range(0..candidates.len()),
        };
        Some(index)
    }

    /// `capability_weight × matched/agent_total + load_weight × free capacity`.
    /// An agent advertising no capabilities counts as a full match.
    pub fn score(&self, agent: &AgentInfo, required: &[String]) -> f64 {
        let capability_ratio = if agent.capabilities.is_empty() {
            1.0
        } else {
            agent.matched_capabilities(required) as f64 / agent.capabilities.len() as f64
        };
        self.capability_weight * capability_ratio + self.load_weight * agent.free_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Map;

    fn agent(id: &str, caps: &[&str], load: u32, max_load: u32) -> AgentInfo {
        let mut a = AgentInfo::new(
            id,
            caps.iter().map(|c| c.to_string()).collect(),
            max_load,
            Map::new(),
            Utc::now(),
        );
        a.current_load = load;
        a
    }

    fn selector(strategy: SchedulingStrategy) -> AgentSelector {
        AgentSelector::new(&DispatcherSettings::with_strategy(strategy))
    }

    #[test]
    fn test_round_robin_cycles() {
        let (a, b, c) = (agent("a", &[], 0, 5), agent("b", &[], 0, 5), agent("c", &[], 0, 5));
        let candidates = vec![&a, &b, &c];
        let mut s = selector(SchedulingStrategy::RoundRobin);
        let picks: Vec<usize> = (0..4).map(|_| s.select(&candidates, &[]).unwrap()).collect();
        assert_eq!(picks, vec![0, 1, 2, 0]);
    }

    #[test]
    fn test_least_loaded_first_found_on_tie() {
        let (a, b, c) = (agent("a", &[], 2, 5), agent("b", &[], 1, 5), agent("c", &[], 1, 5));
        let mut s = selector(SchedulingStrategy::LeastLoaded);
        assert_eq!(s.select(&[&a, &b, &c], &[]), Some(1));
    }

    #[test]
    fn test_capability_match_formula() {
        let required = vec!["math".to_string()];
        // specialist: 0.7 * 1/1 + 0.3 * (1 - 0/2) = 1.0
        let specialist = agent("s", &["math"], 0, 2);
        // generalist: 0.7 * 1/4 + 0.3 * 1 = 0.475
        let generalist = agent("g", &["math", "a", "b", "c"], 0, 2);
        let s = selector(SchedulingStrategy::CapabilityMatch);
        assert!((s.score(&specialist, &required) - 1.0).abs() < 1e-9);
        assert!((s.score(&generalist, &required) - 0.475).abs() < 1e-9);

        let mut s = s;
        assert_eq!(s.select(&[&generalist, &specialist], &required), Some(1));
    }

    #[test]
    fn test_capability_match_ties_keep_first() {
        let a = agent("a", &["x"], 0, 1);
        let b = agent("b", &["x"], 0, 1);
        let mut s = selector(SchedulingStrategy::CapabilityMatch);
        assert_eq!(s.select(&[&a, &b], &["x".to_string()]), Some(0));
    }

    #[test]
    fn test_random_stays_in_range_and_empty_is_none() {
        let a = agent("a", &[], 0, 1);
        let b = agent("b", &[], 0, 1);
        let mut s = selector(SchedulingStrategy::Random);
        for _ in 0..50 {
            assert!(s.select(&[&a, &b], &[]).unwrap() < 2);
        }
        assert_eq!(s.select(&[], &[]), None);
    }
}
