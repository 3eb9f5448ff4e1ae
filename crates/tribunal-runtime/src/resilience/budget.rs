//! Token accounting for a run.
//!
//! Each evaluator role has its own allowance and all roles draw from one
//! shared pool. A call is only made when both can cover the estimate; the
//! evaluator turns a refusal into a neutral opinion.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tribunal_core::EvaluatorRole;

use crate::providers::TokenUsage;

/// A token ceiling with a lock-free spend counter.
#[derive(Debug)]
struct Allowance {
    ceiling: u32,
    spent: AtomicU32,
}

impl Allowance {
    fn new(ceiling: u32) -> Self {
        Self {
            ceiling,
            spent: AtomicU32::new(0),
        }
    }

    fn left(&self) -> u32 {
        self.ceiling.saturating_sub(self.spent.load(Ordering::Acquire))
    }

    fn spend(&self, tokens: u32) {
        self.spent.fetch_add(tokens, Ordering::AcqRel);
    }

    fn clear(&self) {
        self.spent.store(0, Ordering::Release);
    }
}

/// Provider usage summed over a run, reported with the run result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmUsage {
    pub llm_calls: u32,
    pub retries: u32,
    pub cache_hits: u32,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub cache_read_tokens: u32,
    pub cache_creation_tokens: u32,
    /// USD, from list prices
    pub estimated_cost: f64,
}

impl LlmUsage {
    pub fn add(&mut self, usage: &TokenUsage, model: &str) {
        self.llm_calls += 1;
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.total_tokens += usage.total();
        self.cache_read_tokens += usage.cache_read_tokens;
        self.cache_creation_tokens += usage.cache_creation_tokens;
        self.estimated_cost += price(model).of(usage);
    }
}

/// List price in USD per million tokens.
struct Price {
    input: f64,
    output: f64,
    cache_write: f64,
    cache_read: f64,
}

impl Price {
    fn of(&self, usage: &TokenUsage) -> f64 {
        let cost = usage.prompt_tokens as f64 * self.input
            + usage.completion_tokens as f64 * self.output
            + usage.cache_creation_tokens as f64 * self.cache_write
            + usage.cache_read_tokens as f64 * self.cache_read;
        cost / 1_000_000.0
    }
}

fn price(model: &str) -> Price {
    let (input, output) = if model == "offline" {
        (0.0, 0.0)
    } else if model.contains("opus") {
        (5.0, 25.0)
    } else if model.contains("haiku") {
        (1.0, 5.0)
    } else {
        (3.0, 15.0)
    };
    Price {
        input,
        output,
        cache_write: input * 1.25,
        cache_read: input * 0.1,
    }
}

/// Shared by the three evaluators of a run.
#[derive(Debug)]
pub struct BudgetTracker {
    per_role: BTreeMap<EvaluatorRole, Allowance>,
    pool: Allowance,
    usage: Mutex<LlmUsage>,
}

impl BudgetTracker {
    pub fn new(global_max: u32, per_evaluator_max: u32) -> Self {
        Self {
            per_role: EvaluatorRole::ALL
                .into_iter()
                .map(|role| (role, Allowance::new(per_evaluator_max)))
                .collect(),
            pool: Allowance::new(global_max),
            usage: Mutex::new(LlmUsage::default()),
        }
    }

    pub fn can_afford(&self, role: EvaluatorRole, estimated_tokens: u32) -> bool {
        self.remaining_for(role) >= estimated_tokens && self.pool.left() >= estimated_tokens
    }

    pub fn record_usage(&self, role: EvaluatorRole, usage: &TokenUsage, model: &str) {
        if let Some(allowance) = self.per_role.get(&role) {
            allowance.spend(usage.total());
        }
        self.pool.spend(usage.total());
        self.usage.lock().add(usage, model);
    }

    pub fn record_retries(&self, retries: u32) {
        self.usage.lock().retries += retries;
    }

    pub fn record_cache_hit(&self) {
        self.usage.lock().cache_hits += 1;
    }

    pub fn usage(&self) -> LlmUsage {
        self.usage.lock().clone()
    }

    pub fn remaining_global(&self) -> u32 {
        self.pool.left()
    }

    pub fn remaining_for(&self, role: EvaluatorRole) -> u32 {
        self.per_role.get(&role).map_or(0, Allowance::left)
    }

    /// Zero every counter. Called at the start of each run.
    pub fn reset(&self) {
        self.per_role.values().for_each(Allowance::clear);
        self.pool.clear();
        *self.usage.lock() = LlmUsage::default();
    }
}

impl Default for BudgetTracker {
    fn default() -> Self {
        Self::new(400_000, 150_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(prompt: u32, completion: u32) -> TokenUsage {
        TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            ..Default::default()
        }
    }

    #[test]
    fn test_role_allowance_is_separate() {
        let tracker = BudgetTracker::new(500, 100);
        tracker.record_usage(EvaluatorRole::Critic, &usage(30, 20), "claude-sonnet-4-5");

        assert_eq!(tracker.remaining_for(EvaluatorRole::Critic), 50);
        assert_eq!(tracker.remaining_for(EvaluatorRole::Advocate), 100);
        assert_eq!(tracker.remaining_global(), 450);
        assert!(tracker.can_afford(EvaluatorRole::Critic, 50));
        assert!(!tracker.can_afford(EvaluatorRole::Critic, 51));
        assert!(tracker.can_afford(EvaluatorRole::Advocate, 60));
    }

    #[test]
    fn test_shared_pool_limits_every_role() {
        let tracker = BudgetTracker::new(100, 1_000);
        tracker.record_usage(EvaluatorRole::Critic, &usage(90, 0), "m");
        assert!(!tracker.can_afford(EvaluatorRole::Pragmatist, 20));
        assert!(tracker.can_afford(EvaluatorRole::Pragmatist, 10));
    }

    #[test]
    fn test_counters_and_cost() {
        let tracker = BudgetTracker::default();
        tracker.record_usage(EvaluatorRole::Advocate, &usage(1000, 500), "claude-sonnet-4-5");
        tracker.record_retries(2);
        tracker.record_cache_hit();

        let usage = tracker.usage();
        assert_eq!(usage.llm_calls, 1);
        assert_eq!(usage.retries, 2);
        assert_eq!(usage.cache_hits, 1);
        assert_eq!(usage.total_tokens, 1500);
        // 1000 * $3/MTok + 500 * $15/MTok
        assert!((usage.estimated_cost - 0.0105).abs() < 1e-9);
    }

    #[test]
    fn test_reset_restores_allowances() {
        let tracker = BudgetTracker::new(200, 100);
        tracker.record_usage(EvaluatorRole::Critic, &usage(100, 0), "m");
        tracker.record_cache_hit();
        assert!(!tracker.can_afford(EvaluatorRole::Critic, 1));

        tracker.reset();
        assert!(tracker.can_afford(EvaluatorRole::Critic, 100));
        assert_eq!(tracker.usage(), LlmUsage::default());
    }

    #[test]
    fn test_offline_usage_is_free() {
        let mut total = LlmUsage::default();
        total.add(&usage(1000, 1000), "offline");
        assert_eq!(total.estimated_cost, 0.0);
        assert_eq!(total.llm_calls, 1);
    }
}
