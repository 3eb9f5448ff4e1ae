//! Closed / open / half-open breaker keyed by evaluator role.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tribunal_core::EvaluatorRole;

use crate::config::duration_str;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls
    #[serde(with = "duration_str")]
    pub recovery_timeout: Duration,
    /// Half-open successes needed to close again
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CircuitState {
    Closed { failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { successes: u32 },
}

impl Default for CircuitState {
    fn default() -> Self {
        CircuitState::Closed { failures: 0 }
    }
}

enum Event {
    Admit,
    Success,
    Failure,
}

/// Per-role breaker. A role whose circuit is open gets neutral opinions
/// without a provider call; the other roles are unaffected.
#[derive(Debug)]
pub struct CircuitBreaker {
    circuits: Mutex<BTreeMap<EvaluatorRole, CircuitState>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            circuits: Mutex::new(BTreeMap::new()),
            config,
        }
    }

    /// True when calls for `role` must skip the provider. An open circuit
    /// past its recovery timeout moves to half-open and admits the call.
    pub fn is_open(&self, role: EvaluatorRole) -> bool {
        matches!(self.apply(role, Event::Admit), CircuitState::Open { .. })
    }

    pub fn record_success(&self, role: EvaluatorRole) {
        self.apply(role, Event::Success);
    }

    pub fn record_failure(&self, role: EvaluatorRole) {
        self.apply(role, Event::Failure);
    }

    pub fn state(&self, role: EvaluatorRole) -> CircuitState {
        self.circuits.lock().get(&role).cloned().unwrap_or_default()
    }

    pub fn reset(&self) {
        self.circuits.lock().clear();
    }

    fn apply(&self, role: EvaluatorRole, event: Event) -> CircuitState {
        let mut circuits = self.circuits.lock();
        let current = circuits.entry(role).or_default();
        let next = self.transition(current, event);

        match (&*current, &next) {
            (CircuitState::Closed { .. }, CircuitState::Open { .. }) => {
                warn!(evaluator = %role, threshold = self.config.failure_threshold, "Circuit opened")
            }
            (CircuitState::HalfOpen { .. }, CircuitState::Open { .. }) => {
                warn!(evaluator = %role, "Recovery call failed, circuit reopened")
            }
            (CircuitState::Open { .. }, CircuitState::HalfOpen { .. }) => {
                info!(evaluator = %role, "Circuit half-open, admitting a recovery call")
            }
            (CircuitState::HalfOpen { .. }, CircuitState::Closed { .. }) => {
                info!(evaluator = %role, "Circuit closed")
            }
            _ => {}
        }

        *current = next.clone();
        next
    }

    fn transition(&self, current: &CircuitState, event: Event) -> CircuitState {
        let open = || CircuitState::Open { opened_at: Instant::now() };
        match (current, event) {
            (CircuitState::Open { opened_at }, Event::Admit)
                if opened_at.elapsed() >= self.config.recovery_timeout =>
            {
                CircuitState::HalfOpen { successes: 0 }
            }
            (state, Event::Admit) => state.clone(),

            (CircuitState::Closed { .. }, Event::Success) => CircuitState::Closed { failures: 0 },
            (CircuitState::HalfOpen { successes }, Event::Success) => {
                if successes + 1 >= self.config.success_threshold {
                    CircuitState::Closed { failures: 0 }
                } else {
                    CircuitState::HalfOpen { successes: successes + 1 }
                }
            }

            (CircuitState::Closed { failures }, Event::Failure) => {
                if failures + 1 >= self.config.failure_threshold {
                    open()
                } else {
                    CircuitState::Closed { failures: failures + 1 }
                }
            }
            (CircuitState::HalfOpen { .. }, Event::Failure) => open(),

            // Late results from calls admitted before the circuit opened.
            (state @ CircuitState::Open { .. }, _) => state.clone(),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_starts_closed() {
        let cb = CircuitBreaker::default();
        assert!(!cb.is_open(EvaluatorRole::Critic));
    }

    #[test]
    fn test_circuit_opens_after_failures() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        });

        cb.record_failure(EvaluatorRole::Critic);
        assert!(!cb.is_open(EvaluatorRole::Critic));

        cb.record_failure(EvaluatorRole::Critic);
        assert!(cb.is_open(EvaluatorRole::Critic));
    }

    #[test]
    fn test_success_resets_failures() {
        let cb = CircuitBreaker::default();
        cb.record_failure(EvaluatorRole::Advocate);
        cb.record_failure(EvaluatorRole::Advocate);
        cb.record_success(EvaluatorRole::Advocate);

        cb.record_failure(EvaluatorRole::Advocate);
        cb.record_failure(EvaluatorRole::Advocate);
        assert!(!cb.is_open(EvaluatorRole::Advocate));
    }

    #[test]
    fn test_roles_are_independent() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        cb.record_failure(EvaluatorRole::Critic);

        assert!(cb.is_open(EvaluatorRole::Critic));
        assert!(!cb.is_open(EvaluatorRole::Pragmatist));
    }

    #[test]
    fn test_recovers_through_half_open() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::ZERO,
            success_threshold: 1,
        });
        cb.record_failure(EvaluatorRole::Pragmatist);

        assert!(!cb.is_open(EvaluatorRole::Pragmatist));
        assert!(matches!(cb.state(EvaluatorRole::Pragmatist), CircuitState::HalfOpen { .. }));

        cb.record_success(EvaluatorRole::Pragmatist);
        assert_eq!(cb.state(EvaluatorRole::Pragmatist), CircuitState::Closed { failures: 0 });
    }

    #[test]
    fn test_failed_recovery_reopens() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::ZERO,
            success_threshold: 2,
        });
        cb.record_failure(EvaluatorRole::Advocate);
        assert!(!cb.is_open(EvaluatorRole::Advocate));
        cb.record_success(EvaluatorRole::Advocate);
        assert_eq!(cb.state(EvaluatorRole::Advocate), CircuitState::HalfOpen { successes: 1 });

        cb.record_failure(EvaluatorRole::Advocate);
        assert!(matches!(cb.state(EvaluatorRole::Advocate), CircuitState::Open { .. }));
    }

    #[test]
    fn test_config_accepts_humantime() {
        let config: CircuitBreakerConfig =
            serde_yaml::from_str("failure_threshold: 5\nrecovery_timeout: 2m").unwrap();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.recovery_timeout, Duration::from_secs(120));
        assert_eq!(config.success_threshold, 2);
    }
}
