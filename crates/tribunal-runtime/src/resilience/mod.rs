//! Resilience patterns for evaluator calls.
//!
//! - Circuit breaker per evaluator role
//! - Token budgets (global and per evaluator)
//! - Retry with jittered exponential backoff for transient provider errors

mod budget;
mod circuit_breaker;
mod retry;

pub use budget::{BudgetTracker, LlmUsage};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::{retry_transient, JitteredBackoff, JitteredBuilder, RetryOutcome};
