//! Retry with jittered exponential backoff.
//!
//! The delay before retry `n` (counting from 0) is
//! `min(max_delay, base_delay * 2^n)` plus a uniform jitter in
//! `[0, jitter_ratio * delay]`. Only errors the caller marks transient are
//! retried; everything else surfaces after the first attempt.

use backon::{BackoffBuilder, Retryable};
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::config::RetryConfig;
use crate::providers::ProviderError;

/// Builder for [`JitteredBackoff`].
#[derive(Debug, Clone, Copy)]
pub struct JitteredBuilder {
    base_delay: Duration,
    max_delay: Duration,
    jitter_ratio: f64,
    max_retries: u32,
}

impl JitteredBuilder {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            base_delay: config.base_delay,
            max_delay: config.max_delay,
            jitter_ratio: config.jitter_ratio.clamp(0.0, 1.0),
            max_retries: config.max_retries,
        }
    }
}

impl BackoffBuilder for JitteredBuilder {
    type Backoff = JitteredBackoff;

    fn build(self) -> Self::Backoff {
        JitteredBackoff {
            config: self,
            attempt: 0,
        }
    }
}

/// Iterator of delays; yields `max_retries` items then stops.
#[derive(Debug)]
pub struct JitteredBackoff {
    config: JitteredBuilder,
    attempt: u32,
}

impl JitteredBackoff {
    fn base_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.config
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.config.max_delay)
            .min(self.config.max_delay)
    }
}

impl Iterator for JitteredBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.attempt >= self.config.max_retries {
            return None;
        }
        let delay = self.base_for(self.attempt);
        self.attempt += 1;

        let spread = delay.as_secs_f64() * self.config.jitter_ratio;
        let jitter = if spread > 0.0 {
            rand::thread_rng().gen_range(0.0..=spread)
        } else {
            0.0
        };
        Some(delay + Duration::from_secs_f64(jitter))
    }
}

/// Result of a retried operation plus how many retries it took.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, ProviderError>,
    pub retries: u32,
}

/// Run `operation`, retrying transient provider errors per `config`.
pub async fn retry_transient<T, F, Fut>(config: &RetryConfig, label: &str, operation: F) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let retries = AtomicU32::new(0);

    let result = operation
        .retry(JitteredBuilder::new(config))
        .sleep(tokio::time::sleep)
        .when(|e: &ProviderError| e.is_transient())
        .notify(|err: &ProviderError, delay: Duration| {
            let attempt = retries.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::warn!(
                operation = %label,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient provider failure, retrying"
            );
        })
        .await;

    RetryOutcome {
        result,
        retries: retries.load(Ordering::SeqCst),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_retries: u32, jitter_ratio: f64) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            jitter_ratio,
        }
    }

    #[test]
    fn test_delays_double_and_cap() {
        let delays: Vec<Duration> = JitteredBuilder::new(&config(6, 0.0)).build().collect();
        let secs: Vec<u64> = delays.iter().map(|d| d.as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 8, 8]);
    }

    #[test]
    fn test_jitter_stays_within_ratio() {
        for delay in JitteredBuilder::new(&config(4, 0.25)).build().enumerate() {
            let (attempt, delay) = delay;
            let base = Duration::from_secs(1 << attempt).min(Duration::from_secs(8));
            assert!(delay >= base);
            assert!(delay <= base + base.mul_f64(0.25));
        }
    }

    #[test]
    fn test_zero_retries_yields_nothing() {
        assert_eq!(JitteredBuilder::new(&config(0, 0.25)).build().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = retry_transient(&config(3, 0.0), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::AuthError) }
        })
        .await;

        assert!(outcome.result.is_err());
        assert_eq!(outcome.retries, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = retry_transient(&config(2, 0.0), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::Overloaded("busy".into())) }
        })
        .await;

        assert!(matches!(outcome.result, Err(ProviderError::Overloaded(_))));
        assert_eq!(outcome.retries, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
