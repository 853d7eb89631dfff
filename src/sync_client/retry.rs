//! Bounded exponential backoff for remote calls.

use std::future::Future;
use std::time::Duration;

use log::warn;
use rand::Rng;

use crate::configuration::types::RetryConfig;
use crate::error_handling::types::SyncError;

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Total attempts, the first one included
    pub max_attempts: u32,
    /// Randomizes each delay by +/- this fraction
    pub jitter_factor: f64,
}

impl From<&RetryConfig> for BackoffConfig {
    fn from(config: &RetryConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
            max_attempts: config.max_attempts.max(1),
            jitter_factor: config.jitter_factor,
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl BackoffConfig {
    /// Delay before retry number `retry` (1 for the first retry).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        self.delay_with_jitter(retry, rand::thread_rng().gen_range(0.0..1.0))
    }

    /// `jitter` in `[0, 1)` maps to a `[-factor, +factor]` adjustment.
    pub fn delay_with_jitter(&self, retry: u32, jitter: f64) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(retry as i32 - 1);
        let base = base.min(self.max_delay.as_secs_f64());
        let adjusted = base + (jitter * 2.0 - 1.0) * base * self.jitter_factor;
        if adjusted.is_nan() {
            return self.max_delay;
        }
        Duration::from_secs_f64(adjusted.clamp(0.0, self.max_delay.as_secs_f64()))
    }
}

/// Runs `call` until it succeeds, fails permanently, or runs out of attempts.
///
/// Only [`SyncError::Transient`] failures are retried.
pub async fn with_backoff<T, F, Fut>(
    config: &BackoffConfig,
    operation: &str,
    mut call: F,
) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < config.max_attempts => {
                let delay = config.delay_for_retry(attempt);
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    operation, attempt, config.max_attempts, delay, e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(max_attempts: u32) -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_attempts,
            jitter_factor: 0.5,
        }
    }

    #[test]
    fn delays_grow_and_are_capped() {
        let c = config(10);
        assert_eq!(c.delay_with_jitter(0, 0.5), Duration::ZERO);
        assert_eq!(c.delay_with_jitter(1, 0.5), Duration::from_millis(100));
        assert_eq!(c.delay_with_jitter(2, 0.5), Duration::from_millis(200));
        assert_eq!(c.delay_with_jitter(3, 0.5), Duration::from_millis(400));
        assert_eq!(c.delay_with_jitter(8, 0.5), Duration::from_secs(1));
        assert_eq!(c.delay_with_jitter(1, 0.0), Duration::from_millis(50));
        assert!(c.delay_with_jitter(8, 0.99) <= Duration::from_secs(1));
    }

    #[test]
    fn nan_settings_fall_back_to_the_cap() {
        let c = BackoffConfig {
            multiplier: f64::NAN,
            jitter_factor: f64::NAN,
            ..config(3)
        };
        assert_eq!(c.delay_with_jitter(2, 0.5), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_backoff(&config(3), "test", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(SyncError::Transient("busy".into()))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_backoff(&config(3), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SyncError::Transient("down".into()))
        })
        .await;
        assert!(matches!(result, Err(SyncError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failures_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_backoff(&config(5), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SyncError::Unauthorized(401))
        })
        .await;
        assert_eq!(result, Err(SyncError::Unauthorized(401)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
