//! Linear retry/backoff for the chunk streamer's transient-error path.
//!
//! This is a deliberate departure from this codebase's usual exponential
//! `CircuitBreakerConfig` backoff (initial/max backoff + multiplier): the
//! pipeline pins an exact linear schedule (`attempt * 1000ms`, 3 attempts),
//! so the breaker/backoff split is collapsed into one small retry helper
//! rather than reused wholesale.

use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1000),
        }
    }
}

impl RetryConfig {
    /// Linear backoff: attempt 1 waits `initial_backoff`, attempt 2 waits
    /// `2 * initial_backoff`, and so on.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.initial_backoff * attempt
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
}

/// Retry `op` up to `config.max_attempts` times with linear backoff between
/// attempts. The first attempt is not delayed.
pub async fn retry_linear<T, E, F, Fut>(config: &RetryConfig, label: &str, mut op: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < config.max_attempts => {
                warn!(label, attempt, error = %e, "transient failure, retrying after backoff");
                tokio::time::sleep(config.delay_for_attempt(attempt)).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: e,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_grows_linearly() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(cfg.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(cfg.delay_for_attempt(3), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures_within_budget() {
        let cfg = RetryConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
        };
        let calls = AtomicU32::new(0);
        let result: Result<u32, RetryError<&str>> = retry_linear(&cfg, "test", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err("transient")
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_attempts() {
        let cfg = RetryConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
        };
        let result: Result<u32, RetryError<&str>> =
            retry_linear(&cfg, "test", || async { Err("always fails") }).await;
        match result {
            Err(RetryError::Exhausted { attempts, .. }) => assert_eq!(attempts, 3),
            _ => panic!("expected exhaustion"),
        }
    }
}
