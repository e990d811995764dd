//! Retry utilities with exponential backoff and jitter.
//!
//! Two flavours are provided:
//!
//! - [`retry_on_conflict`] re-runs a read-modify-write closure while the API
//!   server reports an optimistic concurrency conflict. Used for finalizer
//!   bookkeeping on shared resources.
//! - [`backoff_delay`] computes the requeue delay for the Nth consecutive
//!   transient failure of a reconcile pass.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::Error;

/// Configuration for operations that may fail transiently.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Short, bounded retries for optimistic-concurrency races
    pub fn conflict() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }
}

/// Re-run `operation` while it fails with a conflict.
///
/// Any other error is returned immediately. Each attempt must re-read the
/// resource it mutates so that it works against the latest resourceVersion.
pub async fn retry_on_conflict<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_conflict() => {
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt,
                        "conflict persisted after max retries"
                    );
                    return Err(e);
                }

                let jittered = jitter(delay);
                warn!(
                    operation = %operation_name,
                    attempt,
                    delay_ms = jittered.as_millis(),
                    "write conflict, re-reading and retrying"
                );
                tokio::time::sleep(jittered).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
            Err(e) => return Err(e),
        }
    }
}

/// Requeue delay after `failures` consecutive transient failures.
///
/// `base * 2^(failures-1)`, capped at `max`. Zero failures yields `base`.
pub fn backoff_delay(base: Duration, max: Duration, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    let scaled = base.saturating_mul(1u32 << exponent);
    scaled.min(max)
}

/// Scale a delay by a random factor in 0.5..1.5
fn jitter(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}
