use std::future::Future;

use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

use crate::{error::Retryable, models::retry::RetryConfig};

/// Runs `operation`, retrying retryable failures with exponential backoff.
///
/// The delay starts at `initial_delay_ms`, is multiplied by `backoff_multiplier`
/// after every failed attempt, gets up to 10% of random jitter added, and the
/// slept duration never exceeds `max_delay_ms`.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut attempt: u32 = 0;
    let mut delay_ms = config.initial_delay_ms;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(attempt, retries = config.retries, "Retry succeeded");
                }
                return Ok(result);
            }
            Err(e) if !e.is_retryable() => {
                debug!(attempt, error = %e, "Non-retryable failure, giving up");
                return Err(e);
            }
            Err(e) => {
                if attempt > config.retries {
                    warn!(
                        retries = config.retries,
                        error = %e,
                        "Retry failed after exhausting all attempts"
                    );
                    return Err(e);
                }

                let sleep_ms = backoff_delay_ms(delay_ms, config.max_delay_ms);

                debug!(
                    attempt,
                    retries = config.retries,
                    delay_ms = sleep_ms,
                    error = %e,
                    "Retry attempt failed, backing off"
                );

                sleep(Duration::from_millis(sleep_ms)).await;

                delay_ms = delay_ms
                    .saturating_mul(config.backoff_multiplier)
                    .min(config.max_delay_ms);
            }
        }
    }
}

fn backoff_delay_ms(delay_ms: u64, max_delay_ms: u64) -> u64 {
    let jitter = rand::random_range(0.0..=0.1);
    let jittered = delay_ms as f64 * (1.0 + jitter);

    (jittered as u64).min(max_delay_ms)
}
