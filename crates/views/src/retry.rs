//! Bounded retry with jittered exponential backoff.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{Result, ViewError};

const BASE_DELAY_MS: u64 = 20;
const MAX_DELAY_MS: u64 = 2_000;

/// Delay before the next attempt: exponential in the attempt number with
/// random jitter, capped.
fn backoff_delay(attempt: u32) -> Duration {
    let capped = BASE_DELAY_MS
        .saturating_mul(1 << attempt.min(6))
        .min(MAX_DELAY_MS);
    let jitter = rand::rng().random_range(0..=capped / 2);
    Duration::from_millis(capped + jitter)
}

/// Runs `action`, retrying errors for which `matches` returns true.
///
/// Up to `max_retries` additional attempts are made, sleeping a jittered
/// backoff between them. Exhaustion yields
/// [`ViewError::RetriesExhausted`] carrying every caught error. A
/// non-matching error aborts immediately, except with `max_retries = 0`
/// where any failure of the single attempt is wrapped.
pub async fn retry_on<T, F, Fut, P>(mut action: F, matches: P, max_retries: u32) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&ViewError) -> bool,
{
    let mut caught = Vec::new();
    for attempt in 0..=max_retries {
        match action().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_retries && matches(&err) => {
                tracing::warn!(attempt, error = %err, "attempt failed; backing off");
                caught.push(err);
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
            Err(err) if matches(&err) || max_retries == 0 => {
                caught.push(err);
                break;
            }
            Err(err) => return Err(err),
        }
    }
    Err(ViewError::RetriesExhausted {
        attempts: max_retries + 1,
        errors: caught,
    })
}

/// [`retry_on`] with every error considered retryable.
pub async fn retry<T, F, Fut>(action: F, max_retries: u32) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_on(action, |_| true, max_retries).await
}
