//! Bounded retry with exponential backoff.
//!
//! Every model call goes through [`with_retry`]. With `retries = 2` and a
//! 1 s base the wait sequence is 1 s → 2 s, then the last error surfaces
//! unchanged so callers can still match on its variant.

use crate::config::RetryPolicy;
use crate::error::ComicError;
use std::future::Future;
use tokio::time::sleep;
use tracing::warn;

/// Run `op` until it succeeds or `policy.retries` extra attempts are spent.
///
/// `op` receives the 0-based attempt number. On exhaustion the error from
/// the final attempt is returned as-is.
pub async fn with_retry<T, F, Fut>(
    label: &str,
    policy: RetryPolicy,
    mut op: F,
) -> Result<T, ComicError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ComicError>>,
{
    let mut attempt = 0u32;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.retries => {
                let backoff = policy.delay_for(attempt);
                warn!(
                    "{}: attempt {}/{} failed ({}); retrying in {}ms",
                    label,
                    attempt + 1,
                    policy.retries + 1,
                    e,
                    backoff.as_millis()
                );
                sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(
                    "{}: giving up after {} attempts: {}",
                    label,
                    attempt + 1,
                    e
                );
                return Err(e);
            }
        }
    }
}
