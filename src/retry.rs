//! Capped exponential backoff for transient external failures.
//!
//! A single reusable async helper rather than duplicating the retry dance at every
//! call site (stream substrate, store, LLM, embedding).

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

const MAX_ATTEMPTS: u32 = 5;
const BASE_DELAY_MS: u64 = 200;
const MAX_DELAY_MS: u64 = 10_000;

/// Retries `op` up to 5 times with capped exponential backoff and full jitter.
/// Returns the last error if every attempt fails.
pub async fn with_backoff<T, E, F, Fut>(op_name: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt >= MAX_ATTEMPTS {
                    warn!(op = op_name, attempt, error = %e, "giving up after max retries");
                    return Err(e);
                }
                let delay = backoff_delay(attempt);
                warn!(op = op_name, attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying after transient failure");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Synchronous counterpart of [`with_backoff`] for call sites that aren't
/// async (e.g. the `rusqlite` connection behind the event store).
pub fn with_backoff_sync<T, E, F>(op_name: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op() {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt >= MAX_ATTEMPTS {
                    warn!(op = op_name, attempt, error = %e, "giving up after max retries");
                    return Err(e);
                }
                let delay = backoff_delay(attempt);
                warn!(op = op_name, attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying after transient failure");
                std::thread::sleep(delay);
            }
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(10));
    let capped = exp.min(MAX_DELAY_MS);
    let jittered = rand::thread_rng().gen_range(0..=capped);
    Duration::from_millis(jittered.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<u32, &'static str> = with_backoff("test", || {
            let c = c.clone();
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("transient")
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<u32, &'static str> = with_backoff("test", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err("always fails")
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }
}
