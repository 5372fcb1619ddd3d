//! Bounded retry with exponential backoff.
//!
//! Two callers: language-model completions retried on rate limits
//! (1 s / 2 s / 4 s), and document-store reads retried once on transient
//! I/O errors.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Backoff schedule for rate-limited language model calls.
pub const LM_BACKOFF: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// Backoff schedule for transient store reads.
pub const STORE_READ_BACKOFF: [Duration; 1] = [Duration::from_millis(250)];

/// Run `op`, retrying after each delay in `delays` while `should_retry`
/// holds. At most `delays.len() + 1` attempts.
pub async fn with_backoff<T, E, F, Fut, P>(
    delays: &[Duration],
    mut should_retry: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
{
    let mut attempt = 0usize;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < delays.len() && should_retry(&e) => {
                debug!(attempt, "Transient failure, backing off");
                tokio::time::sleep(delays[attempt]).await;
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

    #[tokio::test]
    async fn success_needs_one_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = with_backoff(&STORE_READ_BACKOFF, |_| true, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(7) }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_error_is_retried() {
        let delays = [Duration::from_millis(1), Duration::from_millis(1)];
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = with_backoff(&delays, |_| true, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { Err("flaky") } else { Ok(42) } }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let delays = [Duration::from_millis(1); 3];
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = with_backoff(&delays, |e| *e != "fatal", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("fatal") }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let delays = [Duration::from_millis(1)];
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = with_backoff(&delays, |_| true, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("always") }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
