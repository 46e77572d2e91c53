//! Polling helpers for asynchronous tests.

use std::time::Duration;

use tokio::time::{Instant, sleep};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const MIN_BACKOFF: Duration = Duration::from_millis(5);
const MAX_BACKOFF: Duration = Duration::from_millis(250);

/// Polls `f` until it yields a value. Panics once `timeout` has elapsed.
pub async fn poll_until<T, F>(mut f: F, timeout: Duration) -> T
where
    F: AsyncFnMut() -> Option<T>,
{
    let deadline = Instant::now() + timeout;
    let mut backoff = MIN_BACKOFF;

    loop {
        if let Some(value) = f().await {
            return value;
        }

        if Instant::now() >= deadline {
            panic!("condition not met within {timeout:?}");
        }

        sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

/// Polls `f` until it returns true, for at most 5 seconds.
pub async fn wait_for<F>(mut f: F)
where
    F: AsyncFnMut() -> bool,
{
    poll_until(async || f().await.then_some(()), DEFAULT_TIMEOUT).await
}
