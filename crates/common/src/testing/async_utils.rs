//! Async testing utilities
//!
//! All helpers measure time with `tokio::time`, so they behave the same under
//! `#[tokio::test(start_paused = true)]` as with a real clock.

// Test helpers are self-explanatory; skip the error/panic doc sections.
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

use std::future::Future;
use std::time::Duration;

/// Assert that an async condition eventually becomes true within a timeout
///
/// ```no_run
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// #[tokio::test]
/// async fn flag_flips() {
///     let flag = Arc::new(AtomicBool::new(false));
///     let flag_clone = flag.clone();
///
///     tokio::spawn(async move {
///         tokio::time::sleep(Duration::from_millis(100)).await;
///         flag_clone.store(true, Ordering::SeqCst);
///     });
///
///     circlepay_common::assert_eventually_async!(Duration::from_secs(1), async {
///         flag.load(Ordering::SeqCst)
///     });
/// }
/// ```
#[macro_export]
macro_rules! assert_eventually_async {
    ($timeout:expr, $fut:expr) => {{
        let timeout_duration = $timeout;
        let result = tokio::time::timeout(timeout_duration, async {
            loop {
                if $fut.await {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await;

        assert!(result.is_ok(), "Condition did not become true within {:?}", timeout_duration);
    }};
}

/// Wait for a future to complete with a timeout, returning a Result
pub async fn timeout_ok<F, T>(duration: Duration, fut: F) -> Result<T, tokio::time::error::Elapsed>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, fut).await
}

/// Poll an async condition until it returns true or times out
pub async fn poll_until<F, Fut>(timeout: Duration, interval: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }

    condition().await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn poll_until_sees_late_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let flag_clone = flag.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag_clone.store(true, Ordering::SeqCst);
        });

        let flag = &*flag;
        let result =
            poll_until(Duration::from_secs(1), Duration::from_millis(10), move || async move {
                flag.load(Ordering::SeqCst)
            })
            .await;

        assert!(result);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_until_gives_up() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result =
            poll_until(Duration::from_millis(100), Duration::from_millis(10), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                false
            })
            .await;

        assert!(!result);
        assert!(counter.load(Ordering::SeqCst) >= 10);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_ok_elapses() {
        let result = timeout_ok(Duration::from_millis(10), tokio::time::sleep(Duration::from_secs(1)))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn eventually_macro_passes() {
        let flag = AtomicBool::new(true);
        crate::assert_eventually_async!(Duration::from_millis(50), async {
            flag.load(Ordering::SeqCst)
        });
    }
}
