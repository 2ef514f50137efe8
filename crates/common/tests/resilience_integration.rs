//! Integration tests for resilience module
//!
//! Exercises the public backoff API the way the retry executor uses it.

#![cfg(feature = "runtime")]

use std::time::Duration;

use circlepay_common::resilience::{ExponentialBackoff, Jitter};

/// Without jitter, delays never shrink between attempts and never pass the cap.
#[test]
fn test_backoff_monotonic_without_jitter() {
    let configs = [
        ExponentialBackoff::default(),
        ExponentialBackoff::new(Duration::from_millis(10), 3.0, Duration::from_millis(2_500)),
        ExponentialBackoff::new(Duration::from_millis(250), 1.0, Duration::from_secs(1)),
    ];

    for backoff in configs {
        for attempt in 1..32 {
            let previous = backoff.next_delay(attempt - 1, Jitter::None);
            let current = backoff.next_delay(attempt, Jitter::None);
            assert!(current >= previous, "{backoff:?} shrank at attempt {attempt}");
            assert!(current <= backoff.max_delay, "{backoff:?} exceeded cap at {attempt}");
        }
    }
}

/// With jitter, each delay lands in `[0.5 * unjittered, unjittered]`.
#[test]
fn test_jitter_bound_holds_for_every_attempt() {
    let backoff =
        ExponentialBackoff::new(Duration::from_millis(333), 2.0, Duration::from_millis(30_000));

    for attempt in 0..12 {
        let unjittered = backoff.delay_for(attempt);
        for _ in 0..100 {
            let jittered = backoff.next_delay(attempt, Jitter::Proportional);
            assert!(jittered <= unjittered);
            assert!(jittered * 2 >= unjittered);
        }
    }
}
