//! Resilience primitives
//!
//! Pure delay math shared by the retry executor and anything else that backs
//! off. Scheduling the sleeps is the caller's concern.

pub mod backoff;

pub use backoff::{ExponentialBackoff, Jitter};
