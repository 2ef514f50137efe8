//! Testing utilities and helpers
//!
//! - **[`async_utils`]**: eventual-consistency assertions and polling helpers
//!   that cooperate with paused tokio time
//!
//! Time mocking lives in [`crate::clock`] and is re-exported here for test
//! code that only imports `testing`.

pub mod async_utils;

pub use async_utils::{poll_until, timeout_ok};
#[cfg(feature = "foundation")]
pub use crate::clock::{Clock, MockClock, SystemClock};
