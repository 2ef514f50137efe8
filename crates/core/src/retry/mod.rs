//! Retry with exponential backoff and an offline priority queue

pub mod config;
pub mod executor;
pub mod queue;

pub use config::{RetryCallback, RetryConfig, RetryConfigBuilder, RetryPredicate};
pub use executor::{ExecuteOptions, RetryExecutor};
pub use queue::{QueueStatus, ReplayDescriptor};
