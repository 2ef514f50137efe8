//! # CirclePay Core
//!
//! Request-resilience business logic - no infrastructure dependencies.
//!
//! This crate contains:
//! - Connectivity monitoring and edge detection
//! - The persistent response cache and pending-action queue
//! - Retry with exponential backoff and an offline priority queue
//! - Post-reconnect synchronization of pending actions
//!
//! ## Architecture Principles
//! - Only depends on `circlepay-common` and `circlepay-domain`
//! - No HTTP, filesystem, or platform code
//! - All external dependencies via traits (`ConnectivitySource`,
//!   `KeyValueStore`, `ActionDispatcher`)

pub mod cache;
pub mod connectivity;
pub mod retry;
pub mod sync;

// Re-export specific items to avoid ambiguity
pub use cache::{CacheEntry, CacheSizeSummary, KeyValueStore, MemoryStore, PersistentCache};
pub use connectivity::{
    ChannelConnectivitySource, ConnectivityMonitor, ConnectivityObserver, ConnectivitySource,
};
pub use retry::{
    ExecuteOptions, QueueStatus, ReplayDescriptor, RetryConfig, RetryConfigBuilder, RetryExecutor,
};
pub use sync::{ActionDispatcher, SyncCoordinator};
