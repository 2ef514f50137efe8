//! Port interfaces for connectivity signals

use async_trait::async_trait;
use circlepay_domain::{ConnectivitySignal, Result};
use futures::stream::BoxStream;

/// Platform connectivity signal source
///
/// Implementations wrap whatever the platform offers (reachability APIs,
/// netlink, a manual toggle) and deliver raw, unnormalized signals.
#[async_trait]
pub trait ConnectivitySource: Send + Sync {
    /// One-shot read of the current signal
    async fn fetch(&self) -> Result<ConnectivitySignal>;

    /// Stream of subsequent change events
    fn subscribe(&self) -> BoxStream<'static, ConnectivitySignal>;
}
