//! Push-based connectivity source
//!
//! Platform glue (or a test) publishes raw signals; the monitor reads the
//! latest one on `fetch` and receives changes through `subscribe`. Rapid
//! successive publishes may be coalesced into the newest signal.

use async_trait::async_trait;
use circlepay_domain::{ConnectivitySignal, Result};
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::watch;

use super::ports::ConnectivitySource;

/// Connectivity source fed through [`ChannelConnectivitySource::publish`]
#[derive(Debug)]
pub struct ChannelConnectivitySource {
    sender: watch::Sender<ConnectivitySignal>,
}

impl ChannelConnectivitySource {
    /// Source that reports `initial` until the next publish.
    pub fn new(initial: ConnectivitySignal) -> Self {
        let (sender, _receiver) = watch::channel(initial);
        Self { sender }
    }

    /// Source that starts on a connected wifi link.
    pub fn online() -> Self {
        Self::new(ConnectivitySignal::wifi(-55))
    }

    /// Source that starts without any link.
    pub fn offline() -> Self {
        Self::new(ConnectivitySignal::disconnected())
    }

    /// Replace the current signal and notify subscribers.
    pub fn publish(&self, signal: ConnectivitySignal) {
        self.sender.send_replace(signal);
    }

    /// Most recently published signal.
    pub fn latest(&self) -> ConnectivitySignal {
        self.sender.borrow().clone()
    }
}

#[async_trait]
impl ConnectivitySource for ChannelConnectivitySource {
    async fn fetch(&self) -> Result<ConnectivitySignal> {
        Ok(self.latest())
    }

    fn subscribe(&self) -> BoxStream<'static, ConnectivitySignal> {
        let receiver = self.sender.subscribe();
        stream::unfold(receiver, |mut receiver| async move {
            receiver.changed().await.ok()?;
            let signal = receiver.borrow_and_update().clone();
            Some((signal, receiver))
        })
        .boxed()
    }
}
