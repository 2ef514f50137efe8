//! Shared fixtures for infra integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use circlepay_common::testing::poll_until;
use circlepay_core::{ChannelConnectivitySource, KeyValueStore, MemoryStore};
use circlepay_domain::{Config, ConnectivitySignal};
use circlepay_infra::ResilienceStack;
use wiremock::MockServer;

/// Configuration pointed at `server` with fast, unjittered retries.
pub fn config_for(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.api.base_url = server.uri();
    config.api.timeout_secs = 5;
    config.retry.base_delay_ms = 10;
    config.retry.max_delay_ms = 100;
    config.retry.jitter = false;
    config.retry.drain_interval_ms = 10;
    config
}

pub struct Harness {
    pub stack: ResilienceStack,
    pub source: Arc<ChannelConnectivitySource>,
}

impl Harness {
    pub async fn start(config: Config, online: bool) -> Self {
        Self::start_with_store(config, online, Arc::new(MemoryStore::new())).await
    }

    pub async fn start_with_store(
        config: Config,
        online: bool,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let source = Arc::new(if online {
            ChannelConnectivitySource::online()
        } else {
            ChannelConnectivitySource::offline()
        });
        let stack = ResilienceStack::build(config, source.clone(), store).expect("stack builds");
        stack.init().await.expect("stack starts");
        Self { stack, source }
    }

    pub async fn go_online(&self) {
        self.source.publish(ConnectivitySignal::wifi(-55));
        self.wait_for(true).await;
    }

    pub async fn go_offline(&self) {
        self.source.publish(ConnectivitySignal::disconnected());
        self.wait_for(false).await;
    }

    async fn wait_for(&self, online: bool) {
        let monitor = Arc::clone(&self.stack.monitor);
        let reached = poll_until(Duration::from_secs(2), Duration::from_millis(5), || {
            let monitor = Arc::clone(&monitor);
            async move { monitor.is_online() == online }
        })
        .await;
        assert!(reached, "monitor never reported online = {online}");
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.stack.dispose();
    }
}
