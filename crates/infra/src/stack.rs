//! Composition root for the resilience core
//!
//! [`ResilienceStack`] owns one instance of every service and wires them
//! together explicitly; nothing is reachable through globals.

use std::sync::Arc;

use circlepay_common::{Clock, SystemClock};
use circlepay_core::{
    ActionDispatcher, ConnectivityMonitor, ConnectivitySource, KeyValueStore, MemoryStore,
    PersistentCache, RetryConfig, RetryExecutor, SyncCoordinator,
};
use circlepay_domain::{CacheConfig, Config, Result};
use tracing::{info, warn};

use crate::api::{CirclePayApi, CredentialStore, RequestGateway, TokenRefresher};
use crate::connectivity::HttpProbe;
use crate::http::HttpClient;
use crate::storage::FileStore;

/// Every service of the resilience core, wired together
pub struct ResilienceStack {
    pub config: Config,
    pub monitor: Arc<ConnectivityMonitor>,
    pub cache: Arc<PersistentCache>,
    pub executor: Arc<RetryExecutor>,
    pub credentials: Arc<CredentialStore>,
    pub gateway: Arc<RequestGateway>,
    pub api: Arc<CirclePayApi>,
    pub sync: Arc<SyncCoordinator>,
    pub probe: HttpProbe,
}

impl ResilienceStack {
    /// Wire every component with the system clock.
    pub fn build(
        config: Config,
        source: Arc<dyn ConnectivitySource>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self> {
        Self::build_with_clock(config, source, store, Arc::new(SystemClock))
    }

    /// Wire every component with `clock`.
    pub fn build_with_clock(
        config: Config,
        source: Arc<dyn ConnectivitySource>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let monitor = Arc::new(ConnectivityMonitor::new(
            source,
            Arc::clone(&clock),
            config.connectivity.reprobe_interval(),
        ));
        let cache = Arc::new(PersistentCache::with_schema_version(
            Arc::clone(&store),
            Arc::clone(&clock),
            config.cache.schema_version.clone(),
        ));

        RetryConfig::from(&config.retry).validate()?;
        let executor = Arc::new(
            RetryExecutor::new(Arc::clone(&monitor))
                .with_cache(Arc::clone(&cache))
                .with_settings(&config.retry),
        );

        let mut http = HttpClient::builder().timeout(config.api.timeout());
        if let Some(agent) = &config.api.user_agent {
            http = http.user_agent(agent.clone());
        }
        let http = http.build()?;

        let credentials = Arc::new(CredentialStore::new(store));
        let refresher = Arc::new(TokenRefresher::new(
            http.clone(),
            &config.api.base_url,
            &config.api.refresh_path,
            Arc::clone(&credentials),
        ));
        let gateway = Arc::new(RequestGateway::new(
            http,
            config.api.base_url.clone(),
            Arc::clone(&credentials),
            refresher,
            Arc::clone(&executor),
            Arc::clone(&monitor),
            Arc::clone(&cache),
        ));
        let api = Arc::new(CirclePayApi::new(Arc::clone(&gateway)));

        let sync = Arc::new(SyncCoordinator::new(
            Arc::clone(&cache),
            Arc::clone(&monitor),
            Arc::clone(&api) as Arc<dyn ActionDispatcher>,
            clock,
            config.sync.clone(),
        ));
        let probe = HttpProbe::from_config(&config.connectivity, &config.api.base_url)?;

        Ok(Self { config, monitor, cache, executor, credentials, gateway, api, sync, probe })
    }

    /// Start monitor, executor and sync coordinator, in that order.
    pub async fn init(&self) -> Result<()> {
        match self.cache.cleanup_expired().await {
            Ok(removed) if removed > 0 => info!(removed, "removed expired cache entries"),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "cache cleanup failed"),
        }

        self.monitor.start().await;
        self.executor.start();
        self.sync.start().await?;
        info!(online = self.monitor.is_online(), "resilience stack started");
        Ok(())
    }

    /// Tear down in reverse start order.
    pub fn dispose(&self) {
        self.sync.dispose();
        self.executor.dispose();
        self.monitor.dispose();
        info!("resilience stack disposed");
    }
}

/// Durable store for `config`: a [`FileStore`] when a path is set, else memory.
pub fn store_for(config: &CacheConfig) -> Arc<dyn KeyValueStore> {
    match &config.storage_path {
        Some(path) => Arc::new(FileStore::new(path)),
        None => Arc::new(MemoryStore::new()),
    }
}
