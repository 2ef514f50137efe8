//! Request gateway with offline cache, retry and token refresh
//!
//! Every backend call goes through [`RequestGateway::request`]. Reads are
//! served from the persistent cache while offline, writes are parked by the
//! retry executor until connectivity returns, and a 401 triggers at most one
//! token refresh no matter how many requests hit it at once.

use std::sync::Arc;

use circlepay_core::cache::default_ttl;
use circlepay_core::{
    ConnectivityMonitor, ExecuteOptions, PersistentCache, ReplayDescriptor, RetryConfig,
    RetryExecutor,
};
use circlepay_domain::{CirclePayError, Priority, Result};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use super::auth::{CredentialStore, TokenRefresher};
use super::errors::error_from_status;
use crate::http::HttpClient;

type SharedRefresh = Shared<BoxFuture<'static, Result<String>>>;

/// Per-request options for [`RequestGateway::request`]
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Serve GETs from the cache while offline and cache successful ones.
    pub use_cache: bool,
    /// Defaults to Medium for GET and High for writes.
    pub priority: Option<Priority>,
    /// Bearer token to use instead of the stored access token.
    pub auth_token: Option<String>,
    /// Defaults to the executor's configuration.
    pub retry: Option<RetryConfig>,
    /// Park the request while offline instead of failing with `Offline`.
    pub defer_when_offline: bool,
    /// Overrides the `{segment}_{path}` cache key.
    pub cache_key: Option<String>,
    /// Makes a parked request durable as a pending action.
    pub replay: Option<ReplayDescriptor>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            priority: None,
            auth_token: None,
            retry: None,
            defer_when_offline: true,
            cache_key: None,
            replay: None,
        }
    }
}

impl RequestOptions {
    /// Override the method-derived priority.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Skip the offline cache for this request.
    pub fn no_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    /// Cache the response under `key`.
    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    /// Persist the request for sync if it has to wait.
    pub fn replay(mut self, descriptor: ReplayDescriptor) -> Self {
        self.replay = Some(descriptor);
        self
    }

    /// Use `config` instead of the executor default.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = Some(config);
        self
    }

    /// Send `token` instead of the stored access token.
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Fail with `Offline` instead of queuing.
    pub fn immediate(mut self) -> Self {
        self.defer_when_offline = false;
        self
    }
}


/// Sends authenticated JSON requests to the CirclePay backend.
pub struct RequestGateway {
    http: HttpClient,
    base_url: String,
    credentials: Arc<CredentialStore>,
    refresher: Arc<TokenRefresher>,
    executor: Arc<RetryExecutor>,
    monitor: Arc<ConnectivityMonitor>,
    cache: Arc<PersistentCache>,
    /// Refresh currently shared by every request that hit a 401.
    in_flight: Mutex<Option<SharedRefresh>>,
}

impl RequestGateway {
    /// Gateway for `base_url`; a trailing slash is ignored.
    pub fn new(
        http: HttpClient,
        base_url: impl Into<String>,
        credentials: Arc<CredentialStore>,
        refresher: Arc<TokenRefresher>,
        executor: Arc<RetryExecutor>,
        monitor: Arc<ConnectivityMonitor>,
        cache: Arc<PersistentCache>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            credentials,
            refresher,
            executor,
            monitor,
            cache,
            in_flight: Mutex::new(None),
        }
    }

    /// Store holding the tokens this gateway sends.
    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// Send `method path` with an optional JSON body and decode the response.
    #[instrument(skip_all, fields(%method, path = %path))]
    pub async fn request<T>(
        self: &Arc<Self>,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        options: RequestOptions,
    ) -> Result<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let priority = options.priority.unwrap_or_else(|| default_priority(&method));
        let cacheable = method == Method::GET && options.use_cache;
        let cache_key = options.cache_key.clone().unwrap_or_else(|| cache_key_for(path));

        if cacheable && !self.monitor.is_online() {
            match self.cache.get::<T>(&cache_key).await {
                Ok(Some(cached)) => {
                    debug!(cache_key = %cache_key, "offline, serving cached response");
                    return Ok(cached);
                }
                Ok(None) => {}
                Err(err) => warn!(cache_key = %cache_key, error = %err, "cache read failed"),
            }
            if priority == Priority::Low {
                return Err(CirclePayError::Offline(format!("no cached copy of {path}")));
            }
        }

        let config = options.retry.unwrap_or_else(|| self.executor.default_config());
        let mut execute = ExecuteOptions::new(config).priority(priority);
        if let Some(descriptor) = options.replay {
            execute = execute.replay(descriptor);
        }
        if !options.defer_when_offline {
            execute = execute.immediate();
        }

        let gateway = Arc::clone(self);
        let path_owned = path.to_string();
        let auth_token = options.auth_token;
        let value: serde_json::Value = self
            .executor
            .execute(
                move || {
                    let gateway = Arc::clone(&gateway);
                    let method = method.clone();
                    let path = path_owned.clone();
                    let body = body.clone();
                    let auth_token = auth_token.clone();
                    async move {
                        gateway.send_authorized(method, &path, body.as_ref(), auth_token).await
                    }
                },
                execute,
            )
            .await?;

        let decoded = T::deserialize(&value)?;
        if cacheable {
            if let Err(err) = self.cache.put(&cache_key, &value, default_ttl(&cache_key)).await {
                warn!(cache_key = %cache_key, error = %err, "failed to cache response");
            }
        }
        Ok(decoded)
    }

    /// One attempt, including a refresh-and-replay on 401.
    async fn send_authorized(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        auth_token: Option<String>,
    ) -> Result<serde_json::Value> {
        let token = match auth_token {
            Some(token) => Some(token),
            None => self.credentials.access_token().await?,
        };

        let response = self.send_once(&method, path, body, token.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return read_body(response).await;
        }

        debug!(path, "unauthorized, refreshing access token");
        let fresh = self.refreshed_token(token.as_deref()).await?;
        let replay = self.send_once(&method, path, body, Some(&fresh)).await?;
        if replay.status() == StatusCode::UNAUTHORIZED {
            warn!(path, "still unauthorized after refresh; clearing credentials");
            if let Err(err) = self.credentials.clear().await {
                warn!(error = %err, "failed to clear credentials");
            }
            return Err(CirclePayError::AuthExpired(
                "request still unauthorized after token refresh".into(),
            ));
        }
        read_body(replay).await
    }

    async fn send_once(
        &self,
        method: &Method,
        path: &str,
        body: Option<&serde_json::Value>,
        token: Option<&str>,
    ) -> Result<Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .http
            .request(method.clone(), &url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json");
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        self.http.send(request).await
    }

    /// A token newer than `stale`, refreshing at most once concurrently.
    async fn refreshed_token(&self, stale: Option<&str>) -> Result<String> {
        if let Some(current) = self.credentials.access_token().await? {
            if stale != Some(current.as_str()) {
                return Ok(current);
            }
        }

        let flight = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.as_ref() {
                Some(flight) => flight.clone(),
                None => {
                    let refresher = Arc::clone(&self.refresher);
                    let credentials = Arc::clone(&self.credentials);
                    let stale = stale.map(str::to_owned);
                    let flight = async move {
                        // A flight that settled after the check above already stored a newer token.
                        if let Some(current) = credentials.access_token().await? {
                            if stale.as_deref() != Some(current.as_str()) {
                                return Ok(current);
                            }
                        }
                        refresher.refresh().await
                    }
                    .boxed()
                    .shared();
                    *in_flight = Some(flight.clone());
                    flight
                }
            }
        };

        let outcome = flight.clone().await;

        let mut in_flight = self.in_flight.lock();
        if in_flight.as_ref().is_some_and(|current| current.ptr_eq(&flight)) {
            *in_flight = None;
        }
        drop(in_flight);
        outcome
    }
}

/// Writes jump the queue ahead of reads.
pub fn default_priority(method: &Method) -> Priority {
    if method == Method::GET {
        Priority::Medium
    } else {
        Priority::High
    }
}

/// `{first_segment}_{path}`, e.g. `wallets_/wallets/w1/balance`.
pub fn cache_key_for(path: &str) -> String {
    let segment = path.trim_start_matches('/').split(['/', '?']).next().unwrap_or_default();
    format!("{segment}_{path}")
}

async fn read_body(response: Response) -> Result<serde_json::Value> {
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|err| CirclePayError::Network(format!("failed to read response body: {err}")))?;

    if !status.is_success() {
        return Err(error_from_status(status, &String::from_utf8_lossy(&bytes)));
    }
    if bytes.is_empty() {
        return Ok(serde_json::Value::Null);
    }
    Ok(serde_json::from_slice(&bytes)?)
}
