//! CirclePay business endpoints

use std::sync::Arc;

use async_trait::async_trait;
use circlepay_core::{ActionDispatcher, ReplayDescriptor, RetryConfig};
use circlepay_domain::{ActionKind, PendingAction, Priority, Result};
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use super::gateway::{RequestGateway, RequestOptions};

/// Cache key shared by every supported-chains read.
pub const SUPPORTED_CHAINS_CACHE_KEY: &str = "chains_supported";

/// Method and path of the endpoint that performs `kind`.
pub fn route(kind: ActionKind) -> (Method, &'static str) {
    match kind {
        ActionKind::Payment => (Method::POST, "/payments/qr/generate"),
        ActionKind::Transfer => (Method::POST, "/payments/transfer/cross-chain"),
        ActionKind::ProfileUpdate => (Method::PUT, "/users/profile"),
        ActionKind::WalletCreation => (Method::POST, "/wallets/create"),
    }
}

/// Typed entry points for the CirclePay backend
///
/// Mutations carry a replay descriptor, so a mutation parked while offline
/// survives a restart as a pending action.
pub struct CirclePayApi {
    gateway: Arc<RequestGateway>,
}

impl CirclePayApi {
    /// Endpoints sent through `gateway`.
    pub fn new(gateway: Arc<RequestGateway>) -> Self {
        Self { gateway }
    }

    /// Underlying request gateway.
    pub fn gateway(&self) -> &Arc<RequestGateway> {
        &self.gateway
    }

    /// Create a QR payment request.
    pub async fn generate_payment_qr(&self, payload: Value) -> Result<Value> {
        self.mutate(ActionKind::Payment, payload).await
    }

    /// Start a CCTP transfer between chains.
    pub async fn cross_chain_transfer(&self, payload: Value) -> Result<Value> {
        self.mutate(ActionKind::Transfer, payload).await
    }

    /// Update the signed-in user's profile.
    pub async fn update_profile(&self, payload: Value) -> Result<Value> {
        self.mutate(ActionKind::ProfileUpdate, payload).await
    }

    /// Create a wallet on a chain.
    pub async fn create_wallet(&self, payload: Value) -> Result<Value> {
        self.mutate(ActionKind::WalletCreation, payload).await
    }

    /// Balance of one wallet; cached for offline use.
    pub async fn wallet_balance(&self, wallet_id: &str) -> Result<Value> {
        let path = format!("/wallets/{wallet_id}/balance");
        self.gateway.request(Method::GET, &path, None, RequestOptions::default()).await
    }

    /// Wallets owned by `user_id`; cached for offline use.
    pub async fn user_wallets(&self, user_id: &str) -> Result<Value> {
        let path = format!("/wallets/user/{user_id}");
        self.gateway.request(Method::GET, &path, None, RequestOptions::default()).await
    }

    /// Chain metadata changes rarely, so it waits behind other reads.
    pub async fn supported_chains(&self) -> Result<Value> {
        let options =
            RequestOptions::default().priority(Priority::Low).cache_key(SUPPORTED_CHAINS_CACHE_KEY);
        self.gateway.request(Method::GET, "/payments/chains/supported", None, options).await
    }

    /// Profile of the signed-in user; cached for offline use.
    pub async fn current_user(&self) -> Result<Value> {
        self.gateway.request(Method::GET, "/users/me", None, RequestOptions::default()).await
    }

    async fn mutate(&self, kind: ActionKind, payload: Value) -> Result<Value> {
        let (method, path) = route(kind);
        let options = RequestOptions::default().replay(ReplayDescriptor::new(kind, payload.clone()));
        self.gateway.request(method, path, Some(payload), options).await
    }
}

#[async_trait]
impl ActionDispatcher for CirclePayApi {
    /// One attempt, never queued; the sync coordinator counts failures.
    async fn dispatch(&self, action: &PendingAction) -> Result<()> {
        let (method, path) = route(action.kind);
        debug!(action_id = %action.id, kind = %action.kind, "dispatching pending action");

        let options = RequestOptions::default()
            .priority(action.priority)
            .retry(RetryConfig { max_retries: 0, ..RetryConfig::default() })
            .immediate();
        let _: Value =
            self.gateway.request(method, path, Some(action.payload.clone()), options).await?;
        Ok(())
    }
}
