//! Credential storage and access-token refresh
//!
//! Tokens live in the same [`KeyValueStore`] as the offline cache, under
//! the `access_token` and `refresh_token` keys.

use std::sync::Arc;

use circlepay_core::KeyValueStore;
use circlepay_domain::constants::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use circlepay_domain::{CirclePayError, Result};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::http::HttpClient;

/// Body returned by the refresh endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    /// Present when the server rotates the refresh token.
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// Access and refresh tokens persisted in a key/value store
pub struct CredentialStore {
    store: Arc<dyn KeyValueStore>,
}

impl CredentialStore {
    /// Credentials kept in `store`.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Stored bearer token, if signed in.
    pub async fn access_token(&self) -> Result<Option<String>> {
        self.store.get(ACCESS_TOKEN_KEY).await
    }

    /// Stored refresh token, if any.
    pub async fn refresh_token(&self) -> Result<Option<String>> {
        self.store.get(REFRESH_TOKEN_KEY).await
    }

    /// Store a fresh sign-in.
    pub async fn save(&self, access_token: &str, refresh_token: Option<&str>) -> Result<()> {
        self.store.set(ACCESS_TOKEN_KEY, access_token.to_string()).await?;
        if let Some(refresh_token) = refresh_token {
            self.store.set(REFRESH_TOKEN_KEY, refresh_token.to_string()).await?;
        }
        Ok(())
    }

    /// Forget both tokens.
    pub async fn clear(&self) -> Result<()> {
        self.store
            .multi_remove(&[ACCESS_TOKEN_KEY.to_string(), REFRESH_TOKEN_KEY.to_string()])
            .await
    }
}

/// Exchanges the stored refresh token for a new access token.
pub struct TokenRefresher {
    http: HttpClient,
    refresh_url: String,
    credentials: Arc<CredentialStore>,
}

impl TokenRefresher {
    /// Refresher posting to `{base_url}{refresh_path}`.
    pub fn new(
        http: HttpClient,
        base_url: &str,
        refresh_path: &str,
        credentials: Arc<CredentialStore>,
    ) -> Self {
        let refresh_url = format!("{}{}", base_url.trim_end_matches('/'), refresh_path);
        Self { http, refresh_url, credentials }
    }

    /// Perform one refresh and persist the result.
    ///
    /// Any failure clears the stored credentials and yields `AuthExpired`.
    pub async fn refresh(&self) -> Result<String> {
        match self.exchange().await {
            Ok(access_token) => {
                info!("access token refreshed");
                Ok(access_token)
            }
            Err(err) => {
                warn!(error = %err, "token refresh failed; clearing credentials");
                if let Err(clear_err) = self.credentials.clear().await {
                    warn!(error = %clear_err, "failed to clear credentials");
                }
                Err(match err {
                    CirclePayError::AuthExpired(_) => err,
                    other => CirclePayError::AuthExpired(other.to_string()),
                })
            }
        }
    }

    async fn exchange(&self) -> Result<String> {
        let refresh_token = self
            .credentials
            .refresh_token()
            .await?
            .ok_or_else(|| CirclePayError::AuthExpired("no refresh token stored".into()))?;

        debug!(url = %self.refresh_url, "refreshing access token");
        let request = self
            .http
            .request(Method::POST, &self.refresh_url)
            .header(AUTHORIZATION, format!("Bearer {refresh_token}"))
            .header(ACCEPT, "application/json");
        let response = self.http.send(request).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CirclePayError::AuthExpired(format!(
                "refresh rejected with status {}",
                status.as_u16()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| CirclePayError::Network(format!("failed to read refresh body: {err}")))?;
        let tokens: RefreshResponse = serde_json::from_slice(&body)?;

        self.credentials.save(&tokens.access_token, tokens.refresh_token.as_deref()).await?;
        Ok(tokens.access_token)
    }
}

#[cfg(test)]
mod tests {
    use circlepay_core::MemoryStore;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn credentials(refresh: Option<&str>) -> Arc<CredentialStore> {
        let credentials = Arc::new(CredentialStore::new(Arc::new(MemoryStore::new())));
        credentials.save("old-access", refresh).await.unwrap();
        credentials
    }

    #[tokio::test]
    async fn refresh_rotates_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/refresh"))
            .and(header("authorization", "Bearer refresh-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new-access",
                "refresh_token": "refresh-2",
                "token_type": "bearer",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let credentials = credentials(Some("refresh-1")).await;
        let refresher = TokenRefresher::new(
            HttpClient::new().unwrap(),
            &format!("{}/api/v1", server.uri()),
            "/auth/refresh",
            Arc::clone(&credentials),
        );

        assert_eq!(refresher.refresh().await.unwrap(), "new-access");
        assert_eq!(credentials.access_token().await.unwrap().as_deref(), Some("new-access"));
        assert_eq!(credentials.refresh_token().await.unwrap().as_deref(), Some("refresh-2"));
    }

    #[tokio::test]
    async fn missing_refresh_token_expires_session_without_a_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;

        let credentials = credentials(None).await;
        let refresher = TokenRefresher::new(
            HttpClient::new().unwrap(),
            &server.uri(),
            "/auth/refresh",
            Arc::clone(&credentials),
        );

        let err = refresher.refresh().await.unwrap_err();
        assert!(err.requires_reauthentication());
        assert_eq!(credentials.access_token().await.unwrap(), None);
    }

    #[test]
    fn refresh_response_tolerates_missing_optional_fields() {
        let parsed: RefreshResponse = serde_json::from_str(r#"{"access_token": "a"}"#).unwrap();
        assert_eq!(parsed.refresh_token, None);
        assert_eq!(parsed.token_type, "bearer");
    }
}
