//! Integration tests for the request gateway against a mock backend
//!
//! **Coverage:**
//! - Concurrent 401s share a single token refresh
//! - A failed refresh clears credentials and expires the session for every waiter
//! - A new sign-in gets its own refresh once its token expires
//! - Offline reads are served from the cache; low-priority misses fail fast
//! - Offline medium-priority misses wait for reconnect and fill the cache
//! - Offline writes are queued and sent exactly once after reconnecting
//! - Error bodies surface as `Http` errors without retries

#[path = "support.rs"]
mod support;

use std::time::Duration;

use circlepay_common::testing::poll_until;
use circlepay_domain::CirclePayError;
use serde_json::json;
use support::{config_for, Harness};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn concurrent_unauthorized_requests_share_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/me"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/me"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "u1"})))
        .expect(5)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(header("authorization", "Bearer refresh-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "fresh", "token_type": "bearer"}))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::start(config_for(&server), true).await;
    harness.stack.credentials.save("stale", Some("refresh-1")).await.unwrap();

    let calls = (0..5).map(|_| harness.stack.api.current_user());
    let results = futures::future::join_all(calls).await;

    for result in results {
        assert_eq!(result.unwrap(), json!({"id": "u1"}));
    }
    assert_eq!(
        harness.stack.credentials.access_token().await.unwrap().as_deref(),
        Some("fresh")
    );
}

#[tokio::test]
async fn failed_refresh_expires_the_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/me"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "revoked"})))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::start(config_for(&server), true).await;
    harness.stack.credentials.save("stale", Some("revoked")).await.unwrap();

    let err = harness.stack.api.current_user().await.unwrap_err();

    assert!(matches!(err, CirclePayError::AuthExpired(_)), "got {err:?}");
    assert_eq!(harness.stack.credentials.access_token().await.unwrap(), None);
    assert_eq!(harness.stack.credentials.refresh_token().await.unwrap(), None);
}

#[tokio::test]
async fn concurrent_requests_all_expire_when_the_refresh_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/me"))
        .respond_with(ResponseTemplate::new(401))
        .expect(5)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"detail": "revoked"}))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::start(config_for(&server), true).await;
    harness.stack.credentials.save("stale", Some("revoked")).await.unwrap();

    let calls = (0..5).map(|_| harness.stack.api.current_user());
    let results = futures::future::join_all(calls).await;

    for result in results {
        let err = result.unwrap_err();
        assert!(matches!(err, CirclePayError::AuthExpired(_)), "got {err:?}");
    }
    assert_eq!(harness.stack.credentials.access_token().await.unwrap(), None);
}

#[tokio::test]
async fn new_sign_in_refreshes_again_after_expiry() {
    let server = MockServer::start().await;
    for expired in ["first-access", "second-access"] {
        Mock::given(method("GET"))
            .and(path("/users/me"))
            .and(header("authorization", format!("Bearer {expired}").as_str()))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
    }
    for (refresh, issued) in [("first-refresh", "first-issued"), ("second-refresh", "second-issued")] {
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(header("authorization", format!("Bearer {refresh}").as_str()))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"access_token": issued})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/me"))
            .and(header("authorization", format!("Bearer {issued}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "u1"})))
            .expect(1)
            .mount(&server)
            .await;
    }

    let harness = Harness::start(config_for(&server), true).await;
    let credentials = &harness.stack.credentials;

    credentials.save("first-access", Some("first-refresh")).await.unwrap();
    assert_eq!(harness.stack.api.current_user().await.unwrap(), json!({"id": "u1"}));

    credentials.save("second-access", Some("second-refresh")).await.unwrap();
    assert_eq!(harness.stack.api.current_user().await.unwrap(), json!({"id": "u1"}));
    assert_eq!(credentials.access_token().await.unwrap().as_deref(), Some("second-issued"));
}

#[tokio::test]
async fn unauthorized_replay_clears_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/me"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "fresh"})))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::start(config_for(&server), true).await;
    harness.stack.credentials.save("stale", Some("refresh-1")).await.unwrap();

    let err = harness.stack.api.current_user().await.unwrap_err();

    assert!(matches!(err, CirclePayError::AuthExpired(_)), "got {err:?}");
    assert_eq!(harness.stack.credentials.access_token().await.unwrap(), None);
    assert_eq!(harness.stack.credentials.refresh_token().await.unwrap(), None);
}

#[tokio::test]
async fn offline_reads_use_the_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wallets/w1/balance"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"balance": "12.50"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/payments/chains/supported"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let harness = Harness::start(config_for(&server), true).await;
    let online = harness.stack.api.wallet_balance("w1").await.unwrap();

    harness.go_offline().await;
    let offline = harness.stack.api.wallet_balance("w1").await.unwrap();
    assert_eq!(online, offline);

    let err = harness.stack.api.supported_chains().await.unwrap_err();
    assert!(matches!(err, CirclePayError::Offline(_)), "got {err:?}");
}

#[tokio::test]
async fn offline_read_miss_waits_for_reconnect_and_fills_the_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wallets/w1/balance"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"balance": "3.00"})))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::start(config_for(&server), false).await;
    let api = harness.stack.api.clone();
    let call = tokio::spawn(async move { api.wallet_balance("w1").await });

    let executor = harness.stack.executor.clone();
    let queued = poll_until(Duration::from_secs(2), Duration::from_millis(5), || {
        let executor = executor.clone();
        async move { executor.queue_status().total == 1 }
    })
    .await;
    assert!(queued, "read was not queued while offline");

    harness.go_online().await;
    let response = tokio::time::timeout(Duration::from_secs(5), call).await.unwrap().unwrap();
    assert_eq!(response.unwrap(), json!({"balance": "3.00"}));

    harness.go_offline().await;
    let cached = harness.stack.api.wallet_balance("w1").await.unwrap();
    assert_eq!(cached, json!({"balance": "3.00"}));
}

#[tokio::test]
async fn offline_write_is_sent_once_after_reconnecting() {
    let server = MockServer::start().await;
    let payload = json!({"user_id": "u1", "chain": "ETH"});
    Mock::given(method("POST"))
        .and(path("/wallets/create"))
        .and(body_json(&payload))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"wallet_id": "w9"})))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::start(config_for(&server), false).await;
    let api = harness.stack.api.clone();
    let call = tokio::spawn(async move { api.create_wallet(payload).await });

    let executor = harness.stack.executor.clone();
    let queued = poll_until(Duration::from_secs(2), Duration::from_millis(5), || {
        let executor = executor.clone();
        async move { executor.queue_status().total == 1 }
    })
    .await;
    assert!(queued, "write was not queued while offline");
    assert_eq!(harness.stack.cache.list_pending_actions().await.unwrap().len(), 1);
    assert!(harness.stack.cache.list_replayable_actions().await.unwrap().is_empty());

    harness.go_online().await;
    let response = tokio::time::timeout(Duration::from_secs(5), call).await.unwrap().unwrap();

    assert_eq!(response.unwrap(), json!({"wallet_id": "w9"}));
    assert!(harness.stack.cache.list_pending_actions().await.unwrap().is_empty());
    assert_eq!(harness.stack.executor.queue_status().total, 0);
}

#[tokio::test]
async fn client_errors_surface_the_server_detail() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/users/profile"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({"detail": "invalid name"})))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::start(config_for(&server), true).await;
    let err = harness.stack.api.update_profile(json!({"name": ""})).await.unwrap_err();

    assert_eq!(err, CirclePayError::Http { status: 422, message: "invalid name".into() });
}

#[tokio::test]
async fn server_errors_are_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payments/qr/generate"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/payments/qr/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"qr": "data"})))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::start(config_for(&server), true).await;
    let response = harness.stack.api.generate_payment_qr(json!({"amount": "5"})).await.unwrap();

    assert_eq!(response, json!({"qr": "data"}));
}
