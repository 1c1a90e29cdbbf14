//! Common test utilities
//!
//! Builds the real router over in-memory backends (ledger, repositories
//! and the TTL cache) and provides small request helpers for driving it
//! with `tower::ServiceExt::oneshot`. Unsafe requests get a fresh
//! `Idempotency-Key` per call unless a test pins one.

use std::time::Duration;

use axum::body::{to_bytes, Body, Bytes};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::util::ServiceExt;
use uuid::Uuid;

use congo_pay::api::{self, AppState};
use congo_pay::cache::{Cache, MemoryCache};
use congo_pay::Config;

pub fn test_config() -> Config {
    Config {
        app_name: "CongoPay".to_string(),
        app_env: "development".to_string(),
        port: 0,
        log_level: "info".to_string(),
        database_url: None,
        redis_url: None,
        jwt_secret: "test-access-secret".to_string(),
        refresh_secret: "test-refresh-secret".to_string(),
        access_ttl: Duration::from_secs(900),
        refresh_ttl: Duration::from_secs(86_400),
        idempotency_ttl: Duration::from_secs(600),
        shutdown_timeout: Duration::from_secs(5),
        login_attempts_per_minute: 5,
    }
}

/// Router plus its state, wired over the in-memory ledger, stores and
/// cache, so the idempotency and rate-limit layers are active.
pub async fn test_app() -> (Router, AppState) {
    let state = AppState::build(
        test_config(),
        None,
        Some(Cache::Memory(MemoryCache::new())),
    )
    .await
    .expect("failed to build app state");
    (api::router(state.clone()), state)
}

/// Lowest-level helper: send a request and return the raw response body.
/// `idempotency_key: None` omits the header entirely.
pub async fn send_raw(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    idempotency_key: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Bytes) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    if let Some(key) = idempotency_key {
        builder = builder.header("idempotency-key", key);
    }

    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes)
}

pub async fn request(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    // Each call is its own operation as far as the edge cache goes.
    let key = Uuid::new_v4().to_string();
    let idempotency_key = (method != "GET").then_some(key.as_str());
    let (status, bytes) = send_raw(app, method, uri, token, idempotency_key, body).await;
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

pub async fn post(
    app: &Router,
    uri: &str,
    token: Option<&str>,
    body: Value,
) -> (StatusCode, Value) {
    request(app, "POST", uri, token, Some(body)).await
}

pub async fn get(app: &Router, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
    request(app, "GET", uri, token, None).await
}

/// A registered and logged-in user.
pub struct TestUser {
    pub user_id: String,
    pub wallet_id: String,
    pub access_token: String,
    pub refresh_token: String,
}

/// Register a user with an auto-provisioned wallet, without logging in.
pub async fn register(app: &Router, phone: &str) -> (String, String) {
    let (status, body) = post(
        app,
        "/api/v1/identity/register",
        None,
        serde_json::json!({ "phone": phone, "pin": "1234", "device_id": "device-1" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
    (
        body["user_id"].as_str().unwrap().to_string(),
        body["wallet_id"].as_str().unwrap().to_string(),
    )
}

/// Register a user and log them in.
pub async fn signup(app: &Router, phone: &str) -> TestUser {
    let (user_id, wallet_id) = register(app, phone).await;

    let (status, body) = post(
        app,
        "/api/v1/auth/login",
        None,
        serde_json::json!({ "phone": phone, "pin": "1234", "device_id": "device-1" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {body}");

    TestUser {
        user_id,
        wallet_id,
        access_token: body["access_token"].as_str().unwrap().to_string(),
        refresh_token: body["refresh_token"].as_str().unwrap().to_string(),
    }
}

/// Fund a wallet through the card-in endpoint.
pub async fn fund(app: &Router, user: &TestUser, amount: i64, client_tx_id: &str) {
    let (status, body) = post(
        app,
        &format!("/api/v1/wallets/{}/fund/card", user.wallet_id),
        Some(&user.access_token),
        serde_json::json!({
            "card_number": "4111111111111111",
            "expiry": "12/29",
            "cvv": "123",
            "amount_cfa": amount,
            "client_tx_id": client_tx_id,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "card-in failed: {body}");
}

/// Read a wallet balance through the API.
pub async fn balance(app: &Router, user: &TestUser, wallet_id: &str) -> i64 {
    let (status, body) = get(
        app,
        &format!("/api/v1/wallets/{wallet_id}/balance"),
        Some(&user.access_token),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "balance failed: {body}");
    body["balance"].as_i64().unwrap()
}
