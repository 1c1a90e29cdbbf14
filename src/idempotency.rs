//! Request-level idempotency cache
//!
//! Enforces idempotent semantics for unsafe HTTP methods by persisting
//! response envelopes in the TTL KV cache keyed by the caller's
//! `Idempotency-Key` header. A reservation marker guards the window while
//! the first request is still processing; replays return the stored
//! status, headers and body byte for byte. This layer is independent of
//! the ledger's own `(kind, client_tx_id)` idempotency and the two back
//! each other up.

use std::collections::HashMap;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::header::CONTENT_LENGTH;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::cache::Cache;
use crate::error::AppError;

const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
const KEY_PREFIX: &str = "idempotency:v1:";
const IN_PROGRESS_MARKER: &str = "__in_progress__";

/// Serialized response envelope stored in the cache.
#[derive(Debug, Serialize, Deserialize)]
struct StoredResponse {
    status: u16,
    body: String,
    headers: HashMap<String, String>,
}

/// Idempotency store handed to the middleware as state.
#[derive(Clone)]
pub struct IdempotencyCache {
    cache: Cache,
    ttl: Duration,
}

impl IdempotencyCache {
    pub fn new(cache: Cache, ttl: Duration) -> Self {
        Self { cache, ttl }
    }
}

/// Middleware enforcing the idempotency protocol on unsafe methods.
pub async fn idempotency_middleware(
    State(store): State<IdempotencyCache>,
    req: Request,
    next: Next,
) -> Response {
    if is_safe(req.method()) {
        return next.run(req).await;
    }

    let key = match req
        .headers()
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        Some(key) => key.to_string(),
        None => return AppError::MissingIdempotencyKey.into_response(),
    };

    let cache_key = format!("{KEY_PREFIX}{key}");

    let cached = match store.cache.get(&cache_key).await {
        Ok(value) => value,
        Err(e) => {
            tracing::error!(key = %key, error = %e, "idempotency lookup failed");
            return AppError::Cache(e).into_response();
        }
    };

    if let Some(cached) = cached {
        if cached == IN_PROGRESS_MARKER {
            return AppError::IdempotencyInFlight.into_response();
        }
        return match serde_json::from_str::<StoredResponse>(&cached) {
            Ok(stored) => replay(stored),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to decode stored idempotent response");
                AppError::IdempotencyInFlight.into_response()
            }
        };
    }

    // Cache miss: reserve the key before running the handler.
    match store
        .cache
        .set_nx(&cache_key, IN_PROGRESS_MARKER, store.ttl)
        .await
    {
        Ok(true) => {}
        // Another request reserved the key between the GET and the SET.
        Ok(false) => return AppError::IdempotencyInFlight.into_response(),
        Err(e) => {
            tracing::error!(key = %key, error = %e, "idempotency reservation failed");
            return AppError::Cache(e).into_response();
        }
    }

    let response = next.run(req).await;

    // Server-side failure: release the reservation so a retry can proceed.
    if response.status().is_server_error() {
        let _ = store.cache.del(&cache_key).await;
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(key = %key, error = %e, "failed to buffer response body");
            let _ = store.cache.del(&cache_key).await;
            return AppError::Internal("idempotency persistence failure".to_string())
                .into_response();
        }
    };

    let mut headers = HashMap::new();
    for (name, value) in parts.headers.iter() {
        if let Ok(value) = value.to_str() {
            headers.insert(name.to_string(), value.to_string());
        }
    }

    let stored = StoredResponse {
        status: parts.status.as_u16(),
        body: String::from_utf8_lossy(&bytes).into_owned(),
        headers,
    };

    let payload = match serde_json::to_string(&stored) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(key = %key, error = %e, "failed to encode idempotent response");
            let _ = store.cache.del(&cache_key).await;
            return AppError::Internal("idempotency persistence failure".to_string())
                .into_response();
        }
    };

    if let Err(e) = store.cache.set(&cache_key, &payload, store.ttl).await {
        tracing::error!(key = %key, error = %e, "failed to persist idempotent response");
        let _ = store.cache.del(&cache_key).await;
        return AppError::Cache(e).into_response();
    }

    Response::from_parts(parts, Body::from(bytes))
}

fn is_safe(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Rebuild a response from its stored envelope. `Content-Length` is
/// dropped and recomputed for the replayed body.
fn replay(stored: StoredResponse) -> Response {
    let status = StatusCode::from_u16(stored.status).unwrap_or(StatusCode::OK);
    let mut response = Response::new(Body::from(stored.body));
    *response.status_mut() = status;

    for (name, value) in stored.headers {
        if name.eq_ignore_ascii_case(CONTENT_LENGTH.as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            response.headers_mut().insert(name, value);
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    #[test]
    fn test_envelope_shape_is_stable() {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        let stored = StoredResponse {
            status: 201,
            body: "{\"ok\":true}".to_string(),
            headers,
        };

        let payload = serde_json::to_string(&stored).unwrap();
        assert_eq!(
            payload,
            r#"{"status":201,"body":"{\"ok\":true}","headers":{"content-type":"application/json"}}"#
        );

        let decoded: StoredResponse = serde_json::from_str(&payload).unwrap();
        assert_eq!(decoded.status, 201);
        assert_eq!(decoded.body, "{\"ok\":true}");
    }

    #[test]
    fn test_safe_methods() {
        assert!(is_safe(&Method::GET));
        assert!(is_safe(&Method::HEAD));
        assert!(is_safe(&Method::OPTIONS));
        assert!(!is_safe(&Method::POST));
        assert!(!is_safe(&Method::PUT));
        assert!(!is_safe(&Method::DELETE));
        assert!(!is_safe(&Method::PATCH));
    }

    #[test]
    fn test_replay_drops_content_length() {
        let mut headers = HashMap::new();
        headers.insert("Content-Length".to_string(), "9999".to_string());
        headers.insert("x-request-id".to_string(), "abc".to_string());
        let response = replay(StoredResponse {
            status: 200,
            body: "hello".to_string(),
            headers,
        });

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(CONTENT_LENGTH).is_none());
        assert_eq!(response.headers().get("x-request-id").unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_reservation_protocol_against_memory_cache() {
        let store = IdempotencyCache::new(
            Cache::Memory(MemoryCache::new()),
            Duration::from_secs(600),
        );
        let key = format!("{KEY_PREFIX}req-1");

        // First request reserves; a concurrent one must not.
        assert!(store
            .cache
            .set_nx(&key, IN_PROGRESS_MARKER, store.ttl)
            .await
            .unwrap());
        assert!(!store
            .cache
            .set_nx(&key, IN_PROGRESS_MARKER, store.ttl)
            .await
            .unwrap());

        // Completion overwrites the marker with the envelope.
        store.cache.set(&key, "{\"status\":201}", store.ttl).await.unwrap();
        assert_eq!(
            store.cache.get(&key).await.unwrap(),
            Some("{\"status\":201}".to_string())
        );
    }
}
