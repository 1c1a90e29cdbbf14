//! API Middleware
//!
//! Request-id assignment, JWT authentication with token-version checks,
//! and the Redis-backed login rate limiter.

use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;

use super::AppState;

const REQUEST_ID_HEADER: &str = "x-request-id";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
const LOGIN_RATE_PREFIX: &str = "rl:login:";
const LOGIN_RATE_WINDOW: Duration = Duration::from_secs(60);
// Login bodies are small; anything larger is rejected before parsing.
const MAX_LOGIN_BODY_BYTES: usize = 16 * 1024;

/// Request identifier assigned by [`request_id_middleware`].
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Authenticated caller extracted from a verified access token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub token_version: i32,
}

/// Ensure each request carries a stable id for tracing and logging.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    req.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

/// Validate the bearer access token and check its version against the
/// stored user. Inserts [`AuthUser`] into request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(req.headers()).ok_or(AppError::InvalidToken)?;
    let (claims, user) = state.auth.authorize(&token).await?;

    req.extensions_mut().insert(AuthUser {
        user_id: user.id,
        token_version: claims.ver,
    });

    Ok(next.run(req).await)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

#[derive(Debug, Deserialize)]
struct LoginProbe {
    #[serde(default)]
    phone: String,
}

/// Limit login attempts per phone (falling back to forwarded address) in
/// the KV store. Counts live under `rl:login:<key>` with a one-minute
/// window; cache errors fail open. A no-op when no cache is configured.
pub async fn login_rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let Some(cache) = state.cache.clone() else {
        return next.run(req).await;
    };

    let (parts, body) = req.into_parts();
    let bytes = match to_bytes(body, MAX_LOGIN_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return AppError::InvalidRequest("request body too large".to_string())
                .into_response()
        }
    };

    let phone = serde_json::from_slice::<LoginProbe>(&bytes)
        .map(|probe| probe.phone.trim().to_string())
        .unwrap_or_default();
    let caller = if phone.is_empty() {
        parts
            .headers
            .get(FORWARDED_FOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "anonymous".to_string())
    } else {
        phone
    };

    let key = format!("{LOGIN_RATE_PREFIX}{caller}");
    match cache.incr(&key).await {
        Ok(count) => {
            if count == 1 {
                let _ = cache.expire(&key, LOGIN_RATE_WINDOW).await;
            }
            if count > state.config.login_attempts_per_minute {
                return AppError::RateLimitExceeded.into_response();
            }
        }
        // Fail open on cache errors.
        Err(e) => tracing::warn!(error = %e, "login rate limit check failed"),
    }

    let req = Request::from_parts(parts, Body::from(bytes));
    next.run(req).await
}
