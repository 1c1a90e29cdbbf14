//! Error handling module
//!
//! Centralized edge error type and HTTP response conversion. Module-level
//! errors (ledger, wallet, identity, auth, funding, payments) convert into
//! `AppError` at the handler boundary; domain signals keep their identity
//! so the edge can pattern-match them into status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::auth::AuthError;
use crate::cache::CacheError;
use crate::funding::FundingError;
use crate::identity::IdentityError;
use crate::ledger::LedgerError;
use crate::payments::PaymentError;
use crate::wallet::WalletError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Duplicate transaction")]
    DuplicateTransaction,

    #[error("Not owner of source wallet")]
    NotOwner,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Device mismatch")]
    DeviceMismatch,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Missing Idempotency-Key header")]
    MissingIdempotencyKey,

    #[error("Duplicate request currently processing")]
    IdempotencyInFlight,

    #[error("Too many login attempts, try again later")]
    RateLimitExceeded,

    // Server errors (5xx)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = match &self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }
            AppError::InsufficientFunds => {
                (StatusCode::BAD_REQUEST, "insufficient_funds", None)
            }
            AppError::MissingIdempotencyKey => {
                (StatusCode::BAD_REQUEST, "missing_idempotency_key", None)
            }

            // 401 Unauthorized
            AppError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, "invalid_credentials", None)
            }
            AppError::DeviceMismatch => {
                (StatusCode::UNAUTHORIZED, "device_mismatch", None)
            }
            AppError::InvalidToken => {
                (StatusCode::UNAUTHORIZED, "invalid_token", None)
            }

            // 403 Forbidden
            AppError::NotOwner => (StatusCode::FORBIDDEN, "not_owner", None),

            // 404 Not Found
            AppError::NotFound(what) => {
                (StatusCode::NOT_FOUND, "not_found", Some(what.clone()))
            }

            // 409 Conflict
            AppError::DuplicateTransaction => {
                (StatusCode::CONFLICT, "duplicate_transaction", None)
            }
            AppError::Conflict(msg) => {
                (StatusCode::CONFLICT, "conflict", Some(msg.clone()))
            }
            AppError::IdempotencyInFlight => {
                (StatusCode::CONFLICT, "idempotency_in_flight", None)
            }

            // 429 Too Many Requests
            AppError::RateLimitExceeded => {
                (StatusCode::TOO_MANY_REQUESTS, "rate_limit_exceeded", None)
            }

            // 500 Internal Server Error; details stay out of the body
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Cache(e) => {
                tracing::error!("Cache error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "cache_error", None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidAmount => {
                AppError::InvalidRequest("amount must be positive".to_string())
            }
            LedgerError::InsufficientFunds => AppError::InsufficientFunds,
            LedgerError::DuplicateTransfer(_) | LedgerError::DuplicateFunding(_) => {
                AppError::DuplicateTransaction
            }
            LedgerError::AccountNotFound(code) => {
                AppError::NotFound(format!("account {code}"))
            }
            LedgerError::Database(e) => AppError::Database(e),
        }
    }
}

impl From<WalletError> for AppError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::NotFound(id) => AppError::NotFound(format!("wallet {id}")),
            WalletError::OwnerHasWallet(owner) => {
                AppError::Conflict(format!("owner {owner} already has a wallet"))
            }
            WalletError::Ledger(e) => e.into(),
            WalletError::Database(e) => AppError::Database(e),
        }
    }
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::PinTooShort => {
                AppError::InvalidRequest("PIN must be at least 4 digits".to_string())
            }
            IdentityError::InvalidPin | IdentityError::DeviceRequired => {
                AppError::InvalidCredentials
            }
            IdentityError::DeviceMismatch => AppError::DeviceMismatch,
            IdentityError::PhoneTaken(phone) => {
                AppError::Conflict(format!("phone {phone} already registered"))
            }
            IdentityError::UserNotFound(id) => AppError::NotFound(format!("user {id}")),
            IdentityError::Hash(msg) => AppError::Internal(msg),
            IdentityError::Database(e) => AppError::Database(e),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidToken | AuthError::TokenVersionMismatch => AppError::InvalidToken,
            AuthError::UserNotFound => AppError::InvalidToken,
            AuthError::Encoding(e) => AppError::Internal(e.to_string()),
            AuthError::Database(e) => AppError::Database(e),
        }
    }
}

impl From<FundingError> for AppError {
    fn from(err: FundingError) -> Self {
        match err {
            FundingError::InvalidCard(msg) => AppError::InvalidRequest(msg),
            FundingError::InvalidAmount => {
                AppError::InvalidRequest("amount must be positive".to_string())
            }
            FundingError::InsufficientFunds => AppError::InsufficientFunds,
            // Funding handlers intercept duplicates before conversion; a
            // stray one still answers with the idempotent-conflict code.
            FundingError::Duplicate(_) => AppError::DuplicateTransaction,
            FundingError::Acquirer(msg) => {
                AppError::InvalidRequest(format!("card authorization failed: {msg}"))
            }
            FundingError::Wallet(e) => e.into(),
            FundingError::Ledger(e) => e.into(),
        }
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::InvalidAmount => {
                AppError::InvalidRequest("amount must be positive".to_string())
            }
            PaymentError::NotOwner => AppError::NotOwner,
            PaymentError::InsufficientFunds => AppError::InsufficientFunds,
            PaymentError::Duplicate => AppError::DuplicateTransaction,
            PaymentError::Wallet(e) => e.into(),
            PaymentError::Ledger(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_signal_status_codes() {
        let cases = [
            (AppError::InsufficientFunds, StatusCode::BAD_REQUEST),
            (AppError::DuplicateTransaction, StatusCode::CONFLICT),
            (AppError::NotOwner, StatusCode::FORBIDDEN),
            (AppError::InvalidToken, StatusCode::UNAUTHORIZED),
            (AppError::MissingIdempotencyKey, StatusCode::BAD_REQUEST),
            (AppError::IdempotencyInFlight, StatusCode::CONFLICT),
            (AppError::RateLimitExceeded, StatusCode::TOO_MANY_REQUESTS),
        ];

        for (err, expected) in cases {
            let response = err.into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn test_ledger_error_conversion() {
        let err: AppError = LedgerError::InsufficientFunds.into();
        assert!(matches!(err, AppError::InsufficientFunds));

        let err: AppError = LedgerError::AccountNotFound("wallet:x".to_string()).into();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_payment_error_conversion() {
        let err: AppError = PaymentError::NotOwner.into();
        assert!(matches!(err, AppError::NotOwner));

        let err: AppError = PaymentError::Duplicate.into();
        assert!(matches!(err, AppError::DuplicateTransaction));
    }
}
