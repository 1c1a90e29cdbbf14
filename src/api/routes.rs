//! API Routes
//!
//! HTTP endpoint handlers and their request/response types.

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::auth::TokenPair;
use crate::db;
use crate::error::AppError;
use crate::funding::{CardIn, CardOut, FundingError, FundingReceipt};
use crate::identity::{Credentials, IdentityError, Tier};
use crate::ledger::TransactionStatus;
use crate::payments::Transfer;
use crate::wallet::CreateWallet;

use super::middleware::{AuthUser, RequestId};
use super::AppState;

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize, Serialize)]
pub struct RegisterRequest {
    pub phone: String,
    pub pin: String,
    #[serde(default)]
    pub device_id: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub phone: String,
    pub tier: Tier,
    pub device_id: String,
    pub wallet_id: Uuid,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LoginRequest {
    pub phone: String,
    pub pin: String,
    #[serde(default)]
    pub device_id: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub token_version: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub expires_in: i64,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub phone: String,
    pub tier: Tier,
    pub device_id: String,
    pub token_version: i32,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct WalletResponse {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub account_code: String,
    pub currency: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct WalletView {
    pub id: Uuid,
    pub account_code: String,
    pub currency: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub balance: i64,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct MyWalletResponse {
    pub user: UserProfile,
    pub wallet: WalletView,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub wallet_id: Uuid,
    pub balance: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CardInRequest {
    pub card_number: String,
    #[serde(default)]
    pub expiry: String,
    #[serde(default)]
    pub cvv: String,
    pub amount_cfa: i64,
    #[serde(default)]
    pub client_tx_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CardOutRequest {
    pub card_number: String,
    pub amount_cfa: i64,
    #[serde(default)]
    pub client_tx_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FundingResponse {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub wallet_balance_cfa: i64,
    pub acquirer_reference: String,
}

impl From<FundingReceipt> for FundingResponse {
    fn from(receipt: FundingReceipt) -> Self {
        Self {
            transaction_id: receipt.transaction_id,
            status: receipt.status,
            wallet_balance_cfa: receipt.wallet_balance,
            acquirer_reference: receipt.acquirer_reference,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TransferRequest {
    pub from_wallet_id: Uuid,
    pub to_wallet_id: Uuid,
    pub amount: i64,
    #[serde(default)]
    pub client_tx_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TransferResponse {
    pub transaction_id: Uuid,
    pub from_balance: i64,
    pub to_balance: i64,
    pub completed_at: DateTime<Utc>,
}

fn profile(user: &crate::identity::User) -> UserProfile {
    UserProfile {
        user_id: user.id,
        phone: user.phone.clone(),
        tier: user.tier,
        device_id: user.device_id.clone(),
        token_version: user.token_version,
        created_at: user.created_at,
        last_login: user.last_login,
    }
}

// =========================================================================
// POST /api/v1/identity/register
// =========================================================================

/// Create a user and auto-provision their wallet.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), AppError> {
    let user = state
        .identity
        .register(Credentials {
            phone: req.phone,
            pin: req.pin,
            device_id: req.device_id,
        })
        .await?;

    let wallet = state
        .wallets
        .create(CreateWallet { owner_id: user.id, currency: None })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id: user.id,
            phone: user.phone,
            tier: user.tier,
            device_id: user.device_id,
            wallet_id: wallet.id,
        }),
    ))
}

// =========================================================================
// POST /api/v1/auth/login
// =========================================================================

/// Validate credentials and issue a token pair.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let user = state
        .identity
        .authenticate(Credentials {
            phone: req.phone,
            pin: req.pin,
            device_id: req.device_id,
        })
        .await
        .map_err(|e| match e {
            IdentityError::Database(e) => AppError::Database(e),
            IdentityError::DeviceMismatch => AppError::DeviceMismatch,
            // Lookup failures and bad PINs read the same to the caller.
            _ => AppError::InvalidCredentials,
        })?;

    let TokenPair { access_token, refresh_token, expires_in } = state.auth.login(&user)?;
    let wallet_id = state.wallets.get_by_owner(user.id).await.ok().map(|w| w.id);

    Ok(Json(LoginResponse {
        user_id: user.id,
        access_token,
        refresh_token,
        expires_in,
        token_version: user.token_version,
        wallet_id,
    }))
}

// =========================================================================
// POST /api/v1/auth/refresh
// =========================================================================

/// Issue a new access token from a valid refresh token.
pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, AppError> {
    let (access_token, expires_in) = state.auth.refresh(&req.refresh_token).await?;
    Ok(Json(RefreshResponse { access_token, expires_in }))
}

// =========================================================================
// POST /api/v1/auth/logout
// =========================================================================

/// Invalidate the caller's outstanding tokens by bumping the token version.
pub async fn logout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.auth.logout(auth.user_id).await?;
    Ok(Json(json!({ "status": "logged_out" })))
}

// =========================================================================
// GET /api/v1/me
// =========================================================================

/// Current user profile.
pub async fn me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<UserProfile>, AppError> {
    let user = state.identity.get(auth.user_id).await?;
    Ok(Json(profile(&user)))
}

// =========================================================================
// GET /api/v1/wallet
// =========================================================================

/// Current user's wallet together with a live balance.
pub async fn my_wallet(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<MyWalletResponse>, AppError> {
    let user = state.identity.get(auth.user_id).await?;
    let wallet = state.wallets.get_by_owner(auth.user_id).await?;
    let balance = state.wallets.balance(wallet.id).await?;

    Ok(Json(MyWalletResponse {
        user: profile(&user),
        wallet: WalletView {
            id: wallet.id,
            account_code: wallet.account_code,
            currency: wallet.currency,
            status: wallet.status,
            created_at: wallet.created_at,
            balance: balance.amount,
            as_of: balance.as_of,
        },
    }))
}

// =========================================================================
// GET /api/v1/wallets/:walletId
// =========================================================================

/// Wallet metadata.
pub async fn get_wallet(
    State(state): State<AppState>,
    Path(wallet_id): Path<Uuid>,
) -> Result<Json<WalletResponse>, AppError> {
    let wallet = state.wallets.get(wallet_id).await?;
    Ok(Json(WalletResponse {
        id: wallet.id,
        owner_id: wallet.owner_id,
        account_code: wallet.account_code,
        currency: wallet.currency,
        status: wallet.status,
    }))
}

// =========================================================================
// GET /api/v1/wallets/:walletId/balance
// =========================================================================

/// Wallet balance.
pub async fn wallet_balance(
    State(state): State<AppState>,
    Path(wallet_id): Path<Uuid>,
) -> Result<Json<BalanceResponse>, AppError> {
    let balance = state.wallets.balance(wallet_id).await?;
    Ok(Json(BalanceResponse {
        wallet_id: balance.wallet_id,
        balance: balance.amount,
        timestamp: balance.as_of,
    }))
}

// =========================================================================
// POST /api/v1/wallets/:walletId/fund/card
// =========================================================================

/// Card-funded top-up. A duplicate client transaction id answers 200 with
/// the prior posting; a fresh one answers 201.
pub async fn card_in(
    State(state): State<AppState>,
    Path(wallet_id): Path<Uuid>,
    Json(req): Json<CardInRequest>,
) -> Result<Response, AppError> {
    let result = state
        .funding
        .card_in(CardIn {
            wallet_id,
            amount: req.amount_cfa,
            client_tx_id: req.client_tx_id,
            card_number: req.card_number,
            expiry: req.expiry,
            cvv: req.cvv,
        })
        .await;

    funding_response(result)
}

// =========================================================================
// POST /api/v1/wallets/:walletId/withdraw/card
// =========================================================================

/// Card withdrawal; same duplicate handling as card-in.
pub async fn card_out(
    State(state): State<AppState>,
    Path(wallet_id): Path<Uuid>,
    Json(req): Json<CardOutRequest>,
) -> Result<Response, AppError> {
    let result = state
        .funding
        .card_out(CardOut {
            wallet_id,
            amount: req.amount_cfa,
            client_tx_id: req.client_tx_id,
            card_number: req.card_number,
        })
        .await;

    funding_response(result)
}

fn funding_response(result: Result<FundingReceipt, FundingError>) -> Result<Response, AppError> {
    match result {
        Ok(receipt) => {
            Ok((StatusCode::CREATED, Json(FundingResponse::from(receipt))).into_response())
        }
        // Duplicates are success-idempotent at the edge.
        Err(FundingError::Duplicate(receipt)) => {
            Ok((StatusCode::OK, Json(FundingResponse::from(receipt))).into_response())
        }
        Err(e) => Err(e.into()),
    }
}

// =========================================================================
// POST /api/v1/payments/p2p
// =========================================================================

/// Wallet-to-wallet transfer for the authenticated owner.
pub async fn p2p_transfer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<TransferRequest>,
) -> Result<(StatusCode, Json<TransferResponse>), AppError> {
    let receipt = state
        .payments
        .transfer(Transfer {
            from_wallet_id: req.from_wallet_id,
            to_wallet_id: req.to_wallet_id,
            amount: req.amount,
            client_tx_id: req.client_tx_id,
            requestor_user_id: auth.user_id,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(TransferResponse {
            transaction_id: receipt.transaction_id,
            from_balance: receipt.from_balance,
            to_balance: receipt.to_balance,
            completed_at: receipt.completed_at,
        }),
    ))
}

// =========================================================================
// GET /api/v1/ping
// =========================================================================

/// Liveness probe echoing the request id.
pub async fn ping(request_id: Option<Extension<RequestId>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "request_id": request_id.map(|Extension(RequestId(id))| id),
        "timestamp": Utc::now(),
    }))
}

// =========================================================================
// GET /healthz
// =========================================================================

/// Readiness probe pinging the database and the cache.
pub async fn healthz(State(state): State<AppState>) -> Response {
    let mut postgres = "ok".to_string();
    let mut redis_status = "ok".to_string();

    if let Some(pool) = &state.db {
        if let Err(e) = db::verify_connection(pool).await {
            postgres = e.to_string();
        }
    }
    if let Some(cache) = &state.cache {
        if let Err(e) = cache.ping().await {
            redis_status = e.to_string();
        }
    }

    let status = if postgres == "ok" && redis_status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": { "postgres": postgres, "redis": redis_status },
            "timestamp": Utc::now(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_in_request_deserialize() {
        let json = r#"{
            "card_number": "4111 1111 1111 1111",
            "expiry": "12/29",
            "cvv": "123",
            "amount_cfa": 10000,
            "client_tx_id": "t1"
        }"#;

        let req: CardInRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.amount_cfa, 10_000);
        assert_eq!(req.client_tx_id.as_deref(), Some("t1"));
    }

    #[test]
    fn test_card_out_request_defaults() {
        let json = r#"{"card_number": "4111111111111111", "amount_cfa": 500}"#;
        let req: CardOutRequest = serde_json::from_str(json).unwrap();
        assert!(req.client_tx_id.is_none());
    }

    #[test]
    fn test_transfer_request_deserialize() {
        let json = r#"{
            "from_wallet_id": "550e8400-e29b-41d4-a716-446655440001",
            "to_wallet_id": "550e8400-e29b-41d4-a716-446655440002",
            "amount": 2000
        }"#;

        let req: TransferRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.amount, 2_000);
        assert!(req.client_tx_id.is_none());
    }

    #[test]
    fn test_funding_response_status_serialization() {
        let response = FundingResponse {
            transaction_id: Uuid::nil(),
            status: TransactionStatus::PendingSettlement,
            wallet_balance_cfa: 10_000,
            acquirer_reference: "ref".to_string(),
        };

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "pending_settlement");
        assert_eq!(value["wallet_balance_cfa"], 10_000);
    }
}
