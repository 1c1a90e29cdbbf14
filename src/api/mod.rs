//! API module
//!
//! Shared application state and router assembly.

pub mod middleware;
pub mod routes;

use std::sync::Arc;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use crate::auth::AuthService;
use crate::cache::Cache;
use crate::config::Config;
use crate::funding::{FundingError, FundingService, StaticAcquirer};
use crate::idempotency::{idempotency_middleware, IdempotencyCache};
use crate::identity::{
    IdentityRepository, IdentityService, MemoryIdentityRepository, PostgresIdentityRepository,
};
use crate::ledger::{Ledger, MemoryLedger, PostgresLedger};
use crate::notification::TracingNotifier;
use crate::payments::PaymentService;
use crate::wallet::{
    MemoryWalletRepository, PostgresWalletRepository, WalletRepository, WalletService,
};

/// Shared dependencies injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub db: Option<PgPool>,
    pub cache: Option<Cache>,
    pub ledger: Ledger,
    pub identity: IdentityService,
    pub wallets: WalletService,
    pub auth: AuthService,
    pub funding: FundingService,
    pub payments: PaymentService,
}

impl AppState {
    /// Wire services over the configured backends. Without a database the
    /// state falls back to in-memory storage (dev and tests only).
    pub async fn build(
        config: Config,
        db: Option<PgPool>,
        cache: Option<Cache>,
    ) -> Result<Self, FundingError> {
        let (ledger, wallet_repo, identity_repo) = match &db {
            Some(pool) => (
                Ledger::Postgres(PostgresLedger::new(pool.clone())),
                WalletRepository::Postgres(PostgresWalletRepository::new(pool.clone())),
                IdentityRepository::Postgres(PostgresIdentityRepository::new(pool.clone())),
            ),
            None => (
                Ledger::Memory(MemoryLedger::new()),
                WalletRepository::Memory(MemoryWalletRepository::new()),
                IdentityRepository::Memory(MemoryIdentityRepository::new()),
            ),
        };

        let identity = IdentityService::new(identity_repo.clone());
        let wallets = WalletService::new(wallet_repo, ledger.clone());
        let auth = AuthService::new(config.clone(), identity_repo);
        let funding =
            FundingService::new(ledger.clone(), wallets.clone(), Arc::new(StaticAcquirer)).await?;
        let payments =
            PaymentService::new(ledger.clone(), wallets.clone(), Arc::new(TracingNotifier));

        Ok(Self {
            config,
            db,
            cache,
            ledger,
            identity,
            wallets,
            auth,
            payments,
            funding,
        })
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/me", get(routes::me))
        .route("/auth/logout", post(routes::logout))
        .route("/wallet", get(routes::my_wallet))
        .route("/wallets/:wallet_id", get(routes::get_wallet))
        .route("/wallets/:wallet_id/balance", get(routes::wallet_balance))
        .route("/wallets/:wallet_id/fund/card", post(routes::card_in))
        .route("/wallets/:wallet_id/withdraw/card", post(routes::card_out))
        .route("/payments/p2p", post(routes::p2p_transfer))
        .layer(from_fn_with_state(state.clone(), middleware::auth_middleware));

    let api = Router::new()
        .route("/ping", get(routes::ping))
        .route("/identity/register", post(routes::register))
        .route(
            "/auth/login",
            post(routes::login).layer(from_fn_with_state(
                state.clone(),
                middleware::login_rate_limit_middleware,
            )),
        )
        .route("/auth/refresh", post(routes::refresh))
        .merge(protected);

    // Request-level idempotent replay requires the cache; without one the
    // ledger's own (kind, client_tx_id) key still applies.
    let api = match state.cache.clone() {
        Some(cache) => api.layer(from_fn_with_state(
            IdempotencyCache::new(cache, state.config.idempotency_ttl),
            idempotency_middleware,
        )),
        None => api,
    };

    Router::new()
        .route("/healthz", get(routes::healthz))
        .nest("/api/v1", api)
        .layer(from_fn(middleware::request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
