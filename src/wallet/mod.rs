//! Wallet service
//!
//! Binds wallet records to ledger accounts (`wallet:<id>`) and projects
//! balances from the ledger. Wallets are created once, on registration.

mod repository;

pub use repository::{MemoryWalletRepository, PostgresWalletRepository, WalletRepository};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::ledger::{Ledger, LedgerError, WALLET_ACCOUNT_PREFIX};

const STATUS_ACTIVE: &str = "active";
const DEFAULT_CURRENCY: &str = "XAF";

/// Stored value account backed by the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct Wallet {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub account_code: String,
    pub currency: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Available funds for a wallet at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct BalanceSnapshot {
    pub wallet_id: Uuid,
    pub amount: i64,
    pub as_of: DateTime<Utc>,
}

/// Wallet error types
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("wallet {0} not found")]
    NotFound(Uuid),

    #[error("owner {0} already has a wallet")]
    OwnerHasWallet(Uuid),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Data required to create a wallet.
#[derive(Debug, Clone)]
pub struct CreateWallet {
    pub owner_id: Uuid,
    pub currency: Option<String>,
}

/// Wallet operations backed by the ledger.
#[derive(Clone)]
pub struct WalletService {
    repo: WalletRepository,
    ledger: Ledger,
}

impl WalletService {
    pub fn new(repo: WalletRepository, ledger: Ledger) -> Self {
        Self { repo, ledger }
    }

    /// Provision a wallet and its ledger account.
    pub async fn create(&self, input: CreateWallet) -> Result<Wallet, WalletError> {
        let wallet_id = Uuid::new_v4();
        let account_code = format!("{WALLET_ACCOUNT_PREFIX}{wallet_id}");

        self.ledger.ensure_account(&account_code).await?;

        let currency = input
            .currency
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

        let wallet = Wallet {
            id: wallet_id,
            owner_id: input.owner_id,
            account_code,
            currency,
            status: STATUS_ACTIVE.to_string(),
            created_at: Utc::now(),
        };

        self.repo.create(&wallet).await?;
        Ok(wallet)
    }

    /// Retrieve wallet metadata.
    pub async fn get(&self, id: Uuid) -> Result<Wallet, WalletError> {
        self.repo.get(id).await
    }

    /// Retrieve the wallet owned by the given user.
    pub async fn get_by_owner(&self, owner_id: Uuid) -> Result<Wallet, WalletError> {
        self.repo.find_by_owner(owner_id).await
    }

    /// Ledger balance for the wallet.
    pub async fn balance(&self, id: Uuid) -> Result<BalanceSnapshot, WalletError> {
        let wallet = self.repo.get(id).await?;
        let amount = self.ledger.balance(&wallet.account_code).await?;
        Ok(BalanceSnapshot {
            wallet_id: wallet.id,
            amount,
            as_of: Utc::now(),
        })
    }
}
