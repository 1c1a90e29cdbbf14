//! Ledger core
//!
//! Double-entry ledger: accounts, transactions and entries. Every posting
//! inserts a balanced pair of entries inside one transaction, keyed by
//! `(kind, client_tx_id)` for at-most-once semantics. Balances are derived
//! by summing entries; accounts store nothing else.

mod memory;
mod postgres;

pub use memory::MemoryLedger;
pub use postgres::PostgresLedger;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ledger account used to park card movements pre-settlement.
pub const CARD_SUSPENSE_ACCOUNT: &str = "suspense:card";

/// Prefix of wallet-backed account codes.
pub const WALLET_ACCOUNT_PREFIX: &str = "wallet:";

/// Posting kind; pairs with a client transaction id to form the ledger's
/// idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    P2p,
    CardIn,
    CardOut,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::P2p => "p2p",
            TransactionKind::CardIn => "card_in",
            TransactionKind::CardOut => "card_out",
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction settlement status.
///
/// Card postings park in `PendingSettlement`; the transition to `Completed`
/// belongs to a separate settlement job and is not driven here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    PendingSettlement,
    Completed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::PendingSettlement => "pending_settlement",
            TransactionStatus::Completed => "completed",
        }
    }
}

impl From<String> for TransactionStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "completed" => TransactionStatus::Completed,
            _ => TransactionStatus::PendingSettlement,
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a wallet-to-wallet posting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub transaction_id: Uuid,
    pub from_balance: i64,
    pub to_balance: i64,
}

/// Outcome of a card funding posting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingOutcome {
    pub transaction_id: Uuid,
    pub wallet_balance: i64,
    pub status: TransactionStatus,
}

/// Ledger error types.
///
/// Duplicates carry the prior transaction id along with freshly computed
/// balances, so callers can still produce a well-formed response while
/// treating the signal out of band.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("amount must be positive")]
    InvalidAmount,

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("duplicate transaction")]
    DuplicateTransfer(TransferOutcome),

    #[error("duplicate transaction")]
    DuplicateFunding(FundingOutcome),

    #[error("account {0} not found")]
    AccountNotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Ledger backend selected at startup: PostgreSQL in deployments, the
/// in-memory variant for tests and dev fallback.
#[derive(Clone)]
pub enum Ledger {
    Postgres(PostgresLedger),
    Memory(MemoryLedger),
}

impl Ledger {
    /// Idempotent insert of an account keyed by code.
    pub async fn ensure_account(&self, code: &str) -> Result<(), LedgerError> {
        match self {
            Ledger::Postgres(l) => l.ensure_account(code).await,
            Ledger::Memory(l) => l.ensure_account(code),
        }
    }

    /// Derived balance for the account with the given code.
    pub async fn balance(&self, code: &str) -> Result<i64, LedgerError> {
        match self {
            Ledger::Postgres(l) => l.balance(code).await,
            Ledger::Memory(l) => l.balance(code),
        }
    }

    /// Post a balanced transfer between two accounts.
    pub async fn transfer(
        &self,
        from_code: &str,
        to_code: &str,
        kind: TransactionKind,
        client_tx_id: &str,
        amount: i64,
    ) -> Result<TransferOutcome, LedgerError> {
        match self {
            Ledger::Postgres(l) => {
                l.transfer(from_code, to_code, kind, client_tx_id, amount).await
            }
            Ledger::Memory(l) => l.transfer(from_code, to_code, kind, client_tx_id, amount),
        }
    }

    /// Credit a wallet from the card suspense account, pending settlement.
    pub async fn card_in(
        &self,
        wallet_code: &str,
        client_tx_id: &str,
        amount: i64,
    ) -> Result<FundingOutcome, LedgerError> {
        match self {
            Ledger::Postgres(l) => l.card_in(wallet_code, client_tx_id, amount).await,
            Ledger::Memory(l) => l.card_in(wallet_code, client_tx_id, amount),
        }
    }

    /// Debit a wallet into the card suspense account, pending settlement.
    pub async fn card_out(
        &self,
        wallet_code: &str,
        client_tx_id: &str,
        amount: i64,
    ) -> Result<FundingOutcome, LedgerError> {
        match self {
            Ledger::Postgres(l) => l.card_out(wallet_code, client_tx_id, amount).await,
            Ledger::Memory(l) => l.card_out(wallet_code, client_tx_id, amount),
        }
    }

    /// Test helper: seed a balance directly when the backend is in-memory.
    /// No-op for the SQL backend.
    pub fn seed_balance(&self, code: &str, amount: i64) {
        if let Ledger::Memory(l) = self {
            l.seed_balance(code, amount);
        }
    }
}
