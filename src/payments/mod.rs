//! Payments orchestrator
//!
//! Wallet-to-wallet transfers: ownership check, p2p ledger posting and a
//! best-effort notification to the recipient.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::ledger::{Ledger, LedgerError, TransactionKind};
use crate::notification::{Message, NotificationKind, Notifier};
use crate::wallet::{WalletError, WalletService};

/// Data needed to move funds between wallets.
#[derive(Debug, Clone)]
pub struct Transfer {
    pub from_wallet_id: Uuid,
    pub to_wallet_id: Uuid,
    pub amount: i64,
    pub client_tx_id: Option<String>,
    pub requestor_user_id: Uuid,
}

/// Ledger outcome of a P2P transfer.
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub transaction_id: Uuid,
    pub from_balance: i64,
    pub to_balance: i64,
    pub completed_at: DateTime<Utc>,
}

/// Payment error types
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("amount must be positive")]
    InvalidAmount,

    #[error("not owner of source wallet")]
    NotOwner,

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("duplicate transaction")]
    Duplicate,

    #[error(transparent)]
    Wallet(WalletError),

    #[error(transparent)]
    Ledger(LedgerError),
}

/// Wires wallet ledger postings for P2P transfers.
#[derive(Clone)]
pub struct PaymentService {
    ledger: Ledger,
    wallets: WalletService,
    notifier: std::sync::Arc<dyn Notifier>,
}

impl PaymentService {
    pub fn new(
        ledger: Ledger,
        wallets: WalletService,
        notifier: std::sync::Arc<dyn Notifier>,
    ) -> Self {
        Self { ledger, wallets, notifier }
    }

    /// Post a balanced ledger entry between two wallets.
    pub async fn transfer(&self, input: Transfer) -> Result<TransferReceipt, PaymentError> {
        if input.amount <= 0 {
            return Err(PaymentError::InvalidAmount);
        }
        let client_tx_id = input
            .client_tx_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let from_wallet = self
            .wallets
            .get(input.from_wallet_id)
            .await
            .map_err(PaymentError::Wallet)?;
        if from_wallet.owner_id != input.requestor_user_id {
            return Err(PaymentError::NotOwner);
        }
        let to_wallet = self
            .wallets
            .get(input.to_wallet_id)
            .await
            .map_err(PaymentError::Wallet)?;

        let outcome = self
            .ledger
            .transfer(
                &from_wallet.account_code,
                &to_wallet.account_code,
                TransactionKind::P2p,
                &client_tx_id,
                input.amount,
            )
            .await
            .map_err(|e| match e {
                LedgerError::InsufficientFunds => PaymentError::InsufficientFunds,
                LedgerError::InvalidAmount => PaymentError::InvalidAmount,
                LedgerError::DuplicateTransfer(_) => PaymentError::Duplicate,
                other => PaymentError::Ledger(other),
            })?;

        let receipt = TransferReceipt {
            transaction_id: outcome.transaction_id,
            from_balance: outcome.from_balance,
            to_balance: outcome.to_balance,
            completed_at: Utc::now(),
        };

        // Best effort; delivery failure never fails the transfer.
        let message = Message {
            kind: NotificationKind::P2pTransfer,
            destination: to_wallet.owner_id,
            body: format!(
                "You received {} from wallet {}",
                input.amount, input.from_wallet_id
            ),
        };
        if let Err(err) = self.notifier.send(message).await {
            tracing::warn!(error = %err, "p2p notification failed");
        }

        Ok(receipt)
    }
}
