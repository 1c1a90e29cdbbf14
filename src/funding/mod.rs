//! Funding orchestrator
//!
//! Card-funded top-ups and withdrawals: validates the card, authorizes the
//! movement with the acquirer, then posts to the ledger. Duplicate ledger
//! postings surface with the prior result attached so the edge can answer
//! them idempotently.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::ledger::{Ledger, LedgerError, TransactionStatus, CARD_SUSPENSE_ACCOUNT};
use crate::wallet::{WalletError, WalletService};

const MIN_CARD_DIGITS: usize = 12;
const MAX_CARD_DIGITS: usize = 19;

/// Data required for a card top-up.
#[derive(Debug, Clone)]
pub struct CardIn {
    pub wallet_id: Uuid,
    pub amount: i64,
    pub client_tx_id: Option<String>,
    pub card_number: String,
    pub expiry: String,
    pub cvv: String,
}

/// Data required for a card withdrawal.
#[derive(Debug, Clone)]
pub struct CardOut {
    pub wallet_id: Uuid,
    pub amount: i64,
    pub client_tx_id: Option<String>,
    pub card_number: String,
}

/// Domain outcome of a card operation.
#[derive(Debug, Clone)]
pub struct FundingReceipt {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub wallet_balance: i64,
    pub acquirer_reference: String,
    pub completed_at: DateTime<Utc>,
}

/// Funding error types
#[derive(Debug, thiserror::Error)]
pub enum FundingError {
    #[error("{0}")]
    InvalidCard(String),

    #[error("amount must be positive")]
    InvalidAmount,

    #[error("insufficient funds")]
    InsufficientFunds,

    /// The posting already exists; the receipt reflects it.
    #[error("duplicate transaction")]
    Duplicate(FundingReceipt),

    #[error("acquirer error: {0}")]
    Acquirer(String),

    #[error(transparent)]
    Wallet(WalletError),

    #[error(transparent)]
    Ledger(LedgerError),
}

/// Details for a card top-up authorization.
#[derive(Debug, Clone)]
pub struct CardInAuthorization {
    pub card_number: String,
    pub expiry: String,
    pub cvv: String,
    pub amount: i64,
}

/// Details for a push-to-card payout authorization.
#[derive(Debug, Clone)]
pub struct CardOutAuthorization {
    pub card_number: String,
    pub amount: i64,
}

/// Acquirer response.
#[derive(Debug, Clone)]
pub struct AuthorizationDecision {
    pub reference: String,
    pub status: String,
}

/// Connector to an external card processor.
#[async_trait]
pub trait CardAcquirer: Send + Sync {
    async fn authorize_card_in(
        &self,
        auth: CardInAuthorization,
    ) -> Result<AuthorizationDecision, FundingError>;

    async fn authorize_card_out(
        &self,
        auth: CardOutAuthorization,
    ) -> Result<AuthorizationDecision, FundingError>;
}

/// Simulated acquirer approving every authorization.
#[derive(Debug, Clone, Default)]
pub struct StaticAcquirer;

#[async_trait]
impl CardAcquirer for StaticAcquirer {
    async fn authorize_card_in(
        &self,
        _auth: CardInAuthorization,
    ) -> Result<AuthorizationDecision, FundingError> {
        Ok(AuthorizationDecision {
            reference: Uuid::new_v4().to_string(),
            status: "approved".to_string(),
        })
    }

    async fn authorize_card_out(
        &self,
        _auth: CardOutAuthorization,
    ) -> Result<AuthorizationDecision, FundingError> {
        Ok(AuthorizationDecision {
            reference: Uuid::new_v4().to_string(),
            status: "approved".to_string(),
        })
    }
}

/// Coordinates card funding and withdrawal using the ledger and the
/// acquirer connector.
#[derive(Clone)]
pub struct FundingService {
    ledger: Ledger,
    wallets: WalletService,
    acquirer: std::sync::Arc<dyn CardAcquirer>,
}

impl FundingService {
    /// Build the service, ensuring the card suspense account exists.
    pub async fn new(
        ledger: Ledger,
        wallets: WalletService,
        acquirer: std::sync::Arc<dyn CardAcquirer>,
    ) -> Result<Self, FundingError> {
        ledger
            .ensure_account(CARD_SUSPENSE_ACCOUNT)
            .await
            .map_err(FundingError::Ledger)?;
        Ok(Self { ledger, wallets, acquirer })
    }

    /// Authorize and record a card top-up into the wallet.
    pub async fn card_in(&self, input: CardIn) -> Result<FundingReceipt, FundingError> {
        validate_card_number(&input.card_number)?;
        if input.amount <= 0 {
            return Err(FundingError::InvalidAmount);
        }
        let client_tx_id = input
            .client_tx_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let wallet = self
            .wallets
            .get(input.wallet_id)
            .await
            .map_err(FundingError::Wallet)?;

        let decision = self
            .acquirer
            .authorize_card_in(CardInAuthorization {
                card_number: input.card_number,
                expiry: input.expiry,
                cvv: input.cvv,
                amount: input.amount,
            })
            .await?;

        let outcome = self
            .ledger
            .card_in(&wallet.account_code, &client_tx_id, input.amount)
            .await;
        self.receipt(outcome, decision.reference)
    }

    /// Authorize and record a withdrawal to the provided card.
    pub async fn card_out(&self, input: CardOut) -> Result<FundingReceipt, FundingError> {
        validate_card_number(&input.card_number)?;
        if input.amount <= 0 {
            return Err(FundingError::InvalidAmount);
        }
        let client_tx_id = input
            .client_tx_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let wallet = self
            .wallets
            .get(input.wallet_id)
            .await
            .map_err(FundingError::Wallet)?;

        let decision = self
            .acquirer
            .authorize_card_out(CardOutAuthorization {
                card_number: input.card_number,
                amount: input.amount,
            })
            .await?;

        let outcome = self
            .ledger
            .card_out(&wallet.account_code, &client_tx_id, input.amount)
            .await;
        self.receipt(outcome, decision.reference)
    }

    /// Map the ledger outcome, attaching the acquirer reference. Duplicates
    /// keep their prior transaction id and current balance.
    fn receipt(
        &self,
        outcome: Result<crate::ledger::FundingOutcome, LedgerError>,
        reference: String,
    ) -> Result<FundingReceipt, FundingError> {
        match outcome {
            Ok(posted) => Ok(FundingReceipt {
                transaction_id: posted.transaction_id,
                status: posted.status,
                wallet_balance: posted.wallet_balance,
                acquirer_reference: reference,
                completed_at: Utc::now(),
            }),
            Err(LedgerError::DuplicateFunding(prior)) => {
                Err(FundingError::Duplicate(FundingReceipt {
                    transaction_id: prior.transaction_id,
                    status: prior.status,
                    wallet_balance: prior.wallet_balance,
                    acquirer_reference: reference,
                    completed_at: Utc::now(),
                }))
            }
            Err(LedgerError::InsufficientFunds) => Err(FundingError::InsufficientFunds),
            Err(LedgerError::InvalidAmount) => Err(FundingError::InvalidAmount),
            Err(other) => Err(FundingError::Ledger(other)),
        }
    }
}

fn validate_card_number(card: &str) -> Result<(), FundingError> {
    let digits: String = card.chars().filter(|c| *c != ' ').collect();
    if digits.len() < MIN_CARD_DIGITS || digits.len() > MAX_CARD_DIGITS {
        return Err(FundingError::InvalidCard(format!(
            "card number must be between {MIN_CARD_DIGITS} and {MAX_CARD_DIGITS} digits"
        )));
    }
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(FundingError::InvalidCard(
            "card number must be numeric".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use crate::wallet::{CreateWallet, MemoryWalletRepository, Wallet, WalletRepository};
    use std::sync::Arc;

    async fn setup() -> (FundingService, Ledger, Wallet) {
        let ledger = Ledger::Memory(MemoryLedger::new());
        let wallets = WalletService::new(
            WalletRepository::Memory(MemoryWalletRepository::new()),
            ledger.clone(),
        );
        let wallet = wallets
            .create(CreateWallet { owner_id: Uuid::new_v4(), currency: None })
            .await
            .unwrap();
        let service = FundingService::new(ledger.clone(), wallets, Arc::new(StaticAcquirer))
            .await
            .unwrap();
        (service, ledger, wallet)
    }

    fn card_in(wallet_id: Uuid, amount: i64, client_tx_id: &str) -> CardIn {
        CardIn {
            wallet_id,
            amount,
            client_tx_id: Some(client_tx_id.to_string()),
            card_number: "4111111111111111".to_string(),
            expiry: "12/29".to_string(),
            cvv: "123".to_string(),
        }
    }

    #[tokio::test]
    async fn test_card_in_and_duplicate() {
        let (service, _, wallet) = setup().await;

        let receipt = service.card_in(card_in(wallet.id, 10_000, "dup")).await.unwrap();
        assert_eq!(receipt.status, TransactionStatus::PendingSettlement);
        assert_eq!(receipt.wallet_balance, 10_000);
        assert!(!receipt.acquirer_reference.is_empty());

        let err = service.card_in(card_in(wallet.id, 10_000, "dup")).await.unwrap_err();
        match err {
            FundingError::Duplicate(dup) => {
                assert_eq!(dup.transaction_id, receipt.transaction_id);
                assert_eq!(dup.wallet_balance, 10_000);
            }
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_card_out_and_insufficient_funds() {
        let (service, ledger, wallet) = setup().await;
        ledger.seed_balance(&wallet.account_code, 5_000);

        let receipt = service
            .card_out(CardOut {
                wallet_id: wallet.id,
                amount: 2_000,
                client_tx_id: None,
                card_number: "4111111111111111".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(receipt.wallet_balance, 3_000);

        let err = service
            .card_out(CardOut {
                wallet_id: wallet.id,
                amount: 10_000,
                client_tx_id: Some("excess".to_string()),
                card_number: "4111111111111111".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FundingError::InsufficientFunds));
    }

    #[tokio::test]
    async fn test_rejects_non_positive_amount() {
        let (service, _, wallet) = setup().await;
        let err = service.card_in(card_in(wallet.id, 0, "zero")).await.unwrap_err();
        assert!(matches!(err, FundingError::InvalidAmount));
    }

    #[tokio::test]
    async fn test_unknown_wallet() {
        let (service, _, _) = setup().await;
        let err = service.card_in(card_in(Uuid::new_v4(), 1_000, "w")).await.unwrap_err();
        assert!(matches!(err, FundingError::Wallet(WalletError::NotFound(_))));
    }

    #[test]
    fn test_validate_card_number() {
        assert!(validate_card_number("4111111111111111").is_ok());
        assert!(validate_card_number("4111 1111 1111 1111").is_ok());
        // 12 and 19 digits are the inclusive bounds.
        assert!(validate_card_number("411111111111").is_ok());
        assert!(validate_card_number("4111111111111111111").is_ok());

        assert!(validate_card_number("41111111111").is_err());
        assert!(validate_card_number("41111111111111111111").is_err());
        assert!(validate_card_number("4111-1111-1111-1111").is_err());
        assert!(validate_card_number("abcd1111efgh2222").is_err());
    }
}
