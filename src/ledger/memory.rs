//! In-memory ledger backend
//!
//! Mirrors the SQL backend's contract behind a single mutex. Used by unit
//! and integration tests and as the dev fallback when no database is
//! configured. Not intended for multi-process deployments.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use uuid::Uuid;

use super::{
    FundingOutcome, LedgerError, TransactionKind, TransactionStatus, TransferOutcome,
    CARD_SUSPENSE_ACCOUNT,
};

#[derive(Default)]
struct MemoryState {
    balances: HashMap<String, i64>,
    transfers: HashMap<String, TransferOutcome>,
    funding: HashMap<String, FundingOutcome>,
}

/// Concurrency-safe in-memory ledger.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ensure_account(&self, code: &str) -> Result<(), LedgerError> {
        let mut state = self.lock();
        state.balances.entry(code.to_string()).or_insert(0);
        Ok(())
    }

    pub fn balance(&self, code: &str) -> Result<i64, LedgerError> {
        let state = self.lock();
        state
            .balances
            .get(code)
            .copied()
            .ok_or_else(|| LedgerError::AccountNotFound(code.to_string()))
    }

    pub fn transfer(
        &self,
        from_code: &str,
        to_code: &str,
        kind: TransactionKind,
        client_tx_id: &str,
        amount: i64,
    ) -> Result<TransferOutcome, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let mut state = self.lock();
        let key = dedup_key(kind, client_tx_id);

        if let Some(prior) = state.transfers.get(&key) {
            // Same id, balances recomputed at lookup time.
            let outcome = TransferOutcome {
                transaction_id: prior.transaction_id,
                from_balance: *state.balances.get(from_code).unwrap_or(&0),
                to_balance: *state.balances.get(to_code).unwrap_or(&0),
            };
            return Err(LedgerError::DuplicateTransfer(outcome));
        }

        let from_balance = *state
            .balances
            .get(from_code)
            .ok_or_else(|| LedgerError::AccountNotFound(from_code.to_string()))?;
        let to_balance = *state
            .balances
            .get(to_code)
            .ok_or_else(|| LedgerError::AccountNotFound(to_code.to_string()))?;

        if from_balance < amount {
            return Err(LedgerError::InsufficientFunds);
        }

        let from_balance = from_balance - amount;
        let to_balance = to_balance + amount;
        state.balances.insert(from_code.to_string(), from_balance);
        state.balances.insert(to_code.to_string(), to_balance);

        let outcome = TransferOutcome {
            transaction_id: Uuid::new_v4(),
            from_balance,
            to_balance,
        };
        state.transfers.insert(key, outcome.clone());
        Ok(outcome)
    }

    pub fn card_in(
        &self,
        wallet_code: &str,
        client_tx_id: &str,
        amount: i64,
    ) -> Result<FundingOutcome, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let mut state = self.lock();
        let key = dedup_key(TransactionKind::CardIn, client_tx_id);

        if let Some(prior) = state.funding.get(&key) {
            let outcome = FundingOutcome {
                transaction_id: prior.transaction_id,
                wallet_balance: *state.balances.get(wallet_code).unwrap_or(&0),
                status: prior.status,
            };
            return Err(LedgerError::DuplicateFunding(outcome));
        }

        let wallet_balance = *state
            .balances
            .get(wallet_code)
            .ok_or_else(|| LedgerError::AccountNotFound(wallet_code.to_string()))?;

        let wallet_balance = wallet_balance + amount;
        state.balances.insert(wallet_code.to_string(), wallet_balance);
        // Suspense absorbs the opposite leg and may go negative.
        *state
            .balances
            .entry(CARD_SUSPENSE_ACCOUNT.to_string())
            .or_insert(0) -= amount;

        let outcome = FundingOutcome {
            transaction_id: Uuid::new_v4(),
            wallet_balance,
            status: TransactionStatus::PendingSettlement,
        };
        state.funding.insert(key, outcome.clone());
        Ok(outcome)
    }

    pub fn card_out(
        &self,
        wallet_code: &str,
        client_tx_id: &str,
        amount: i64,
    ) -> Result<FundingOutcome, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let mut state = self.lock();
        let key = dedup_key(TransactionKind::CardOut, client_tx_id);

        if let Some(prior) = state.funding.get(&key) {
            let outcome = FundingOutcome {
                transaction_id: prior.transaction_id,
                wallet_balance: *state.balances.get(wallet_code).unwrap_or(&0),
                status: prior.status,
            };
            return Err(LedgerError::DuplicateFunding(outcome));
        }

        let wallet_balance = *state
            .balances
            .get(wallet_code)
            .ok_or_else(|| LedgerError::AccountNotFound(wallet_code.to_string()))?;

        if wallet_balance < amount {
            return Err(LedgerError::InsufficientFunds);
        }

        let wallet_balance = wallet_balance - amount;
        state.balances.insert(wallet_code.to_string(), wallet_balance);
        *state
            .balances
            .entry(CARD_SUSPENSE_ACCOUNT.to_string())
            .or_insert(0) += amount;

        let outcome = FundingOutcome {
            transaction_id: Uuid::new_v4(),
            wallet_balance,
            status: TransactionStatus::PendingSettlement,
        };
        state.funding.insert(key, outcome.clone());
        Ok(outcome)
    }

    /// Test helper: set an account balance directly.
    pub fn seed_balance(&self, code: &str, amount: i64) {
        let mut state = self.lock();
        state.balances.insert(code.to_string(), amount);
    }

    /// Sum of all account balances. Zero whenever every posting went
    /// through the double-entry path.
    pub fn total_balance(&self) -> i64 {
        let state = self.lock();
        state.balances.values().sum()
    }
}

fn dedup_key(kind: TransactionKind, client_tx_id: &str) -> String {
    format!("{}:{}", kind.as_str(), client_tx_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_maintains_balance() {
        let ledger = MemoryLedger::new();
        ledger.ensure_account("wallet:a").unwrap();
        ledger.ensure_account("wallet:b").unwrap();
        ledger.seed_balance("wallet:a", 10_000);

        let res = ledger
            .transfer("wallet:a", "wallet:b", TransactionKind::P2p, "client-1", 1_500)
            .unwrap();

        assert_eq!(res.from_balance, 8_500);
        assert_eq!(res.to_balance, 1_500);
        assert_eq!(ledger.total_balance(), 10_000);
    }

    #[test]
    fn test_transfer_rejects_non_positive_amounts() {
        let ledger = MemoryLedger::new();
        ledger.ensure_account("wallet:a").unwrap();
        ledger.ensure_account("wallet:b").unwrap();
        ledger.seed_balance("wallet:a", 1_000);

        for amount in [0, -500] {
            let err = ledger
                .transfer("wallet:a", "wallet:b", TransactionKind::P2p, "neg", amount)
                .unwrap_err();
            assert!(matches!(err, LedgerError::InvalidAmount));
        }

        // Nothing was touched.
        assert_eq!(ledger.balance("wallet:a").unwrap(), 1_000);
        assert_eq!(ledger.balance("wallet:b").unwrap(), 0);
    }

    #[test]
    fn test_transfer_missing_account_is_terminal() {
        let ledger = MemoryLedger::new();
        ledger.ensure_account("wallet:a").unwrap();
        ledger.seed_balance("wallet:a", 1_000);

        let err = ledger
            .transfer("wallet:a", "wallet:ghost", TransactionKind::P2p, "t", 100)
            .unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(_)));
    }

    #[test]
    fn test_duplicate_transfer_returns_prior_id_and_fresh_balances() {
        let ledger = MemoryLedger::new();
        ledger.ensure_account("wallet:a").unwrap();
        ledger.ensure_account("wallet:b").unwrap();
        ledger.seed_balance("wallet:a", 5_000);

        let first = ledger
            .transfer("wallet:a", "wallet:b", TransactionKind::P2p, "dup", 500)
            .unwrap();

        // Move more money with a different id, then replay the first one.
        ledger
            .transfer("wallet:a", "wallet:b", TransactionKind::P2p, "other", 1_000)
            .unwrap();

        let err = ledger
            .transfer("wallet:a", "wallet:b", TransactionKind::P2p, "dup", 500)
            .unwrap_err();
        match err {
            LedgerError::DuplicateTransfer(outcome) => {
                assert_eq!(outcome.transaction_id, first.transaction_id);
                // Balances are current, not those at the original posting.
                assert_eq!(outcome.from_balance, 3_500);
                assert_eq!(outcome.to_balance, 1_500);
            }
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    #[test]
    fn test_client_tx_id_reusable_across_kinds() {
        let ledger = MemoryLedger::new();
        ledger.ensure_account("wallet:a").unwrap();
        ledger.ensure_account("wallet:b").unwrap();
        ledger.ensure_account(CARD_SUSPENSE_ACCOUNT).unwrap();
        ledger.seed_balance("wallet:a", 5_000);

        ledger
            .transfer("wallet:a", "wallet:b", TransactionKind::P2p, "shared", 500)
            .unwrap();
        // Same client id, different kind: not a duplicate.
        ledger.card_in("wallet:a", "shared", 2_000).unwrap();
        ledger.card_out("wallet:a", "shared", 1_000).unwrap();
    }

    #[test]
    fn test_concurrent_transfers_conserve_total() {
        let ledger = MemoryLedger::new();
        ledger.ensure_account("wallet:a").unwrap();
        ledger.ensure_account("wallet:b").unwrap();
        ledger.seed_balance("wallet:a", 100_000);

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    ledger
                        .transfer(
                            "wallet:a",
                            "wallet:b",
                            TransactionKind::P2p,
                            &format!("tx-{i}"),
                            500,
                        )
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(ledger.total_balance(), 100_000);
        assert_eq!(ledger.balance("wallet:a").unwrap(), 95_000);
        assert_eq!(ledger.balance("wallet:b").unwrap(), 5_000);
    }

    #[test]
    fn test_symmetric_transfers_complete_without_deadlock() {
        let ledger = MemoryLedger::new();
        ledger.ensure_account("wallet:a").unwrap();
        ledger.ensure_account("wallet:b").unwrap();
        ledger.seed_balance("wallet:a", 50_000);
        ledger.seed_balance("wallet:b", 50_000);

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    let (from, to) = if i % 2 == 0 {
                        ("wallet:a", "wallet:b")
                    } else {
                        ("wallet:b", "wallet:a")
                    };
                    ledger
                        .transfer(from, to, TransactionKind::P2p, &format!("sym-{i}"), 100)
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(ledger.total_balance(), 100_000);
    }

    #[test]
    fn test_card_in() {
        let ledger = MemoryLedger::new();
        ledger.ensure_account("wallet:a").unwrap();
        ledger.ensure_account(CARD_SUSPENSE_ACCOUNT).unwrap();

        let res = ledger.card_in("wallet:a", "client-card-in", 2_000).unwrap();
        assert_eq!(res.status, TransactionStatus::PendingSettlement);
        assert_eq!(res.wallet_balance, 2_000);
        assert_eq!(ledger.balance(CARD_SUSPENSE_ACCOUNT).unwrap(), -2_000);
        assert_eq!(ledger.total_balance(), 0);

        let err = ledger.card_in("wallet:a", "client-card-in", 2_000).unwrap_err();
        match err {
            LedgerError::DuplicateFunding(outcome) => {
                assert_eq!(outcome.transaction_id, res.transaction_id);
                assert_eq!(outcome.wallet_balance, 2_000);
            }
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    #[test]
    fn test_card_out() {
        let ledger = MemoryLedger::new();
        ledger.ensure_account("wallet:a").unwrap();
        ledger.ensure_account(CARD_SUSPENSE_ACCOUNT).unwrap();
        ledger.seed_balance("wallet:a", 5_000);

        let res = ledger.card_out("wallet:a", "client-card-out", 1_500).unwrap();
        assert_eq!(res.wallet_balance, 3_500);
        assert_eq!(ledger.balance(CARD_SUSPENSE_ACCOUNT).unwrap(), 1_500);

        let err = ledger.card_out("wallet:a", "client-card-out", 1_500).unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateFunding(_)));

        let err = ledger.card_out("wallet:a", "client-card-out-2", 10_000).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds));
    }

    #[test]
    fn test_wallet_balance_never_negative_after_card_out() {
        let ledger = MemoryLedger::new();
        ledger.ensure_account("wallet:a").unwrap();
        ledger.ensure_account(CARD_SUSPENSE_ACCOUNT).unwrap();
        ledger.seed_balance("wallet:a", 3_000);

        // Exact balance is allowed, one unit more is not.
        ledger.card_out("wallet:a", "exact", 3_000).unwrap();
        assert_eq!(ledger.balance("wallet:a").unwrap(), 0);

        let err = ledger.card_out("wallet:a", "over", 1).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds));
    }
}
