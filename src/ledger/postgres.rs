//! PostgreSQL ledger backend
//!
//! Postings run inside a single database transaction. Account rows are
//! locked with `SELECT ... FOR UPDATE` in lexicographic order of account
//! code so symmetric concurrent transfers cannot form a deadlock cycle.

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{
    FundingOutcome, LedgerError, TransactionKind, TransactionStatus, TransferOutcome,
    CARD_SUSPENSE_ACCOUNT,
};

/// Ledger backed by PostgreSQL, ensuring double-entry balance.
#[derive(Debug, Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Guarantee an account exists for the provided code.
    pub async fn ensure_account(&self, code: &str) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, code) VALUES ($1, $2)
            ON CONFLICT (code) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(code)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Summed balance for the specified account code.
    pub async fn balance(&self, code: &str) -> Result<i64, LedgerError> {
        let account_id: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM accounts WHERE code = $1")
                .bind(code)
                .fetch_optional(&self.pool)
                .await?;

        let account_id = account_id.ok_or_else(|| LedgerError::AccountNotFound(code.to_string()))?;

        // SUM over BIGINT yields NUMERIC; cast back for the i64 decode.
        let balance: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM entries WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(balance)
    }

    /// Record a balanced posting between two accounts.
    pub async fn transfer(
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

        let mut tx = self.pool.begin().await?;

        // Lock both account rows, lower code first.
        let (first, second) = if from_code <= to_code {
            (from_code, to_code)
        } else {
            (to_code, from_code)
        };
        let first_id = lock_account(&mut tx, first).await?;
        let second_id = lock_account(&mut tx, second).await?;
        let (from_account, to_account) = if from_code <= to_code {
            (first_id, second_id)
        } else {
            (second_id, first_id)
        };

        let existing: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM transactions WHERE kind = $1 AND client_tx_id = $2",
        )
        .bind(kind.as_str())
        .bind(client_tx_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(existing_id) = existing {
            let from_balance = balance_for_account(&mut tx, from_account).await?;
            let to_balance = balance_for_account(&mut tx, to_account).await?;
            return Err(LedgerError::DuplicateTransfer(TransferOutcome {
                transaction_id: existing_id,
                from_balance,
                to_balance,
            }));
        }

        let from_balance = balance_for_account(&mut tx, from_account).await?;
        if from_balance < amount {
            return Err(LedgerError::InsufficientFunds);
        }

        let tx_id = Uuid::new_v4();
        insert_transaction(&mut tx, tx_id, client_tx_id, kind, TransactionStatus::Completed)
            .await?;
        insert_entry(&mut tx, tx_id, from_account, -amount).await?;
        insert_entry(&mut tx, tx_id, to_account, amount).await?;

        tx.commit().await?;

        // Post-commit balances reflect the durable state.
        let from_balance = self.balance(from_code).await?;
        let to_balance = self.balance(to_code).await?;

        Ok(TransferOutcome {
            transaction_id: tx_id,
            from_balance,
            to_balance,
        })
    }

    /// Record a card funding authorization, held in suspense until
    /// settlement: wallet +amount, suspense -amount.
    pub async fn card_in(
        &self,
        wallet_code: &str,
        client_tx_id: &str,
        amount: i64,
    ) -> Result<FundingOutcome, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let mut tx = self.pool.begin().await?;
        let (wallet_account, suspense_account) = lock_wallet_and_suspense(&mut tx, wallet_code).await?;

        if let Some(dup) =
            existing_funding(&mut tx, TransactionKind::CardIn, client_tx_id, wallet_account)
                .await?
        {
            return Err(LedgerError::DuplicateFunding(dup));
        }

        let tx_id = Uuid::new_v4();
        insert_transaction(
            &mut tx,
            tx_id,
            client_tx_id,
            TransactionKind::CardIn,
            TransactionStatus::PendingSettlement,
        )
        .await?;
        insert_entry(&mut tx, tx_id, wallet_account, amount).await?;
        insert_entry(&mut tx, tx_id, suspense_account, -amount).await?;

        tx.commit().await?;

        let wallet_balance = self.balance(wallet_code).await?;
        Ok(FundingOutcome {
            transaction_id: tx_id,
            wallet_balance,
            status: TransactionStatus::PendingSettlement,
        })
    }

    /// Record a card withdrawal: wallet -amount, suspense +amount. Requires
    /// sufficient wallet funds under the row lock.
    pub async fn card_out(
        &self,
        wallet_code: &str,
        client_tx_id: &str,
        amount: i64,
    ) -> Result<FundingOutcome, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let mut tx = self.pool.begin().await?;
        let (wallet_account, suspense_account) = lock_wallet_and_suspense(&mut tx, wallet_code).await?;

        if let Some(dup) =
            existing_funding(&mut tx, TransactionKind::CardOut, client_tx_id, wallet_account)
                .await?
        {
            return Err(LedgerError::DuplicateFunding(dup));
        }

        let wallet_balance = balance_for_account(&mut tx, wallet_account).await?;
        if wallet_balance < amount {
            return Err(LedgerError::InsufficientFunds);
        }

        let tx_id = Uuid::new_v4();
        insert_transaction(
            &mut tx,
            tx_id,
            client_tx_id,
            TransactionKind::CardOut,
            TransactionStatus::PendingSettlement,
        )
        .await?;
        insert_entry(&mut tx, tx_id, wallet_account, -amount).await?;
        insert_entry(&mut tx, tx_id, suspense_account, amount).await?;

        tx.commit().await?;

        let wallet_balance = self.balance(wallet_code).await?;
        Ok(FundingOutcome {
            transaction_id: tx_id,
            wallet_balance,
            status: TransactionStatus::PendingSettlement,
        })
    }
}

/// Lock an account row and return its id.
async fn lock_account(
    tx: &mut Transaction<'_, Postgres>,
    code: &str,
) -> Result<Uuid, LedgerError> {
    let id: Option<Uuid> = sqlx::query_scalar("SELECT id FROM accounts WHERE code = $1 FOR UPDATE")
        .bind(code)
        .fetch_optional(&mut **tx)
        .await?;

    id.ok_or_else(|| LedgerError::AccountNotFound(code.to_string()))
}

/// Lock the wallet and card suspense accounts in lexicographic order.
async fn lock_wallet_and_suspense(
    tx: &mut Transaction<'_, Postgres>,
    wallet_code: &str,
) -> Result<(Uuid, Uuid), LedgerError> {
    if CARD_SUSPENSE_ACCOUNT <= wallet_code {
        let suspense = lock_account(tx, CARD_SUSPENSE_ACCOUNT).await?;
        let wallet = lock_account(tx, wallet_code).await?;
        Ok((wallet, suspense))
    } else {
        let wallet = lock_account(tx, wallet_code).await?;
        let suspense = lock_account(tx, CARD_SUSPENSE_ACCOUNT).await?;
        Ok((wallet, suspense))
    }
}

async fn balance_for_account(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
) -> Result<i64, LedgerError> {
    let balance: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM entries WHERE account_id = $1",
    )
    .bind(account_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(balance)
}

/// Look up a prior funding posting for `(kind, client_tx_id)` and, when
/// found, return its id and status with a freshly computed wallet balance.
async fn existing_funding(
    tx: &mut Transaction<'_, Postgres>,
    kind: TransactionKind,
    client_tx_id: &str,
    wallet_account: Uuid,
) -> Result<Option<FundingOutcome>, LedgerError> {
    let existing: Option<(Uuid, String)> = sqlx::query_as(
        "SELECT id, status FROM transactions WHERE kind = $1 AND client_tx_id = $2",
    )
    .bind(kind.as_str())
    .bind(client_tx_id)
    .fetch_optional(&mut **tx)
    .await?;

    match existing {
        Some((id, status)) => {
            let wallet_balance = balance_for_account(tx, wallet_account).await?;
            Ok(Some(FundingOutcome {
                transaction_id: id,
                wallet_balance,
                status: TransactionStatus::from(status),
            }))
        }
        None => Ok(None),
    }
}

async fn insert_transaction(
    tx: &mut Transaction<'_, Postgres>,
    tx_id: Uuid,
    client_tx_id: &str,
    kind: TransactionKind,
    status: TransactionStatus,
) -> Result<(), LedgerError> {
    sqlx::query(
        "INSERT INTO transactions (id, client_tx_id, kind, status) VALUES ($1, $2, $3, $4)",
    )
    .bind(tx_id)
    .bind(client_tx_id)
    .bind(kind.as_str())
    .bind(status.as_str())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn insert_entry(
    tx: &mut Transaction<'_, Postgres>,
    tx_id: Uuid,
    account_id: Uuid,
    amount: i64,
) -> Result<(), LedgerError> {
    sqlx::query(
        "INSERT INTO entries (id, transaction_id, account_id, amount) VALUES ($1, $2, $3, $4)",
    )
    .bind(Uuid::new_v4())
    .bind(tx_id)
    .bind(account_id)
    .bind(amount)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
