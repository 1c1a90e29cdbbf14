//! Wallet repositories
//!
//! Persistence for wallet metadata: PostgreSQL in deployments, an
//! in-memory map for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{Wallet, WalletError};

/// Wallet store selected at startup.
#[derive(Clone)]
pub enum WalletRepository {
    Postgres(PostgresWalletRepository),
    Memory(MemoryWalletRepository),
}

impl WalletRepository {
    pub async fn create(&self, wallet: &Wallet) -> Result<(), WalletError> {
        match self {
            WalletRepository::Postgres(r) => r.create(wallet).await,
            WalletRepository::Memory(r) => r.create(wallet),
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Wallet, WalletError> {
        match self {
            WalletRepository::Postgres(r) => r.get(id).await,
            WalletRepository::Memory(r) => r.get(id),
        }
    }

    pub async fn find_by_owner(&self, owner_id: Uuid) -> Result<Wallet, WalletError> {
        match self {
            WalletRepository::Postgres(r) => r.find_by_owner(owner_id).await,
            WalletRepository::Memory(r) => r.find_by_owner(owner_id),
        }
    }
}

/// Wallet store backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PostgresWalletRepository {
    pool: PgPool,
}

type WalletRow = (Uuid, Uuid, String, String, String, DateTime<Utc>);

fn from_row((id, owner_id, account_code, currency, status, created_at): WalletRow) -> Wallet {
    Wallet {
        id,
        owner_id,
        account_code,
        currency,
        status,
        created_at,
    }
}

impl PostgresWalletRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, wallet: &Wallet) -> Result<(), WalletError> {
        sqlx::query(
            r#"
            INSERT INTO wallets (id, owner_id, account_code, currency, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(wallet.id)
        .bind(wallet.owner_id)
        .bind(&wallet.account_code)
        .bind(&wallet.currency)
        .bind(&wallet.status)
        .bind(wallet.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                WalletError::OwnerHasWallet(wallet.owner_id)
            }
            _ => WalletError::Database(e),
        })?;

        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Wallet, WalletError> {
        let row: Option<WalletRow> = sqlx::query_as(
            r#"
            SELECT id, owner_id, account_code, currency, status, created_at
            FROM wallets WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(from_row).ok_or(WalletError::NotFound(id))
    }

    pub async fn find_by_owner(&self, owner_id: Uuid) -> Result<Wallet, WalletError> {
        let row: Option<WalletRow> = sqlx::query_as(
            r#"
            SELECT id, owner_id, account_code, currency, status, created_at
            FROM wallets WHERE owner_id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(from_row).ok_or(WalletError::NotFound(owner_id))
    }
}

#[derive(Default)]
struct MemoryWalletState {
    storage: HashMap<Uuid, Wallet>,
    by_owner: HashMap<Uuid, Uuid>,
}

/// In-memory wallet store for tests and dev fallback.
#[derive(Clone, Default)]
pub struct MemoryWalletRepository {
    state: Arc<Mutex<MemoryWalletState>>,
}

impl MemoryWalletRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryWalletState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create(&self, wallet: &Wallet) -> Result<(), WalletError> {
        let mut state = self.lock();
        if state.by_owner.contains_key(&wallet.owner_id) {
            return Err(WalletError::OwnerHasWallet(wallet.owner_id));
        }
        state.by_owner.insert(wallet.owner_id, wallet.id);
        state.storage.insert(wallet.id, wallet.clone());
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<Wallet, WalletError> {
        let state = self.lock();
        state.storage.get(&id).cloned().ok_or(WalletError::NotFound(id))
    }

    pub fn find_by_owner(&self, owner_id: Uuid) -> Result<Wallet, WalletError> {
        let state = self.lock();
        state
            .by_owner
            .get(&owner_id)
            .and_then(|id| state.storage.get(id))
            .cloned()
            .ok_or(WalletError::NotFound(owner_id))
    }
}
