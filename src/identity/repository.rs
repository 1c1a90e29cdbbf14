//! Identity repositories

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{IdentityError, Tier, User};

/// User store selected at startup.
#[derive(Clone)]
pub enum IdentityRepository {
    Postgres(PostgresIdentityRepository),
    Memory(MemoryIdentityRepository),
}

impl IdentityRepository {
    pub async fn create(&self, user: &User) -> Result<(), IdentityError> {
        match self {
            IdentityRepository::Postgres(r) => r.create(user).await,
            IdentityRepository::Memory(r) => r.create(user),
        }
    }

    pub async fn find_by_phone(&self, phone: &str) -> Result<User, IdentityError> {
        match self {
            IdentityRepository::Postgres(r) => r.find_by_phone(phone).await,
            IdentityRepository::Memory(r) => r.find_by_phone(phone),
        }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<User, IdentityError> {
        match self {
            IdentityRepository::Postgres(r) => r.find_by_id(id).await,
            IdentityRepository::Memory(r) => r.find_by_id(id),
        }
    }

    pub async fn update_device(&self, id: Uuid, device_id: &str) -> Result<(), IdentityError> {
        match self {
            IdentityRepository::Postgres(r) => r.update_device(id, device_id).await,
            IdentityRepository::Memory(r) => r.update_device(id, device_id),
        }
    }

    pub async fn update_token_version(&self, id: Uuid, version: i32) -> Result<(), IdentityError> {
        match self {
            IdentityRepository::Postgres(r) => r.update_token_version(id, version).await,
            IdentityRepository::Memory(r) => r.update_token_version(id, version),
        }
    }

    pub async fn update_last_login(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), IdentityError> {
        match self {
            IdentityRepository::Postgres(r) => r.update_last_login(id, at).await,
            IdentityRepository::Memory(r) => r.update_last_login(id, at),
        }
    }
}

/// User store backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PostgresIdentityRepository {
    pool: PgPool,
}

type UserRow = (
    Uuid,
    String,
    String,
    String,
    String,
    i32,
    Option<DateTime<Utc>>,
    DateTime<Utc>,
);

fn from_row(
    (id, phone, tier, pin_hash, device_id, token_version, last_login, created_at): UserRow,
) -> User {
    User {
        id,
        phone,
        tier: Tier::from(tier),
        pin_hash,
        device_id,
        token_version,
        last_login,
        created_at,
    }
}

const SELECT_USER: &str = r#"
    SELECT id, phone, tier, pin_hash, device_id, token_version, last_login, created_at
    FROM users
"#;

impl PostgresIdentityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, user: &User) -> Result<(), IdentityError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, phone, tier, pin_hash, device_id, token_version, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(user.id)
        .bind(&user.phone)
        .bind(user.tier.as_str())
        .bind(&user.pin_hash)
        .bind(&user.device_id)
        .bind(user.token_version)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                IdentityError::PhoneTaken(user.phone.clone())
            }
            _ => IdentityError::Database(e),
        })?;

        Ok(())
    }

    pub async fn find_by_phone(&self, phone: &str) -> Result<User, IdentityError> {
        let row: Option<UserRow> = sqlx::query_as(&format!("{SELECT_USER} WHERE phone = $1"))
            .bind(phone)
            .fetch_optional(&self.pool)
            .await?;

        row.map(from_row)
            .ok_or_else(|| IdentityError::UserNotFound(phone.to_string()))
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<User, IdentityError> {
        let row: Option<UserRow> = sqlx::query_as(&format!("{SELECT_USER} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(from_row)
            .ok_or_else(|| IdentityError::UserNotFound(id.to_string()))
    }

    pub async fn update_device(&self, id: Uuid, device_id: &str) -> Result<(), IdentityError> {
        let result = sqlx::query("UPDATE users SET device_id = $1 WHERE id = $2")
            .bind(device_id)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(IdentityError::UserNotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn update_token_version(&self, id: Uuid, version: i32) -> Result<(), IdentityError> {
        let result = sqlx::query("UPDATE users SET token_version = $1 WHERE id = $2")
            .bind(version)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(IdentityError::UserNotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn update_last_login(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), IdentityError> {
        sqlx::query("UPDATE users SET last_login = $1 WHERE id = $2")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// In-memory user store for tests and dev fallback, keyed by phone.
#[derive(Clone, Default)]
pub struct MemoryIdentityRepository {
    users: Arc<Mutex<HashMap<String, User>>>,
}

impl MemoryIdentityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, User>> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create(&self, user: &User) -> Result<(), IdentityError> {
        let mut users = self.lock();
        if users.contains_key(&user.phone) {
            return Err(IdentityError::PhoneTaken(user.phone.clone()));
        }
        users.insert(user.phone.clone(), user.clone());
        Ok(())
    }

    pub fn find_by_phone(&self, phone: &str) -> Result<User, IdentityError> {
        self.lock()
            .get(phone)
            .cloned()
            .ok_or_else(|| IdentityError::UserNotFound(phone.to_string()))
    }

    pub fn find_by_id(&self, id: Uuid) -> Result<User, IdentityError> {
        self.lock()
            .values()
            .find(|u| u.id == id)
            .cloned()
            .ok_or_else(|| IdentityError::UserNotFound(id.to_string()))
    }

    pub fn update_device(&self, id: Uuid, device_id: &str) -> Result<(), IdentityError> {
        self.update(id, |user| user.device_id = device_id.to_string())
    }

    pub fn update_token_version(&self, id: Uuid, version: i32) -> Result<(), IdentityError> {
        self.update(id, |user| user.token_version = version)
    }

    pub fn update_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), IdentityError> {
        self.update(id, |user| user.last_login = Some(at))
    }

    fn update(&self, id: Uuid, apply: impl FnOnce(&mut User)) -> Result<(), IdentityError> {
        let mut users = self.lock();
        match users.values_mut().find(|u| u.id == id) {
            Some(user) => {
                apply(user);
                Ok(())
            }
            None => Err(IdentityError::UserNotFound(id.to_string())),
        }
    }
}
