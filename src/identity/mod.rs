//! Identity service
//!
//! User onboarding and authentication: PIN hashing with an adaptive-cost
//! KDF (bcrypt), device binding, and the token-version counter used to
//! invalidate outstanding tokens.

mod repository;

pub use repository::{IdentityRepository, MemoryIdentityRepository, PostgresIdentityRepository};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const MIN_PIN_LEN: usize = 4;

/// User tier. New users start at tier0 and are treated as tier1 once they
/// have authenticated with a bound device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Tier0,
    Tier1,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Tier0 => "tier0",
            Tier::Tier1 => "tier1",
        }
    }
}

impl From<String> for Tier {
    fn from(s: String) -> Self {
        match s.as_str() {
            "tier1" => Tier::Tier1,
            _ => Tier::Tier0,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registered wallet owner.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub phone: String,
    pub tier: Tier,
    pub pin_hash: String,
    pub device_id: String,
    pub token_version: i32,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Credentials supplied on register and login.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub phone: String,
    pub pin: String,
    pub device_id: String,
}

/// Identity error types
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("PIN must be at least 4 digits")]
    PinTooShort,

    #[error("invalid PIN")]
    InvalidPin,

    #[error("device binding required")]
    DeviceRequired,

    #[error("device mismatch")]
    DeviceMismatch,

    #[error("phone {0} already registered")]
    PhoneTaken(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("hashing error: {0}")]
    Hash(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Manages the identity lifecycle.
#[derive(Clone)]
pub struct IdentityService {
    repo: IdentityRepository,
}

impl IdentityService {
    pub fn new(repo: IdentityRepository) -> Self {
        Self { repo }
    }

    /// Create a new tier0 user with a hashed PIN.
    pub async fn register(&self, creds: Credentials) -> Result<User, IdentityError> {
        if creds.pin.len() < MIN_PIN_LEN {
            return Err(IdentityError::PinTooShort);
        }

        let pin = creds.pin;
        let pin_hash = spawn_hash(move || bcrypt::hash(pin, bcrypt::DEFAULT_COST)).await?;

        let user = User {
            id: Uuid::new_v4(),
            phone: creds.phone,
            tier: Tier::Tier0,
            pin_hash,
            device_id: creds.device_id,
            token_version: 0,
            last_login: None,
            created_at: Utc::now(),
        };

        self.repo.create(&user).await?;
        Ok(user)
    }

    /// Verify credentials and device binding.
    ///
    /// A user with no bound device binds the caller's device on first
    /// login; afterwards a differing device is rejected. The tier0 to
    /// tier1 promotion applies to the returned value only.
    pub async fn authenticate(&self, creds: Credentials) -> Result<User, IdentityError> {
        let mut user = self.repo.find_by_phone(&creds.phone).await?;

        let pin = creds.pin;
        let stored = user.pin_hash.clone();
        let valid = spawn_hash(move || bcrypt::verify(pin, &stored)).await?;
        if !valid {
            return Err(IdentityError::InvalidPin);
        }

        if user.device_id.is_empty() {
            if creds.device_id.is_empty() {
                return Err(IdentityError::DeviceRequired);
            }
            self.repo.update_device(user.id, &creds.device_id).await?;
            user.device_id = creds.device_id;
        } else if !creds.device_id.is_empty() && user.device_id != creds.device_id {
            return Err(IdentityError::DeviceMismatch);
        }

        let now = Utc::now();
        self.repo.update_last_login(user.id, now).await?;
        user.last_login = Some(now);

        if user.tier == Tier::Tier0 {
            user.tier = Tier::Tier1;
        }

        Ok(user)
    }

    /// Fetch a user by id.
    pub async fn get(&self, id: Uuid) -> Result<User, IdentityError> {
        self.repo.find_by_id(id).await
    }
}

/// bcrypt is deliberately slow; keep it off the async workers.
async fn spawn_hash<F, T>(f: F) -> Result<T, IdentityError>
where
    F: FnOnce() -> Result<T, bcrypt::BcryptError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| IdentityError::Hash(e.to_string()))?
        .map_err(|e| IdentityError::Hash(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> IdentityService {
        IdentityService::new(IdentityRepository::Memory(MemoryIdentityRepository::new()))
    }

    fn creds(phone: &str, pin: &str, device: &str) -> Credentials {
        Credentials {
            phone: phone.to_string(),
            pin: pin.to_string(),
            device_id: device.to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_and_authenticate() {
        let svc = service();

        let user = svc
            .register(creds("+237650000000", "1234", "device-1"))
            .await
            .unwrap();
        assert_eq!(user.tier, Tier::Tier0);
        assert_ne!(user.pin_hash, "1234");

        let authed = svc
            .authenticate(creds("+237650000000", "1234", "device-1"))
            .await
            .unwrap();
        assert_eq!(authed.tier, Tier::Tier1);
        assert!(authed.last_login.is_some());

        // Promotion is local to the returned value.
        let stored = svc.get(user.id).await.unwrap();
        assert_eq!(stored.tier, Tier::Tier0);
    }

    #[tokio::test]
    async fn test_register_rejects_short_pin() {
        let svc = service();
        let err = svc.register(creds("123", "99", "device-1")).await.unwrap_err();
        assert!(matches!(err, IdentityError::PinTooShort));
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_phone() {
        let svc = service();
        svc.register(creds("123", "1234", "device-1")).await.unwrap();
        let err = svc.register(creds("123", "5678", "device-2")).await.unwrap_err();
        assert!(matches!(err, IdentityError::PhoneTaken(_)));
    }

    #[tokio::test]
    async fn test_authenticate_wrong_pin() {
        let svc = service();
        svc.register(creds("123", "1234", "device-1")).await.unwrap();
        let err = svc.authenticate(creds("123", "9999", "device-1")).await.unwrap_err();
        assert!(matches!(err, IdentityError::InvalidPin));
    }

    #[tokio::test]
    async fn test_authenticate_device_mismatch() {
        let svc = service();
        svc.register(creds("123", "1234", "device-1")).await.unwrap();
        let err = svc.authenticate(creds("123", "1234", "device-2")).await.unwrap_err();
        assert!(matches!(err, IdentityError::DeviceMismatch));
    }

    #[tokio::test]
    async fn test_authenticate_binds_first_device() {
        let svc = service();
        // Registered with no device.
        let user = svc.register(creds("123", "1234", "")).await.unwrap();

        // Empty caller device is rejected.
        let err = svc.authenticate(creds("123", "1234", "")).await.unwrap_err();
        assert!(matches!(err, IdentityError::DeviceRequired));

        // First non-empty device binds and persists.
        let authed = svc.authenticate(creds("123", "1234", "device-9")).await.unwrap();
        assert_eq!(authed.device_id, "device-9");
        let stored = svc.get(user.id).await.unwrap();
        assert_eq!(stored.device_id, "device-9");
    }
}
