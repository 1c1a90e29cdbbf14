//! Auth service
//!
//! HS256 token pairs with token-version invalidation. Access and refresh
//! tokens carry `{sub, phone, tier, ver, iat, exp}`; `ver` must match the
//! user's current `token_version`, and logout bumps that counter so every
//! outstanding token dies at once.

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::identity::{IdentityError, IdentityRepository, Tier, User};

/// Token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub phone: String,
    pub tier: Tier,
    pub ver: i32,
    pub iat: i64,
    pub exp: i64,
}

/// Access/refresh token pair issued on login.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

/// Auth error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid token")]
    InvalidToken,

    #[error("token version invalidated")]
    TokenVersionMismatch,

    #[error("user not found")]
    UserNotFound,

    #[error("token encoding error: {0}")]
    Encoding(#[from] jsonwebtoken::errors::Error),

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<IdentityError> for AuthError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::UserNotFound(_) => AuthError::UserNotFound,
            IdentityError::Database(e) => AuthError::Database(e),
            _ => AuthError::InvalidToken,
        }
    }
}

/// Issues and verifies tokens against the identity repository.
#[derive(Clone)]
pub struct AuthService {
    config: Config,
    repo: IdentityRepository,
}

impl AuthService {
    pub fn new(config: Config, repo: IdentityRepository) -> Self {
        Self { config, repo }
    }

    /// Issue an access/refresh token pair for an authenticated user.
    pub fn login(&self, user: &User) -> Result<TokenPair, AuthError> {
        let access = self.sign(user, &self.config.jwt_secret, self.config.access_ttl)?;
        let refresh = self.sign(user, &self.config.refresh_secret, self.config.refresh_ttl)?;
        Ok(TokenPair {
            access_token: access,
            refresh_token: refresh,
            expires_in: self.config.access_ttl.as_secs() as i64,
        })
    }

    /// Verify an access token and check its version against the stored
    /// user. Returns the claims and the user record.
    pub async fn authorize(&self, token: &str) -> Result<(Claims, User), AuthError> {
        let claims = verify(token, &self.config.jwt_secret)?;
        let user = self.repo.find_by_id(claims.sub).await?;
        if user.token_version != claims.ver {
            return Err(AuthError::TokenVersionMismatch);
        }
        Ok((claims, user))
    }

    /// Verify a refresh token and issue a new access token carrying the
    /// same version.
    pub async fn refresh(&self, refresh_token: &str) -> Result<(String, i64), AuthError> {
        let claims = verify(refresh_token, &self.config.refresh_secret)
            .map_err(|_| AuthError::InvalidToken)?;

        let user = self.repo.find_by_id(claims.sub).await?;
        if user.token_version != claims.ver {
            return Err(AuthError::TokenVersionMismatch);
        }

        let access = self.sign(&user, &self.config.jwt_secret, self.config.access_ttl)?;
        Ok((access, self.config.access_ttl.as_secs() as i64))
    }

    /// Invalidate outstanding tokens by bumping the token version.
    pub async fn logout(&self, user_id: Uuid) -> Result<(), AuthError> {
        let user = self.repo.find_by_id(user_id).await?;
        self.repo
            .update_token_version(user.id, user.token_version + 1)
            .await?;
        Ok(())
    }

    fn sign(&self, user: &User, secret: &str, ttl: Duration) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id,
            phone: user.phone.clone(),
            tier: user.tier,
            ver: user.token_version,
            iat: now.timestamp(),
            exp: now.timestamp() + ttl.as_secs() as i64,
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )?;
        Ok(token)
    }
}

fn verify(token: &str, secret: &str) -> Result<Claims, AuthError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|_| AuthError::InvalidToken)?;
    Ok(data.claims)
}
