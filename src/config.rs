//! Configuration module
//!
//! Loads runtime configuration from environment variables.

use std::env;
use std::time::Duration;

const DEFAULT_APP_NAME: &str = "CongoPay";
const DEFAULT_APP_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(15 * 60);
const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(7 * 24 * 3600);
const DEFAULT_IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 3600);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_LOGIN_ATTEMPTS_PER_MINUTE: i64 = 5;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Application name used in logs
    pub app_name: String,

    /// Environment (development, staging, production)
    pub app_env: String,

    /// Server port
    pub port: u16,

    /// Log level filter applied when RUST_LOG is unset
    pub log_level: String,

    /// Database connection URL; optional only in dev-like environments
    pub database_url: Option<String>,

    /// Redis connection URL; optional only in dev-like environments
    pub redis_url: Option<String>,

    /// Secret for access token signing
    pub jwt_secret: String,

    /// Secret for refresh token signing (falls back to jwt_secret)
    pub refresh_secret: String,

    /// Access token lifetime
    pub access_ttl: Duration,

    /// Refresh token lifetime
    pub refresh_ttl: Duration,

    /// TTL for cached idempotent responses
    pub idempotency_ttl: Duration,

    /// Grace period for in-flight requests on shutdown
    pub shutdown_timeout: Duration,

    /// Maximum login attempts per phone (or caller) per minute
    pub login_attempts_per_minute: i64,
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Outside dev-like environments, `DATABASE_URL`, `REDIS_URL` and
    /// `JWT_SECRET` are required and startup fails without them.
    pub fn from_env() -> Result<Self, ConfigError> {
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| DEFAULT_APP_ENV.to_string());
        let dev = is_dev(&app_env);

        let database_url = env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());
        let redis_url = env::var("REDIS_URL").ok().filter(|v| !v.is_empty());

        if !dev {
            if database_url.is_none() {
                return Err(ConfigError::MissingEnv("DATABASE_URL"));
            }
            if redis_url.is_none() {
                return Err(ConfigError::MissingEnv("REDIS_URL"));
            }
        }

        let jwt_secret = match env::var("JWT_SECRET").ok().filter(|v| !v.is_empty()) {
            Some(secret) => secret,
            None if dev => "dev-secret".to_string(),
            None => return Err(ConfigError::MissingEnv("JWT_SECRET")),
        };

        let refresh_secret = env::var("REFRESH_SECRET")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| jwt_secret.clone());

        let port = match env::var("PORT") {
            Ok(v) => v.parse().map_err(|_| ConfigError::InvalidValue("PORT"))?,
            Err(_) => DEFAULT_PORT,
        };

        Ok(Self {
            app_name: env::var("APP_NAME").unwrap_or_else(|_| DEFAULT_APP_NAME.to_string()),
            app_env,
            port,
            log_level: env::var("LOG_LEVEL")
                .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
                .to_lowercase(),
            database_url,
            redis_url,
            jwt_secret,
            refresh_secret,
            access_ttl: duration_env("ACCESS_TTL", DEFAULT_ACCESS_TTL)?,
            refresh_ttl: duration_env("REFRESH_TTL", DEFAULT_REFRESH_TTL)?,
            idempotency_ttl: duration_env("IDEMPOTENCY_TTL", DEFAULT_IDEMPOTENCY_TTL)?,
            shutdown_timeout: duration_env("SHUTDOWN_TIMEOUT", DEFAULT_SHUTDOWN_TIMEOUT)?,
            login_attempts_per_minute: DEFAULT_LOGIN_ATTEMPTS_PER_MINUTE,
        })
    }

    /// Check if running in a dev-like environment
    pub fn is_dev(&self) -> bool {
        is_dev(&self.app_env)
    }
}

fn is_dev(env: &str) -> bool {
    matches!(env.to_lowercase().as_str(), "dev" | "development" | "local")
}

fn duration_env(key: &'static str, fallback: Duration) -> Result<Duration, ConfigError> {
    match env::var(key) {
        Ok(v) if !v.is_empty() => parse_duration(&v).ok_or(ConfigError::InvalidValue(key)),
        _ => Ok(fallback),
    }
}

/// Parse a duration given as bare seconds ("600") or with a unit
/// suffix ("30s", "15m", "24h").
fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let unit = value.chars().last()?;
    let number: u64 = value[..value.len() - unit.len_utf8()].trim().parse().ok()?;
    match unit {
        's' => Some(Duration::from_secs(number)),
        'm' => Some(Duration::from_secs(number * 60)),
        'h' => Some(Duration::from_secs(number * 3600)),
        'd' => Some(Duration::from_secs(number * 86400)),
        _ => None,
    }
}
