// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Everything is read once at startup. Token secrets and windows are handed
//! to [`TokenService`](crate::services::TokenService) through
//! [`Config::token_config`] rather than read from the environment later.

use crate::services::media::CloudinaryConfig;
use crate::services::password::{MAX_COST, MIN_COST};
use crate::services::tokens::TokenConfig;
use chrono::Duration;
use std::env;

/// Cookie carrying the short-lived access token.
pub const ACCESS_TOKEN_COOKIE: &str = "accessToken";
/// Cookie carrying the long-lived refresh token.
pub const REFRESH_TOKEN_COOKIE: &str = "refreshToken";

const DEFAULT_BCRYPT_COST: u32 = 10;
/// Longest accepted token window (about ten years).
const MAX_EXPIRY_SECONDS: i64 = 10 * 366 * 24 * 60 * 60;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Frontend URL allowed by CORS
    pub frontend_url: String,
    /// GCP project ID
    pub gcp_project_id: String,
    /// Server port
    pub port: u16,
    /// Use the in-process store instead of Firestore
    pub in_memory_db: bool,
    /// Set the `Secure` attribute on session cookies
    pub cookie_secure: bool,
    /// bcrypt work factor for new password hashes
    pub bcrypt_cost: u32,
    /// Lifetime of access tokens
    pub access_token_expiry: Duration,
    /// Lifetime of refresh tokens
    pub refresh_token_expiry: Duration,

    // --- Secrets ---
    /// HS256 key for access tokens (raw bytes)
    pub access_token_secret: Vec<u8>,
    /// HS256 key for refresh tokens (raw bytes)
    pub refresh_token_secret: Vec<u8>,
    /// Media hosting credentials; uploads are disabled when absent
    pub cloudinary: Option<CloudinaryConfig>,
}

impl Config {
    /// Deterministic configuration for tests.
    pub fn test_default() -> Self {
        Self {
            frontend_url: "http://localhost:5173".to_string(),
            gcp_project_id: "test-project".to_string(),
            port: 8080,
            in_memory_db: true,
            cookie_secure: true,
            bcrypt_cost: MIN_COST,
            access_token_expiry: Duration::days(1),
            refresh_token_expiry: Duration::days(10),
            access_token_secret: b"test_access_key_32_bytes_minimum!".to_vec(),
            refresh_token_secret: b"test_refresh_key_32_bytes_minimum".to_vec(),
            cloudinary: None,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let access_token_secret = required_secret("ACCESS_TOKEN_SECRET")?;
        let refresh_token_secret = required_secret("REFRESH_TOKEN_SECRET")?;
        if access_token_secret == refresh_token_secret {
            return Err(ConfigError::Invalid {
                name: "REFRESH_TOKEN_SECRET",
                reason: "must differ from ACCESS_TOKEN_SECRET".to_string(),
            });
        }

        Ok(Self {
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            in_memory_db: env_flag("IN_MEMORY_DB", false),
            cookie_secure: env_flag("COOKIE_SECURE", true),
            bcrypt_cost: match env::var("BCRYPT_COST") {
                Ok(raw) => parse_bcrypt_cost(&raw)?,
                Err(_) => DEFAULT_BCRYPT_COST,
            },
            access_token_expiry: expiry_from_env("ACCESS_TOKEN_EXPIRY", "1d")?,
            refresh_token_expiry: expiry_from_env("REFRESH_TOKEN_EXPIRY", "10d")?,
            access_token_secret,
            refresh_token_secret,
            cloudinary: cloudinary_from_env()?,
        })
    }

    /// Signing keys and validity windows for the token service.
    pub fn token_config(&self) -> TokenConfig {
        TokenConfig {
            access_secret: self.access_token_secret.clone(),
            access_ttl: self.access_token_expiry,
            refresh_secret: self.refresh_token_secret.clone(),
            refresh_ttl: self.refresh_token_expiry,
        }
    }
}

fn required_secret(name: &'static str) -> Result<Vec<u8>, ConfigError> {
    let value = env::var(name).map_err(|_| ConfigError::Missing(name))?;
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigError::Missing(name));
    }
    Ok(value.as_bytes().to_vec())
}

fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

fn expiry_from_env(name: &'static str, default: &str) -> Result<Duration, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    parse_expiry(&raw).ok_or_else(|| ConfigError::Invalid {
        name,
        reason: format!("'{}' is not a duration like 15m, 1d or 3600 (at most ten years)",
            raw),
    })
}

fn parse_bcrypt_cost(raw: &str) -> Result<u32, ConfigError> {
    raw.trim()
        .parse::<u32>()
        .ok()
        .filter(|cost| (MIN_COST..=MAX_COST).contains(cost))
        .ok_or_else(|| ConfigError::Invalid {
            name: "BCRYPT_COST",
            reason: format!(
                "must be between {} and {}",
                MIN_COST,
                MAX_COST
            ),
        })
}

fn cloudinary_from_env() -> Result<Option<CloudinaryConfig>, ConfigError> {
    let cloud_name = env::var("CLOUDINARY_CLOUD_NAME").ok();
    let api_key = env::var("CLOUDINARY_API_KEY").ok();
    let api_secret = env::var("CLOUDINARY_API_SECRET").ok();

    match (cloud_name, api_key, api_secret) {
        (Some(cloud_name), Some(api_key), Some(api_secret)) => Ok(Some(CloudinaryConfig {
            cloud_name: cloud_name.trim().to_string(),
            api_key: api_key.trim().to_string(),
            api_secret: api_secret.trim().to_string(),
        })),
        (None, None, None) => Ok(None),
        _ => Err(ConfigError::Invalid {
            name: "CLOUDINARY_*",
            reason: "cloud name, API key and API secret must be set together".to_string(),
        }),
    }
}

/// Parse an expiry window such as `15m`, `1d`, `2w` or `3600` (seconds).
///
/// Windows that are zero, negative or longer than about ten years are
/// rejected.
pub fn parse_expiry(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let amount: i64 = digits.parse().ok()?;
    if amount <= 0 {
        return None;
    }

    let window = match unit {
        "" | "s" => Duration::try_seconds(amount),
        "m" => Duration::try_minutes(amount),
        "h" => Duration::try_hours(amount),
        "d" => Duration::try_days(amount),
        "w" => Duration::try_weeks(amount),
        _ => None,
    }?;

    (window.num_seconds() <= MAX_EXPIRY_SECONDS).then_some(window)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_expiry_units() {
        assert_eq!(parse_expiry("3600"), Some(Duration::seconds(3600)));
        assert_eq!(parse_expiry("15m"), Some(Duration::minutes(15)));
        assert_eq!(parse_expiry("12h"), Some(Duration::hours(12)));
        assert_eq!(parse_expiry("1d"), Some(Duration::days(1)));
        assert_eq!(parse_expiry(" 2w "), Some(Duration::weeks(2)));
    }

    #[test]
    fn test_parse_expiry_rejects_garbage() {
        assert_eq!(parse_expiry(""), None);
        assert_eq!(parse_expiry("0"), None);
        assert_eq!(parse_expiry("d"), None);
        assert_eq!(parse_expiry("10y"), None);
        assert_eq!(parse_expiry("-5m"), None);
    }

    #[test]
    fn test_parse_expiry_rejects_unrepresentable_windows() {
        assert_eq!(parse_expiry("10000000000000"), None);
        assert_eq!(parse_expiry("9999999999999999d"), None);
        assert_eq!(parse_expiry("99999999999999999w"), None);
        assert_eq!(parse_expiry("11000d"), None);
        assert_eq!(parse_expiry("3650d"), Some(Duration::days(3650)));
    }

    #[test]
    fn test_bcrypt_cost_bounds() {
        assert_eq!(parse_bcrypt_cost("10").unwrap(), 10);
        assert_eq!(parse_bcrypt_cost("4").unwrap(), MIN_COST);
        assert_eq!(parse_bcrypt_cost("31").unwrap(), MAX_COST);
        assert!(parse_bcrypt_cost("2").is_err());
        assert!(parse_bcrypt_cost("32").is_err());
        assert!(parse_bcrypt_cost("abc").is_err());
    }

    #[test]
    fn test_config_from_env() {
        // Set required env vars for test
        env::set_var("ACCESS_TOKEN_SECRET", "access_secret_for_tests");
        env::set_var("REFRESH_TOKEN_SECRET", "refresh_secret_for_tests");
        env::set_var("ACCESS_TOKEN_EXPIRY", "15m");
        env::set_var("REFRESH_TOKEN_EXPIRY", "7d");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.access_token_secret, b"access_secret_for_tests");
        assert_eq!(config.access_token_expiry, Duration::minutes(15));
        assert_eq!(config.refresh_token_expiry, Duration::days(7));
        assert_eq!(config.port, 8080);
        assert!(config.cloudinary.is_none());
    }
}
