// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Session token issuance, verification and rotation.
//!
//! Each login yields a pair of HS256 JWTs signed with different keys:
//! - an access token carrying a snapshot of the profile, checked on every
//!   privileged request without touching the store;
//! - a refresh token carrying only the account ID, whose literal value is
//!   also stored on the account. A refresh token is accepted only while it
//!   is the stored value, so rotation and logout revoke every older copy.

use crate::db::FirestoreDb;
use crate::error::AppError;
use crate::models::User;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use subtle::ConstantTimeEq;

/// Signing keys and validity windows, injected at construction.
#[derive(Clone)]
pub struct TokenConfig {
    pub access_secret: Vec<u8>,
    pub access_ttl: Duration,
    pub refresh_secret: Vec<u8>,
    pub refresh_ttl: Duration,
}

/// Access token claims.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccessClaims {
    /// Subject (account ID)
    pub sub: String,
    pub email: String,
    pub username: String,
    pub full_name: String,
    /// Issued at (Unix timestamp)
    pub iat: usize,
    /// Expiration time (Unix timestamp)
    pub exp: usize,
    /// Unique token ID
    pub jti: String,
}

/// Refresh token claims.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RefreshClaims {
    /// Subject (account ID)
    pub sub: String,
    pub iat: usize,
    pub exp: usize,
    /// Unique token ID, so two tokens minted in the same second differ
    pub jti: String,
}

/// A freshly minted access/refresh pair.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Mints and checks session tokens.
#[derive(Clone)]
pub struct TokenService {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
    validation: Validation,
}

impl TokenService {
    pub fn new(config: TokenConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is exact; a token is dead the second its window closes.
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);

        Self {
            access_encoding: EncodingKey::from_secret(&config.access_secret),
            access_decoding: DecodingKey::from_secret(&config.access_secret),
            refresh_encoding: EncodingKey::from_secret(&config.refresh_secret),
            refresh_decoding: DecodingKey::from_secret(&config.refresh_secret),
            access_ttl: config.access_ttl,
            refresh_ttl: config.refresh_ttl,
            validation,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    // ─── Minting ─────────────────────────────────────────────────

    /// Create an access token for `user`, valid from now.
    pub fn create_access_token(&self, user: &User) -> Result<String, AppError> {
        self.create_access_token_at(user, Utc::now())
    }

    /// Create an access token as if issued at `issued_at`.
    pub fn create_access_token_at(
        &self,
        user: &User,
        issued_at: DateTime<Utc>,
    ) -> Result<String, AppError> {
        let claims = AccessClaims {
            sub: user.id.clone(),
            email: user.email.clone(),
            username: user.username.clone(),
            full_name: user.full_name.clone(),
            iat: unix(issued_at),
            exp: unix(expiry(issued_at, self.access_ttl)?),
            jti: uuid::Uuid::new_v4().to_string(),
        };
        sign(&claims, &self.access_encoding)
    }

    /// Create a refresh token for `user_id`, valid from now.
    pub fn create_refresh_token(&self, user_id: &str) -> Result<String, AppError> {
        self.create_refresh_token_at(user_id, Utc::now())
    }

    /// Create a refresh token as if issued at `issued_at`.
    pub fn create_refresh_token_at(
        &self,
        user_id: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<String, AppError> {
        let claims = RefreshClaims {
            sub: user_id.to_string(),
            iat: unix(issued_at),
            exp: unix(expiry(issued_at, self.refresh_ttl)?),
            jti: uuid::Uuid::new_v4().to_string(),
        };
        sign(&claims, &self.refresh_encoding)
    }

    fn mint_pair(&self, user: &User) -> Result<TokenPair, AppError> {
        Ok(TokenPair {
            access_token: self.create_access_token(user)?,
            refresh_token: self.create_refresh_token(&user.id)?,
        })
    }

    // ─── Verification ────────────────────────────────────────────

    /// Check signature, algorithm and expiry of an access token.
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, AppError> {
        self.decode_claims(token, &self.access_decoding)
    }

    /// Check signature, algorithm and expiry of a refresh token without
    /// consulting the store.
    pub fn decode_refresh(&self, token: &str) -> Result<RefreshClaims, AppError> {
        self.decode_claims(token, &self.refresh_decoding)
    }

    fn decode_claims<C: DeserializeOwned>(
        &self,
        token: &str,
        key: &DecodingKey,
    ) -> Result<C, AppError> {
        decode::<C>(token, key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "Token rejected");
                AppError::InvalidToken
            })
    }

    /// Verify a refresh token and return the account ID it belongs to.
    ///
    /// Beyond the structural checks the token must be exactly the value
    /// currently stored on the account. Every failure, store errors
    /// included, is reported as [`AppError::InvalidToken`].
    pub async fn verify_refresh(&self, db: &FirestoreDb, token: &str) -> Result<String, AppError> {
        self.verify_refresh_user(db, token).await.map(|user| user.id)
    }

    async fn verify_refresh_user(&self, db: &FirestoreDb, token: &str) -> Result<User, AppError> {
        let claims = self.decode_refresh(token)?;

        let user = match db.get_user(&claims.sub).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                tracing::warn!(user_id = %claims.sub, "Refresh token for unknown account");
                return Err(AppError::InvalidToken);
            }
            Err(e) => {
                tracing::warn!(user_id = %claims.sub, error = %e, "Refresh token lookup failed");
                return Err(AppError::InvalidToken);
            }
        };

        let current = user
            .refresh_token
            .as_deref()
            .map(|stored| bool::from(stored.as_bytes().ct_eq(token.as_bytes())))
            .unwrap_or(false);

        if !current {
            tracing::warn!(user_id = %user.id, "Refresh token expired or reused");
            return Err(AppError::InvalidToken);
        }

        Ok(user)
    }

    // ─── Lifecycle ───────────────────────────────────────────────

    /// Mint a new pair for `user_id` and store its refresh token, replacing
    /// whatever was stored before.
    ///
    /// A missing account or a failed write is an internal error; no pair is
    /// returned unless the refresh token was persisted.
    pub async fn issue(&self, db: &FirestoreDb, user_id: &str) -> Result<TokenPair, AppError> {
        let user = db.get_user(user_id).await?.ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!(
                "Cannot issue tokens: account {} not found",
                user_id
            ))
        })?;

        let pair = self.mint_pair(&user)?;
        db.set_refresh_token(&user.id, Some(&pair.refresh_token))
            .await?;

        tracing::debug!(user_id = %user.id, "Issued session tokens");
        Ok(pair)
    }

    /// Exchange a current refresh token for a new pair.
    ///
    /// The stored token is replaced with a compare-and-swap on the presented
    /// value, so of two concurrent rotations of one token only one succeeds.
    pub async fn rotate(&self, db: &FirestoreDb, token: &str) -> Result<TokenPair, AppError> {
        let user = self.verify_refresh_user(db, token).await?;
        let pair = self.mint_pair(&user)?;

        if !db
            .swap_refresh_token(&user.id, token, &pair.refresh_token)
            .await?
        {
            tracing::warn!(user_id = %user.id, "Refresh token rotated concurrently");
            return Err(AppError::InvalidToken);
        }

        tracing::debug!(user_id = %user.id, "Rotated session tokens");
        Ok(pair)
    }

    /// Forget the stored refresh token so no outstanding copy verifies.
    pub async fn revoke(&self, db: &FirestoreDb, user_id: &str) -> Result<(), AppError> {
        db.set_refresh_token(user_id, None).await
    }
}

fn unix(at: DateTime<Utc>) -> usize {
    at.timestamp().max(0) as usize
}

fn expiry(issued_at: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, AppError> {
    issued_at.checked_add_signed(ttl).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!(
            "Token window of {}s overflows the clock",
            ttl.num_seconds()
        ))
    })
}

fn sign<C: Serialize>(claims: &C, key: &EncodingKey) -> Result<String, AppError> {
    encode(&Header::new(Algorithm::HS256), claims, key)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("JWT creation failed: {}", e)))
}
