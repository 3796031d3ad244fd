// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Account model for storage and API.

use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Account document stored in Firestore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Random UUID (also used as document ID)
    pub id: String,
    /// Unique handle, lowercase
    pub username: String,
    /// Unique email, lowercase
    pub email: String,
    pub full_name: String,
    /// Avatar URL on the media host
    pub avatar: String,
    /// Cover image URL on the media host
    #[serde(default)]
    pub cover_image: Option<String>,
    /// Watched video IDs, oldest first
    #[serde(default)]
    pub watch_history: Vec<String>,
    /// bcrypt hash of the password
    pub password_hash: String,
    /// The one refresh token currently accepted for this account
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// When the account was created (RFC 3339)
    pub created_at: String,
    /// Last profile change (RFC 3339)
    pub updated_at: String,
}

/// Account projection returned to clients. Never carries the password hash
/// or the stored refresh token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct PublicUser {
    pub id: String,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub avatar: String,
    pub cover_image: Option<String>,
    pub watch_history: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            full_name: user.full_name,
            avatar: user.avatar,
            cover_image: user.cover_image,
            watch_history: user.watch_history,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Lowercase and trim a username or email for storage and lookup.
pub fn normalize_identity(raw: &str) -> String {
    raw.trim().to_lowercase()
}
