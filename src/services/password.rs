// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! bcrypt password hashing, run off the async runtime.

use crate::error::AppError;

/// Cheapest work factor bcrypt accepts.
pub const MIN_COST: u32 = 4;
/// Most expensive work factor bcrypt accepts.
pub const MAX_COST: u32 = 31;

/// Hash `password` with the given bcrypt cost.
pub async fn hash_password(password: String, cost: u32) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Hashing task failed: {}", e)))?
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Password hashing failed: {}", e)))
}

/// Check `password` against a stored bcrypt hash.
///
/// This is the only password comparison in the crate; login and password
/// change both go through it.
pub async fn verify_password(password: String, hash: String) -> Result<bool, AppError> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Verification task failed: {}", e)))?
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Stored password hash unreadable: {}", e)))
}
