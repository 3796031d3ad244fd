// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Users (account documents, including the stored refresh token)
//! - Identity claims (`usernames`/`emails` documents that make both unique)
//! - Subscriptions (read-only counts for channel pages)
//! - Videos (read-only lookups for watch history)
//!
//! The same API is served by an in-process [`MemoryStore`] for tests and
//! local development.

use crate::db::collections;
use crate::db::memory::MemoryStore;
use crate::error::AppError;
use crate::models::{Subscription, User, Video};
use firestore::errors::FirestoreError;
use firestore::{FirestoreConsistencySelector, FirestoreWritePrecondition};
use futures_util::{stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const MAX_CONCURRENT_DB_OPS: usize = 16;
const REFRESH_TOKEN_FIELD: &str = "refresh_token";

/// Field-mask payload for writes that only touch the refresh token.
#[derive(Serialize, Deserialize)]
struct RefreshTokenPatch {
    refresh_token: Option<String>,
}

/// Ownership record stored at `usernames/{id}` and `emails/{id}`.
#[derive(Debug, Serialize, Deserialize)]
struct IdentityClaim {
    user_id: String,
}

/// Result row of a count aggregation.
#[derive(Deserialize)]
struct CountResult {
    count: u64,
}

/// Document ID for an identity claim. Hex keeps any username or email a
/// legal document ID (no `/`, no reserved names).
fn claim_id(identity: &str) -> String {
    hex::encode(identity.as_bytes())
}

fn identity_conflict() -> AppError {
    AppError::Conflict("Username or email already exists".to_string())
}

#[derive(Clone)]
enum Backend {
    Firestore(firestore::FirestoreDb),
    Memory(Arc<MemoryStore>),
    Offline,
}

/// Document database client.
#[derive(Clone)]
pub struct FirestoreDb {
    backend: Backend,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            backend: Backend::Firestore(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            backend: Backend::Firestore(client),
        })
    }

    /// Use a fresh in-process store.
    pub fn new_in_memory() -> Self {
        Self::with_memory_store(Arc::new(MemoryStore::new()))
    }

    /// Use an existing in-process store (tests seed it directly).
    pub fn with_memory_store(store: Arc<MemoryStore>) -> Self {
        Self {
            backend: Backend::Memory(store),
        }
    }

    /// Create a mock client for testing (offline mode).
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self {
            backend: Backend::Offline,
        }
    }

    fn offline() -> AppError {
        AppError::Database("Database not connected (offline mode)".to_string())
    }

    // ─── User Operations ─────────────────────────────────────────

    /// Get an account by ID.
    pub async fn get_user(&self, id: &str) -> Result<Option<User>, AppError> {
        match &self.backend {
            Backend::Firestore(client) => client
                .fluent()
                .select()
                .by_id_in(collections::USERS)
                .obj()
                .one(id)
                .await
                .map_err(|e| AppError::Database(e.to_string())),
            Backend::Memory(store) => Ok(store.get_user(id)),
            Backend::Offline => Err(Self::offline()),
        }
    }

    /// Find the account matching either identity. Both inputs must already be
    /// normalized; `None` inputs are ignored.
    pub async fn find_user_by_identity(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>, AppError> {
        if username.is_none() && email.is_none() {
            return Ok(None);
        }

        match &self.backend {
            Backend::Firestore(client) => {
                let username = username.map(str::to_string);
                let email = email.map(str::to_string);

                let found: Vec<User> = client
                    .fluent()
                    .select()
                    .from(collections::USERS)
                    .filter(move |q| {
                        q.for_any([
                            username
                                .clone()
                                .and_then(|value| q.field("username").eq(value)),
                            email.clone().and_then(|value| q.field("email").eq(value)),
                        ])
                    })
                    .limit(1)
                    .obj()
                    .query()
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;

                Ok(found.into_iter().next())
            }
            Backend::Memory(store) => Ok(store.find_user(|user| {
                username == Some(user.username.as_str()) || email == Some(user.email.as_str())
            })),
            Backend::Offline => Err(Self::offline()),
        }
    }

    /// Find an account by its username.
    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        self.find_user_by_identity(Some(username), None).await
    }

    /// Create a new account and claim its username and email.
    ///
    /// The account document and both claim documents are written in one
    /// transaction with "must not exist" preconditions, so of two concurrent
    /// registrations for the same identity only one commits. A taken
    /// identity is reported as [`AppError::Conflict`].
    pub async fn create_user(&self, user: &User) -> Result<(), AppError> {
        match &self.backend {
            Backend::Firestore(client) => {
                if Self::claim_owner(client, collections::USERNAMES, &user.username).await?.is_some()
                    || Self::claim_owner(client, collections::EMAILS, &user.email).await?.is_some()
                {
                    return Err(identity_conflict());
                }

                let claim = IdentityClaim {
                    user_id: user.id.clone(),
                };
                let mut transaction = client.begin_transaction().await.map_err(|e| {
                    AppError::Database(format!("Failed to begin transaction: {}", e))
                })?;

                for (collection, identity) in [
                    (collections::USERNAMES, &user.username),
                    (collections::EMAILS, &user.email),
                ] {
                    client
                        .fluent()
                        .update()
                        .in_col(collection)
                        .precondition(FirestoreWritePrecondition::Exists(false))
                        .document_id(claim_id(identity))
                        .object(&claim)
                        .add_to_transaction(&mut transaction)
                        .map_err(|e| {
                            AppError::Database(format!("Failed to add claim to transaction: {}", e))
                        })?;
                }

                client
                    .fluent()
                    .update()
                    .in_col(collections::USERS)
                    .precondition(FirestoreWritePrecondition::Exists(false))
                    .document_id(&user.id)
                    .object(user)
                    .add_to_transaction(&mut transaction)
                    .map_err(|e| {
                        AppError::Database(format!("Failed to add user to transaction: {}", e))
                    })?;

                transaction
                    .commit()
                    .await
                    .map_err(|e| commit_error("create account", e))?;
                Ok(())
            }
            Backend::Memory(store) => {
                if store.insert_user(user.clone()) {
                    Ok(())
                } else {
                    Err(identity_conflict())
                }
            }
            Backend::Offline => Err(Self::offline()),
        }
    }

    /// Change the email of `user` (already holding the new value) from
    /// `previous_email`, writing `fields` in the same step.
    ///
    /// The new email is claimed and the old claim released in the same
    /// transaction as the account update. Fails with
    /// [`AppError::Conflict`] if another account holds the new email.
    pub async fn change_email(
        &self,
        user: &User,
        previous_email: &str,
        fields: &[&str],
    ) -> Result<(), AppError> {
        match &self.backend {
            Backend::Firestore(client) => {
                let already_held =
                    match Self::claim_owner(client, collections::EMAILS, &user.email).await? {
                        Some(owner) if owner.user_id != user.id => return Err(identity_conflict()),
                        Some(_) => true,
                        None => false,
                    };

                let claim = IdentityClaim {
                    user_id: user.id.clone(),
                };
                let mut transaction = client.begin_transaction().await.map_err(|e| {
                    AppError::Database(format!("Failed to begin transaction: {}", e))
                })?;

                if !already_held {
                    client
                        .fluent()
                        .update()
                        .in_col(collections::EMAILS)
                        .precondition(FirestoreWritePrecondition::Exists(false))
                        .document_id(claim_id(&user.email))
                        .object(&claim)
                        .add_to_transaction(&mut transaction)
                        .map_err(|e| {
                            AppError::Database(format!("Failed to add claim to transaction: {}", e))
                        })?;
                }

                if previous_email != user.email {
                    client
                        .fluent()
                        .delete()
                        .from(collections::EMAILS)
                        .document_id(claim_id(previous_email))
                        .add_to_transaction(&mut transaction)
                        .map_err(|e| {
                            AppError::Database(format!(
                                "Failed to add release to transaction: {}",
                                e
                            ))
                        })?;
                }

                client
                    .fluent()
                    .update()
                    .fields(fields.iter().copied())
                    .in_col(collections::USERS)
                    .document_id(&user.id)
                    .object(user)
                    .add_to_transaction(&mut transaction)
                    .map_err(|e| {
                        AppError::Database(format!("Failed to add user to transaction: {}", e))
                    })?;

                transaction
                    .commit()
                    .await
                    .map_err(|e| commit_error("change email", e))?;
                Ok(())
            }
            Backend::Memory(store) => {
                if !store.claim_email(&user.id, previous_email, &user.email) {
                    return Err(identity_conflict());
                }
                self.update_user_fields(user, fields).await
            }
            Backend::Offline => Err(Self::offline()),
        }
    }

    /// Current holder of a username or email claim.
    async fn claim_owner(
        client: &firestore::FirestoreDb,
        collection: &str,
        identity: &str,
    ) -> Result<Option<IdentityClaim>, AppError> {
        client
            .fluent()
            .select()
            .by_id_in(collection)
            .obj()
            .one(claim_id(identity))
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Write only the named fields of `user`, leaving the rest of the
    /// document untouched.
    pub async fn update_user_fields(&self, user: &User, fields: &[&str]) -> Result<(), AppError> {
        match &self.backend {
            Backend::Firestore(client) => {
                let _: User = client
                    .fluent()
                    .update()
                    .fields(fields.iter().copied())
                    .in_col(collections::USERS)
                    .document_id(&user.id)
                    .object(user)
                    .execute()
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;
                Ok(())
            }
            Backend::Memory(store) => {
                let updated = store.update_user(&user.id, |stored| {
                    for field in fields {
                        match *field {
                            "username" => stored.username = user.username.clone(),
                            "email" => stored.email = user.email.clone(),
                            "full_name" => stored.full_name = user.full_name.clone(),
                            "avatar" => stored.avatar = user.avatar.clone(),
                            "cover_image" => stored.cover_image = user.cover_image.clone(),
                            "watch_history" => stored.watch_history = user.watch_history.clone(),
                            "password_hash" => stored.password_hash = user.password_hash.clone(),
                            "refresh_token" => stored.refresh_token = user.refresh_token.clone(),
                            "updated_at" => stored.updated_at = user.updated_at.clone(),
                            other => tracing::warn!(field = other, "Ignoring unknown user field"),
                        }
                    }
                });
                if updated {
                    Ok(())
                } else {
                    Err(AppError::Database(format!("User {} not found", user.id)))
                }
            }
            Backend::Offline => Err(Self::offline()),
        }
    }

    // ─── Refresh Token Slot ──────────────────────────────────────

    /// Overwrite (or clear, with `None`) the stored refresh token.
    pub async fn set_refresh_token(&self, id: &str, token: Option<&str>) -> Result<(), AppError> {
        match &self.backend {
            Backend::Firestore(client) => {
                let patch = RefreshTokenPatch {
                    refresh_token: token.map(str::to_string),
                };
                let _: User = client
                    .fluent()
                    .update()
                    .fields([REFRESH_TOKEN_FIELD])
                    .in_col(collections::USERS)
                    .document_id(id)
                    .object(&patch)
                    .execute()
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;
                Ok(())
            }
            Backend::Memory(store) => {
                if store.update_user(id, |user| user.refresh_token = token.map(str::to_string)) {
                    Ok(())
                } else {
                    Err(AppError::Database(format!("User {} not found", id)))
                }
            }
            Backend::Offline => Err(Self::offline()),
        }
    }

    /// Replace the stored refresh token with `new` only if it still equals
    /// `expected`.
    ///
    /// Returns `false` when the stored value has moved on (rotated elsewhere,
    /// logged out, or a concurrent transaction won).
    pub async fn swap_refresh_token(
        &self,
        id: &str,
        expected: &str,
        new: &str,
    ) -> Result<bool, AppError> {
        match &self.backend {
            Backend::Firestore(client) => {
                let mut transaction = client.begin_transaction().await.map_err(|e| {
                    AppError::Database(format!("Failed to begin transaction: {}", e))
                })?;

                // Reads through this handle register the document for
                // conflict detection.
                let tx_client = client.clone_with_consistency_selector(
                    FirestoreConsistencySelector::Transaction(
                        transaction.transaction_id().clone(),
                    ),
                );

                let current: Option<User> = tx_client
                    .fluent()
                    .select()
                    .by_id_in(collections::USERS)
                    .obj()
                    .one(id)
                    .await
                    .map_err(|e| {
                        AppError::Database(format!("Failed to read user in transaction: {}", e))
                    })?;

                let matches = current
                    .as_ref()
                    .and_then(|user| user.refresh_token.as_deref())
                    == Some(expected);
                if !matches {
                    let _ = transaction.rollback().await;
                    return Ok(false);
                }

                let patch = RefreshTokenPatch {
                    refresh_token: Some(new.to_string()),
                };
                client
                    .fluent()
                    .update()
                    .fields([REFRESH_TOKEN_FIELD])
                    .in_col(collections::USERS)
                    .document_id(id)
                    .object(&patch)
                    .add_to_transaction(&mut transaction)
                    .map_err(|e| {
                        AppError::Database(format!("Failed to add token to transaction: {}", e))
                    })?;

                if let Err(e) = transaction.commit().await {
                    tracing::warn!(user_id = id, error = %e, "Refresh token swap lost to a concurrent write");
                    return Ok(false);
                }

                Ok(true)
            }
            Backend::Memory(store) => Ok(store.swap_refresh_token(id, expected, new)),
            Backend::Offline => Err(Self::offline()),
        }
    }

    // ─── Subscription Operations ─────────────────────────────────

    /// Number of accounts subscribed to `channel_id`.
    pub async fn count_subscribers(&self, channel_id: &str) -> Result<u64, AppError> {
        self.count_subscriptions_where("channel", channel_id).await
    }

    /// Number of channels `subscriber_id` follows.
    pub async fn count_subscribed_channels(&self, subscriber_id: &str) -> Result<u64, AppError> {
        self.count_subscriptions_where("subscriber", subscriber_id)
            .await
    }

    async fn count_subscriptions_where(&self, field: &str, value: &str) -> Result<u64, AppError> {
        match &self.backend {
            Backend::Firestore(client) => {
                let value = value.to_string();
                let counts: Vec<CountResult> = client
                    .fluent()
                    .select()
                    .from(collections::SUBSCRIPTIONS)
                    .filter(|q| q.for_all([q.field(field).eq(value.clone())]))
                    .aggregate(|a| a.fields([a.field("count").count()]))
                    .obj()
                    .query()
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;
                Ok(counts.first().map_or(0, |row| row.count))
            }
            Backend::Memory(store) => Ok(store.count_subscriptions(|s| match field {
                "channel" => s.channel == value,
                _ => s.subscriber == value,
            })),
            Backend::Offline => Err(Self::offline()),
        }
    }

    /// Whether `subscriber_id` follows `channel_id`.
    pub async fn is_subscribed(
        &self,
        subscriber_id: &str,
        channel_id: &str,
    ) -> Result<bool, AppError> {
        match &self.backend {
            Backend::Firestore(client) => {
                let subscriber = subscriber_id.to_string();
                let channel = channel_id.to_string();
                let found: Vec<Subscription> = client
                    .fluent()
                    .select()
                    .from(collections::SUBSCRIPTIONS)
                    .filter(|q| {
                        q.for_all([
                            q.field("subscriber").eq(subscriber.clone()),
                            q.field("channel").eq(channel.clone()),
                        ])
                    })
                    .limit(1)
                    .obj()
                    .query()
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;
                Ok(!found.is_empty())
            }
            Backend::Memory(store) => Ok(store.count_subscriptions(|s| {
                s.subscriber == subscriber_id && s.channel == channel_id
            }) > 0),
            Backend::Offline => Err(Self::offline()),
        }
    }

    // ─── Video Operations ────────────────────────────────────────

    /// Get a video by ID.
    pub async fn get_video(&self, id: &str) -> Result<Option<Video>, AppError> {
        match &self.backend {
            Backend::Firestore(client) => client
                .fluent()
                .select()
                .by_id_in(collections::VIDEOS)
                .obj()
                .one(id)
                .await
                .map_err(|e| AppError::Database(e.to_string())),
            Backend::Memory(store) => Ok(store.get_video(id)),
            Backend::Offline => Err(Self::offline()),
        }
    }

    /// Fetch videos in the order given, skipping IDs that no longer exist.
    ///
    /// Uses concurrent reads with a limit to avoid overloading Firestore.
    pub async fn get_videos(&self, ids: &[String]) -> Result<Vec<Video>, AppError> {
        let found: Vec<Option<Video>> = stream::iter(ids.to_vec())
            .map(|id| async move { self.get_video(&id).await })
            .buffered(MAX_CONCURRENT_DB_OPS)
            .try_collect()
            .await?;

        Ok(found.into_iter().flatten().collect())
    }
}

/// Map a failed commit. A claim document that already exists means another
/// account took the identity first.
fn commit_error(action: &str, e: FirestoreError) -> AppError {
    match e {
        FirestoreError::DataConflictError(_) => identity_conflict(),
        other => {
            tracing::warn!(error = %other, action, "Transaction commit failed");
            AppError::Database(format!("Failed to {}: {}", action, other))
        }
    }
}
