// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Account routes for authenticated users.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::user::normalize_identity;
use crate::models::{ChannelProfile, OwnerSummary, PublicUser, User, WatchedVideo};
use crate::response::{ApiResponse, Empty};
use crate::routes::{auth::MAX_UPLOAD_BYTES, read_upload};
use crate::services::password::{hash_password, verify_password};
use crate::services::UploadFile;
use crate::time_utils::now_rfc3339;
use crate::AppState;
use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::JsonRejection,
        DefaultBodyLimit, Multipart, Path, State,
    },
    routing::{get, patch, post},
    Extension, Json, Router,
};
use futures_util::{stream, StreamExt, TryStreamExt};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use validator::Validate;

/// Account routes (require authentication).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/users/change-password", post(change_password))
        .route("/api/v1/users/current-user", get(current_user))
        .route("/api/v1/users/update-account", patch(update_account))
        .route(
            "/api/v1/users/avatar",
            patch(update_avatar).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route(
            "/api/v1/users/cover-image",
            patch(update_cover_image).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/v1/users/c/{username}", get(channel_profile))
        .route("/api/v1/users/watch-history", get(watch_history))
}

/// Load the full account document behind the session.
///
/// An account deleted after the middleware ran is treated like a session
/// for a deleted account: the token no longer names a live user.
async fn load_account(state: &AppState, auth: &AuthUser) -> Result<User> {
    state.db.get_user(&auth.user.id).await?.ok_or_else(|| {
        tracing::warn!(user_id = %auth.user.id, "Session account disappeared mid-request");
        AppError::InvalidToken
    })
}

// ─── Password ────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangePasswordRequest {
    #[serde(default)]
    old_password: String,
    #[serde(default)]
    new_password: String,
}

/// Replace the password after checking the current one.
async fn change_password(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    payload: std::result::Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<ApiResponse<Empty>> {
    let Json(body) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;

    if body.new_password.trim().is_empty() {
        return Err(AppError::BadRequest("New password is required".to_string()));
    }

    let mut user = load_account(&state, &auth).await?;

    if !verify_password(body.old_password, user.password_hash.clone()).await? {
        return Err(AppError::BadRequest("Invalid old password".to_string()));
    }

    user.password_hash = hash_password(body.new_password, state.config.bcrypt_cost).await?;
    user.updated_at = now_rfc3339();
    state
        .db
        .update_user_fields(&user, &["password_hash", "updated_at"])
        .await?;

    tracing::info!(user_id = %user.id, "Password changed");

    Ok(ApiResponse::ok(Empty {}, "Password changed successfully"))
}

// ─── Profile ─────────────────────────────────────────────────

/// Account attached by the session middleware.
async fn current_user(Extension(auth): Extension<AuthUser>) -> ApiResponse<PublicUser> {
    ApiResponse::ok(auth.user, "Current user fetched successfully")
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct UpdateAccountRequest {
    #[serde(default)]
    #[validate(length(max = 128, message = "Full name is too long"))]
    full_name: Option<String>,
    #[serde(default)]
    #[validate(email(message = "Invalid email address"))]
    email: Option<String>,
}

/// Change display name and/or email.
async fn update_account(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    payload: std::result::Result<Json<UpdateAccountRequest>, JsonRejection>,
) -> Result<ApiResponse<PublicUser>> {
    let Json(body) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let request = UpdateAccountRequest {
        full_name: body
            .full_name
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()),
        email: body
            .email
            .map(|v| normalize_identity(&v))
            .filter(|v| !v.is_empty()),
    };

    if request.full_name.is_none() && request.email.is_none() {
        return Err(AppError::BadRequest(
            "Provide at least one of fullName or email".to_string(),
        ));
    }
    request
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let mut user = load_account(&state, &auth).await?;
    let previous_email = user.email.clone();
    let mut fields = vec!["updated_at"];

    if let Some(email) = request.email.filter(|email| *email != user.email) {
        user.email = email;
        fields.push("email");
    }
    if let Some(full_name) = request.full_name {
        user.full_name = full_name;
        fields.push("full_name");
    }

    user.updated_at = now_rfc3339();
    if user.email != previous_email {
        state
            .db
            .change_email(&user, &previous_email, &fields)
            .await
            .map_err(|e| match e {
                AppError::Conflict(_) => AppError::Conflict("Email already in use".to_string()),
                other => other,
            })?;
    } else {
        state.db.update_user_fields(&user, &fields).await?;
    }

    Ok(ApiResponse::ok(
        PublicUser::from(user),
        "Account details updated successfully",
    ))
}

// ─── Images ──────────────────────────────────────────────────

/// Pull the single file field `name` out of a multipart body.
async fn single_upload(
    multipart: std::result::Result<Multipart, MultipartRejection>,
    name: &str,
) -> Result<Option<UploadFile>> {
    let mut multipart = multipart.map_err(|e| AppError::BadRequest(e.body_text()))?;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| AppError::BadRequest("Invalid multipart data".to_string()))?
    {
        if field.name() == Some(name) {
            return Ok(Some(read_upload(field).await?));
        }
    }
    Ok(None)
}

#[derive(Clone, Copy)]
enum ImageSlot {
    Avatar,
    CoverImage,
}

impl ImageSlot {
    fn form_field(self) -> &'static str {
        match self {
            ImageSlot::Avatar => "avatar",
            ImageSlot::CoverImage => "coverImage",
        }
    }

    fn folder(self) -> &'static str {
        match self {
            ImageSlot::Avatar => "avatars",
            ImageSlot::CoverImage => "cover-images",
        }
    }

    fn label(self) -> &'static str {
        match self {
            ImageSlot::Avatar => "avatar",
            ImageSlot::CoverImage => "cover image",
        }
    }
}

async fn replace_image(
    state: &AppState,
    auth: &AuthUser,
    multipart: std::result::Result<Multipart, MultipartRejection>,
    slot: ImageSlot,
) -> Result<PublicUser> {
    let file = single_upload(multipart, slot.form_field())
        .await?
        .ok_or_else(|| AppError::BadRequest(format!("Please provide a {}", slot.label())))?;

    let url = state
        .media
        .upload(slot.folder(), file)
        .await
        .ok_or_else(|| AppError::BadRequest(format!("Failed to upload {}", slot.label())))?;

    let mut user = load_account(state, auth).await?;
    let field = match slot {
        ImageSlot::Avatar => {
            user.avatar = url;
            "avatar"
        }
        ImageSlot::CoverImage => {
            user.cover_image = Some(url);
            "cover_image"
        }
    };
    user.updated_at = now_rfc3339();
    state
        .db
        .update_user_fields(&user, &[field, "updated_at"])
        .await?;

    Ok(PublicUser::from(user))
}

async fn update_avatar(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<ApiResponse<PublicUser>> {
    let user = replace_image(&state, &auth, multipart, ImageSlot::Avatar).await?;
    Ok(ApiResponse::ok(user, "Avatar updated successfully"))
}

async fn update_cover_image(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<ApiResponse<PublicUser>> {
    let user = replace_image(&state, &auth, multipart, ImageSlot::CoverImage).await?;
    Ok(ApiResponse::ok(user, "Cover image updated successfully"))
}

// ─── Channel ─────────────────────────────────────────────────

/// Channel page for `username`, with subscription counts relative to the
/// caller.
async fn channel_profile(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(username): Path<String>,
) -> Result<ApiResponse<ChannelProfile>> {
    let username = normalize_identity(&username);
    if username.is_empty() {
        return Err(AppError::BadRequest("Username is missing".to_string()));
    }

    let channel = state
        .db
        .find_user_by_username(&username)
        .await?
        .ok_or_else(|| AppError::NotFound("Channel does not exist".to_string()))?;

    let (subscribers_count, channels_subscribed_to_count, is_subscribed) = tokio::try_join!(
        state.db.count_subscribers(&channel.id),
        state.db.count_subscribed_channels(&channel.id),
        state.db.is_subscribed(&auth.user.id, &channel.id),
    )?;

    let profile = ChannelProfile {
        id: channel.id,
        username: channel.username,
        full_name: channel.full_name,
        email: channel.email,
        avatar: channel.avatar,
        cover_image: channel.cover_image,
        subscribers_count,
        channels_subscribed_to_count,
        is_subscribed,
    };

    Ok(ApiResponse::ok(profile, "Channel profile fetched successfully"))
}

// ─── Watch History ───────────────────────────────────────────

const MAX_CONCURRENT_OWNER_LOOKUPS: usize = 8;

/// Videos in the caller's watch history, each with its uploader.
async fn watch_history(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> Result<ApiResponse<Vec<WatchedVideo>>> {
    let videos = state.db.get_videos(&auth.user.watch_history).await?;

    let owner_ids: HashSet<String> = videos.iter().map(|v| v.owner.clone()).collect();
    let db = &state.db;
    let owners: HashMap<String, OwnerSummary> = stream::iter(owner_ids)
        .map(|id| async move { db.get_user(&id).await })
        .buffer_unordered(MAX_CONCURRENT_OWNER_LOOKUPS)
        .try_filter_map(|user| async move {
            Ok::<_, AppError>(user.map(|u| (u.id.clone(), OwnerSummary::from(&u))))
        })
        .try_collect()
        .await?;

    let history = videos
        .into_iter()
        .map(|video| {
            let owner = owners.get(&video.owner).cloned();
            WatchedVideo::new(video, owner)
        })
        .collect();

    Ok(ApiResponse::ok(history, "Watch history fetched successfully"))
}
