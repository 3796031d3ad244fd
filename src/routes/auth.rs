// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Registration, login, token rotation and logout.

use axum::{
    body::Bytes,
    extract::{
        multipart::MultipartRejection,
        rejection::JsonRejection,
        DefaultBodyLimit, Multipart, State,
    },
    routing::post,
    Extension, Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use crate::config::{ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE};
use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::user::normalize_identity;
use crate::models::{PublicUser, User};
use crate::response::{ApiResponse, Empty};
use crate::routes::read_upload;
use crate::services::password::{hash_password, verify_password};
use crate::services::{TokenPair, UploadFile};
use crate::time_utils::now_rfc3339;
use crate::AppState;

/// Largest accepted registration form (avatar + cover image).
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Public routes: no session required.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/v1/users/register",
            post(register).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/v1/users/login", post(login))
        .route("/api/v1/users/refresh-token", post(refresh_token))
}

/// Routes that act on the current session (auth middleware applied in
/// routes/mod.rs).
pub fn session_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/v1/users/logout", post(logout))
}

// ─── Cookies ─────────────────────────────────────────────────

fn session_cookie(name: &'static str, value: String, max_age: Duration, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(time::Duration::seconds(max_age.num_seconds()))
        .build()
}

/// Expired, empty cookie. Sent unconditionally so clients that
/// authenticated with a bearer header still drop stale cookies.
fn removal_cookie(name: &'static str, secure: bool) -> Cookie<'static> {
    let mut cookie = Cookie::build(name)
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .build();
    cookie.make_removal();
    cookie
}

fn with_session_cookies(jar: CookieJar, state: &AppState, pair: &TokenPair) -> CookieJar {
    let secure = state.config.cookie_secure;
    jar.add(session_cookie(
        ACCESS_TOKEN_COOKIE,
        pair.access_token.clone(),
        state.tokens.access_ttl(),
        secure,
    ))
    .add(session_cookie(
        REFRESH_TOKEN_COOKIE,
        pair.refresh_token.clone(),
        state.tokens.refresh_ttl(),
        secure,
    ))
}

// ─── Registration ────────────────────────────────────────────

/// Text fields of the registration form after trimming.
#[derive(Debug, Validate)]
struct NewAccount {
    #[validate(length(min = 1, max = 64, message = "Username must be 1 to 64 characters"))]
    username: String,
    #[validate(email(message = "Invalid email address"))]
    email: String,
    #[validate(length(min = 1, max = 128, message = "Full name must be 1 to 128 characters"))]
    full_name: String,
    #[validate(length(min = 1, message = "Password is required"))]
    password: String,
}

/// Register a new account (multipart form).
///
/// Expected fields:
/// - `fullName`, `email`, `username`, `password`: text
/// - `avatar`: image file (required)
/// - `coverImage`: image file (optional)
async fn register(
    State(state): State<Arc<AppState>>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<ApiResponse<PublicUser>> {
    let mut multipart = multipart.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let mut full_name: Option<String> = None;
    let mut email: Option<String> = None;
    let mut username: Option<String> = None;
    let mut password: Option<String> = None;
    let mut avatar: Option<UploadFile> = None;
    let mut cover_image: Option<UploadFile> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| AppError::BadRequest("Invalid multipart data".to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "fullName" | "email" | "username" | "password" => {
                let text = field
                    .text()
                    .await
                    .map_err(|_| AppError::BadRequest(format!("Failed to read {}", name)))?;
                match name.as_str() {
                    "fullName" => full_name = Some(text),
                    "email" => email = Some(text),
                    "username" => username = Some(text),
                    _ => password = Some(text),
                }
            }
            "avatar" => avatar = Some(read_upload(field).await?),
            "coverImage" => cover_image = Some(read_upload(field).await?),
            _ => {
                // Ignore unknown fields
            }
        }
    }

    let all_present = [&full_name, &email, &username, &password]
        .iter()
        .all(|field| field.as_deref().is_some_and(|v| !v.trim().is_empty()));
    if !all_present {
        return Err(AppError::BadRequest("All fields are required".to_string()));
    }

    let account = NewAccount {
        username: normalize_identity(username.as_deref().unwrap_or_default()),
        email: normalize_identity(email.as_deref().unwrap_or_default()),
        full_name: full_name.unwrap_or_default().trim().to_string(),
        password: password.unwrap_or_default(),
    };
    account
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    if state
        .db
        .find_user_by_identity(Some(&account.username), Some(&account.email))
        .await?
        .is_some()
    {
        return Err(AppError::Conflict(
            "Username or email already exists".to_string(),
        ));
    }

    let avatar = avatar.ok_or_else(|| AppError::BadRequest("Avatar file is required".to_string()))?;
    let avatar_url = state
        .media
        .upload("avatars", avatar)
        .await
        .ok_or_else(|| AppError::BadRequest("Avatar file is required".to_string()))?;

    let cover_image_url = match cover_image {
        Some(file) => state.media.upload("cover-images", file).await,
        None => None,
    };

    let password_hash = hash_password(account.password, state.config.bcrypt_cost).await?;
    let now = now_rfc3339();

    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        username: account.username,
        email: account.email,
        full_name: account.full_name,
        avatar: avatar_url,
        cover_image: cover_image_url,
        watch_history: Vec::new(),
        password_hash,
        refresh_token: None,
        created_at: now.clone(),
        updated_at: now,
    };
    state.db.create_user(&user).await?;

    tracing::info!(user_id = %user.id, username = %user.username, "Account registered");

    Ok(ApiResponse::created(
        PublicUser::from(user),
        "User registered successfully",
    ))
}

// ─── Login ───────────────────────────────────────────────────

#[derive(Deserialize)]
struct LoginRequest {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub user: PublicUser,
    pub access_token: String,
    pub refresh_token: String,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| normalize_identity(&v))
        .filter(|v| !v.is_empty())
}

/// Log in with username or email and password.
async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    payload: std::result::Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(CookieJar, ApiResponse<LoginResponse>)> {
    let Json(body) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let username = non_blank(body.username);
    let email = non_blank(body.email);
    if username.is_none() && email.is_none() {
        return Err(AppError::BadRequest(
            "Username or email is required".to_string(),
        ));
    }
    if body.password.is_empty() {
        return Err(AppError::BadRequest("Password is required".to_string()));
    }

    let user = state
        .db
        .find_user_by_identity(username.as_deref(), email.as_deref())
        .await?
        .ok_or_else(|| AppError::NotFound("User does not exist".to_string()))?;

    if !verify_password(body.password, user.password_hash.clone()).await? {
        tracing::info!(user_id = %user.id, "Login rejected: wrong password");
        return Err(AppError::InvalidCredentials);
    }

    let pair = state.tokens.issue(&state.db, &user.id).await?;
    tracing::info!(user_id = %user.id, "User logged in");

    let jar = with_session_cookies(jar, &state, &pair);
    Ok((
        jar,
        ApiResponse::ok(
            LoginResponse {
                user: PublicUser::from(user),
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
            },
            "User logged in successfully",
        ),
    ))
}

// ─── Rotation ────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Refresh token from the cookie, else from a JSON body.
fn incoming_refresh_token(jar: &CookieJar, body: &[u8]) -> Option<String> {
    jar.get(REFRESH_TOKEN_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
        .or_else(|| {
            serde_json::from_slice::<RefreshRequest>(body)
                .ok()
                .and_then(|req| req.refresh_token)
                .filter(|token| !token.is_empty())
        })
}

/// Exchange a refresh token for a new access/refresh pair.
async fn refresh_token(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    body: Bytes,
) -> Result<(CookieJar, ApiResponse<TokenPair>)> {
    let incoming = incoming_refresh_token(&jar, &body).ok_or(AppError::Unauthorized)?;

    let pair = state.tokens.rotate(&state.db, &incoming).await?;

    let jar = with_session_cookies(jar, &state, &pair);
    Ok((
        jar,
        ApiResponse::ok(pair, "Access token refreshed"),
    ))
}

// ─── Logout ──────────────────────────────────────────────────

/// End the session: forget the stored refresh token and drop both cookies.
async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    jar: CookieJar,
) -> Result<(CookieJar, ApiResponse<Empty>)> {
    state.tokens.revoke(&state.db, &auth.user.id).await?;
    tracing::info!(user_id = %auth.user.id, "User logged out");

    let secure = state.config.cookie_secure;
    let jar = jar
        .add(removal_cookie(ACCESS_TOKEN_COOKIE, secure))
        .add(removal_cookie(REFRESH_TOKEN_COOKIE, secure));

    Ok((jar, ApiResponse::ok(Empty {}, "User logged out")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = session_cookie("accessToken", "abc".to_string(), Duration::minutes(15), true);
        let rendered = cookie.to_string();

        assert!(rendered.starts_with("accessToken=abc"));
        assert!(rendered.contains("HttpOnly"));
        assert!(rendered.contains("Secure"));
        assert!(rendered.contains("SameSite=Lax"));
        assert!(rendered.contains("Path=/"));
        assert!(rendered.contains("Max-Age=900"));
    }

    #[test]
    fn test_removal_cookie_expires_immediately() {
        let rendered = removal_cookie("refreshToken", false).to_string();

        assert!(rendered.starts_with("refreshToken=;"));
        assert!(rendered.contains("Max-Age=0"));
        assert!(rendered.contains("Path=/"));
        assert!(!rendered.contains("Secure"));
    }

    #[test]
    fn test_refresh_token_prefers_cookie() {
        let jar = CookieJar::new().add(Cookie::new("refreshToken", "from-cookie"));
        let body = br#"{"refreshToken":"from-body"}"#;
        assert_eq!(
            incoming_refresh_token(&jar, body).as_deref(),
            Some("from-cookie")
        );
    }

    #[test]
    fn test_refresh_token_from_body_or_absent() {
        let jar = CookieJar::new();
        assert_eq!(
            incoming_refresh_token(&jar, br#"{"refreshToken":"from-body"}"#).as_deref(),
            Some("from-body")
        );
        assert!(incoming_refresh_token(&jar, b"").is_none());
        assert!(incoming_refresh_token(&jar, b"not json").is_none());
        assert!(incoming_refresh_token(&jar, br#"{"refreshToken":""}"#).is_none());
    }

    #[test]
    fn test_new_account_validation() {
        let account = NewAccount {
            username: "alice".to_string(),
            email: "not-an-email".to_string(),
            full_name: "Alice".to_string(),
            password: "pw".to_string(),
        };
        assert!(account.validate().is_err());
    }

    #[test]
    fn test_long_username_reports_length_not_absence() {
        let account = NewAccount {
            username: "a".repeat(65),
            email: "alice@example.com".to_string(),
            full_name: "Alice".to_string(),
            password: "pw".to_string(),
        };
        let message = account.validate().unwrap_err().to_string();
        assert!(message.contains("Username must be 1 to 64 characters"));
        assert!(!message.contains("required"));

        let account = NewAccount {
            username: "a".repeat(64),
            ..account
        };
        assert!(account.validate().is_ok());
    }
}
