// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Session middleware: require a valid access token.

use crate::config::ACCESS_TOKEN_COOKIE;
use crate::error::AppError;
use crate::models::PublicUser;
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;

/// Authenticated account, attached to the request by [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: PublicUser,
}

/// Pull the access token from the `accessToken` cookie, falling back to an
/// `Authorization: Bearer` header.
pub fn extract_access_token(jar: &CookieJar, headers: &HeaderMap) -> Option<String> {
    if let Some(cookie) = jar.get(ACCESS_TOKEN_COOKIE) {
        if !cookie.value().is_empty() {
            return Some(cookie.value().to_string());
        }
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Middleware that requires a valid access token and a live account.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_access_token(&jar, request.headers()).ok_or(AppError::Unauthorized)?;

    let claims = state.tokens.verify_access(&token)?;

    let user = state.db.get_user(&claims.sub).await?.ok_or_else(|| {
        tracing::warn!(user_id = %claims.sub, "Access token for deleted account");
        AppError::InvalidToken
    })?;

    request.extensions_mut().insert(AuthUser {
        user: PublicUser::from(user),
    });

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn jar_with(cookie: &str) -> CookieJar {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(cookie).unwrap());
        CookieJar::from_headers(&headers)
    }

    fn bearer(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_cookie_wins_over_header() {
        let token = extract_access_token(&jar_with("accessToken=from-cookie"), &bearer("Bearer from-header"));
        assert_eq!(token.as_deref(), Some("from-cookie"));
    }

    #[test]
    fn test_bearer_header_fallback() {
        let token = extract_access_token(&CookieJar::new(), &bearer("Bearer abc.def.ghi"));
        assert_eq!(token.as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn test_missing_or_wrong_scheme() {
        assert!(extract_access_token(&CookieJar::new(), &HeaderMap::new()).is_none());
        assert!(extract_access_token(&CookieJar::new(), &bearer("Basic dXNlcjpwdw==")).is_none());
        assert!(extract_access_token(&CookieJar::new(), &bearer("Bearer ")).is_none());
        assert!(extract_access_token(&jar_with("refreshToken=r"), &HeaderMap::new()).is_none());
    }
}
