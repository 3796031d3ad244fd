// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API authentication and CORS tests.
//!
//! These tests verify that:
//! 1. Protected routes reject requests without valid tokens
//! 2. Protected routes accept tokens from the cookie or a bearer header
//! 3. CORS preflight requests return correct headers

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;

mod common;
use common::{bearer_request, body_json, create_test_app, login, register_user, send};

const CURRENT_USER: &str = "/api/v1/users/current-user";

#[tokio::test]
async fn test_protected_route_without_token() {
    let app = create_test_app();

    let response = send(
        &app,
        Request::builder()
            .method("GET")
            .uri(CURRENT_USER)
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    // Should return 401 Unauthorized without token
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Unauthorized request");
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_protected_route_with_invalid_token() {
    let app = create_test_app();

    let response = send(&app, bearer_request("GET", CURRENT_USER, "invalid.token.here")).await;

    // Should return 401 Unauthorized with invalid token
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Invalid or expired token");
}

#[tokio::test]
async fn test_protected_route_with_bearer_token() {
    let app = create_test_app();
    register_user(&app, "kate").await;
    let (access, _) = login(&app, "kate").await;

    let response = send(&app, bearer_request("GET", CURRENT_USER, &access)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["data"]["username"], "kate");
    assert_eq!(body["message"], "Current user fetched successfully");
}

#[tokio::test]
async fn test_protected_route_with_cookie() {
    let app = create_test_app();
    register_user(&app, "leo").await;
    let (access, _) = login(&app, "leo").await;

    let response = send(
        &app,
        Request::builder()
            .method("GET")
            .uri(CURRENT_USER)
            .header(header::COOKIE, format!("accessToken={}", access))
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_expired_access_token_is_rejected() {
    let app = create_test_app();
    register_user(&app, "mia").await;
    let user = app.store.find_user(|u| u.username == "mia").unwrap();

    // Validly signed, but its window closed a second ago
    let issued = Utc::now() - app.state.tokens.access_ttl() - Duration::seconds(1);
    let token = app
        .state
        .tokens
        .create_access_token_at(&user, issued)
        .unwrap();

    let response = send(&app, bearer_request("GET", CURRENT_USER, &token)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_token_signed_with_other_key_is_rejected() {
    #[derive(Serialize)]
    struct Claims {
        sub: String,
        iat: i64,
        exp: i64,
    }

    let app = create_test_app();
    register_user(&app, "ned").await;
    let user = app.store.find_user(|u| u.username == "ned").unwrap();

    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user.id,
        iat: now,
        exp: now + 3600,
    };
    // The refresh key must not open protected routes
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(&app.state.config.refresh_token_secret),
    )
    .unwrap();

    let response = send(&app, bearer_request("GET", CURRENT_USER, &token)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_token_for_deleted_account_is_rejected() {
    let app = create_test_app();
    register_user(&app, "olga").await;
    let mut user = app.store.find_user(|u| u.username == "olga").unwrap();

    // Mint for an account ID that does not exist
    user.id = "00000000-0000-4000-8000-000000000000".to_string();
    let token = app.state.tokens.create_access_token(&user).unwrap();

    let response = send(&app, bearer_request("GET", CURRENT_USER, &token)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Invalid or expired token");
}

#[tokio::test]
async fn test_cors_preflight() {
    let app = create_test_app();

    let response = send(
        &app,
        Request::builder()
            .method("OPTIONS")
            .uri("/api/v1/users/update-account")
            .header(header::ORIGIN, "http://localhost:5173")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "PATCH")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    // OPTIONS should return 200 (CORS preflight success)
    assert_eq!(response.status(), StatusCode::OK);

    // Should have CORS headers
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://localhost:5173"
    );
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS],
        "true"
    );
    assert!(response
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));
}

#[tokio::test]
async fn test_cors_rejects_unknown_origin() {
    let app = create_test_app();

    let response = send(
        &app,
        Request::builder()
            .method("OPTIONS")
            .uri(CURRENT_USER)
            .header(header::ORIGIN, "https://evil.example")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert!(!response
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
}

#[tokio::test]
async fn test_public_route_no_auth_required() {
    let app = create_test_app();

    let response = send(
        &app,
        Request::builder()
            .method("GET")
            .uri("/health")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    // Health should be accessible without auth
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}
