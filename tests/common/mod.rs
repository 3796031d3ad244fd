// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::{
    body::Body,
    http::{header, Request, Response, StatusCode},
    Router,
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;
use videotube::config::Config;
use videotube::db::{FirestoreDb, MemoryStore};
use videotube::routes::create_router;
use videotube::services::{MediaService, TokenService};
use videotube::AppState;

#[allow(dead_code)]
pub const BOUNDARY: &str = "videotube-test-boundary";
#[allow(dead_code)]
pub const PASSWORD: &str = "correct horse battery";

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Test app over an in-memory store and mock media host.
#[allow(dead_code)]
pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
}

/// Create a test app with in-memory dependencies.
#[allow(dead_code)]
pub fn create_test_app() -> TestApp {
    create_test_app_with(Config::test_default(), MediaService::new_mock())
}

#[allow(dead_code)]
pub fn create_test_app_with(config: Config, media: MediaService) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let db = FirestoreDb::with_memory_store(store.clone());
    let tokens = TokenService::new(config.token_config());

    let state = Arc::new(AppState {
        config,
        db,
        tokens,
        media,
    });

    TestApp {
        router: create_router(state.clone()),
        state,
        store,
    }
}

/// One part of a multipart form.
#[allow(dead_code)]
pub enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

/// Encode `parts` as a `multipart/form-data` body using [`BOUNDARY`].
#[allow(dead_code)]
pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, file_name, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                         Content-Type: image/png\r\n\r\n",
                        name, file_name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

#[allow(dead_code)]
pub fn multipart_request(method: &str, uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

#[allow(dead_code)]
pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[allow(dead_code)]
pub fn bearer_request(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

/// Send a request through a clone of the router.
#[allow(dead_code)]
pub async fn send(app: &TestApp, request: Request<Body>) -> Response<Body> {
    app.router.clone().oneshot(request).await.unwrap()
}

#[allow(dead_code)]
pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// All `Set-Cookie` header values on a response.
#[allow(dead_code)]
pub fn set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

/// Register `username` with email `{username}@example.com`.
#[allow(dead_code)]
pub async fn register_user(app: &TestApp, username: &str) -> Value {
    let email = format!("{}@example.com", username);
    let request = multipart_request(
        "POST",
        "/api/v1/users/register",
        &[
            Part::Text("fullName", "Test User"),
            Part::Text("email", &email),
            Part::Text("username", username),
            Part::Text("password", PASSWORD),
            Part::File("avatar", "avatar.png", b"\x89PNG avatar"),
        ],
    );
    let response = send(app, request).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await["data"].clone()
}

/// Log in and return `(accessToken, refreshToken)`.
#[allow(dead_code)]
pub async fn login(app: &TestApp, username: &str) -> (String, String) {
    let request = json_request(
        "POST",
        "/api/v1/users/login",
        serde_json::json!({ "username": username, "password": PASSWORD }),
    );
    let response = send(app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    (
        body["data"]["accessToken"].as_str().unwrap().to_string(),
        body["data"]["refreshToken"].as_str().unwrap().to_string(),
    )
}
