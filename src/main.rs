// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! VideoTube API Server
//!
//! Serves user accounts, sessions and channel pages for the video platform.

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use videotube::{
    config::Config,
    db::FirestoreDb,
    services::{MediaService, TokenService},
    AppState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging();

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(port = config.port, "Starting VideoTube API");

    let db = if config.in_memory_db {
        tracing::warn!("Using in-memory store; data is lost on restart");
        FirestoreDb::new_in_memory()
    } else {
        FirestoreDb::new(&config.gcp_project_id).await?
    };

    let tokens = TokenService::new(config.token_config());

    let media = MediaService::new(config.cloudinary.clone());

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        db,
        tokens,
        media,
    });

    // Build router
    let app = videotube::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("videotube=debug,info")),
        )
        .with(format)
        .init();
}
