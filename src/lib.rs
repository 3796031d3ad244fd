// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! VideoTube: account and session backend for a video platform
//!
//! This crate provides the user-account API: registration, login, token
//! rotation, profile management, channel pages and watch history.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod response;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::FirestoreDb;
use services::{MediaService, TokenService};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub db: FirestoreDb,
    pub tokens: TokenService,
    pub media: MediaService,
}
