// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod media;
pub mod password;
pub mod tokens;

pub use media::{MediaService, UploadFile};
pub use tokens::{TokenConfig, TokenPair, TokenService};
