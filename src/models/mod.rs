// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Data models for the application.

pub mod channel;
pub mod user;

pub use channel::{ChannelProfile, OwnerSummary, Subscription, Video, WatchedVideo};
pub use user::{PublicUser, User};
