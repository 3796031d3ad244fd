// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Subscriptions, videos and the computed channel views built from them.
//!
//! The `subscriptions` and `videos` collections are owned by other services;
//! this crate only reads them.

use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::models::User;

/// A subscriber → channel edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Account ID of the subscriber
    pub subscriber: String,
    /// Account ID of the channel being followed
    pub channel: String,
    pub created_at: String,
}

/// Uploaded video document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    /// Video ID (also used as document ID)
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub thumbnail: String,
    pub video_file: String,
    /// Length in seconds
    pub duration: f64,
    #[serde(default)]
    pub views: u64,
    /// Account ID of the uploader
    pub owner: String,
    pub created_at: String,
}

/// Channel page for a username.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ChannelProfile {
    pub id: String,
    pub username: String,
    pub full_name: String,
    pub email: String,
    pub avatar: String,
    pub cover_image: Option<String>,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub subscribers_count: u64,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub channels_subscribed_to_count: u64,
    /// Whether the requesting account follows this channel
    pub is_subscribed: bool,
}

/// Minimal uploader details embedded in video listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct OwnerSummary {
    pub username: String,
    pub full_name: String,
    pub avatar: String,
}

impl From<&User> for OwnerSummary {
    fn from(user: &User) -> Self {
        Self {
            username: user.username.clone(),
            full_name: user.full_name.clone(),
            avatar: user.avatar.clone(),
        }
    }
}

/// One entry of a watch-history listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct WatchedVideo {
    pub id: String,
    pub title: String,
    pub description: String,
    pub thumbnail: String,
    pub video_file: String,
    pub duration: f64,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub views: u64,
    pub created_at: String,
    /// `None` when the uploader's account no longer exists
    pub owner: Option<OwnerSummary>,
}

impl WatchedVideo {
    pub fn new(video: Video, owner: Option<OwnerSummary>) -> Self {
        Self {
            id: video.id,
            title: video.title,
            description: video.description,
            thumbnail: video.thumbnail,
            video_file: video.video_file,
            duration: video.duration,
            views: video.views,
            created_at: video.created_at,
            owner,
        }
    }
}
