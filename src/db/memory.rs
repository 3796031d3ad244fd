// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process document store for tests and local development.
//!
//! Mirrors the Firestore collections with one `DashMap` per collection.
//! Single-document writes take the shard lock, which gives the same
//! per-document atomicity Firestore provides. Usernames and emails are
//! claimed through `DashMap::entry`, so two accounts can never hold the
//! same one.

use crate::models::{Subscription, User, Video};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Collections held in memory.
#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<String, User>,
    videos: DashMap<String, Video>,
    /// Keyed by `{subscriber}_{channel}`
    subscriptions: DashMap<String, Subscription>,
    /// Username → owning account ID
    usernames: DashMap<String, String>,
    /// Email → owning account ID
    emails: DashMap<String, String>,
}

/// Claim `key` for `owner`. Succeeds if it is free or already `owner`'s.
fn claim(map: &DashMap<String, String>, key: &str, owner: &str) -> bool {
    match map.entry(key.to_string()) {
        Entry::Occupied(entry) => entry.get() == owner,
        Entry::Vacant(entry) => {
            entry.insert(owner.to_string());
            true
        }
    }
}

fn release(map: &DashMap<String, String>, key: &str, owner: &str) {
    map.remove_if(key, |_, current| current == owner);
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_user(&self, id: &str) -> Option<User> {
        self.users.get(id).map(|entry| entry.value().clone())
    }

    pub fn find_user(&self, predicate: impl Fn(&User) -> bool) -> Option<User> {
        self.users
            .iter()
            .find(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
    }

    /// Store `user` unconditionally, claiming its username and email.
    pub fn put_user(&self, user: User) {
        self.usernames.insert(user.username.clone(), user.id.clone());
        self.emails.insert(user.email.clone(), user.id.clone());
        self.users.insert(user.id.clone(), user);
    }

    /// Insert a new account only if its ID, username and email are all free.
    pub fn insert_user(&self, user: User) -> bool {
        if !claim(&self.usernames, &user.username, &user.id) {
            return false;
        }
        if !claim(&self.emails, &user.email, &user.id) {
            release(&self.usernames, &user.username, &user.id);
            return false;
        }

        match self.users.entry(user.id.clone()) {
            Entry::Occupied(_) => {
                release(&self.usernames, &user.username, &user.id);
                release(&self.emails, &user.email, &user.id);
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(user);
                true
            }
        }
    }

    /// Move account `id` from `previous` to `email`. Returns `false` if another
    /// account holds `email`.
    pub fn claim_email(&self, id: &str, previous: &str, email: &str) -> bool {
        if !claim(&self.emails, email, id) {
            return false;
        }
        if previous != email {
            release(&self.emails, previous, id);
        }
        true
    }

    /// Apply `update` to an existing account. Returns `false` if absent.
    pub fn update_user(&self, id: &str, update: impl FnOnce(&mut User)) -> bool {
        match self.users.get_mut(id) {
            Some(mut entry) => {
                update(entry.value_mut());
                true
            }
            None => false,
        }
    }

    /// Replace the stored refresh token only if it still equals `expected`.
    pub fn swap_refresh_token(&self, id: &str, expected: &str, new: &str) -> bool {
        match self.users.get_mut(id) {
            Some(mut entry) if entry.refresh_token.as_deref() == Some(expected) => {
                entry.refresh_token = Some(new.to_string());
                true
            }
            _ => false,
        }
    }

    pub fn get_video(&self, id: &str) -> Option<Video> {
        self.videos.get(id).map(|entry| entry.value().clone())
    }

    pub fn put_video(&self, video: Video) {
        self.videos.insert(video.id.clone(), video);
    }

    pub fn put_subscription(&self, subscription: Subscription) {
        let key = format!("{}_{}", subscription.subscriber, subscription.channel);
        self.subscriptions.insert(key, subscription);
    }

    pub fn count_subscriptions(&self, predicate: impl Fn(&Subscription) -> bool) -> u64 {
        self.subscriptions
            .iter()
            .filter(|entry| predicate(entry.value()))
            .count() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, token: Option<&str>) -> User {
        User {
            id: id.to_string(),
            username: id.to_string(),
            email: format!("{}@example.com", id),
            full_name: "Test".to_string(),
            avatar: "mock://avatar".to_string(),
            cover_image: None,
            watch_history: vec![],
            password_hash: "hash".to_string(),
            refresh_token: token.map(str::to_string),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_swap_only_from_expected_value() {
        let store = MemoryStore::new();
        store.put_user(user("u1", Some("r1")));

        assert!(!store.swap_refresh_token("u1", "stale", "r2"));
        assert!(store.swap_refresh_token("u1", "r1", "r2"));
        assert!(!store.swap_refresh_token("u1", "r1", "r3"));
        assert_eq!(
            store.get_user("u1").unwrap().refresh_token.as_deref(),
            Some("r2")
        );
    }

    #[test]
    fn test_swap_fails_when_cleared_or_missing() {
        let store = MemoryStore::new();
        store.put_user(user("u1", None));

        assert!(!store.swap_refresh_token("u1", "r1", "r2"));
        assert!(!store.swap_refresh_token("nobody", "r1", "r2"));
    }

    #[test]
    fn test_insert_rejects_taken_identity() {
        let store = MemoryStore::new();
        assert!(store.insert_user(user("u1", None)));

        let mut same_username = user("u2", None);
        same_username.username = "u1".to_string();
        assert!(!store.insert_user(same_username));

        let mut same_email = user("u3", None);
        same_email.email = "u1@example.com".to_string();
        assert!(!store.insert_user(same_email));

        // Failed inserts leave nothing claimed behind
        assert!(store.insert_user(user("u2", None)));
        assert!(store.insert_user(user("u3", None)));
    }

    #[test]
    fn test_claim_email_moves_ownership() {
        let store = MemoryStore::new();
        store.insert_user(user("u1", None));
        store.insert_user(user("u2", None));

        assert!(!store.claim_email("u2", "u2@example.com", "u1@example.com"));
        assert!(store.claim_email("u1", "u1@example.com", "new@example.com"));
        assert!(store.claim_email("u2", "u2@example.com", "u1@example.com"));
    }

    #[test]
    fn test_subscription_counts() {
        let store = MemoryStore::new();
        for (subscriber, channel) in [("a", "c"), ("b", "c"), ("c", "a")] {
            store.put_subscription(Subscription {
                subscriber: subscriber.to_string(),
                channel: channel.to_string(),
                created_at: "2026-01-01T00:00:00Z".to_string(),
            });
        }

        assert_eq!(store.count_subscriptions(|s| s.channel == "c"), 2);
        assert_eq!(store.count_subscriptions(|s| s.subscriber == "c"), 1);
    }
}
