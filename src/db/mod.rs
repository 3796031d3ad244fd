//! Database layer (Firestore, with an in-memory stand-in).

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryStore;

/// Collection names as constants.
pub mod collections {
    pub const USERS: &str = "users";
    /// Username claims keyed by hex-encoded username, one per account
    pub const USERNAMES: &str = "usernames";
    /// Email claims keyed by hex-encoded email, one per account
    pub const EMAILS: &str = "emails";
    /// Subscriber → channel edges (written by the subscriptions service)
    pub const SUBSCRIPTIONS: &str = "subscriptions";
    /// Uploaded videos (written by the video service)
    pub const VIDEOS: &str = "videos";
}
