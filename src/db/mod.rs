//! Persistence collaborator: chat history, users, sessions and statistics.
//!
//! The protocol engine treats this layer as an opaque dependency behind the
//! [`ChatStore`] trait; every call is fire-and-forget from its point of
//! view, so failures here are logged and never reach the broadcast path.

pub mod models;
pub mod store;

pub use models::{Statistics, StoredMessage, TopUser, UserRecord};
pub use store::{ChatStore, SqliteStore};

#[cfg(test)]
pub use store::MockChatStore;
