use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Row of the `users` table the engine cares about.
#[derive(Debug, Clone, FromRow)]
pub struct UserRecord {
    pub id: i64,
    pub nickname: String,
    pub ip_address: Option<String>,
    pub total_messages: i64,
}

/// One history entry, shaped exactly like the `history` envelope rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct StoredMessage {
    pub nickname: String,
    pub message: String,
    pub message_type: String,
    /// `HH:MM:SS` wall-clock string, formatted by the store.
    pub time: String,
}

/// The statistics blob carried by the `stats` envelope. Keys stay camelCase
/// for compatibility with existing front-ends.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total_users: i64,
    pub total_messages: i64,
    pub total_sessions: i64,
    pub today_messages: i64,
}

/// Most active users, reported by the maintenance binary.
#[derive(Debug, Clone, FromRow)]
pub struct TopUser {
    pub nickname: String,
    pub total_messages: i64,
    pub last_seen: String,
}
