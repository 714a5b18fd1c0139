//! JSON message envelopes carried inside text frames.
//!
//! The framing layer is agnostic to these: it only moves opaque text
//! payloads. Envelopes are (de)serialized at the dispatch boundary.

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::db::models::{Statistics, StoredMessage};

/// Peer→server envelope kinds.
///
/// Unknown `type` values land on `Unknown` and are ignored silently;
/// malformed JSON is a deserialize error handled (logged, discarded) by the
/// dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join {
        #[serde(default)]
        nickname: String,
    },
    Message {
        message: String,
    },
    Heartbeat,
    Disconnect,
    GetStats,
    #[serde(other)]
    Unknown,
}

/// Server→peer envelope kinds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    System {
        message: String,
        timestamp: String,
        online_count: usize,
    },
    Message {
        nickname: String,
        message: String,
        timestamp: String,
    },
    Userlist {
        users: Vec<RosterEntry>,
        count: usize,
    },
    History {
        messages: Vec<StoredMessage>,
    },
    Stats {
        data: Statistics,
    },
}

/// One row of the `userlist` envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RosterEntry {
    pub id: u64,
    pub nickname: String,
    pub ip: String,
    #[serde(rename = "joinTime")]
    pub join_time: String,
}

/// Wall-clock `HH:MM:SS`, the timestamp format every envelope carries.
pub fn wall_clock() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

/// Nickname normalization applied on join: trimmed, empty → placeholder.
pub fn normalize_nickname(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        "Anonymous".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"join","nickname":"Ann"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Join {
                nickname: "Ann".into()
            }
        );

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"message","message":"hi"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Message { message: "hi".into() });

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"heartbeat"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Heartbeat);
    }

    #[test]
    fn test_join_without_nickname_defaults_empty() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"join"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Join { nickname: String::new() });
        assert_eq!(normalize_nickname(""), "Anonymous");
        assert_eq!(normalize_nickname("  Ann "), "Ann");
    }

    #[test]
    fn test_unknown_type_is_tolerated() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"set_topic","topic":"rust"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Unknown);
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(serde_json::from_str::<ClientMessage>("{not json").is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"message"}"#).is_err());
    }

    #[test]
    fn test_server_message_wire_shape() {
        let json = serde_json::to_value(ServerMessage::System {
            message: "Ann joined the chat".into(),
            timestamp: "12:00:00".into(),
            online_count: 1,
        })
        .unwrap();
        assert_eq!(json["type"], "system");
        assert_eq!(json["online_count"], 1);

        let json = serde_json::to_value(ServerMessage::Userlist {
            users: vec![RosterEntry {
                id: 7,
                nickname: "Ann".into(),
                ip: "127.0.0.1:5000".into(),
                join_time: "12:00:00".into(),
            }],
            count: 1,
        })
        .unwrap();
        assert_eq!(json["type"], "userlist");
        // Wire key is camelCase for compatibility with existing front-ends.
        assert_eq!(json["users"][0]["joinTime"], "12:00:00");
    }

    #[test]
    fn test_wall_clock_shape() {
        let ts = wall_clock();
        assert_eq!(ts.len(), 8);
        assert_eq!(ts.as_bytes()[2], b':');
        assert_eq!(ts.as_bytes()[5], b':');
    }
}
