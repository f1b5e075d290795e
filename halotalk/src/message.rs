use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const JOIN: &str = "join";
pub const CHAT_MESSAGE: &str = "chat message";
pub const TYPING: &str = "typing";
pub const STOP_TYPING: &str = "stop typing";
pub const USER_JOINED: &str = "user joined";
pub const USER_LEFT: &str = "user left";

/// Events a participant sends over its connection.
///
/// Each WebSocket text frame carries one `{"event": ..., "data": ...}` object.
/// Decoding goes through [`ClientEvent::decode`], which normalizes malformed
/// payloads instead of rejecting them.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "join")]
    Join(String),
    #[serde(rename = "chat message")]
    ChatMessage(ChatRequest),
    #[serde(rename = "typing")]
    Typing,
    #[serde(rename = "stop typing")]
    StopTyping,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatRequest {
    pub message: String,
}

/// Events the server fans out to connected participants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "user joined")]
    UserJoined(Presence),
    #[serde(rename = "user left")]
    UserLeft(Presence),
    #[serde(rename = "chat message")]
    ChatMessage(ChatLine),
    #[serde(rename = "typing")]
    Typing(Option<String>),
    #[serde(rename = "stop typing")]
    StopTyping,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Presence {
    pub username: String,
    #[serde(rename = "totalUsers")]
    pub total_users: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatLine {
    pub username: String,
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown event `{0}`")]
    UnknownEvent(String),
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

impl ClientEvent {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let frame: RawFrame = serde_json::from_str(text)?;
        let event = match frame.event.as_str() {
            JOIN => ClientEvent::Join(string_or_empty(&frame.data)),
            CHAT_MESSAGE => ClientEvent::ChatMessage(ChatRequest {
                message: frame
                    .data
                    .get("message")
                    .map(string_or_empty)
                    .unwrap_or_default(),
            }),
            TYPING => ClientEvent::Typing,
            STOP_TYPING => ClientEvent::StopTyping,
            other => return Err(ProtocolError::UnknownEvent(other.to_string())),
        };
        Ok(event)
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl ServerEvent {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::UserJoined(_) => USER_JOINED,
            ServerEvent::UserLeft(_) => USER_LEFT,
            ServerEvent::ChatMessage(_) => CHAT_MESSAGE,
            ServerEvent::Typing(_) => TYPING,
            ServerEvent::StopTyping => STOP_TYPING,
        }
    }
}

/// Current UTC time as ISO-8601 with millisecond precision, e.g. `2026-10-19T12:00:00.000Z`.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// Anything that is not a JSON string collapses to "".
fn string_or_empty(value: &Value) -> String {
    value.as_str().map(str::to_owned).unwrap_or_default()
}
