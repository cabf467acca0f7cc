//! Message protocol definitions
//!
//! The broadcast envelope sent to room members, plus the one frame a
//! client sends before admission (the private room password).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::UserView;

/// Kind of broadcast event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A member was admitted to the room
    Join,
    /// A member left the room
    Leave,
    /// Text sent by a member
    Client,
}

/// Server → Client broadcast envelope
///
/// Immutable once built. `from` is only set for `client` messages and is
/// left out of the JSON entirely otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(rename = "message")]
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<UserView>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Text relayed from a member
    pub fn client(text: impl Into<String>, from: &UserView) -> Self {
        Self {
            kind: MessageKind::Client,
            text: text.into(),
            from: Some(from.clone()),
            created_at: Utc::now(),
        }
    }

    /// Notice that `user` entered the room
    pub fn join(user: &UserView) -> Self {
        Self {
            kind: MessageKind::Join,
            text: format!("{} has joined the chat", user.username),
            from: None,
            created_at: Utc::now(),
        }
    }

    /// Notice that `user` left the room
    pub fn leave(user: &UserView) -> Self {
        Self {
            kind: MessageKind::Leave,
            text: format!("{} has left the chat", user.username),
            from: None,
            created_at: Utc::now(),
        }
    }
}

/// Client → Server password frame
///
/// First frame expected on a connection to a private room.
#[derive(Debug, Deserialize)]
pub struct PasswordFrame {
    pub password: String,
}

/// Body of a refused WebSocket handshake
///
/// `{"status": "Error", "error": {"message": "..."}}`
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub message: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "Error",
            error: ErrorDetail {
                message: message.into(),
            },
        }
    }
}
