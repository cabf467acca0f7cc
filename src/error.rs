//! Error types for the chat server
//!
//! Defines gateway-level errors, member write errors and the capacity
//! rejection. Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use crate::config::ConfigError;
use crate::connection::Connection;
use crate::types::RoomId;

/// Application-level errors
///
/// Surfaced by the gateway while turning a TCP connection into a member,
/// and by startup. Per connection none of these are fatal to the process;
/// the worst case is one connection closing.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol or handshake error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Request path is not a chat endpoint
    #[error("No route for {0}")]
    NotFound(String),

    /// Room not found with the given id
    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),

    /// Missing or unknown bearer token
    #[error("Unauthorized")]
    Unauthorized,

    /// Private room password missing or wrong
    #[error("Access denied to room {0}")]
    AccessDenied(RoomId),

    /// Room is at capacity
    #[error("Room {0} is full")]
    RoomFull(RoomId),
}

impl AppError {
    /// Expected refusals, as opposed to transport or server faults
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            AppError::NotFound(_)
                | AppError::RoomNotFound(_)
                | AppError::Unauthorized
                | AppError::AccessDenied(_)
                | AppError::RoomFull(_)
        )
    }
}

/// Member write errors
///
/// Any of these closes the member that hit it and nobody else.
#[derive(Debug, Error)]
pub enum WriteError {
    /// Write deadline expired
    #[error("Write timed out")]
    Timeout,

    /// Transport refused the frame
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Message could not be encoded
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Room directory errors
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),
}

impl From<DirectoryError> for AppError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::RoomNotFound(id) => AppError::RoomNotFound(id),
        }
    }
}

/// Admission refused because the room is at capacity
///
/// Hands the connection back so the caller can close it with a
/// policy-violation frame.
#[derive(Debug, Error)]
#[error("Room {room_id} is full ({capacity} members)")]
pub struct RoomFull {
    pub room_id: RoomId,
    pub capacity: usize,
    pub connection: Connection,
}

/// Why a room turned a connection away
///
/// `Retired` means the room deregistered itself (its last member left)
/// between lookup and admission. `Hub::join` retries on a fresh room.
#[derive(Debug, Error)]
pub enum JoinError {
    #[error(transparent)]
    Full(#[from] RoomFull),

    #[error("Room {room_id} was retired before admission")]
    Retired {
        room_id: RoomId,
        connection: Connection,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refusals_are_rejections() {
        assert!(AppError::Unauthorized.is_rejection());
        assert!(AppError::RoomFull(RoomId::from("lobby")).is_rejection());
        assert!(AppError::from(DirectoryError::RoomNotFound(RoomId::from("x"))).is_rejection());
    }

    #[test]
    fn test_config_error_converts() {
        let err: AppError = ConfigError::InvalidValue("CHAT_ROOM_CAPACITY=0".to_string()).into();
        assert!(matches!(err, AppError::Config(_)));
        assert!(!err.is_rejection());
        assert!(err.to_string().contains("CHAT_ROOM_CAPACITY=0"));
    }
}
