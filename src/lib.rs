//! Room-scoped WebSocket broadcast server
//!
//! Clients join a named, capacity-bounded room over a WebSocket; every text
//! frame a member sends is relayed to the other members, and joins and
//! leaves are announced to the room.
//!
//! # Features
//! - Lazily created rooms that disappear with their last member
//! - Hard per-room capacity
//! - Ping/pong keepalive with eviction of silent peers
//! - Bearer-token handshake and password-protected rooms
//!
//! # Architecture
//! Shared state behind short, synchronous locks:
//! - `Hub` is the process-wide registry of rooms
//! - `ChatRoom` owns the membership set of one room and fans messages out
//! - `Member` owns one connection; its write pump, keepalive timer and read
//!   loop run as separate tasks and any of them may close it
//! - `handler` authenticates a connection and hands it to the hub
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use room_chat::{handle_connection, ChatSettings, Gateway, Hub, MemoryDirectory};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:8000").await.unwrap();
//!     let directory = Arc::new(MemoryDirectory::new());
//!     let gateway = Arc::new(Gateway::new(
//!         Hub::new(ChatSettings::default()),
//!         directory.clone(),
//!         directory,
//!     ));
//!
//!     while let Ok((stream, _)) = listener.accept().await {
//!         tokio::spawn(handle_connection(stream, Arc::clone(&gateway)));
//!     }
//! }
//! ```

pub mod config;
pub mod connection;
pub mod directory;
pub mod error;
pub mod handler;
pub mod hub;
pub mod member;
pub mod message;
pub mod room;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use config::{ChatSettings, Config, ConfigError};
pub use connection::Connection;
pub use directory::{IdentityProvider, MemoryDirectory, RoomDirectory};
pub use error::{AppError, DirectoryError, JoinError, RoomFull, WriteError};
pub use handler::{handle_connection, serve, Gateway};
pub use hub::Hub;
pub use member::{CloseCause, Member, MemberState};
pub use message::{Message, MessageKind, PasswordFrame};
pub use room::ChatRoom;
pub use types::{MemberId, RoomId, RoomMeta, UserView};
