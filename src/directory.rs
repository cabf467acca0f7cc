//! Identity and room metadata providers
//!
//! The core never authenticates anyone or stores rooms. The gateway asks
//! these collaborators before handing a connection to the hub.

use std::collections::HashMap;

use crate::config::Config;
use crate::error::DirectoryError;
use crate::types::{RoomId, RoomMeta, UserView};

/// Resolves a bearer token to the user it was issued to
pub trait IdentityProvider: Send + Sync {
    fn user_for_token(&self, token: &str) -> Option<UserView>;
}

/// Resolves a room id to its metadata
pub trait RoomDirectory: Send + Sync {
    fn room(&self, id: &RoomId) -> Result<RoomMeta, DirectoryError>;
}

/// In-memory implementation of both providers
///
/// Filled once at startup, read-only afterwards.
#[derive(Debug, Default, Clone)]
pub struct MemoryDirectory {
    users: HashMap<String, UserView>,
    rooms: HashMap<RoomId, RoomMeta>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from the users and rooms listed in the configuration
    pub fn from_config(config: &Config) -> Self {
        let mut directory = Self::new();
        for (token, user) in &config.users {
            directory.insert_user(token.clone(), user.clone());
        }
        for room in &config.rooms {
            directory.insert_room(room.clone());
        }
        directory
    }

    pub fn insert_user(&mut self, token: impl Into<String>, user: UserView) {
        self.users.insert(token.into(), user);
    }

    pub fn insert_room(&mut self, room: RoomMeta) {
        self.rooms.insert(room.id.clone(), room);
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

impl IdentityProvider for MemoryDirectory {
    fn user_for_token(&self, token: &str) -> Option<UserView> {
        self.users.get(token).cloned()
    }
}

impl RoomDirectory for MemoryDirectory {
    fn room(&self, id: &RoomId) -> Result<RoomMeta, DirectoryError> {
        self.rooms
            .get(id)
            .cloned()
            .ok_or_else(|| DirectoryError::RoomNotFound(id.clone()))
    }
}
