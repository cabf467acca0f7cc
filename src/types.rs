//! Basic type definitions for the chat server
//!
//! Provides newtype wrappers and the read-only views the core works with:
//! - `MemberId`: UUID-based identifier for one admitted connection
//! - `RoomId`: identifier of a room as handed out by the room directory
//! - `UserView`: the public view of an authenticated user
//! - `RoomMeta`: snapshot of a room's metadata taken at join time

use serde::Serialize;
use uuid::Uuid;

/// Unique member identifier (newtype pattern)
///
/// Wraps a UUID v4. One is issued per admitted connection, so the same
/// user joining twice yields two distinct members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemberId(pub Uuid);

impl MemberId {
    /// Create a new random member ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MemberId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Room identifier
///
/// Opaque string issued by the room directory. Used as the hub registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Public view of an authenticated user
///
/// This is what other members get to see in `from`. Credentials never
/// make it into this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserView {
    pub id: i64,
    pub username: String,
}

impl UserView {
    pub fn new(id: i64, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }
}

impl std::fmt::Display for UserView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.username, self.id)
    }
}

/// Room metadata snapshot
///
/// Owned by the room directory; the core only reads the fields it needs
/// for capacity and privacy decisions at join time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMeta {
    pub id: RoomId,
    pub name: String,
    /// Present means the room is private
    pub password: Option<String>,
    pub owner_id: i64,
    /// Overrides the hub's default capacity when set
    pub capacity: Option<usize>,
}

impl RoomMeta {
    /// Public room with no capacity override
    pub fn new(id: impl Into<String>, name: impl Into<String>, owner_id: i64) -> Self {
        Self {
            id: RoomId(id.into()),
            name: name.into(),
            password: None,
            owner_id,
            capacity: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// A room is private when it carries a non-empty password
    pub fn is_private(&self) -> bool {
        self.password.as_deref().is_some_and(|p| !p.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_id_unique() {
        let id1 = MemberId::new();
        let id2 = MemberId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_room_privacy() {
        let public = RoomMeta::new("lobby", "Lobby", 1);
        assert!(!public.is_private());

        let private = RoomMeta::new("vault", "Vault", 1).with_password("hunter2");
        assert!(private.is_private());

        let blank = RoomMeta::new("blank", "Blank", 1).with_password("");
        assert!(!blank.is_private());
    }

    #[test]
    fn test_user_view_display() {
        let user = UserView::new(7, "alice");
        assert_eq!(user.to_string(), "alice#7");
    }
}
