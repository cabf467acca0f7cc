//! Hub: the process-wide room registry
//!
//! Maps room ids to live `ChatRoom`s. Rooms are created on first join and
//! removed by the room itself when its last member leaves. When both locks
//! are needed the order is always room, then hub.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use tracing::{debug, info};

use crate::config::ChatSettings;
use crate::connection::Connection;
use crate::error::{JoinError, RoomFull};
use crate::member::Member;
use crate::room::ChatRoom;
use crate::types::{RoomId, RoomMeta, UserView};

/// Registry of active rooms
pub struct Hub {
    rooms: RwLock<HashMap<RoomId, Arc<ChatRoom>>>,
    settings: ChatSettings,
    this: Weak<Hub>,
}

impl Hub {
    /// Create an empty hub with the given room and keepalive settings
    pub fn new(settings: ChatSettings) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            rooms: RwLock::new(HashMap::new()),
            settings,
            this: this.clone(),
        })
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    /// Return the room for `meta.id`, creating and registering it if needed
    ///
    /// Repeat joins only take the shared lock. The exclusive path checks
    /// again, so concurrent creators all end up with the same room.
    pub fn get_or_create_room(&self, meta: &RoomMeta) -> Arc<ChatRoom> {
        if let Some(room) = self.room(&meta.id) {
            return room;
        }

        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        let room = rooms.entry(meta.id.clone()).or_insert_with(|| {
            debug!("Creating room {}", meta.id);
            Arc::new(ChatRoom::new(meta.clone(), self.this.clone(), self.settings))
        });
        Arc::clone(room)
    }

    /// Drop the registry entry for `meta.id`
    ///
    /// Called by a room that just became empty, with its own lock held.
    pub fn delete_room(&self, meta: &RoomMeta) {
        let removed = self
            .rooms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&meta.id);
        if removed.is_some() {
            info!("Room {} closed", meta.id);
        }
    }

    /// Room-join entry point: find or open the room and admit `connection`
    ///
    /// A room can retire between lookup and admission when its last member
    /// leaves at that moment; the join then moves on to a fresh room.
    pub fn join(
        &self,
        meta: &RoomMeta,
        connection: Connection,
        user: UserView,
    ) -> Result<Arc<Member>, RoomFull> {
        let mut connection = connection;
        loop {
            let room = self.get_or_create_room(meta);
            match room.new_member(connection, user.clone()) {
                Ok(member) => return Ok(member),
                Err(JoinError::Full(full)) => return Err(full),
                Err(JoinError::Retired {
                    room_id,
                    connection: returned,
                }) => {
                    debug!("Room {} retired during join, retrying", room_id);
                    connection = returned;
                }
            }
        }
    }

    /// Look up a live room
    pub fn room(&self, id: &RoomId) -> Option<Arc<ChatRoom>> {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Number of registered rooms
    pub fn room_count(&self) -> usize {
        self.rooms.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("rooms", &self.room_count())
            .field("settings", &self.settings)
            .finish()
    }
}
