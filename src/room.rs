//! ChatRoom definition
//!
//! Membership and fan-out for one room id. All mutation and every broadcast
//! dispatch happen under the room's lock; the lock is never held across I/O
//! because delivery only queues the message on each member's write pump.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use tracing::{debug, info};

use crate::config::ChatSettings;
use crate::connection::Connection;
use crate::error::{JoinError, RoomFull};
use crate::hub::Hub;
use crate::member::Member;
use crate::message::Message;
use crate::types::{MemberId, RoomId, RoomMeta, UserView};

/// Membership set plus the retirement flag
#[derive(Default)]
struct Roster {
    members: HashMap<MemberId, Arc<Member>>,
    /// Set when the room deregistered itself. A retired room admits nobody.
    retired: bool,
}

/// Broadcast unit for one room
pub struct ChatRoom {
    meta: RoomMeta,
    hub: Weak<Hub>,
    settings: ChatSettings,
    roster: RwLock<Roster>,
}

impl ChatRoom {
    /// Create an empty room; the room's own capacity override wins
    pub(crate) fn new(meta: RoomMeta, hub: Weak<Hub>, settings: ChatSettings) -> Self {
        let settings = ChatSettings {
            capacity: meta.capacity.unwrap_or(settings.capacity),
            ..settings
        };
        Self {
            meta,
            hub,
            settings,
            roster: RwLock::new(Roster::default()),
        }
    }

    pub fn id(&self) -> &RoomId {
        &self.meta.id
    }

    pub fn meta(&self) -> &RoomMeta {
        &self.meta
    }

    pub fn capacity(&self) -> usize {
        self.settings.capacity
    }

    /// Number of members right now
    pub fn len(&self) -> usize {
        self.roster().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roster().members.is_empty()
    }

    /// Check if the room is at capacity
    pub fn is_full(&self) -> bool {
        self.roster().members.len() >= self.settings.capacity
    }

    pub fn contains(&self, id: MemberId) -> bool {
        self.roster().members.contains_key(&id)
    }

    /// Admit `connection` as a new member
    ///
    /// The capacity check and the insert happen under one write lock, so
    /// concurrent admissions can never overshoot. On success everyone in the
    /// room, newcomer included, gets a `join` notice, unless the newcomer is
    /// alone.
    pub fn new_member(
        self: &Arc<Self>,
        connection: Connection,
        user: UserView,
    ) -> Result<Arc<Member>, JoinError> {
        let mut roster = self.roster_mut();

        if roster.retired {
            return Err(JoinError::Retired {
                room_id: self.meta.id.clone(),
                connection,
            });
        }

        if roster.members.len() >= self.settings.capacity {
            return Err(RoomFull {
                room_id: self.meta.id.clone(),
                capacity: self.settings.capacity,
                connection,
            }
            .into());
        }

        let member = Member::spawn(connection, user, Arc::downgrade(self), self.settings);
        roster.members.insert(member.id(), Arc::clone(&member));

        info!(
            "{} joined room {} ({}/{})",
            member.user(),
            self.meta.id,
            roster.members.len(),
            self.settings.capacity
        );

        if roster.members.len() > 1 {
            dispatch(roster.members.values(), Message::join(member.user()));
        }

        Ok(member)
    }

    /// Remove `member`; no-op if it is not here
    ///
    /// Remaining members get a `leave` notice. The member that empties the
    /// room also retires it and takes it out of the hub before the lock is
    /// released.
    pub fn remove(&self, member: &Member) {
        let mut roster = self.roster_mut();

        if roster.members.remove(&member.id()).is_none() {
            return;
        }

        info!(
            "{} left room {} ({} remaining)",
            member.user(),
            self.meta.id,
            roster.members.len()
        );

        dispatch(roster.members.values(), Message::leave(member.user()));

        if roster.members.is_empty() {
            roster.retired = true;
            if let Some(hub) = self.hub.upgrade() {
                hub.delete_room(&self.meta);
            }
            debug!("Room {} retired (empty)", self.meta.id);
        }
    }

    /// Hand `message` to every current member
    pub fn broadcast(&self, message: Message) {
        dispatch(self.roster().members.values(), message);
    }

    /// Hand `message` to every current member except `sender`
    pub fn broadcast_except(&self, sender: MemberId, message: Message) {
        let roster = self.roster();
        dispatch(
            roster.members.values().filter(|member| member.id() != sender),
            message,
        );
    }

    fn roster(&self) -> std::sync::RwLockReadGuard<'_, Roster> {
        self.roster.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn roster_mut(&self) -> std::sync::RwLockWriteGuard<'_, Roster> {
        self.roster.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ChatRoom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatRoom")
            .field("id", &self.meta.id)
            .field("capacity", &self.settings.capacity)
            .field("members", &self.len())
            .finish()
    }
}

/// Queue one shared copy of `message` on each member's write pump
fn dispatch<'a>(members: impl Iterator<Item = &'a Arc<Member>>, message: Message) {
    let message = Arc::new(message);
    for member in members {
        member.deliver(Arc::clone(&message));
    }
}
