//! Known rooms and their metadata.
//!
//! Rooms are only ever added. Membership lives in the session table, so an
//! empty room simply stays registered.

use std::collections::HashMap;

use super::sessions::SessionId;

/// Public room names must start with this character.
pub const PUBLIC_ROOM_MARKER: char = '#';

/// Private room codes are exactly this many ASCII digits.
pub const PRIVATE_CODE_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomKind {
    Public,
    Private,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: String,
    pub kind: RoomKind,
    /// Creator of a private room. Recorded but not used for any permission check.
    pub owner: Option<SessionId>,
}

#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
    // Registration order, used for listings.
    order: Vec<String>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a room. Returns false and leaves the registry untouched if the id is already known.
    pub fn register(&mut self, id: &str, kind: RoomKind, owner: Option<SessionId>) -> bool {
        if self.rooms.contains_key(id) {
            return false;
        }

        let owner = match kind {
            RoomKind::Private => owner,
            RoomKind::Public => None,
        };
        self.rooms.insert(
            id.to_string(),
            Room {
                id: id.to_string(),
                kind,
                owner,
            },
        );
        self.order.push(id.to_string());
        true
    }

    pub fn exists(&self, id: &str) -> bool {
        self.rooms.contains_key(id)
    }

    pub fn kind_of(&self, id: &str) -> Option<RoomKind> {
        self.rooms.get(id).map(|room| room.kind)
    }

    pub fn get(&self, id: &str) -> Option<&Room> {
        self.rooms.get(id)
    }

    /// Public room ids in the order they were first joined.
    pub fn list_public(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.kind_of(id) == Some(RoomKind::Public))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

pub fn is_public_room_name(name: &str) -> bool {
    name.starts_with(PUBLIC_ROOM_MARKER)
}

pub fn is_private_code(code: &str) -> bool {
    code.len() == PRIVATE_CODE_LEN && code.bytes().all(|b| b.is_ascii_digit())
}
