//! Connected sessions and the room membership index derived from them.
//!
//! A session's `room` field is authoritative. `members` mirrors it so that
//! fan-out does not scan every session, and both are only changed together.

use std::collections::{BTreeMap, BTreeSet};

use super::error::ChatError;

pub type SessionId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub nickname: Option<String>,
    pub room: Option<String>,
}

impl Session {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            nickname: None,
            room: None,
        }
    }
}

/// What a successful nickname claim did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NickChange {
    /// The session had no nickname before.
    Claimed,
    /// The session replaced an existing nickname.
    Renamed { previous: String },
}

#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: BTreeMap<SessionId, Session>,
    members: BTreeMap<String, BTreeSet<SessionId>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection with no nickname and no room.
    pub fn create(&mut self, id: SessionId) -> &Session {
        self.remove(id);
        self.sessions.entry(id).or_insert_with(|| Session::new(id))
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Claims `name` (trimmed) for `id`.
    pub fn set_nickname(&mut self, id: SessionId, name: &str) -> Result<NickChange, ChatError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::EmptyNickname);
        }

        let taken = self
            .sessions
            .values()
            .any(|session| session.id != id && session.nickname.as_deref() == Some(name));
        if taken {
            return Err(ChatError::NicknameTaken(name.to_string()));
        }

        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(ChatError::UnknownSession)?;
        let previous = session.nickname.replace(name.to_string());
        Ok(match previous {
            Some(previous) => NickChange::Renamed { previous },
            None => NickChange::Claimed,
        })
    }

    /// Moves `id` into `room` (or out of any room). Returns the room it was in before.
    pub fn set_room(&mut self, id: SessionId, room: Option<&str>) -> Option<String> {
        let session = self.sessions.get_mut(&id)?;
        let previous = session.room.take();
        if let Some(old) = previous.as_deref() {
            detach(&mut self.members, old, id);
        }

        if let Some(room) = room {
            session.room = Some(room.to_string());
            self.members.entry(room.to_string()).or_default().insert(id);
        }
        previous
    }

    /// Drops the session and its membership.
    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        let session = self.sessions.remove(&id)?;
        if let Some(room) = session.room.as_deref() {
            detach(&mut self.members, room, id);
        }
        Some(session)
    }

    /// Sessions currently in `room`, ordered by connection.
    pub fn list_by_room(&self, room: &str) -> Vec<&Session> {
        self.members
            .get(room)
            .into_iter()
            .flatten()
            .filter_map(|id| self.sessions.get(id))
            .collect()
    }

    pub fn member_ids(&self, room: &str) -> Vec<SessionId> {
        self.members
            .get(room)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

fn detach(members: &mut BTreeMap<String, BTreeSet<SessionId>>, room: &str, id: SessionId) {
    if let Some(ids) = members.get_mut(room) {
        ids.remove(&id);
        if ids.is_empty() {
            members.remove(room);
        }
    }
}
