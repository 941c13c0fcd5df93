//! Event handling for the chat server.
//!
//! [`Engine`] owns the room registry and the session table. Every inbound
//! event is applied as one step: validate, mutate, and compute the outbound
//! deliveries. Recipients are resolved while the step runs, so a room
//! broadcast reaches exactly the sessions in that room at that point.
//!
//! The engine does no I/O and is not shared. Callers serialize access to it
//! (see [`crate::server`]), which is what keeps nickname claims and room
//! registration free of check-then-set races.

use chrono::{Local, SecondsFormat};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::{debug, info};

use super::error::ChatError;
use super::registry::{RoomKind, RoomRegistry, is_public_room_name};
use super::sessions::{NickChange, SessionId, SessionTable};
use crate::message::{ClientEvent, ServerEvent};

const PRIVATE_CODE_MIN: u64 = 1_000_000_000;
const PRIVATE_CODE_MAX: u64 = 9_999_999_999;

/// One outbound event and the sessions that should receive it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub recipients: Vec<SessionId>,
    pub event: ServerEvent,
}

/// Deliveries produced by one engine step, in the order they must be sent.
#[derive(Debug, Default)]
struct Outbox {
    deliveries: Vec<Delivery>,
}

impl Outbox {
    fn direct(&mut self, id: SessionId, event: ServerEvent) {
        self.deliveries.push(Delivery {
            recipients: vec![id],
            event,
        });
    }

    fn room(&mut self, sessions: &SessionTable, room: &str, event: ServerEvent) {
        let recipients = sessions.member_ids(room);
        if recipients.is_empty() {
            return;
        }
        self.deliveries.push(Delivery { recipients, event });
    }
}

pub struct Engine<R = StdRng> {
    rooms: RoomRegistry,
    sessions: SessionTable,
    rng: R,
}

impl Engine<StdRng> {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }
}

impl Default for Engine<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> Engine<R> {
    /// Builds an engine drawing private room codes from `rng`.
    pub fn with_rng(rng: R) -> Self {
        Self {
            rooms: RoomRegistry::new(),
            sessions: SessionTable::new(),
            rng,
        }
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn connect(&mut self, id: SessionId) -> Vec<Delivery> {
        self.sessions.create(id);
        info!(session = id, "session connected");

        let mut out = Outbox::default();
        out.direct(
            id,
            ServerEvent::info("Welcome! Please set a nickname using /nick <name>"),
        );
        out.deliveries
    }

    /// Removes the session and tells its former room. Unknown ids are a no-op.
    pub fn disconnect(&mut self, id: SessionId) -> Vec<Delivery> {
        let mut out = Outbox::default();
        let Some(session) = self.sessions.remove(id) else {
            return out.deliveries;
        };
        info!(
            session = id,
            nickname = ?session.nickname,
            room = ?session.room,
            "session disconnected"
        );

        if let Some(room) = session.room.as_deref() {
            let nick = session.nickname.as_deref().unwrap_or("Anonymous");
            out.room(
                &self.sessions,
                room,
                ServerEvent::info(format!("<< {nick} has left the room.")),
            );
        }
        out.deliveries
    }

    /// Applies one client event. Rejections become a single direct `error` event.
    pub fn handle(&mut self, id: SessionId, event: ClientEvent) -> Vec<Delivery> {
        let name = event.name();
        match self.dispatch(id, event) {
            Ok(deliveries) => deliveries,
            Err(err) => {
                debug!(session = id, event = name, error = %err, "request rejected");
                self.reject(id, err)
            }
        }
    }

    /// A single direct `error` event carrying the rejection's text.
    pub fn reject(&self, id: SessionId, err: ChatError) -> Vec<Delivery> {
        let mut out = Outbox::default();
        out.direct(id, ServerEvent::error(err.to_string()));
        out.deliveries
    }

    /// Notice sent to every connected session when the server stops.
    pub fn shutdown_notice(&self) -> Vec<Delivery> {
        let recipients = self.sessions.ids();
        if recipients.is_empty() {
            return Vec::new();
        }
        vec![Delivery {
            recipients,
            event: ServerEvent::info("Server shutting down."),
        }]
    }

    fn dispatch(&mut self, id: SessionId, event: ClientEvent) -> Result<Vec<Delivery>, ChatError> {
        if self.sessions.get(id).is_none() {
            return Err(ChatError::UnknownSession);
        }

        let mut out = Outbox::default();
        match event {
            ClientEvent::SetNick { nick } => self.set_nick(id, &nick, &mut out)?,
            ClientEvent::JoinPublic { room } => self.join_public(id, &room, &mut out)?,
            ClientEvent::CreatePrivate => self.create_private(id, &mut out)?,
            ClientEvent::JoinPrivate { code } => self.join_private(id, &code, &mut out)?,
            ClientEvent::SendMessage { msg } => self.send_message(id, msg, &mut out)?,
            ClientEvent::ListRooms => self.list_rooms(id, &mut out),
            ClientEvent::ListUsers => self.list_users(id, &mut out)?,
        }
        Ok(out.deliveries)
    }

    fn set_nick(&mut self, id: SessionId, nick: &str, out: &mut Outbox) -> Result<(), ChatError> {
        let change = self.sessions.set_nickname(id, nick)?;
        let nick = nick.trim();

        match change {
            NickChange::Claimed => {
                info!(session = id, nickname = nick, "nickname claimed");
                out.direct(
                    id,
                    ServerEvent::info(format!(
                        "Nickname set to {nick}. You may now /join #room or /createprivate"
                    )),
                );
                out.direct(
                    id,
                    ServerEvent::NickSuccess {
                        nick: nick.to_string(),
                    },
                );
            }
            NickChange::Renamed { previous } => {
                info!(session = id, %previous, nickname = nick, "nickname changed");
                out.direct(
                    id,
                    ServerEvent::info(format!("You changed your nickname to {nick}")),
                );
            }
        }
        Ok(())
    }

    fn join_public(
        &mut self,
        id: SessionId,
        room: &str,
        out: &mut Outbox,
    ) -> Result<(), ChatError> {
        let nick = self.nickname(id)?;
        if !is_public_room_name(room) {
            return Err(ChatError::InvalidRoomName);
        }

        self.leave_current_room(id, &nick, out);
        if self.rooms.register(room, RoomKind::Public, None) {
            info!(room, "public room registered");
        }
        self.enter(id, room, room.to_string(), out);
        info!(session = id, nickname = %nick, room, "joined public room");
        out.room(
            &self.sessions,
            room,
            ServerEvent::info(format!(">> {nick} joined {room}")),
        );
        Ok(())
    }

    fn create_private(&mut self, id: SessionId, out: &mut Outbox) -> Result<(), ChatError> {
        let nick = self.nickname(id)?;

        self.leave_current_room(id, &nick, out);
        let code = self.generate_room_code();
        self.rooms.register(&code, RoomKind::Private, Some(id));
        self.enter(id, &code, format!("Private Room {code}"), out);
        info!(session = id, nickname = %nick, "private room created");

        out.direct(
            id,
            ServerEvent::info(format!("Private room created. CODE: {code}")),
        );
        out.direct(
            id,
            ServerEvent::info("Share this code with others to let them join."),
        );
        Ok(())
    }

    fn join_private(
        &mut self,
        id: SessionId,
        code: &str,
        out: &mut Outbox,
    ) -> Result<(), ChatError> {
        let nick = self.nickname(id)?;
        let code = code.trim();
        match self.rooms.kind_of(code) {
            None => return Err(ChatError::UnknownRoomCode),
            Some(RoomKind::Public) => return Err(ChatError::NotPrivateRoom),
            Some(RoomKind::Private) => {}
        }

        self.leave_current_room(id, &nick, out);
        self.enter(id, code, format!("Private Room {code}"), out);
        info!(session = id, nickname = %nick, "joined private room");
        out.room(
            &self.sessions,
            code,
            ServerEvent::info(format!(">> {nick} joined the private room.")),
        );
        Ok(())
    }

    fn send_message(
        &mut self,
        id: SessionId,
        msg: String,
        out: &mut Outbox,
    ) -> Result<(), ChatError> {
        let nick = self.nickname(id)?;
        let room = self.current_room(id).ok_or(ChatError::NotInRoom)?;
        if msg.trim().is_empty() {
            return Ok(());
        }

        out.room(
            &self.sessions,
            &room,
            ServerEvent::ChatMessage {
                user: nick,
                msg,
                timestamp: Local::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            },
        );
        Ok(())
    }

    fn list_rooms(&self, id: SessionId, out: &mut Outbox) {
        let public = self.rooms.list_public();
        let msg = if public.is_empty() {
            "No public rooms active.".to_string()
        } else {
            format!("Public Rooms: {}", public.join(", "))
        };
        out.direct(id, ServerEvent::info(msg));
    }

    fn list_users(&self, id: SessionId, out: &mut Outbox) -> Result<(), ChatError> {
        let room = self.current_room(id).ok_or(ChatError::NotInRoomForUsers)?;
        let users: Vec<&str> = self
            .sessions
            .list_by_room(&room)
            .into_iter()
            .filter_map(|session| session.nickname.as_deref())
            .collect();
        out.direct(
            id,
            ServerEvent::info(format!("Users in {room}: {}", users.join(", "))),
        );
        Ok(())
    }

    /// Clears the session's room before telling the old room, so no observer
    /// ever sees the session in two rooms.
    fn leave_current_room(&mut self, id: SessionId, nick: &str, out: &mut Outbox) {
        if let Some(old) = self.sessions.set_room(id, None) {
            debug!(session = id, room = %old, "left room");
            out.room(
                &self.sessions,
                &old,
                ServerEvent::info(format!("<< {nick} left.")),
            );
        }
    }

    fn enter(&mut self, id: SessionId, room: &str, label: String, out: &mut Outbox) {
        self.sessions.set_room(id, Some(room));
        out.direct(id, ServerEvent::RoomJoined { room: label });
    }

    fn nickname(&self, id: SessionId) -> Result<String, ChatError> {
        self.sessions
            .get(id)
            .and_then(|session| session.nickname.clone())
            .ok_or(ChatError::NicknameRequired)
    }

    fn current_room(&self, id: SessionId) -> Option<String> {
        self.sessions.get(id).and_then(|session| session.room.clone())
    }

    fn generate_room_code(&mut self) -> String {
        loop {
            let code = self
                .rng
                .gen_range(PRIVATE_CODE_MIN..=PRIVATE_CODE_MAX)
                .to_string();
            if !self.rooms.exists(&code) {
                return code;
            }
        }
    }
}
