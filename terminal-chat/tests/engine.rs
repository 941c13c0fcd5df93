//! Scenario tests for the coordination engine, driven without a network.

use std::collections::HashSet;

use rand::{SeedableRng, rngs::StdRng};
use terminal_chat::{
    message::{ClientEvent, ServerEvent},
    server::{Delivery, Engine, SessionId},
};

struct Harness {
    engine: Engine<StdRng>,
}

impl Harness {
    fn new() -> Self {
        Self {
            engine: Engine::with_rng(StdRng::seed_from_u64(2024)),
        }
    }

    fn connect(&mut self, id: SessionId) -> Vec<Delivery> {
        self.engine.connect(id)
    }

    fn send(&mut self, id: SessionId, event: ClientEvent) -> Vec<Delivery> {
        self.engine.handle(id, event)
    }

    fn nick(&mut self, id: SessionId, nick: &str) -> Vec<Delivery> {
        self.send(id, ClientEvent::SetNick { nick: nick.into() })
    }

    fn join(&mut self, id: SessionId, room: &str) -> Vec<Delivery> {
        self.send(id, ClientEvent::JoinPublic { room: room.into() })
    }

    fn room_of(&self, id: SessionId) -> Option<String> {
        self.engine.sessions().get(id).and_then(|s| s.room.clone())
    }
}

/// Events received by `id`, in order.
fn inbox(deliveries: &[Delivery], id: SessionId) -> Vec<ServerEvent> {
    deliveries
        .iter()
        .filter(|d| d.recipients.contains(&id))
        .map(|d| d.event.clone())
        .collect()
}

fn created_code(deliveries: &[Delivery]) -> String {
    deliveries
        .iter()
        .find_map(|d| match &d.event {
            ServerEvent::ServerMessage { msg } => {
                msg.strip_prefix("Private room created. CODE: ").map(str::to_string)
            }
            _ => None,
        })
        .expect("private room code")
}

#[test]
fn public_room_conversation() {
    let mut h = Harness::new();
    h.connect(1);
    h.nick(1, "alice");
    let joined = h.join(1, "#general");
    assert_eq!(
        inbox(&joined, 1),
        vec![
            ServerEvent::RoomJoined {
                room: "#general".into()
            },
            ServerEvent::info(">> alice joined #general"),
        ]
    );

    h.connect(2);
    h.nick(2, "bob");
    let arrival = h.join(2, "#general");
    let notice = ServerEvent::info(">> bob joined #general");
    assert_eq!(inbox(&arrival, 1), vec![notice.clone()]);
    assert!(inbox(&arrival, 2).contains(&notice));

    let chat = h.send(1, ClientEvent::SendMessage { msg: "hello".into() });
    for id in [1, 2] {
        match inbox(&chat, id).as_slice() {
            [ServerEvent::ChatMessage { user, msg, .. }] => {
                assert_eq!(user, "alice");
                assert_eq!(msg, "hello");
            }
            other => panic!("session {id} got {other:?}"),
        }
    }

    let gone = h.engine.disconnect(2);
    assert_eq!(
        inbox(&gone, 1),
        vec![ServerEvent::info("<< bob has left the room.")]
    );
    assert!(inbox(&gone, 2).is_empty());
}

#[test]
fn private_room_members_see_each_other() {
    let mut h = Harness::new();
    h.connect(1);
    h.nick(1, "carol");
    h.connect(2);
    h.nick(2, "dave");

    let code = created_code(&h.send(1, ClientEvent::CreatePrivate));
    assert_eq!(code.len(), 10);
    assert!(code.chars().all(|c| c.is_ascii_digit()));

    h.send(2, ClientEvent::JoinPrivate { code: code.clone() });
    let listing = ServerEvent::info(format!("Users in {code}: carol, dave"));
    for id in [1, 2] {
        assert_eq!(inbox(&h.send(id, ClientEvent::ListUsers), id), vec![listing.clone()]);
    }

    let rooms = h.send(2, ClientEvent::ListRooms);
    assert_eq!(inbox(&rooms, 2), vec![ServerEvent::info("No public rooms active.")]);
}

#[test]
fn nickname_uniqueness_holds_across_claims() {
    let mut h = Harness::new();
    let names = ["ann", "ben", "ann", "cat", "ben", "ann"];
    for id in 1..=6 {
        h.connect(id);
    }
    for (id, name) in (1..=6).zip(names) {
        h.nick(id, name);
    }

    let held: Vec<String> = (1..=6)
        .filter_map(|id| h.engine.sessions().get(id).and_then(|s| s.nickname.clone()))
        .collect();
    let unique: HashSet<&String> = held.iter().collect();
    assert_eq!(held.len(), unique.len());
    assert_eq!(held, vec!["ann", "ben", "cat"]);

    let rejected = h.nick(5, "cat");
    assert_eq!(
        inbox(&rejected, 5),
        vec![ServerEvent::error("Nickname \"cat\" is already taken.")]
    );
    assert_eq!(h.engine.sessions().get(5).and_then(|s| s.nickname.clone()), None);
}

#[test]
fn each_switch_leaves_old_room_before_entering_new_one() {
    let mut h = Harness::new();
    h.connect(1);
    h.nick(1, "watcher_a");
    h.join(1, "#a");
    h.connect(2);
    h.nick(2, "watcher_b");
    h.join(2, "#b");
    h.connect(3);
    h.nick(3, "mover");

    h.join(3, "#a");
    let moved = h.join(3, "#b");
    assert_eq!(h.room_of(3).as_deref(), Some("#b"));

    assert_eq!(inbox(&moved, 1), vec![ServerEvent::info("<< mover left.")]);
    assert_eq!(inbox(&moved, 2), vec![ServerEvent::info(">> mover joined #b")]);

    let departure = moved
        .iter()
        .position(|d| d.event == ServerEvent::info("<< mover left."))
        .expect("departure");
    let arrival = moved
        .iter()
        .position(|d| d.event == ServerEvent::info(">> mover joined #b"))
        .expect("arrival");
    assert!(departure < arrival);

    let code = created_code(&h.send(3, ClientEvent::CreatePrivate));
    assert_eq!(h.room_of(3), Some(code));
    assert_eq!(h.engine.sessions().member_ids("#b"), vec![2]);
}

#[test]
fn requests_before_nickname_are_rejected_identically() {
    let mut h = Harness::new();
    h.connect(1);
    let expected = vec![ServerEvent::error("Set a nickname first using /nick <name>")];

    for _ in 0..3 {
        for event in [
            ClientEvent::JoinPublic { room: "#x".into() },
            ClientEvent::CreatePrivate,
            ClientEvent::JoinPrivate {
                code: "1111111111".into(),
            },
            ClientEvent::SendMessage { msg: "hi".into() },
        ] {
            assert_eq!(inbox(&h.send(1, event), 1), expected);
        }
    }

    let session = h.engine.sessions().get(1).expect("session");
    assert_eq!(session.nickname, None);
    assert_eq!(session.room, None);
    assert!(h.engine.rooms().is_empty());
}

#[test]
fn private_codes_never_collide() {
    let mut h = Harness::new();
    h.connect(1);
    h.nick(1, "maker");
    h.join(1, "#lobby");

    let mut codes = HashSet::new();
    for _ in 0..200 {
        let code = created_code(&h.send(1, ClientEvent::CreatePrivate));
        assert!(codes.insert(code));
    }
    assert_eq!(h.engine.rooms().len(), 201);
    assert!(!codes.contains("#lobby"));
}
