//! Multi-room terminal chat.
//!
//! Clients pick a nickname, then join a public `#room` or a code-gated
//! private room and exchange messages with everyone in it.
//!
//! - [`cli`] parses the command line for server and client modes.
//! - [`message`] defines the JSON line protocol and async read/write helpers.
//! - [`server`] holds the room registry, the session table and the engine
//!   that applies client events to them, plus the TCP front end.
//! - [`client`] is the terminal client: command interpreter, view state,
//!   network task and rendering.
//!
//! The engine is plain data in, deliveries out, so integration tests drive it
//! directly as well as over TCP.

pub mod cli;
pub mod client;
pub mod message;
pub mod server;
