//! Parsing of submitted input lines.
//!
//! Slash commands are case-insensitive and take their argument from the
//! first word after the command; anything else non-empty is chat.

use crate::message::ClientEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Quit,
    /// A request for the server.
    Request(ClientEvent),
    /// Text to send to the current room.
    Chat(String),
    /// A command was missing its argument; show this hint locally.
    Usage(&'static str),
    Unknown(String),
}

impl Input {
    /// Parses one submitted line. Returns `None` for blank input.
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        if !trimmed.starts_with('/') {
            return Some(Input::Chat(trimmed.to_string()));
        }

        let mut parts = trimmed.split_whitespace();
        let command = parts.next().unwrap_or_default().to_lowercase();
        let arg = parts.next().map(str::to_string);

        let input = match (command.as_str(), arg) {
            ("/quit", _) => Input::Quit,
            ("/nick", Some(nick)) => Input::Request(ClientEvent::SetNick { nick }),
            ("/nick", None) => Input::Usage("Usage: /nick <name>"),
            ("/join", Some(room)) => Input::Request(ClientEvent::JoinPublic { room }),
            ("/join", None) => Input::Usage("Usage: /join #roomname"),
            ("/createprivate", _) => Input::Request(ClientEvent::CreatePrivate),
            ("/joinprivate", Some(code)) => Input::Request(ClientEvent::JoinPrivate { code }),
            ("/joinprivate", None) => Input::Usage("Usage: /joinprivate <10-digit-code>"),
            ("/rooms", _) => Input::Request(ClientEvent::ListRooms),
            ("/users", _) => Input::Request(ClientEvent::ListUsers),
            _ => Input::Unknown(command),
        };
        Some(input)
    }
}
