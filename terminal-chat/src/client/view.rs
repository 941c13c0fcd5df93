//! Client-side state shown by the chat view.
//!
//! [`ChatView`] is owned by the render loop. Network events reach it through
//! a channel that the loop drains each tick, and keystrokes are applied on the
//! same thread, so the log is never read while half-appended.

use std::collections::VecDeque;

use chrono::{DateTime, Local, NaiveDateTime};
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use super::command::Input;
use super::network::NetEvent;
use crate::message::{ClientEvent, ServerEvent};

/// Oldest lines are dropped past this many.
pub const MAX_LOG_LINES: usize = 1000;

const LOBBY: &str = "Lobby";
const DISPLAY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    System,
    Chat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub kind: LineKind,
    pub text: String,
}

#[derive(Debug)]
pub struct ChatView {
    log: VecDeque<LogLine>,
    nickname: Option<String>,
    room: String,
    input: String,
    should_quit: bool,
}

impl Default for ChatView {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatView {
    pub fn new() -> Self {
        Self {
            log: VecDeque::new(),
            nickname: None,
            room: LOBBY.to_string(),
            input: String::new(),
            should_quit: false,
        }
    }

    pub fn log(&self) -> &VecDeque<LogLine> {
        &self.log
    }

    pub fn nickname(&self) -> Option<&str> {
        self.nickname.as_deref()
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    pub fn push_system(&mut self, text: impl AsRef<str>) {
        self.push(LineKind::System, format!("* {}", text.as_ref()));
    }

    fn push(&mut self, kind: LineKind, text: String) {
        if self.log.len() == MAX_LOG_LINES {
            self.log.pop_front();
        }
        self.log.push_back(LogLine { kind, text });
    }

    /// Folds one event from the network task into the view.
    pub fn apply(&mut self, event: NetEvent) {
        match event {
            NetEvent::Connected => self.push_system("Connected to server."),
            NetEvent::ConnectFailed(reason) => {
                self.push_system(format!("Connection failed: {reason}"))
            }
            NetEvent::Disconnected => self.push_system("Disconnected from server."),
            NetEvent::SendFailed(reason) => self.push_system(format!("Send failed: {reason}")),
            NetEvent::Offline => self.push_system("Not connected to server."),
            NetEvent::Server(event) => self.apply_server_event(event),
        }
    }

    fn apply_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::ServerMessage { msg } => self.push_system(msg),
            ServerEvent::Error { msg } => self.push_system(format!("ERROR: {msg}")),
            ServerEvent::ChatMessage {
                user,
                msg,
                timestamp,
            } => {
                let line = format!("{} | {user} | {msg}", display_time(&timestamp));
                self.push(LineKind::Chat, line);
            }
            ServerEvent::RoomJoined { room } => {
                self.push_system(format!("Joined: {room}"));
                self.room = room;
            }
            ServerEvent::NickSuccess { nick } => self.nickname = Some(nick),
        }
    }

    /// Applies a key press. Returns a request when the key submitted one.
    pub fn handle_key(&mut self, key: KeyEvent) -> Option<ClientEvent> {
        if key.kind != KeyEventKind::Press {
            return None;
        }

        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.should_quit = true;
            }
            KeyCode::Char(c) if is_text_input(key.modifiers, c) => self.input.push(c),
            KeyCode::Backspace => {
                self.input.pop();
            }
            KeyCode::Enter => return self.submit(),
            KeyCode::Esc => self.should_quit = true,
            _ => {}
        }
        None
    }

    /// Interprets and clears the edit buffer.
    pub fn submit(&mut self) -> Option<ClientEvent> {
        let line = std::mem::take(&mut self.input);
        match Input::parse(&line)? {
            Input::Quit => {
                self.should_quit = true;
                None
            }
            Input::Request(event) => Some(event),
            Input::Chat(msg) => {
                if self.nickname.is_some() {
                    Some(ClientEvent::SendMessage { msg })
                } else {
                    self.push_system("Please set a nickname first with /nick <name>");
                    None
                }
            }
            Input::Usage(hint) => {
                self.push_system(hint);
                None
            }
            Input::Unknown(command) => {
                self.push_system(format!("Unknown command: {command}"));
                None
            }
        }
    }
}

/// Shift is the only modifier that still types text.
fn is_text_input(modifiers: KeyModifiers, c: char) -> bool {
    !c.is_control() && !modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT)
}

/// Formats a server timestamp for display, falling back to the raw text.
fn display_time(timestamp: &str) -> String {
    if timestamp.is_empty() {
        return Local::now().format(DISPLAY_TIME_FORMAT).to_string();
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(timestamp) {
        return parsed.format(DISPLAY_TIME_FORMAT).to_string();
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S%.f") {
        return parsed.format(DISPLAY_TIME_FORMAT).to_string();
    }
    timestamp.to_string()
}
