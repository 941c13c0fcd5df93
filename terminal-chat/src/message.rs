use std::io;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Events a client sends to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    SetNick { nick: String },
    JoinPublic { room: String },
    CreatePrivate,
    JoinPrivate { code: String },
    SendMessage { msg: String },
    ListRooms,
    ListUsers,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::SetNick { .. } => "set_nick",
            ClientEvent::JoinPublic { .. } => "join_public",
            ClientEvent::CreatePrivate => "create_private",
            ClientEvent::JoinPrivate { .. } => "join_private",
            ClientEvent::SendMessage { .. } => "send_message",
            ClientEvent::ListRooms => "list_rooms",
            ClientEvent::ListUsers => "list_users",
        }
    }
}

/// Events the server sends to one or more clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    ServerMessage {
        msg: String,
    },
    Error {
        msg: String,
    },
    ChatMessage {
        user: String,
        msg: String,
        timestamp: String,
    },
    RoomJoined {
        room: String,
    },
    NickSuccess {
        nick: String,
    },
}

impl ServerEvent {
    pub fn info(msg: impl Into<String>) -> Self {
        ServerEvent::ServerMessage { msg: msg.into() }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        ServerEvent::Error { msg: msg.into() }
    }
}

/// Longest accepted line, newline excluded. Longer lines are skipped and
/// reported as [`io::ErrorKind::InvalidData`].
pub const MAX_LINE_BYTES: usize = 64 * 1024;

pub async fn read_message<R, T>(reader: &mut R) -> io::Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    // One JSON document per line so the protocol stays usable from netcat.
    let mut line = Vec::new();
    loop {
        line.clear();
        let limit = MAX_LINE_BYTES as u64 + 1;
        let bytes = (&mut *reader).take(limit).read_until(b'\n', &mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }
        if line.last() != Some(&b'\n') && bytes as u64 == limit {
            skip_line(reader).await?;
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line exceeds {MAX_LINE_BYTES} bytes"),
            ));
        }

        let trimmed = trim_line_ending(&line);
        if trimmed.is_empty() {
            continue;
        }

        let parsed = serde_json::from_slice(trimmed).map_err(to_io_error)?;
        return Ok(Some(parsed));
    }
}

/// Consumes input up to and including the next newline without buffering it.
async fn skip_line<R>(reader: &mut R) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(());
        }
        if let Some(end) = available.iter().position(|byte| *byte == b'\n') {
            reader.consume(end + 1);
            return Ok(());
        }
        let len = available.len();
        reader.consume(len);
    }
}

fn trim_line_ending(mut line: &[u8]) -> &[u8] {
    while let [rest @ .., b'\n' | b'\r'] = line {
        line = rest;
    }
    line
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut encoded = serde_json::to_vec(message).map_err(to_io_error)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Returns true when a read failure came from an undecodable line rather than the socket.
pub fn is_malformed(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::InvalidData
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
