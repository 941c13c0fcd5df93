use thiserror::Error;

/// Request rejections. The display text is sent verbatim to the requesting client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("Nickname cannot be empty.")]
    EmptyNickname,
    #[error("Nickname \"{0}\" is already taken.")]
    NicknameTaken(String),
    #[error("Set a nickname first using /nick <name>")]
    NicknameRequired,
    #[error("Public rooms must start with #")]
    InvalidRoomName,
    #[error("Invalid private room code.")]
    UnknownRoomCode,
    #[error("That is not a private room.")]
    NotPrivateRoom,
    #[error("You are not in a room. Use /join #room or /createprivate")]
    NotInRoom,
    #[error("You must be in a room to list users.")]
    NotInRoomForUsers,
    #[error("Unknown session.")]
    UnknownSession,
    #[error("Malformed event.")]
    MalformedEvent,
}
