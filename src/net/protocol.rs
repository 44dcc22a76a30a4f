//! Control message catalog
//!
//! The session controller speaks a fixed catalog of control tokens to its
//! clients. Each token is an opaque byte sequence; clients match on the bytes,
//! not on any structure inside them. Tokens are always sent length-prefixed
//! (see `framing`) so that TCP coalescing cannot blur message boundaries.

/// Largest control token the framing layer will accept.
pub const MAX_CONTROL_MESSAGE_SIZE: usize = 256;

/// Size of the bounded read used for player input chunks.
pub const INPUT_CHUNK_SIZE: usize = 1024;

/// Messages from server to client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// The session is running; play.
    StartGame,
    /// The session paused (population dropped below minimum).
    PauseGame,
    /// The session resumed after a pause.
    ResumeGame,
    /// The server is shutting down.
    GameStopped,
    /// Not enough players yet; hold on.
    WaitForPlayer,
    /// The session is full; the connection will be closed.
    TooManyPlayers,
}

impl ControlMessage {
    /// The wire bytes for this token.
    pub const fn token(self) -> &'static [u8] {
        match self {
            ControlMessage::StartGame => b"start_game",
            ControlMessage::PauseGame => b"pause_game",
            ControlMessage::ResumeGame => b"resume_game",
            ControlMessage::GameStopped => b"game_stopped",
            ControlMessage::WaitForPlayer => b"wait_for_player",
            ControlMessage::TooManyPlayers => b"too_many_players",
        }
    }

    /// Parse wire bytes back into a catalog entry. Used by clients and tests.
    pub fn from_token(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b"start_game" => Some(ControlMessage::StartGame),
            b"pause_game" => Some(ControlMessage::PauseGame),
            b"resume_game" => Some(ControlMessage::ResumeGame),
            b"game_stopped" => Some(ControlMessage::GameStopped),
            b"wait_for_player" => Some(ControlMessage::WaitForPlayer),
            b"too_many_players" => Some(ControlMessage::TooManyPlayers),
            _ => None,
        }
    }
}
