//! Error kinds surfaced by the tuner core.

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GameError>;

#[derive(Debug, Error)]
pub enum GameError {
    /// TCP connect was refused or timed out.
    #[error("tuner unreachable at {addr}: {reason}")]
    Unreachable { addr: String, reason: String },

    /// The socket died while a request was using it.
    #[error("tuner connection lost: {0}")]
    Disconnected(String),

    /// The handshake did not advertise the scripting state a request needs.
    #[error("no game loaded: scripting state '{state}' not advertised")]
    NotInGame { state: String },

    /// EOF in the middle of a frame header or payload.
    #[error("frame truncated: {0}")]
    Truncated(&'static str),

    #[error("frame too large: max {max} got {got}")]
    OversizedFrame { max: usize, got: usize },

    /// The server answered with an `ERR:` payload.
    #[error("script error: {0}")]
    ScriptError(String),

    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GameError {
    /// Failures that mean the socket is unusable. These trigger one
    /// reconnect-and-retry inside [`crate::GameConnection`].
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            GameError::Disconnected(_)
                | GameError::Truncated(_)
                | GameError::OversizedFrame { .. }
                | GameError::Io(_)
        )
    }

    pub fn script_payload(&self) -> Option<&str> {
        match self {
            GameError::ScriptError(payload) => Some(payload),
            _ => None,
        }
    }
}
