//! Error types for the peer side

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    /// Relay unreachable; callers may carry on offline
    #[error("relay unreachable at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Edits are refused until the relay's snapshot has been applied
    #[error("session has not received its initial snapshot yet")]
    NotSynced,

    #[error("session is disconnected")]
    Disconnected,
}

/// A line typed at the peer shell that could not be understood.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command `{0}`, type `help` for a list")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("`{0}` is not a valid coordinate")]
    InvalidCoordinate(String),
}
