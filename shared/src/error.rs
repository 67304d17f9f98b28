//! Error types for the wire protocol and its adapters

use thiserror::Error;

/// Failure to turn bytes into an `Envelope` or back.
///
/// Everything except `Io` is a framing problem: the bytes on the stream do
/// not describe a valid frame, and the connection that produced them cannot
/// be trusted any further.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Header declares a zero-length payload
    #[error("frame declares an empty payload")]
    EmptyFrame,

    /// Header declares more bytes than any valid envelope needs
    #[error("frame payload of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    /// Stream ended inside a header or payload
    #[error("stream ended mid-frame")]
    Truncated,

    /// A complete buffer whose size disagrees with its header
    #[error("frame declares {declared} payload bytes but {actual} are present")]
    LengthMismatch { declared: usize, actual: usize },

    /// Payload is not a known envelope
    #[error("malformed envelope: {0}")]
    Malformed(#[from] bincode::Error),

    /// Underlying stream failed
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    pub fn is_framing(&self) -> bool {
        !matches!(self, CodecError::Io(_))
    }
}

/// Failure to hand an envelope to a pipe.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("pipe is closed")]
    Closed,
}

/// Failure of a snapshot store.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("snapshot storage i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored snapshot is corrupt: {0}")]
    Corrupt(#[from] bincode::Error),
}
