//! Error types for muxwire.

use thiserror::Error;

use crate::protocol::GoAwayCode;

/// Main error type for all multiplexer operations.
#[derive(Debug, Error)]
pub enum MuxError {
    /// I/O error on the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while loading a configuration document.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The session (or the stream's side of it) has been shut down.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The session was torn down by a transport failure.
    #[error("Transport failed: {0}")]
    TransportFailed(String),

    /// The peer violated the protocol (bad version/tag, duplicate id, window overrun, ...).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Malformed frame on the wire (truncated header, incomplete body).
    #[error("Invalid frame format: {0}")]
    InvalidFormat(String),

    /// Data frame body exceeds the maximum frame size.
    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// The peer opened more concurrent streams than configured.
    #[error("Stream capacity exceeded: limit is {0}")]
    CapacityExceeded(usize),

    /// The stream was reset.
    #[error("Stream {0} was reset")]
    StreamReset(u32),
}

impl MuxError {
    /// GoAway code sent to the peer when this error tears the connection down.
    pub fn go_away_code(&self) -> GoAwayCode {
        match self {
            Self::Protocol(_) | Self::InvalidFormat(_) | Self::FrameTooLarge(_) => {
                GoAwayCode::ProtocolError
            }
            _ => GoAwayCode::InternalError,
        }
    }
}

/// Result type alias using MuxError.
pub type Result<T> = std::result::Result<T, MuxError>;
