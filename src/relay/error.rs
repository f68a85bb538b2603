//! Relay error types.

use std::io;
use thiserror::Error;

/// Errors from the relay socket transport.
#[derive(Debug, Error)]
pub enum RelayError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// JSON encoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Peer closed the connection.
    #[error("Connection closed")]
    ConnectionClosed,
    /// Frame larger than the limit.
    #[error("Frame too large: {0} bytes (max {1})")]
    FrameTooLarge(usize, usize),
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
