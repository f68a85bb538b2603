//! Admission error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading or changing admission state.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// Failed to read the state file.
    #[error("Failed to read admission state {path}: {source}")]
    ReadError {
        /// Path to the state file.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The state file is not valid TOML.
    #[error("Failed to parse admission state {path}: {source}")]
    ParseError {
        /// Path to the state file.
        path: PathBuf,
        /// The underlying TOML parse error.
        source: toml::de::Error,
    },

    /// Failed to write the state file.
    #[error("Failed to write admission state {path}: {source}")]
    WriteError {
        /// Path to the state file.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to serialize admission state.
    #[error("Failed to serialize admission state: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// The origin could not be parsed.
    #[error("Invalid origin: {0:?}")]
    InvalidOrigin(String),

    /// The in-memory state lock was poisoned.
    #[error("Admission state lock poisoned")]
    LockPoisoned,
}
