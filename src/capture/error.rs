//! Capture error types.

use thiserror::Error;

/// Errors from installing instrumentation.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Another [`Instrumentation`](super::Instrumentation) is live in this process.
    #[error("Instrumentation is already installed in this process")]
    AlreadyInstalled,
}
