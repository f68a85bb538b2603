//! Delivery error types.

use thiserror::Error;

/// Errors talking to the memory service.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// No candidate port answered as the memory service.
    #[error("Memory service not found on {host} ports {ports:?}")]
    ServiceNotFound {
        /// Host that was probed.
        host: String,
        /// Ports that were probed.
        ports: Vec<u16>,
    },

    /// Connecting or sending failed.
    #[error("Request to {path} failed: {source}")]
    Transport {
        /// Endpoint path.
        path: &'static str,
        /// The underlying client error.
        source: hyper_util::client::legacy::Error,
    },

    /// Reading the response body failed.
    #[error("Failed to read response from {path}: {source}")]
    Body {
        /// Endpoint path.
        path: &'static str,
        /// The underlying body error.
        source: hyper::Error,
    },

    /// The request did not complete in time.
    #[error("Request to {path} timed out after {timeout_ms}ms")]
    Timeout {
        /// Endpoint path.
        path: &'static str,
        /// Configured timeout.
        timeout_ms: u128,
    },

    /// The service answered with a non-success status.
    #[error("{path} returned HTTP {status}")]
    Status {
        /// Endpoint path.
        path: &'static str,
        /// HTTP status code.
        status: u16,
    },

    /// A request could not be built.
    #[error("Invalid request: {0}")]
    Request(#[from] hyper::http::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
