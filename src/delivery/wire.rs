//! JSON bodies exchanged with the memory service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::ErrorRecord;

/// Name the memory service reports in its ping reply.
pub const SERVICE_NAME: &str = "fixonce";

/// Header marking requests that originate from this pipeline.
pub const ORIGIN_HEADER: &str = "x-fixonce-origin";

/// Value sent in [`ORIGIN_HEADER`].
pub const ORIGIN_VALUE: &str = "fixonce-relay";

/// `GET /api/ping` reply.
#[derive(Debug, Clone, Deserialize)]
pub struct PingResponse {
    /// `"ok"` when healthy.
    #[serde(default)]
    pub status: String,
    /// Service name; only [`SERVICE_NAME`] is accepted.
    #[serde(default)]
    pub service: String,
    /// Port the service believes it listens on.
    #[serde(default)]
    pub port: Option<u16>,
}

/// `POST /api/log_errors_batch` body.
#[derive(Debug, Serialize)]
pub struct BatchRequest<'a> {
    /// Records in the batch.
    pub errors: &'a [ErrorRecord],
}

/// `POST /api/log_errors_batch` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BatchAck {
    /// `"ok"` on success.
    #[serde(default)]
    pub status: String,
    /// Records the service stored.
    #[serde(default)]
    pub processed: usize,
    /// Records the service received.
    #[serde(default)]
    pub total: usize,
}

/// `POST /api/handshake` body.
#[derive(Debug, Serialize)]
pub struct HandshakeRequest {
    /// Relay version.
    pub version: &'static str,
    /// Time of the handshake.
    pub timestamp: DateTime<Utc>,
}

/// `POST /api/handshake` reply.
#[derive(Debug, Clone, Deserialize)]
pub struct HandshakeAck {
    /// `"connected"` on success.
    #[serde(default)]
    pub status: String,
    /// Server time, if sent.
    #[serde(default)]
    pub timestamp: Option<String>,
}
