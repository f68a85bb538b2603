//! Audit event types for structured logging.
//!
//! These events are logged to syslog with the `FIXONCE_RELAY` tag so that
//! admission changes and delivery health can be reconstructed after the fact.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Audit events for the relay daemon.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Relay session started (session whitelist was reset).
    SessionStart {
        /// Username of the person running the relay.
        user: String,
        /// Process ID of the relay.
        pid: u32,
    },

    /// Relay session ended.
    SessionEnd {
        /// Username of the person who ran the relay.
        user: String,
        /// Duration of the session in seconds.
        duration_sec: u64,
    },

    /// An origin was added to a whitelist.
    WhitelistAdd {
        /// Normalized origin.
        origin: String,
        /// Which whitelist.
        scope: Scope,
    },

    /// An origin was removed from the whitelists.
    WhitelistRemove {
        /// Normalized origin.
        origin: String,
    },

    /// The memory service was found on a port.
    ServerDiscovered {
        /// Port the service answered on.
        port: u16,
    },

    /// The memory service stopped answering.
    ServerUnreachable {
        /// What failed.
        reason: String,
    },

    /// A batch was accepted by the memory service.
    BatchDelivered {
        /// Records in the batch.
        count: usize,
    },

    /// A batch failed and went back on the queue.
    BatchRequeued {
        /// Records in the batch.
        count: usize,
        /// What failed.
        reason: String,
    },
}

/// Whitelist scope for audit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Survives restarts.
    Permanent,
    /// Cleared at the next session start.
    Session,
}

/// Wrapper for serializing events with timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct TimestampedEvent<'a> {
    /// ISO8601 timestamp.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    /// The actual event (flattened into this struct).
    #[serde(flatten)]
    pub event: &'a AuditEvent,
}

impl AuditEvent {
    /// Wrap this event with a timestamp for serialization.
    pub fn with_timestamp(&self) -> TimestampedEvent<'_> {
        TimestampedEvent {
            timestamp: Utc::now(),
            event: self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_start_serialization() {
        let event = AuditEvent::SessionStart {
            user: "developer".to_string(),
            pid: 12345,
        };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"session_start\""));
        assert!(json.contains("\"user\":\"developer\""));
        assert!(json.contains("\"pid\":12345"));
        assert!(json.contains("\"ts\""));
    }

    #[test]
    fn test_whitelist_add_serialization() {
        let event = AuditEvent::WhitelistAdd {
            origin: "example.com".to_string(),
            scope: Scope::Session,
        };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"whitelist_add\""));
        assert!(json.contains("\"origin\":\"example.com\""));
        assert!(json.contains("\"scope\":\"session\""));
    }

    #[test]
    fn test_whitelist_remove_serialization() {
        let event = AuditEvent::WhitelistRemove {
            origin: "example.com".to_string(),
        };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();
        assert!(json.contains("\"event\":\"whitelist_remove\""));
    }

    #[test]
    fn test_server_discovered_serialization() {
        let event = AuditEvent::ServerDiscovered { port: 5001 };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"server_discovered\""));
        assert!(json.contains("\"port\":5001"));
    }

    #[test]
    fn test_batch_requeued_serialization() {
        let event = AuditEvent::BatchRequeued {
            count: 7,
            reason: "connection refused".to_string(),
        };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"batch_requeued\""));
        assert!(json.contains("\"count\":7"));
        assert!(json.contains("\"reason\":\"connection refused\""));
    }

    #[test]
    fn test_session_end_serialization() {
        let event = AuditEvent::SessionEnd {
            user: "developer".to_string(),
            duration_sec: 179,
        };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"session_end\""));
        assert!(json.contains("\"duration_sec\":179"));
    }
}
