//! Telemetry and audit logging for fixonce-relay.
//!
//! # Architecture
//!
//! - **Audit logging** (syslog): admission changes and delivery health
//! - **Debug logging** (tracing): development logs to stderr via `tracing`
//!
//! The two never mix. In particular nothing here feeds back into the capture
//! pipeline, which ignores this crate's own tracing targets.
//!
//! # Event Format
//!
//! ```json
//! {"ts":"2026-01-07T14:32:01Z","event":"whitelist_add","origin":"example.com","scope":"permanent"}
//! ```

mod error;
mod events;
mod syslog;

pub use error::TelemetryError;
pub use events::{AuditEvent, Scope};
pub use self::syslog::{init_logger, install, record, try_audit, AuditLogger, SYSLOG_TAG};
