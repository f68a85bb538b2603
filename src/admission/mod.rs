//! Domain admission: which origins have capture switched on.
//!
//! Decisions come from the origin's shape (loopback, dev patterns, dev
//! ports) or from a persisted whitelist with permanent and session entries.
//! [`AdmissionPolicy`] documents the evaluation order.

mod error;
mod origin;
mod policy;
mod store;

pub use error::AdmissionError;
pub use origin::{matches_pattern, Origin};
pub use policy::{
    AdmissionDecision, AdmissionPolicy, AdmissionReason, WhitelistScope, DEFAULT_AUTO_PATTERNS,
    DEFAULT_DEV_PORTS,
};
pub use store::{AdmissionState, AdmissionStore, FileStore, MemoryStore};
