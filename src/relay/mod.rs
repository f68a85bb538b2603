//! Relay bridge between the capturing process and the daemon.
//!
//! The capture side posts tagged JSON envelopes and never waits. The daemon
//! side validates each one with [`accept`] before anything else sees it.
//! Delivery is best-effort and at most once per event: full or closed
//! transports drop.
//!
//! Two transports share the envelope format:
//!
//! - [`relay_channel`]: in-process, a bounded tokio channel
//! - [`connect`] / [`RelaySocketServer`]: a Unix socket with length-prefixed
//!   frames

mod channel;
mod error;
mod protocol;
mod socket;

pub use channel::{relay_channel, BridgeReceiver, PageRelay, DEFAULT_RELAY_CAPACITY};
pub use error::{RelayError, RelayResult};
pub use protocol::{accept, MessageKind, RelayEnvelope, RelayMessage, SOURCE_TAG};
pub use socket::{connect, RelaySocketServer, MAX_FRAME_SIZE};
