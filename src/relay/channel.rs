//! In-process relay over a bounded channel.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   serde_json::Value   ┌──────────────────┐
//! │  capture side    │──────────────────────►│ privileged side  │
//! │  PageRelay       │   bounded, lossy      │  BridgeReceiver  │
//! └──────────────────┘                       └──────────────────┘
//! ```
//!
//! Values travel untyped so the receiving side validates exactly what it
//! would validate from a socket.

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace};

use super::protocol::{accept, RelayMessage};
use crate::capture::RecordSink;
use crate::record::ErrorRecord;

/// Default channel capacity.
pub const DEFAULT_RELAY_CAPACITY: usize = 256;

/// Create a connected relay pair with the given capacity.
pub fn relay_channel(size: usize) -> (PageRelay, BridgeReceiver) {
    let (tx, rx) = mpsc::channel(size);
    (PageRelay::from_sender(tx), BridgeReceiver { rx })
}

/// Capture-side sender.
///
/// Posting never waits: a full or closed channel drops the message.
#[derive(Debug, Clone)]
pub struct PageRelay {
    tx: mpsc::Sender<Value>,
}

impl PageRelay {
    pub(crate) fn from_sender(tx: mpsc::Sender<Value>) -> Self {
        Self { tx }
    }

    /// Post a message. Returns whether it was queued.
    pub fn post(&self, msg: &RelayMessage) -> bool {
        match msg.to_value() {
            Ok(value) => self.post_raw(value),
            Err(e) => {
                debug!("Could not encode relay message: {}", e);
                false
            }
        }
    }

    /// Post an already encoded value.
    pub fn post_raw(&self, value: Value) -> bool {
        match self.tx.try_send(value) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!("Relay channel full, dropping message");
                false
            }
            Err(TrySendError::Closed(_)) => {
                trace!("Relay channel closed, dropping message");
                false
            }
        }
    }

    /// Announce the page the capture side is running in.
    pub fn page_opened(&self, url: impl Into<String>) -> bool {
        self.post(&RelayMessage::page_opened(url))
    }

    /// Whether the receiving side is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl RecordSink for PageRelay {
    fn emit(&self, record: ErrorRecord) {
        self.post(&RelayMessage::CapturedError(record));
    }
}

/// Privileged-side receiver; yields only accepted messages.
#[derive(Debug)]
pub struct BridgeReceiver {
    rx: mpsc::Receiver<Value>,
}

impl BridgeReceiver {
    /// Next valid message, or `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<RelayMessage> {
        while let Some(raw) = self.rx.recv().await {
            if let Some(msg) = accept(raw) {
                return Some(msg);
            }
        }
        None
    }

    /// Pump accepted messages into `tx` until either side closes.
    pub async fn forward(mut self, tx: mpsc::Sender<RelayMessage>) {
        while let Some(msg) = self.recv().await {
            if tx.send(msg).await.is_err() {
                break;
            }
        }
        debug!("Relay channel forwarder finished");
    }
}
