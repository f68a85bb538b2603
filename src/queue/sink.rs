//! Delivery target for batches.

use std::fmt::Display;
use std::future::Future;

use crate::record::ErrorRecord;

/// Where flushed batches go.
///
/// The memory service client implements this; tests use in-memory sinks.
pub trait BatchSink: Send + Sync + 'static {
    /// Delivery failure.
    type Error: Display + Send;

    /// Deliver one batch. Any error requeues the whole batch.
    fn send_batch(
        &self,
        batch: &[ErrorRecord],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Check whether the target is reachable again.
    fn probe(&self) -> impl Future<Output = bool> + Send;
}
