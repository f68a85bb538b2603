//! Batched delivery with retry-by-requeue.
//!
//! Records are grouped into batches of up to `batch_size`. A full batch is
//! sent right away; a partial one waits `flush_delay`. A failed send puts the
//! batch back at the head of the queue and pauses delivery until a periodic
//! probe sees the memory service again.
//!
//! The queue is in memory only and is lost on restart.

mod batcher;
mod sink;

pub use batcher::{BatchQueue, QueueConfig, QueueSnapshot};
pub use sink::BatchSink;
