//! The batching queue.
//!
//! # State
//!
//! - `pending`: records in arrival order
//! - `server_reachable`: starts `true`; cleared by a failed send or probe
//! - `timer`: the armed flush-delay task, if any
//!
//! The state lives behind one mutex that is never held across an `.await`.
//! `enqueue` is synchronous: size-triggered and delay-triggered flushes run
//! on spawned tasks.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::sink::BatchSink;
use crate::admission::Origin;
use crate::record::ErrorRecord;
use crate::telemetry::{self, AuditEvent};

/// Queue tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Records per POST; reaching it flushes immediately.
    pub batch_size: usize,
    /// How long a partial batch waits before it is flushed.
    pub flush_delay: Duration,
    /// Interval between reachability probes.
    pub probe_interval: Duration,
    /// Timeout for one batch POST.
    pub request_timeout: Duration,
    /// Oldest records are dropped past this many pending.
    pub max_pending: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            flush_delay: Duration::from_secs(1),
            probe_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(3),
            max_pending: 500,
        }
    }
}

/// Point-in-time view of the queue, for status output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    /// Records waiting.
    pub pending: usize,
    /// Whether flushes are attempted.
    pub server_reachable: bool,
    /// Whether a flush-delay timer is armed.
    pub timer_armed: bool,
}

#[derive(Debug)]
struct QueueState {
    pending: VecDeque<ErrorRecord>,
    server_reachable: bool,
    timer: Option<JoinHandle<()>>,
    timer_generation: u64,
    flushing: bool,
}

struct Shared<S> {
    sink: S,
    config: QueueConfig,
    state: Mutex<QueueState>,
}

/// Batching queue in front of a [`BatchSink`].
///
/// Cloning gives another handle to the same queue.
pub struct BatchQueue<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for BatchQueue<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: BatchSink> BatchQueue<S> {
    /// Create an empty queue.
    pub fn new(sink: S, config: QueueConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                sink,
                config,
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    server_reachable: true,
                    timer: None,
                    timer_generation: 0,
                    flushing: false,
                }),
            }),
        }
    }

    /// Append a record.
    ///
    /// At `batch_size` pending the armed timer is cancelled and a flush is
    /// started; otherwise a flush-delay timer is armed if none is.
    pub fn enqueue(&self, record: ErrorRecord) {
        let shared = &self.shared;
        let mut state = shared.lock();

        state.pending.push_back(record);
        state.trim_to(shared.config.max_pending);

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime, record stays queued until the next flush");
            return;
        };

        if state.pending.len() >= shared.config.batch_size {
            // A timer that already fired has cleared `timer` itself. One that
            // has not sees the new generation on wake and exits.
            if state.timer.take().is_some() {
                state.timer_generation += 1;
                trace!("Cancelled flush timer for size-triggered flush");
            }
            drop(state);
            let shared = Arc::clone(shared);
            handle.spawn(async move { shared.flush().await });
        } else if state.timer.is_none() {
            state.timer_generation += 1;
            let generation = state.timer_generation;
            let delay = shared.config.flush_delay;
            let timer_shared = Arc::clone(shared);
            state.timer = Some(handle.spawn(async move {
                tokio::time::sleep(delay).await;
                {
                    let mut state = timer_shared.lock();
                    if state.timer_generation != generation {
                        return;
                    }
                    state.timer = None;
                }
                timer_shared.flush().await;
            }));
        }
    }

    /// Send everything pending, one batch at a time.
    ///
    /// No-op when empty, unreachable, or another flush is running. On failure
    /// the batch goes back to the front of the queue in its original order
    /// and the server is marked unreachable. Dropping the returned future
    /// mid-send also puts the batch back, without touching reachability.
    pub async fn flush(&self) {
        self.shared.flush().await;
    }

    /// Probe once; on success mark reachable and flush.
    pub async fn probe_once(&self) -> bool {
        self.shared.probe_once().await
    }

    /// Spawn the periodic probe loop. It stops when `shutdown` turns `true`.
    pub fn spawn_probe(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(shared.config.probe_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        shared.probe_once().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("Queue probe received shutdown signal");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Number of records waiting.
    pub fn len(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records waiting whose page URL belongs to `origin`.
    pub fn pending_for_origin(&self, origin: &str) -> usize {
        let Some(origin) = Origin::parse(origin) else {
            return 0;
        };
        self.shared
            .lock()
            .pending
            .iter()
            .filter(|r| Origin::parse(&r.page_url).as_ref() == Some(&origin))
            .count()
    }

    /// Whether flushes are currently attempted.
    pub fn is_reachable(&self) -> bool {
        self.shared.lock().server_reachable
    }

    /// Whether a flush-delay timer is armed.
    pub fn timer_armed(&self) -> bool {
        self.shared.lock().timer.is_some()
    }

    /// Copy of the pending records, oldest first.
    pub fn pending(&self) -> Vec<ErrorRecord> {
        self.shared.lock().pending.iter().cloned().collect()
    }

    /// Counters for status output.
    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.shared.lock();
        QueueSnapshot {
            pending: state.pending.len(),
            server_reachable: state.server_reachable,
            timer_armed: state.timer.is_some(),
        }
    }
}

impl QueueState {
    /// Drop the oldest records past `max`.
    fn trim_to(&mut self, max: usize) {
        let excess = self.pending.len().saturating_sub(max);
        if excess > 0 {
            self.pending.drain(..excess);
            warn!("Queue over {} records, dropped the {} oldest", max, excess);
        }
    }
}

/// Claim on the single flush. Dropping it, on any path including a
/// cancelled flush future, returns the unsent batch to the front of the
/// queue and frees the claim.
struct FlushSlot<'a, S> {
    shared: &'a Shared<S>,
    in_flight: Vec<ErrorRecord>,
}

impl<S> Drop for FlushSlot<'_, S> {
    fn drop(&mut self) {
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for record in self.in_flight.drain(..).rev() {
            state.pending.push_front(record);
        }
        state.trim_to(self.shared.config.max_pending);
        state.flushing = false;
    }
}

impl<S: BatchSink> Shared<S> {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn flush(&self) {
        {
            let mut state = self.lock();
            if state.flushing || state.pending.is_empty() || !state.server_reachable {
                return;
            }
            state.flushing = true;
        }
        let mut slot = FlushSlot {
            shared: self,
            in_flight: Vec::new(),
        };

        loop {
            {
                let mut state = self.lock();
                if state.pending.is_empty() || !state.server_reachable {
                    return;
                }
                let n = state.pending.len().min(self.config.batch_size.max(1));
                slot.in_flight = state.pending.drain(..n).collect();
            }

            let outcome = tokio::time::timeout(
                self.config.request_timeout,
                self.sink.send_batch(&slot.in_flight),
            )
            .await;

            let reason = match outcome {
                Ok(Ok(())) => {
                    let count = slot.in_flight.len();
                    slot.in_flight.clear();
                    debug!("Delivered batch of {} records", count);
                    telemetry::record(AuditEvent::BatchDelivered { count });
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!(
                    "timed out after {}ms",
                    self.config.request_timeout.as_millis()
                ),
            };

            let count = slot.in_flight.len();
            self.lock().server_reachable = false;
            warn!("Batch of {} records requeued: {}", count, reason);
            telemetry::record(AuditEvent::BatchRequeued { count, reason });
            // The slot puts the batch back when it drops.
            return;
        }
    }

    async fn probe_once(&self) -> bool {
        let ok = self.sink.probe().await;
        let was_reachable = {
            let mut state = self.lock();
            std::mem::replace(&mut state.server_reachable, ok)
        };

        if ok {
            if !was_reachable {
                info!("Memory service reachable again, flushing queue");
            }
            self.flush().await;
        } else if was_reachable {
            warn!("Memory service probe failed, pausing delivery");
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ErrorKind, Severity};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<Vec<String>>>,
        fail: AtomicBool,
        probe_ok: AtomicBool,
        gate: Option<Arc<Notify>>,
    }

    impl RecordingSink {
        fn messages(&self) -> Vec<Vec<String>> {
            self.batches.lock().unwrap().clone()
        }
    }

    impl BatchSink for Arc<RecordingSink> {
        type Error = String;

        async fn send_batch(&self, batch: &[ErrorRecord]) -> Result<(), String> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err("connection refused".to_string());
            }
            self.batches
                .lock()
                .unwrap()
                .push(batch.iter().map(|r| r.message.clone()).collect());
            Ok(())
        }

        async fn probe(&self) -> bool {
            self.probe_ok.load(Ordering::SeqCst)
        }
    }

    fn record(msg: &str) -> ErrorRecord {
        ErrorRecord::new(ErrorKind::ConsoleError, Severity::Error, msg)
            .with_page_url("http://localhost:3000/")
    }

    fn messages(queue: &BatchQueue<Arc<RecordingSink>>) -> Vec<String> {
        queue.pending().into_iter().map(|r| r.message).collect()
    }

    /// Let spawned tasks run without reaching the flush delay.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_exact_batch_flushes_without_timer() {
        let sink = Arc::new(RecordingSink::default());
        let queue = BatchQueue::new(Arc::clone(&sink), QueueConfig::default());

        for i in 0..10 {
            queue.enqueue(record(&format!("e{i}")));
        }
        assert!(!queue.timer_armed());

        settle().await;
        let batches = sink.messages();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 10);
        assert_eq!(batches[0][0], "e0");
        assert!(queue.is_empty());
        assert!(!queue.timer_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_batch_waits_for_delay() {
        let sink = Arc::new(RecordingSink::default());
        let queue = BatchQueue::new(Arc::clone(&sink), QueueConfig::default());

        queue.enqueue(record("a"));
        queue.enqueue(record("b"));
        assert!(queue.timer_armed());

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(sink.messages().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.messages(), vec![vec!["a".to_string(), "b".to_string()]]);
        assert!(!queue.timer_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_flush_cancels_timer() {
        let sink = Arc::new(RecordingSink::default());
        let config = QueueConfig {
            batch_size: 3,
            ..Default::default()
        };
        let queue = BatchQueue::new(Arc::clone(&sink), config);

        queue.enqueue(record("a"));
        assert!(queue.timer_armed());
        queue.enqueue(record("b"));
        queue.enqueue(record("c"));
        assert!(!queue.timer_armed());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sink.messages().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_flush_requeues_in_order() {
        let sink = Arc::new(RecordingSink::default());
        sink.fail.store(true, Ordering::SeqCst);
        let queue = BatchQueue::new(Arc::clone(&sink), QueueConfig::default());

        queue.enqueue(record("a"));
        queue.enqueue(record("b"));
        queue.enqueue(record("c"));
        queue.flush().await;

        assert_eq!(messages(&queue), vec!["a", "b", "c"]);
        assert!(!queue.is_reachable());

        queue.enqueue(record("d"));
        assert_eq!(messages(&queue), vec!["a", "b", "c", "d"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeue_goes_ahead_of_later_arrivals() {
        let gate = Arc::new(Notify::new());
        let sink = Arc::new(RecordingSink {
            gate: Some(Arc::clone(&gate)),
            ..Default::default()
        });
        sink.fail.store(true, Ordering::SeqCst);
        let queue = BatchQueue::new(Arc::clone(&sink), QueueConfig::default());

        queue.enqueue(record("a"));
        queue.enqueue(record("b"));

        let flushing = queue.clone();
        let task = tokio::spawn(async move { flushing.flush().await });
        settle().await;

        // In flight: the batch is out of the queue.
        assert!(queue.is_empty());
        queue.enqueue(record("late"));

        gate.notify_one();
        task.await.unwrap();

        assert_eq!(messages(&queue), vec!["a", "b", "late"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_noop_when_unreachable() {
        let sink = Arc::new(RecordingSink::default());
        sink.fail.store(true, Ordering::SeqCst);
        let queue = BatchQueue::new(Arc::clone(&sink), QueueConfig::default());

        queue.enqueue(record("a"));
        queue.flush().await;
        assert!(!queue.is_reachable());

        sink.fail.store(false, Ordering::SeqCst);
        queue.flush().await;
        assert!(sink.messages().is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_success_restores_and_flushes() {
        let sink = Arc::new(RecordingSink::default());
        sink.fail.store(true, Ordering::SeqCst);
        let queue = BatchQueue::new(Arc::clone(&sink), QueueConfig::default());

        queue.enqueue(record("a"));
        queue.flush().await;
        assert!(!queue.is_reachable());

        sink.fail.store(false, Ordering::SeqCst);
        sink.probe_ok.store(true, Ordering::SeqCst);
        assert!(queue.probe_once().await);

        assert!(queue.is_reachable());
        assert!(queue.is_empty());
        assert_eq!(sink.messages(), vec![vec!["a".to_string()]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_loop_runs_on_interval() {
        let sink = Arc::new(RecordingSink::default());
        sink.fail.store(true, Ordering::SeqCst);
        let queue = BatchQueue::new(Arc::clone(&sink), QueueConfig::default());
        queue.enqueue(record("a"));
        queue.flush().await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let probe = queue.spawn_probe(shutdown_rx);

        sink.fail.store(false, Ordering::SeqCst);
        sink.probe_ok.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert!(queue.is_reachable());
        assert!(queue.is_empty());

        shutdown_tx.send(true).unwrap();
        probe.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_large_backlog_drains_in_batches() {
        let sink = Arc::new(RecordingSink::default());
        let config = QueueConfig {
            batch_size: 4,
            ..Default::default()
        };
        let queue = BatchQueue::new(Arc::clone(&sink), config);

        sink.fail.store(true, Ordering::SeqCst);
        for i in 0..10 {
            queue.enqueue(record(&format!("e{i}")));
        }
        settle().await;
        assert_eq!(queue.len(), 10);

        sink.fail.store(false, Ordering::SeqCst);
        sink.probe_ok.store(true, Ordering::SeqCst);
        queue.probe_once().await;

        let sizes: Vec<usize> = sink.messages().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_pending_drops_oldest() {
        let sink = Arc::new(RecordingSink::default());
        sink.fail.store(true, Ordering::SeqCst);
        let config = QueueConfig {
            batch_size: 100,
            max_pending: 3,
            ..Default::default()
        };
        let queue = BatchQueue::new(Arc::clone(&sink), config);

        for msg in ["a", "b", "c", "d"] {
            queue.enqueue(record(msg));
        }
        assert_eq!(messages(&queue), vec!["b", "c", "d"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_for_origin() {
        let sink = Arc::new(RecordingSink::default());
        let queue = BatchQueue::new(Arc::clone(&sink), QueueConfig::default());

        queue.enqueue(record("a"));
        queue.enqueue(
            ErrorRecord::new(ErrorKind::ConsoleWarn, Severity::Warning, "b")
                .with_page_url("https://example.com/page"),
        );

        assert_eq!(queue.pending_for_origin("localhost:3000"), 1);
        assert_eq!(queue.pending_for_origin("http://example.com"), 1);
        assert_eq!(queue.pending_for_origin("other.com"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_flush_keeps_batch_and_frees_slot() {
        let gate = Arc::new(Notify::new());
        let sink = Arc::new(RecordingSink {
            gate: Some(Arc::clone(&gate)),
            ..Default::default()
        });
        let queue = BatchQueue::new(Arc::clone(&sink), QueueConfig::default());

        queue.enqueue(record("a"));
        queue.enqueue(record("b"));
        let cancelled = tokio::time::timeout(Duration::from_millis(10), queue.flush()).await;
        assert!(cancelled.is_err());

        assert_eq!(messages(&queue), vec!["a", "b"]);
        assert!(queue.is_reachable());

        queue.enqueue(record("c"));
        let flushing = queue.clone();
        let task = tokio::spawn(async move { flushing.flush().await });
        settle().await;
        gate.notify_one();
        task.await.unwrap();

        assert_eq!(
            sink.messages(),
            vec![vec!["a".to_string(), "b".to_string(), "c".to_string()]]
        );
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeue_respects_max_pending() {
        let gate = Arc::new(Notify::new());
        let sink = Arc::new(RecordingSink {
            gate: Some(Arc::clone(&gate)),
            ..Default::default()
        });
        sink.fail.store(true, Ordering::SeqCst);
        let config = QueueConfig {
            max_pending: 3,
            ..Default::default()
        };
        let queue = BatchQueue::new(Arc::clone(&sink), config);

        queue.enqueue(record("a"));
        queue.enqueue(record("b"));
        let flushing = queue.clone();
        let task = tokio::spawn(async move { flushing.flush().await });
        settle().await;

        for msg in ["c", "d", "e"] {
            queue.enqueue(record(msg));
        }
        gate.notify_one();
        task.await.unwrap();

        assert_eq!(messages(&queue), vec!["c", "d", "e"]);
        assert!(!queue.is_reachable());
    }
}
