//! Daemon-side actor joining relay, admission and queue.
//!
//! # Architecture
//!
//! ```text
//!  RelayMessage ──► Coordinator ──► AdmissionPolicy::is_allowed
//!                        │                 │ allowed
//!                        │                 ▼
//!                        │            BatchQueue::enqueue
//!                        ▼
//!              watch<OriginStatus>  (badge for the active page)
//! ```
//!
//! Records from origins that are not admitted are dropped here, before they
//! reach the queue. The status is refreshed on every message, on every
//! admission change, and once per [`STATUS_REFRESH`] so that flushes show up.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

use crate::admission::{AdmissionDecision, AdmissionPolicy, Origin};
use crate::queue::{BatchQueue, BatchSink};
use crate::relay::RelayMessage;
use crate::status::OriginStatus;

/// Interval of the periodic status refresh.
pub const STATUS_REFRESH: Duration = Duration::from_secs(1);

/// Routes relayed messages into the queue.
pub struct Coordinator<S> {
    policy: Arc<AdmissionPolicy>,
    queue: BatchQueue<S>,
    active_page: Option<String>,
    status_tx: watch::Sender<OriginStatus>,
}

impl<S: BatchSink> Coordinator<S> {
    /// Create a coordinator over a policy and a queue.
    pub fn new(policy: Arc<AdmissionPolicy>, queue: BatchQueue<S>) -> Self {
        let (status_tx, _) = watch::channel(OriginStatus::idle(queue.is_reachable()));
        Self {
            policy,
            queue,
            active_page: None,
            status_tx,
        }
    }

    /// Subscribe to status changes of the active page.
    pub fn status(&self) -> watch::Receiver<OriginStatus> {
        self.status_tx.subscribe()
    }

    /// Current status of the active page.
    pub fn current_status(&self) -> OriginStatus {
        self.status_tx.borrow().clone()
    }

    /// Process one message and return the admission decision it got.
    ///
    /// A record without a page URL is attributed to the active page.
    pub fn handle(&mut self, msg: RelayMessage) -> AdmissionDecision {
        let decision = match msg {
            RelayMessage::CapturedError(mut record) => {
                if record.page_url.is_empty()
                    && let Some(page) = &self.active_page
                {
                    record.page_url = page.clone();
                }

                let decision = self.policy.is_allowed(&record.page_url);
                if decision.allowed {
                    trace!("Queueing {} ({})", record.kind, decision.reason);
                    self.queue.enqueue(record);
                } else {
                    trace!("Dropping {} from {:?}: not admitted", record.kind, record.page_url);
                }
                decision
            }
            RelayMessage::PageOpened { url } => {
                let decision = self.policy.is_allowed(&url);
                debug!("Page opened: {} (capture {})", url, decision.reason);
                self.active_page = Some(url);
                decision
            }
        };
        self.refresh();
        decision
    }

    /// Recompute the status of the active page.
    pub fn refresh(&self) {
        let reachable = self.queue.is_reachable();
        let status = match &self.active_page {
            None => OriginStatus::idle(reachable),
            Some(page) => OriginStatus {
                origin: Origin::parse(page).map(|o| o.key()),
                decision: self.policy.is_allowed(page),
                pending: self.queue.pending_for_origin(page),
                server_reachable: reachable,
            },
        };

        self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }

    /// Run until `rx` closes or `shutdown` flips to `true`.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<RelayMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut changes = self.policy.subscribe();
        let mut tick = tokio::time::interval(STATUS_REFRESH);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Coordinator started");
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(msg) => {
                            self.handle(msg);
                        }
                        None => {
                            debug!("Relay input closed");
                            break;
                        }
                    }
                }
                Ok(()) = changes.changed() => {
                    debug!("Admission changed, re-evaluating active page");
                    self.refresh();
                }
                _ = tick.tick() => self.refresh(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Coordinator received shutdown signal");
                        break;
                    }
                }
            }
        }
        info!("Coordinator stopped");
    }
}
