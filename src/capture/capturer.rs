//! Shared emit path for every hook.
//!
//! Each hook builds an [`ErrorRecord`] and hands it to [`Capturer::capture`],
//! which applies the anti-loop guard and the rate limit, fills in the page
//! URL, seals the record and passes it to the sink. Nothing in here may
//! unwind into the host.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::trace;

use super::limiter::RateLimiter;
use super::RecordSink;
use crate::record::ErrorRecord;

thread_local! {
    /// Set while this thread is inside the emit path.
    static EMITTING: Cell<bool> = const { Cell::new(false) };
}

/// Clears [`EMITTING`] on scope exit, including unwinds.
struct EmitGuard;

impl EmitGuard {
    fn enter() -> Option<Self> {
        if EMITTING.with(Cell::get) {
            return None;
        }
        EMITTING.with(|e| e.set(true));
        Some(Self)
    }
}

impl Drop for EmitGuard {
    fn drop(&mut self) {
        EMITTING.with(|e| e.set(false));
    }
}

/// Whether the current thread is inside the emit path.
pub(crate) fn is_emitting() -> bool {
    EMITTING.with(Cell::get)
}

pub(crate) struct Capturer {
    sink: Arc<dyn RecordSink>,
    active: AtomicBool,
    limiter: Mutex<RateLimiter>,
    page_url: String,
}

impl Capturer {
    pub(crate) fn new(sink: Arc<dyn RecordSink>, max_per_minute: u32, page_url: String) -> Self {
        Self {
            sink,
            active: AtomicBool::new(true),
            limiter: Mutex::new(RateLimiter::new(max_per_minute)),
            page_url,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Emit a record built by `build`.
    ///
    /// `build` runs inside the guard so that formatting host values cannot
    /// unwind into the host or recurse into capture.
    pub(crate) fn capture_with(&self, build: impl FnOnce() -> ErrorRecord) {
        if !self.is_active() {
            return;
        }
        let Some(_guard) = EmitGuard::enter() else {
            return;
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let allowed = self
                .limiter
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .allow();
            if !allowed {
                trace!("Capture rate limit reached, dropping record");
                return;
            }

            let mut record = build();
            if record.page_url.is_empty() {
                record.page_url = self.page_url.clone();
            }
            record.seal();
            self.sink.emit(record);
        }));

        if outcome.is_err() {
            trace!("Capture hook panicked, event dropped");
        }
    }

    pub(crate) fn capture(&self, record: ErrorRecord) {
        self.capture_with(move || record);
    }
}
