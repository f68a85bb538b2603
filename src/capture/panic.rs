//! Uncaught exception capture via the process panic hook.
//!
//! The previous hook always runs first, so the host's panic output is
//! unchanged. Restoring puts the previous hook back.
//!
//! Records carry the panic location, the source lines around it when the
//! file is readable, and the name of the current tracing span if any.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::{self, PanicHookInfo};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::capturer::{is_emitting, Capturer};
use super::snippet::source_snippet;
use crate::record::{ErrorKind, ErrorRecord, Severity};

type Hook = Box<dyn Fn(&PanicHookInfo<'_>) + Sync + Send + 'static>;

/// Set while our hook is installed; task observation defers panics to it.
static HOOK_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Whether the capture panic hook is installed.
pub(crate) fn hook_active() -> bool {
    HOOK_ACTIVE.load(Ordering::Acquire)
}

/// Installed panic hook; dropping it does not restore, call [`restore`].
///
/// [`restore`]: PanicHookGuard::restore
pub(crate) struct PanicHookGuard {
    previous: Arc<Hook>,
}

impl PanicHookGuard {
    pub(crate) fn install(capturer: Arc<Capturer>) -> Self {
        let previous: Arc<Hook> = Arc::new(panic::take_hook());
        let chained = Arc::clone(&previous);

        panic::set_hook(Box::new(move |info| {
            (*chained)(info);
            if !is_emitting() {
                capturer.capture_with(|| panic_record(info));
            }
        }));
        HOOK_ACTIVE.store(true, Ordering::Release);

        Self { previous }
    }

    pub(crate) fn restore(self) {
        HOOK_ACTIVE.store(false, Ordering::Release);
        let previous = self.previous;
        let _ours = panic::take_hook();
        panic::set_hook(Box::new(move |info| (*previous)(info)));
    }
}

/// Build the record for a panic.
pub(crate) fn panic_record(info: &PanicHookInfo<'_>) -> ErrorRecord {
    let message = payload_message(info.payload());
    let mut record = ErrorRecord::new(
        ErrorKind::UncaughtException,
        Severity::Critical,
        format!("Uncaught panic: {}", message),
    );

    if let Some(location) = info.location() {
        record = record
            .with_location(
                location.file(),
                Some(location.line()),
                Some(location.column()),
            )
            .with_snippet(source_snippet(location.file(), location.line()));
    }
    if let Some(span) = tracing::Span::current().metadata() {
        record = record.with_function(span.name());
    }

    let backtrace = Backtrace::capture();
    if backtrace.status() == BacktraceStatus::Captured {
        record = record.with_stack(backtrace.to_string());
    }
    record
}

/// Panic payloads are almost always `&str` or `String`.
pub(crate) fn payload_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
