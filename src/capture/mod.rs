//! In-process error capture.
//!
//! A host links this crate and calls [`Instrumentation::install`] once. The
//! returned handle owns every hook and removes them on [`restore`] or drop.
//!
//! # Architecture
//!
//! ```text
//!   tracing WARN/ERROR ──► CaptureLayer ─┐
//!   Console::error/warn ─► Console ──────┤
//!   panic ───────────────► panic hook ───┤
//!   task Err / panic ────► observe_task ─┼─► Capturer ─► RecordSink
//!   FetchTransport ──────► FetchHook ────┤   (guard, rate limit,
//!   XhrTransport ────────► XhrHook ──────┘    sanitize, seal)
//! ```
//!
//! Hooks never change what the host sees: wrapped calls return exactly what
//! the inner call returned, and a fault inside a hook drops that one event.
//!
//! [`restore`]: Instrumentation::restore

mod capturer;
mod console;
mod error;
mod http;
mod limiter;
mod panic;
mod snippet;
mod task;

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::record::ErrorRecord;
use capturer::Capturer;
use panic::PanicHookGuard;

pub use console::{
    render_args, CaptureLayer, Console, ConsoleArg, ConsoleLevel, ConsoleSink, Inspect,
};
pub use error::CaptureError;
pub use http::{
    FetchHook, FetchTransport, HttpRequest, HttpResponse, XhrCallback, XhrHook, XhrOutcome,
    XhrTransport,
};
pub use limiter::{RateLimiter, WINDOW};
pub use snippet::CONTEXT_LINES;

/// Default per-minute record budget.
pub const DEFAULT_MAX_PER_MINUTE: u32 = 10;

/// Set while an [`Instrumentation`] is live.
static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Where captured records go.
///
/// `emit` is called on the capturing thread and must not block.
pub trait RecordSink: Send + Sync + 'static {
    /// Hand off one sealed record.
    fn emit(&self, record: ErrorRecord);
}

impl RecordSink for mpsc::UnboundedSender<ErrorRecord> {
    fn emit(&self, record: ErrorRecord) {
        // Receiver gone means nobody is listening; drop.
        let _ = self.send(record);
    }
}

/// Which hooks a capture mode installs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Every hook enabled in [`CaptureConfig`].
    #[default]
    Detailed,
    /// Legacy mode: panics and tasks only.
    Minimal,
}

/// Hook toggles and limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Console layer and [`Console`] wrapper.
    pub console: bool,
    /// Panic hook.
    pub uncaught: bool,
    /// Task observation.
    pub rejections: bool,
    /// [`FetchHook`].
    pub fetch: bool,
    /// [`XhrHook`].
    pub xhr: bool,
    /// Records per rolling minute, 0 for unlimited.
    pub max_per_minute: u32,
    /// Capture mode.
    pub mode: CaptureMode,
    /// URL stamped on records that carry none.
    pub page_url: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            console: true,
            uncaught: true,
            rejections: true,
            fetch: true,
            xhr: true,
            max_per_minute: DEFAULT_MAX_PER_MINUTE,
            mode: CaptureMode::Detailed,
            page_url: String::new(),
        }
    }
}

impl CaptureConfig {
    fn detailed(&self, toggle: bool) -> bool {
        toggle && self.mode == CaptureMode::Detailed
    }
}

/// Owned handle over the installed hooks.
///
/// Wrappers handed out by this handle keep working after [`restore`], but
/// only as plain pass-through.
///
/// [`restore`]: Instrumentation::restore
pub struct Instrumentation {
    config: CaptureConfig,
    capturer: Arc<Capturer>,
    panic_hook: Option<PanicHookGuard>,
    installed: bool,
}

impl Instrumentation {
    /// Install the hooks enabled by `config`.
    ///
    /// Fails with [`CaptureError::AlreadyInstalled`] while another handle is
    /// live; the existing hooks are left as they are.
    pub fn install(config: CaptureConfig, sink: Arc<dyn RecordSink>) -> Result<Self, CaptureError> {
        if INSTALLED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CaptureError::AlreadyInstalled);
        }

        let capturer = Arc::new(Capturer::new(
            sink,
            config.max_per_minute,
            config.page_url.clone(),
        ));
        let panic_hook = config
            .uncaught
            .then(|| PanicHookGuard::install(Arc::clone(&capturer)));

        debug!(
            "Capture installed (mode={:?}, console={}, uncaught={}, rejections={}, fetch={}, xhr={})",
            config.mode,
            config.detailed(config.console),
            config.uncaught,
            config.rejections,
            config.detailed(config.fetch),
            config.detailed(config.xhr)
        );

        Ok(Self {
            config,
            capturer,
            panic_hook,
            installed: true,
        })
    }

    /// Configuration this handle was installed with.
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Whether the hooks are still live.
    pub fn is_active(&self) -> bool {
        self.capturer.is_active()
    }

    /// Tracing layer for the host's subscriber, when console capture is on.
    pub fn layer(&self) -> Option<CaptureLayer> {
        self.config
            .detailed(self.config.console)
            .then(|| CaptureLayer::new(Arc::clone(&self.capturer)))
    }

    /// Wrap a console sink.
    pub fn console<S: ConsoleSink>(&self, original: S) -> Console<S> {
        Console::new(original, self.hook_for(self.config.detailed(self.config.console)))
    }

    /// Wrap a fetch-style transport.
    pub fn fetch<T: FetchTransport>(&self, inner: T) -> FetchHook<T> {
        FetchHook::new(inner, self.hook_for(self.config.detailed(self.config.fetch)))
    }

    /// Wrap a callback-style transport.
    pub fn xhr<T: XhrTransport>(&self, inner: T) -> XhrHook<T> {
        XhrHook::new(inner, self.hook_for(self.config.detailed(self.config.xhr)))
    }

    /// Spawn a task whose failure is reported as an unhandled rejection.
    pub fn spawn_observed<F, T, E>(&self, future: F) -> JoinHandle<Result<T, E>>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        task::spawn_observed(self.hook_for(self.config.rejections), future)
    }

    /// Observe a task spawned elsewhere.
    pub fn observe_task<T, E>(&self, handle: JoinHandle<Result<T, E>>) -> JoinHandle<Result<T, E>>
    where
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        task::observe_task(self.hook_for(self.config.rejections), handle)
    }

    /// Remove every hook and release the process-wide slot.
    pub fn restore(mut self) {
        self.uninstall();
    }

    fn hook_for(&self, enabled: bool) -> Option<Arc<Capturer>> {
        enabled.then(|| Arc::clone(&self.capturer))
    }

    fn uninstall(&mut self) {
        if !self.installed {
            return;
        }
        self.installed = false;
        self.capturer.deactivate();
        if let Some(guard) = self.panic_hook.take() {
            guard.restore();
        }
        INSTALLED.store(false, Ordering::Release);
        debug!("Capture restored");
    }
}

impl Drop for Instrumentation {
    fn drop(&mut self) {
        self.uninstall();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ErrorKind, Severity};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Quiet(Mutex<usize>);

    impl ConsoleSink for Quiet {
        fn write(&self, _: ConsoleLevel, _: &[ConsoleArg]) {
            *self.0.lock().unwrap() += 1;
        }
    }

    fn drain_messages(rx: &mut mpsc::UnboundedReceiver<ErrorRecord>) -> Vec<ErrorRecord> {
        let mut out = Vec::new();
        while let Ok(record) = rx.try_recv() {
            out.push(record);
        }
        out
    }

    #[test]
    fn test_capture_config_defaults() {
        let config = CaptureConfig::default();
        assert!(config.console && config.uncaught && config.rejections);
        assert!(config.fetch && config.xhr);
        assert_eq!(config.max_per_minute, 10);
        assert_eq!(config.mode, CaptureMode::Detailed);
    }

    #[test]
    fn test_capture_mode_serde() {
        #[derive(Deserialize)]
        struct Wrap {
            mode: CaptureMode,
        }
        let w: Wrap = toml::from_str("mode = \"minimal\"").unwrap();
        assert_eq!(w.mode, CaptureMode::Minimal);
    }

    /// The only test that installs: the panic hook and the slot are
    /// process-wide.
    #[test]
    fn test_install_lifecycle() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink: Arc<dyn RecordSink> = Arc::new(tx);

        let instr = Instrumentation::install(CaptureConfig::default(), Arc::clone(&sink)).unwrap();
        assert!(instr.is_active());
        assert!(instr.layer().is_some());

        // Second install leaves the first one in place.
        assert!(matches!(
            Instrumentation::install(CaptureConfig::default(), Arc::clone(&sink)),
            Err(CaptureError::AlreadyInstalled)
        ));
        assert!(instr.is_active());

        let _ = std::panic::catch_unwind(|| panic!("lifecycle probe"));
        let captured = drain_messages(&mut rx);
        let panic_record = captured
            .iter()
            .find(|r| r.message == "Uncaught panic: lifecycle probe")
            .expect("panic should be captured");
        assert_eq!(panic_record.kind, ErrorKind::UncaughtException);
        assert_eq!(panic_record.severity, Severity::Critical);
        assert!(panic_record.origin_file.is_some());

        let console = instr.console(Quiet::default());
        instr.restore();

        // Wrappers outlive the handle as pass-through.
        console.error(&[ConsoleArg::text("after restore")]);
        assert_eq!(*console.original().0.lock().unwrap(), 1);

        let _ = std::panic::catch_unwind(|| panic!("after restore probe"));
        assert!(
            drain_messages(&mut rx)
                .iter()
                .all(|r| !r.message.contains("after restore"))
        );

        let minimal = Instrumentation::install(
            CaptureConfig {
                mode: CaptureMode::Minimal,
                ..CaptureConfig::default()
            },
            sink,
        )
        .unwrap();
        assert!(minimal.layer().is_none());
        drop(minimal);
        assert!(!INSTALLED.load(Ordering::Acquire));
    }
}
