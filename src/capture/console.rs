//! Console capture.
//!
//! Two entry points:
//!
//! - [`CaptureLayer`], a `tracing_subscriber::Layer` that sees every `WARN`
//!   and `ERROR` event. Layers only observe, so the host's other layers see
//!   the same events unchanged.
//! - [`Console`], a wrapper around an explicit [`ConsoleSink`] for hosts that
//!   log argument lists. The wrapped sink always gets the call first, with
//!   the identical arguments.
//!
//! Events whose target belongs to this crate are never captured.

use std::fmt::{self, Display};
use std::sync::Arc;

use serde::Serialize;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use super::capturer::{is_emitting, Capturer};
use super::snippet::source_snippet;
use crate::record::{ErrorKind, ErrorRecord, Severity};

/// Tracing target prefix of this crate.
const OWN_TARGET: &str = env!("CARGO_CRATE_NAME");

/// Console severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    /// `console.error`.
    Error,
    /// `console.warn`.
    Warn,
}

impl ConsoleLevel {
    fn kind(self) -> (ErrorKind, Severity) {
        match self {
            ConsoleLevel::Error => (ErrorKind::ConsoleError, Severity::Error),
            ConsoleLevel::Warn => (ErrorKind::ConsoleWarn, Severity::Warning),
        }
    }
}

/// A value that can be rendered into a console message.
pub trait Inspect: Send + Sync {
    /// Render for the captured message.
    fn inspect(&self) -> String;
}

impl<T: Serialize + Display + Send + Sync> Inspect for T {
    /// JSON form, or the `Display` form when serialization fails.
    fn inspect(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.to_string())
    }
}

/// One argument of a console call.
pub enum ConsoleArg {
    /// Plain text, used as-is.
    Text(String),
    /// An error, rendered as `message\nstack`.
    Error {
        /// Error message.
        message: String,
        /// Stack text, if any.
        stack: Option<String>,
    },
    /// Any other value.
    Value(Box<dyn Inspect>),
}

impl ConsoleArg {
    /// Text argument.
    pub fn text(s: impl Into<String>) -> Self {
        ConsoleArg::Text(s.into())
    }

    /// Error argument from anything displayable.
    pub fn error(e: &dyn std::error::Error) -> Self {
        ConsoleArg::Error {
            message: e.to_string(),
            stack: e.source().map(|s| format!("caused by: {}", s)),
        }
    }

    /// Structured value argument.
    pub fn value<T: Serialize + Display + Send + Sync + 'static>(v: T) -> Self {
        ConsoleArg::Value(Box::new(v))
    }

    fn render(&self) -> String {
        match self {
            ConsoleArg::Text(s) => s.clone(),
            ConsoleArg::Error { message, stack } => match stack {
                Some(stack) => format!("{}\n{}", message, stack),
                None => message.clone(),
            },
            ConsoleArg::Value(v) => v.inspect(),
        }
    }
}

impl fmt::Debug for ConsoleArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleArg::Text(s) => f.debug_tuple("Text").field(s).finish(),
            ConsoleArg::Error { message, stack } => f
                .debug_struct("Error")
                .field("message", message)
                .field("stack", stack)
                .finish(),
            ConsoleArg::Value(_) => f.write_str("Value(..)"),
        }
    }
}

/// Join arguments the way a console prints them.
pub fn render_args(args: &[ConsoleArg]) -> String {
    args.iter()
        .map(ConsoleArg::render)
        .collect::<Vec<_>>()
        .join(" ")
}

/// The host's own console output.
pub trait ConsoleSink: Send + Sync {
    /// Write one console call.
    fn write(&self, level: ConsoleLevel, args: &[ConsoleArg]);
}

/// Console wrapper that forwards to the original sink, then captures.
pub struct Console<S> {
    original: S,
    capturer: Option<Arc<Capturer>>,
}

impl<S: ConsoleSink> Console<S> {
    pub(crate) fn new(original: S, capturer: Option<Arc<Capturer>>) -> Self {
        Self { original, capturer }
    }

    /// `console.error`.
    pub fn error(&self, args: &[ConsoleArg]) {
        self.log(ConsoleLevel::Error, args);
    }

    /// `console.warn`.
    pub fn warn(&self, args: &[ConsoleArg]) {
        self.log(ConsoleLevel::Warn, args);
    }

    /// Any level.
    pub fn log(&self, level: ConsoleLevel, args: &[ConsoleArg]) {
        self.original.write(level, args);

        if let Some(capturer) = &self.capturer {
            capturer.capture_with(|| {
                let (kind, severity) = level.kind();
                ErrorRecord::new(kind, severity, render_args(args))
            });
        }
    }

    /// The wrapped sink.
    pub fn original(&self) -> &S {
        &self.original
    }

    /// Unwrap into the original sink.
    pub fn into_inner(self) -> S {
        self.original
    }
}

/// Tracing layer capturing `WARN` and `ERROR` events.
pub struct CaptureLayer {
    capturer: Arc<Capturer>,
}

impl CaptureLayer {
    pub(crate) fn new(capturer: Arc<Capturer>) -> Self {
        Self { capturer }
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let meta = event.metadata();
        let level = match *meta.level() {
            Level::ERROR => ConsoleLevel::Error,
            Level::WARN => ConsoleLevel::Warn,
            _ => return,
        };
        if meta.target().starts_with(OWN_TARGET) || is_emitting() {
            return;
        }

        self.capturer.capture_with(|| {
            let mut visitor = MessageVisitor::default();
            event.record(&mut visitor);

            let (kind, severity) = level.kind();
            let mut record = ErrorRecord::new(kind, severity, visitor.finish());
            if let Some(file) = meta.file() {
                record = record.with_location(file, meta.line(), None);
                if let Some(line) = meta.line() {
                    record = record.with_snippet(source_snippet(file, line));
                }
            }
            if let Some(span) = ctx.current_span().metadata() {
                record = record.with_function(span.name());
            }
            record
        });
    }
}

/// Collects the `message` field first, then `key=value` pairs.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            return self.message;
        }
        let fields = self.fields.join(" ");
        if self.message.is_empty() {
            fields
        } else {
            format!("{} {}", self.message, fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.fields.push(format!("{}={}", field.name(), value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}
