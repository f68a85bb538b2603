//! Captured error records.
//!
//! An [`ErrorRecord`] is the unit that moves through the whole pipeline: hooks
//! build it, the relay carries it, the queue batches it, and the memory service
//! receives it as JSON. Field names on the wire follow what the service reads
//! (`type`, `url`, `file`, `line`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sanitize::{sanitize, sanitize_opt, sanitize_url};

/// Maximum characters kept in `message`.
pub const MAX_MESSAGE_CHARS: usize = 2000;
/// Maximum characters kept in `stack`.
pub const MAX_STACK_CHARS: usize = 2000;
/// Maximum characters kept in `url`.
pub const MAX_URL_CHARS: usize = 200;
/// Maximum characters kept in `response_body`.
pub const MAX_BODY_CHARS: usize = 500;
/// Maximum characters of the whole serialized record.
pub const MAX_PAYLOAD_CHARS: usize = 5000;
/// Max lines of `snippet`.
pub const MAX_SNIPPET_LINES: usize = 11;
/// Max characters of one `snippet` line and of `function`.
pub const MAX_SNIPPET_LINE_CHARS: usize = 200;

/// Value of the `source` field on every record this crate produces.
pub const RECORD_SOURCE: &str = "fixonce-relay";

/// What kind of event produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// An error-level console/log call.
    ConsoleError,
    /// A warning-level console/log call.
    ConsoleWarn,
    /// An uncaught exception (a panic).
    UncaughtException,
    /// A failed asynchronous task nobody handled.
    UnhandledRejection,
    /// An HTTP response with status >= 400.
    HttpClientError,
    /// An HTTP request that got no response.
    HttpNetworkError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::ConsoleError => "console_error",
            ErrorKind::ConsoleWarn => "console_warn",
            ErrorKind::UncaughtException => "uncaught_exception",
            ErrorKind::UnhandledRejection => "unhandled_rejection",
            ErrorKind::HttpClientError => "http_client_error",
            ErrorKind::HttpNetworkError => "http_network_error",
        };
        f.write_str(name)
    }
}

/// How bad a record is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Something looks wrong but nothing failed.
    Warning,
    /// A recoverable failure.
    Error,
    /// A crash, a server error, or a lost request.
    Critical,
}

impl Severity {
    /// Severity of an HTTP error status.
    pub fn for_status(status: u16) -> Self {
        if status >= 500 {
            Severity::Critical
        } else {
            Severity::Error
        }
    }
}

/// One captured event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    /// Sanitized, truncated message.
    pub message: String,
    /// Severity.
    pub severity: Severity,
    /// Source file, when known.
    #[serde(rename = "file", default, skip_serializing_if = "Option::is_none")]
    pub origin_file: Option<String>,
    /// Source line, when known.
    #[serde(rename = "line", default, skip_serializing_if = "Option::is_none")]
    pub origin_line: Option<u32>,
    /// Source column, when known.
    #[serde(rename = "column", default, skip_serializing_if = "Option::is_none")]
    pub origin_column: Option<u32>,
    /// Enclosing function or span name, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    /// Source lines around `line`; the failing line starts with `>>>`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub snippet: Vec<String>,
    /// URL of the monitored context.
    #[serde(rename = "url")]
    pub page_url: String,
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
    /// Response body for HTTP errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    /// Stack or backtrace text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Producer tag.
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    RECORD_SOURCE.to_string()
}

impl ErrorRecord {
    /// Start a record of the given kind and severity.
    pub fn new(kind: ErrorKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            severity,
            origin_file: None,
            origin_line: None,
            origin_column: None,
            function: None,
            snippet: Vec::new(),
            page_url: String::new(),
            timestamp: Utc::now(),
            response_body: None,
            stack: None,
            source: default_source(),
        }
    }

    /// Set the monitored context URL.
    #[must_use]
    pub fn with_page_url(mut self, url: impl Into<String>) -> Self {
        self.page_url = url.into();
        self
    }

    /// Set the source location.
    #[must_use]
    pub fn with_location(mut self, file: impl Into<String>, line: Option<u32>, column: Option<u32>) -> Self {
        self.origin_file = Some(file.into());
        self.origin_line = line;
        self.origin_column = column;
        self
    }

    /// Set the enclosing function name.
    #[must_use]
    pub fn with_function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }

    /// Set the source snippet.
    #[must_use]
    pub fn with_snippet(mut self, snippet: Vec<String>) -> Self {
        self.snippet = snippet;
        self
    }

    /// Set the stack text.
    #[must_use]
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Set the HTTP response body.
    #[must_use]
    pub fn with_response_body(mut self, body: impl Into<String>) -> Self {
        self.response_body = Some(body.into());
        self
    }

    /// Sanitize and truncate every free-text field.
    ///
    /// After this the record may leave the capture boundary. Calling it again
    /// is harmless, which is what the relay relies on.
    pub fn seal(&mut self) {
        self.message = truncate_chars(&sanitize(&self.message), MAX_MESSAGE_CHARS);
        self.page_url = truncate_chars(&sanitize_url(&self.page_url), MAX_URL_CHARS);
        sanitize_opt(&mut self.stack);
        sanitize_opt(&mut self.response_body);
        sanitize_opt(&mut self.origin_file);
        sanitize_opt(&mut self.function);
        if let Some(function) = self.function.as_mut() {
            *function = truncate_chars(function, MAX_SNIPPET_LINE_CHARS);
        }
        self.snippet.truncate(MAX_SNIPPET_LINES);
        for line in &mut self.snippet {
            *line = truncate_chars(&sanitize(line), MAX_SNIPPET_LINE_CHARS);
        }
        if let Some(stack) = self.stack.as_mut() {
            *stack = truncate_chars(stack, MAX_STACK_CHARS);
        }
        if let Some(body) = self.response_body.as_mut() {
            *body = truncate_chars(body, MAX_BODY_CHARS);
        }
        self.fit_payload();
    }

    /// Shrink the record until its JSON form fits [`MAX_PAYLOAD_CHARS`].
    ///
    /// Drops `stack`, then `snippet`, then `response_body`, then shortens
    /// `message`.
    fn fit_payload(&mut self) {
        if self.payload_chars() <= MAX_PAYLOAD_CHARS {
            return;
        }
        self.stack = None;
        if self.payload_chars() <= MAX_PAYLOAD_CHARS {
            return;
        }
        self.snippet.clear();
        if self.payload_chars() <= MAX_PAYLOAD_CHARS {
            return;
        }
        self.response_body = None;
        // Escaped characters cost more than one payload char, so shrink until it fits.
        loop {
            let overflow = self.payload_chars().saturating_sub(MAX_PAYLOAD_CHARS);
            if overflow == 0 || self.message.is_empty() {
                break;
            }
            let keep = self.message.chars().count().saturating_sub(overflow);
            self.message = truncate_chars(&self.message, keep);
        }
    }

    fn payload_chars(&self) -> usize {
        serde_json::to_string(self)
            .map(|json| json.chars().count())
            .unwrap_or(0)
    }
}

/// Truncate to at most `max` characters, on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
