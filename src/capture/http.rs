//! HTTP capture for fetch-style and XHR-style clients.
//!
//! Both hooks are decorators: they implement the same transport trait as
//! the client they wrap and hand back exactly what it produced. Bodies are
//! [`Bytes`], so reading one for a record shares the buffer instead of
//! consuming it.
//!
//! | Outcome          | Kind                 | Severity   |
//! |------------------|----------------------|------------|
//! | status 400..=499 | `http_client_error`  | `error`    |
//! | status >= 500    | `http_client_error`  | `critical` |
//! | no response      | `http_network_error` | `critical` |

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;

use super::capturer::Capturer;
use crate::record::{truncate_chars, ErrorKind, ErrorRecord, Severity, MAX_BODY_CHARS};

/// An outgoing request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: String,
    /// Target URL.
    pub url: String,
    /// Request body.
    pub body: Bytes,
}

impl HttpRequest {
    /// Request without a body.
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            body: Bytes::new(),
        }
    }
}

/// A received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Final URL.
    pub url: String,
    /// Response body.
    pub body: Bytes,
}

/// Async request/response client.
pub trait FetchTransport: Send + Sync {
    /// Transport failure (no response).
    type Error: Display + Send;

    /// Perform one request.
    fn fetch(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, Self::Error>> + Send;
}

/// Completion of a callback-style request.
#[derive(Debug, Clone)]
pub enum XhrOutcome {
    /// A response arrived (any status).
    Load(HttpResponse),
    /// No response arrived.
    Error(String),
}

/// Completion callback.
pub type XhrCallback = Box<dyn FnOnce(XhrOutcome) + Send + 'static>;

/// Callback-style client.
pub trait XhrTransport: Send + Sync {
    /// Start a request; `on_complete` runs exactly once.
    fn send(&self, request: HttpRequest, on_complete: XhrCallback);
}

/// Fetch-style decorator.
pub struct FetchHook<T> {
    inner: T,
    capturer: Option<Arc<Capturer>>,
}

impl<T> FetchHook<T> {
    pub(crate) fn new(inner: T, capturer: Option<Arc<Capturer>>) -> Self {
        Self { inner, capturer }
    }

    /// The wrapped transport.
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: FetchTransport> FetchTransport for FetchHook<T> {
    type Error = T::Error;

    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, T::Error> {
        let method = request.method.clone();
        let url = request.url.clone();
        let result = self.inner.fetch(request).await;

        if let Some(capturer) = &self.capturer {
            match &result {
                Ok(response) if response.status >= 400 => {
                    capturer.capture_with(|| status_record(&method, response));
                }
                Ok(_) => {}
                Err(e) => {
                    let reason = e.to_string();
                    capturer.capture_with(|| network_record(&method, &url, &reason));
                }
            }
        }

        result
    }
}

/// XHR-style decorator.
pub struct XhrHook<T> {
    inner: T,
    capturer: Option<Arc<Capturer>>,
}

impl<T> XhrHook<T> {
    pub(crate) fn new(inner: T, capturer: Option<Arc<Capturer>>) -> Self {
        Self { inner, capturer }
    }

    /// The wrapped transport.
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: XhrTransport> XhrTransport for XhrHook<T> {
    fn send(&self, request: HttpRequest, on_complete: XhrCallback) {
        let Some(capturer) = self.capturer.clone() else {
            self.inner.send(request, on_complete);
            return;
        };

        let method = request.method.clone();
        let url = request.url.clone();
        self.inner.send(
            request,
            Box::new(move |outcome| {
                match &outcome {
                    XhrOutcome::Load(response) if response.status >= 400 => {
                        capturer.capture_with(|| status_record(&method, response));
                    }
                    XhrOutcome::Load(_) => {}
                    XhrOutcome::Error(reason) => {
                        capturer.capture_with(|| network_record(&method, &url, reason));
                    }
                }
                on_complete(outcome);
            }),
        );
    }
}

fn status_record(method: &str, response: &HttpResponse) -> ErrorRecord {
    let body = String::from_utf8_lossy(&response.body);
    ErrorRecord::new(
        ErrorKind::HttpClientError,
        Severity::for_status(response.status),
        format!("HTTP {}: {} {}", response.status, method, response.url),
    )
    .with_response_body(truncate_chars(&body, MAX_BODY_CHARS))
}

fn network_record(method: &str, url: &str, reason: &str) -> ErrorRecord {
    ErrorRecord::new(
        ErrorKind::HttpNetworkError,
        Severity::Critical,
        format!("Network error: {} {}: {}", method, url, reason),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::RecordSink;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Answers from a fixed table; `None` means the network failed.
    struct Canned(Option<(u16, &'static str)>);

    impl FetchTransport for Canned {
        type Error = String;

        async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, String> {
            match self.0 {
                Some((status, body)) => Ok(HttpResponse {
                    status,
                    url: request.url,
                    body: Bytes::from_static(body.as_bytes()),
                }),
                None => Err("connection refused".to_string()),
            }
        }
    }

    impl XhrTransport for Canned {
        fn send(&self, request: HttpRequest, on_complete: XhrCallback) {
            let outcome = match self.0 {
                Some((status, body)) => XhrOutcome::Load(HttpResponse {
                    status,
                    url: request.url,
                    body: Bytes::from_static(body.as_bytes()),
                }),
                None => XhrOutcome::Error("connection refused".to_string()),
            };
            on_complete(outcome);
        }
    }

    fn capturer() -> (Arc<Capturer>, mpsc::UnboundedReceiver<ErrorRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink: Arc<dyn RecordSink> = Arc::new(tx);
        (Arc::new(Capturer::new(sink, 0, String::new())), rx)
    }

    fn get(url: &str) -> HttpRequest {
        HttpRequest::new("GET", url)
    }

    #[tokio::test]
    async fn test_404_is_error_with_body() {
        let (capturer, mut rx) = capturer();
        let hook = FetchHook::new(Canned(Some((404, "no such user"))), Some(capturer));

        let response = hook.fetch(get("http://localhost:3000/api/u/1")).await.unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(&response.body[..], b"no such user");

        let record = rx.try_recv().unwrap();
        assert_eq!(record.kind, ErrorKind::HttpClientError);
        assert_eq!(record.severity, Severity::Error);
        assert_eq!(record.message, "HTTP 404: GET http://localhost:3000/api/u/1");
        assert_eq!(record.response_body.as_deref(), Some("no such user"));
    }

    #[tokio::test]
    async fn test_503_is_critical() {
        let (capturer, mut rx) = capturer();
        let hook = FetchHook::new(Canned(Some((503, "busy"))), Some(capturer));

        hook.fetch(get("http://localhost:3000/")).await.unwrap();
        assert_eq!(rx.try_recv().unwrap().severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_network_error_propagates_original() {
        let (capturer, mut rx) = capturer();
        let hook = FetchHook::new(Canned(None), Some(capturer));

        let err = hook.fetch(get("http://localhost:3000/")).await.unwrap_err();
        assert_eq!(err, "connection refused");

        let record = rx.try_recv().unwrap();
        assert_eq!(record.kind, ErrorKind::HttpNetworkError);
        assert_eq!(record.severity, Severity::Critical);
        assert!(record.response_body.is_none());
    }

    #[tokio::test]
    async fn test_success_is_silent() {
        let (capturer, mut rx) = capturer();
        let hook = FetchHook::new(Canned(Some((200, "ok"))), Some(capturer));

        hook.fetch(get("http://localhost:3000/")).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_long_body_is_truncated() {
        static LONG: &str = include_str!("../../Cargo.toml");
        let (capturer, mut rx) = capturer();
        let hook = FetchHook::new(Canned(Some((500, LONG))), Some(capturer));

        let response = hook.fetch(get("http://localhost:3000/")).await.unwrap();
        assert_eq!(response.body.len(), LONG.len());

        let record = rx.try_recv().unwrap();
        assert!(record.response_body.unwrap().chars().count() <= MAX_BODY_CHARS);
    }

    #[test]
    fn test_xhr_callback_sees_identical_outcome() {
        let (capturer, mut rx) = capturer();
        let hook = XhrHook::new(Canned(Some((404, "missing"))), Some(capturer));

        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        hook.send(
            get("http://localhost:3000/x"),
            Box::new(move |outcome| {
                *slot.lock().unwrap() = Some(outcome);
            }),
        );

        match seen.lock().unwrap().take() {
            Some(XhrOutcome::Load(response)) => {
                assert_eq!(response.status, 404);
                assert_eq!(&response.body[..], b"missing");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(rx.try_recv().unwrap().kind, ErrorKind::HttpClientError);
    }

    #[test]
    fn test_xhr_network_error() {
        let (capturer, mut rx) = capturer();
        let hook = XhrHook::new(Canned(None), Some(capturer));

        hook.send(get("http://localhost:3000/x"), Box::new(|_| {}));

        let record = rx.try_recv().unwrap();
        assert_eq!(record.kind, ErrorKind::HttpNetworkError);
        assert_eq!(
            record.message,
            "Network error: GET http://localhost:3000/x: connection refused"
        );
    }
}
