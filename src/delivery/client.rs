//! HTTP client for the memory service.
//!
//! # Port Discovery
//!
//! The service may listen on any of a small range of ports. [`discover`]
//! sends `GET /api/ping` to each candidate in order and adopts the first one
//! whose reply names the `fixonce` service. The adopted port is forgotten on
//! any failure, so the next call discovers again.
//!
//! Every request carries `X-FixOnce-Origin: fixonce-relay`.
//!
//! [`discover`]: MemoryServiceClient::discover

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Method, Request};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use tracing::{debug, info, trace};

use super::error::DeliveryError;
use super::wire::{
    BatchAck, BatchRequest, HandshakeAck, HandshakeRequest, PingResponse, ORIGIN_HEADER,
    ORIGIN_VALUE, SERVICE_NAME,
};
use crate::config::ServerConfig;
use crate::queue::BatchSink;
use crate::record::ErrorRecord;
use crate::telemetry::{self, AuditEvent};

/// Client for the memory service HTTP API.
pub struct MemoryServiceClient {
    client: Client<HttpConnector, Full<Bytes>>,
    host: String,
    candidate_ports: Vec<u16>,
    timeout: Duration,
    active_port: Mutex<Option<u16>>,
}

impl MemoryServiceClient {
    /// Create a client probing `candidate_ports` on `host`.
    pub fn new(host: impl Into<String>, candidate_ports: Vec<u16>, timeout: Duration) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            host: host.into(),
            candidate_ports,
            timeout,
            active_port: Mutex::new(None),
        }
    }

    /// Create a client from the `[server]` config section.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            config.host_or_default(),
            config.ports_or_default(),
            config.request_timeout(),
        )
    }

    /// The port currently in use, if one has been discovered.
    pub fn active_port(&self) -> Option<u16> {
        *self.active_port.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_active_port(&self, port: Option<u16>) {
        *self.active_port.lock().unwrap_or_else(PoisonError::into_inner) = port;
    }

    /// Find the service among the candidate ports.
    pub async fn discover(&self) -> Result<u16, DeliveryError> {
        for &port in &self.candidate_ports {
            match self.get_json::<PingResponse>(port, "/api/ping").await {
                Ok(ping) if ping.service == SERVICE_NAME => {
                    info!("Memory service found on port {}", port);
                    self.set_active_port(Some(port));
                    telemetry::record(AuditEvent::ServerDiscovered { port });
                    return Ok(port);
                }
                Ok(ping) => {
                    debug!(
                        "Port {} answered as {:?}, not {}",
                        port, ping.service, SERVICE_NAME
                    );
                }
                Err(e) => {
                    trace!("Port {} did not answer ping: {}", port, e);
                }
            }
        }

        self.set_active_port(None);
        Err(DeliveryError::ServiceNotFound {
            host: self.host.clone(),
            ports: self.candidate_ports.clone(),
        })
    }

    /// Send a single record.
    pub async fn log_error(&self, record: &ErrorRecord) -> Result<(), DeliveryError> {
        let port = self.port().await?;
        let body = serde_json::to_vec(record)?;
        self.call(port, Method::POST, "/api/log_error", Some(body))
            .await
            .map(|_| ())
    }

    /// Send a batch of records.
    pub async fn log_errors_batch(&self, batch: &[ErrorRecord]) -> Result<BatchAck, DeliveryError> {
        let port = self.port().await?;
        let body = serde_json::to_vec(&BatchRequest { errors: batch })?;
        let bytes = self
            .call(port, Method::POST, "/api/log_errors_batch", Some(body))
            .await?;
        let ack: BatchAck = decode(&bytes)?;
        debug!(
            "Batch acknowledged: {} of {} processed",
            ack.processed, ack.total
        );
        Ok(ack)
    }

    /// Announce this relay to the service.
    pub async fn handshake(&self) -> Result<HandshakeAck, DeliveryError> {
        let port = self.port().await?;
        let body = serde_json::to_vec(&HandshakeRequest {
            version: env!("CARGO_PKG_VERSION"),
            timestamp: Utc::now(),
        })?;
        let bytes = self
            .call(port, Method::POST, "/api/handshake", Some(body))
            .await?;
        decode(&bytes)
    }

    /// Check that the service's config endpoint answers with 2xx.
    pub async fn config_check(&self) -> Result<(), DeliveryError> {
        let port = self.port().await?;
        self.call(port, Method::GET, "/api/config", None)
            .await
            .map(|_| ())
    }

    async fn port(&self) -> Result<u16, DeliveryError> {
        match self.active_port() {
            Some(port) => Ok(port),
            None => self.discover().await,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        port: u16,
        path: &'static str,
    ) -> Result<T, DeliveryError> {
        let bytes = self.send(port, Method::GET, path, None).await?;
        decode(&bytes)
    }

    /// Send to the active port; forget it on failure.
    async fn call(
        &self,
        port: u16,
        method: Method,
        path: &'static str,
        body: Option<Vec<u8>>,
    ) -> Result<Bytes, DeliveryError> {
        let result = self.send(port, method, path, body).await;
        if let Err(ref e) = result {
            debug!("Dropping port {} after failure: {}", port, e);
            self.set_active_port(None);
        }
        result
    }

    async fn send(
        &self,
        port: u16,
        method: Method,
        path: &'static str,
        body: Option<Vec<u8>>,
    ) -> Result<Bytes, DeliveryError> {
        let uri = format!("http://{}:{}{}", self.host, port, path);
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(ORIGIN_HEADER, HeaderValue::from_static(ORIGIN_VALUE))
            .body(Full::new(Bytes::from(body.unwrap_or_default())))?;

        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|source| DeliveryError::Transport { path, source })?;
            let status = response.status();
            let bytes = response
                .into_body()
                .collect()
                .await
                .map_err(|source| DeliveryError::Body { path, source })?
                .to_bytes();
            if !status.is_success() {
                return Err(DeliveryError::Status {
                    path,
                    status: status.as_u16(),
                });
            }
            Ok(bytes)
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| DeliveryError::Timeout {
                path,
                timeout_ms: self.timeout.as_millis(),
            })?
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DeliveryError> {
    Ok(serde_json::from_slice(bytes)?)
}

impl BatchSink for MemoryServiceClient {
    type Error = DeliveryError;

    async fn send_batch(&self, batch: &[ErrorRecord]) -> Result<(), DeliveryError> {
        self.log_errors_batch(batch).await.map(|_| ())
    }

    /// Handshake, falling back to the config endpoint for services that do
    /// not implement it.
    async fn probe(&self) -> bool {
        match self.handshake().await {
            Ok(_) => true,
            Err(e) => {
                debug!("Handshake failed ({}), trying config endpoint", e);
                let ok = self.config_check().await.is_ok();
                if !ok {
                    telemetry::record(AuditEvent::ServerUnreachable {
                        reason: e.to_string(),
                    });
                }
                ok
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ErrorKind, Severity};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    type Requests = Arc<Mutex<Vec<String>>>;

    /// Minimal HTTP/1.1 stub: answers each request via `respond(method, path)`.
    async fn spawn_stub(respond: fn(&str, &str) -> (u16, String)) -> (u16, Requests) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests: Requests = Arc::default();
        let seen = Arc::clone(&requests);

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let seen = Arc::clone(&seen);
                tokio::spawn(async move {
                    let request = read_request(&mut stream).await;
                    let mut parts = request.split_whitespace();
                    let method = parts.next().unwrap_or_default().to_string();
                    let path = parts.next().unwrap_or_default().to_string();
                    seen.lock().unwrap().push(request);

                    let (status, body) = respond(&method, &path);
                    let response = format!(
                        "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        (port, requests)
    }

    async fn read_request(stream: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let content_length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn fixonce(method: &str, path: &str) -> (u16, String) {
        match (method, path) {
            ("GET", "/api/ping") => (200, r#"{"status":"ok","service":"fixonce","port":5000}"#.into()),
            ("POST", "/api/log_errors_batch") => {
                (200, r#"{"status":"ok","processed":2,"total":2}"#.into())
            }
            ("POST", "/api/log_error") => (200, r#"{"status":"ok"}"#.into()),
            ("POST", "/api/handshake") => {
                (200, r#"{"status":"connected","timestamp":"2026-01-01T00:00:00Z"}"#.into())
            }
            ("GET", "/api/config") => (200, "{}".into()),
            _ => (404, "{}".into()),
        }
    }

    fn other_service(_: &str, _: &str) -> (u16, String) {
        (200, r#"{"status":"ok","service":"something-else"}"#.into())
    }

    fn failing(method: &str, path: &str) -> (u16, String) {
        match (method, path) {
            ("GET", "/api/ping") => fixonce(method, path),
            _ => (500, "{}".into()),
        }
    }

    fn no_handshake(method: &str, path: &str) -> (u16, String) {
        match (method, path) {
            ("POST", "/api/handshake") => (404, "{}".into()),
            _ => fixonce(method, path),
        }
    }

    fn record(msg: &str) -> ErrorRecord {
        ErrorRecord::new(ErrorKind::ConsoleError, Severity::Error, msg)
    }

    fn client(ports: Vec<u16>) -> MemoryServiceClient {
        MemoryServiceClient::new("127.0.0.1", ports, Duration::from_secs(3))
    }

    #[tokio::test]
    async fn test_discover_skips_dead_and_foreign_ports() {
        let dead = closed_port().await;
        let (foreign, _) = spawn_stub(other_service).await;
        let (real, _) = spawn_stub(fixonce).await;

        let client = client(vec![dead, foreign, real]);
        assert_eq!(client.discover().await.unwrap(), real);
        assert_eq!(client.active_port(), Some(real));
    }

    #[tokio::test]
    async fn test_discover_fails_when_nothing_answers() {
        let (foreign, _) = spawn_stub(other_service).await;
        let client = client(vec![closed_port().await, foreign]);

        let result = client.discover().await;
        assert!(matches!(result, Err(DeliveryError::ServiceNotFound { .. })));
        assert_eq!(client.active_port(), None);
    }

    #[tokio::test]
    async fn test_batch_post_carries_origin_header_and_errors() {
        let (port, requests) = spawn_stub(fixonce).await;
        let client = client(vec![port]);

        let ack = client
            .log_errors_batch(&[record("first"), record("second")])
            .await
            .unwrap();
        assert_eq!(ack.processed, 2);
        assert_eq!(ack.total, 2);

        let requests = requests.lock().unwrap();
        let batch = requests
            .iter()
            .find(|r| r.starts_with("POST /api/log_errors_batch"))
            .unwrap();
        assert!(batch.to_lowercase().contains("x-fixonce-origin: fixonce-relay"));
        assert!(batch.contains(r#""errors":["#));
        assert!(batch.contains("first"));
        assert!(batch.contains(r#""type":"console_error""#));
    }

    #[tokio::test]
    async fn test_single_record_post() {
        let (port, requests) = spawn_stub(fixonce).await;
        let client = client(vec![port]);

        client.log_error(&record("only")).await.unwrap();
        assert!(requests
            .lock()
            .unwrap()
            .iter()
            .any(|r| r.starts_with("POST /api/log_error ")));
    }

    #[tokio::test]
    async fn test_server_error_forgets_port() {
        let (port, _) = spawn_stub(failing).await;
        let client = client(vec![port]);

        let result = client.log_errors_batch(&[record("x")]).await;
        assert!(matches!(
            result,
            Err(DeliveryError::Status { status: 500, .. })
        ));
        assert_eq!(client.active_port(), None);
    }

    #[tokio::test]
    async fn test_handshake_and_probe() {
        let (port, _) = spawn_stub(fixonce).await;
        let client = client(vec![port]);

        let ack = client.handshake().await.unwrap();
        assert_eq!(ack.status, "connected");
        assert!(client.probe().await);
    }

    #[tokio::test]
    async fn test_probe_falls_back_to_config_endpoint() {
        let (port, _) = spawn_stub(no_handshake).await;
        let client = client(vec![port]);
        assert!(client.probe().await);
    }

    #[tokio::test]
    async fn test_probe_fails_without_service() {
        let client = client(vec![closed_port().await]);
        assert!(!client.probe().await);
    }
}
