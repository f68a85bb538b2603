//! Configuration schema definitions.
//!
//! Every field is optional in a file. An empty value (empty string, zero,
//! empty list, unset option) means "not set here" and leaves the value from
//! the layer below. Accessors like [`ServerConfig::host_or_default`] fill in
//! whatever no layer set.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::error::ConfigError;
use crate::capture::{CaptureConfig, CaptureMode, DEFAULT_MAX_PER_MINUTE};
use crate::queue::QueueConfig;

/// Default memory service host.
pub const DEFAULT_HOST: &str = "localhost";

/// Ports probed for the memory service when none are configured.
pub const DEFAULT_PORTS: std::ops::RangeInclusive<u16> = 5000..=5009;

/// Default request timeout in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 3000;

/// Socket file name under the runtime directory.
pub const DEFAULT_SOCKET_NAME: &str = "fixonce-relay.sock";

/// Directory name under the user's config directory.
pub const APP_DIR: &str = "fixonce-relay";

/// Admission state file name.
pub const STATE_FILE: &str = "admission.toml";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Memory service and relay socket.
    #[serde(default)]
    pub server: ServerConfig,

    /// Batching queue.
    #[serde(default)]
    pub queue: QueueSettings,

    /// Capture hooks.
    #[serde(default)]
    pub capture: CaptureSettings,

    /// Admission policy.
    #[serde(default)]
    pub admission: AdmissionConfig,
}

impl Config {
    /// Merge another config into this one.
    ///
    /// Lists are merged (appended).
    /// Scalars are overridden when set.
    pub fn merge(&mut self, other: Config) {
        self.general.merge(other.general);
        self.server.merge(other.server);
        self.queue.merge(other.queue);
        self.capture.merge(other.capture);
        self.admission.merge(other.admission);
    }

    /// Check values that parse but cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = &self.general.log_level;
        if !level.is_empty() && !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_string(),
                message: format!("expected one of {:?}, got {:?}", LOG_LEVELS, level),
            });
        }

        let host = &self.server.host;
        if host.contains("://") || host.contains('/') {
            return Err(ConfigError::InvalidValue {
                field: "server.host".to_string(),
                message: format!("expected a bare host name, got {:?}", host),
            });
        }

        if self.server.candidate_ports.contains(&0) || self.admission.dev_ports.contains(&0) {
            return Err(ConfigError::InvalidValue {
                field: "ports".to_string(),
                message: "port 0 is not a valid port".to_string(),
            });
        }

        if let Some(pattern) = self
            .admission
            .auto_patterns
            .iter()
            .find(|p| p.trim().is_empty() || p.as_str() == "*" || p.contains("://"))
        {
            return Err(ConfigError::InvalidValue {
                field: "admission.auto_patterns".to_string(),
                message: format!("{:?} is not a host pattern", pattern),
            });
        }

        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub log_level: String,
}

impl GeneralConfig {
    fn merge(&mut self, other: GeneralConfig) {
        if !other.log_level.is_empty() {
            self.log_level = other.log_level;
        }
    }
}

/// Memory service location and relay socket.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Memory service host.
    #[serde(default)]
    pub host: String,

    /// Ports probed in order during discovery.
    #[serde(default)]
    pub candidate_ports: Vec<u16>,

    /// Timeout for one request to the memory service.
    #[serde(default)]
    pub request_timeout_ms: u64,

    /// Relay socket path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,
}

impl ServerConfig {
    fn merge(&mut self, other: ServerConfig) {
        if !other.host.is_empty() {
            self.host = other.host;
        }
        self.candidate_ports.extend(other.candidate_ports);
        if other.request_timeout_ms != 0 {
            self.request_timeout_ms = other.request_timeout_ms;
        }
        if other.socket_path.is_some() {
            self.socket_path = other.socket_path;
        }
    }

    /// Host, or [`DEFAULT_HOST`].
    pub fn host_or_default(&self) -> String {
        if self.host.is_empty() {
            DEFAULT_HOST.to_string()
        } else {
            self.host.clone()
        }
    }

    /// Candidate ports without duplicates, or [`DEFAULT_PORTS`].
    pub fn ports_or_default(&self) -> Vec<u16> {
        if self.candidate_ports.is_empty() {
            return DEFAULT_PORTS.collect();
        }
        let mut ports = Vec::with_capacity(self.candidate_ports.len());
        for port in &self.candidate_ports {
            if !ports.contains(port) {
                ports.push(*port);
            }
        }
        ports
    }

    /// Request timeout.
    pub fn request_timeout(&self) -> Duration {
        match self.request_timeout_ms {
            0 => Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            ms => Duration::from_millis(ms),
        }
    }

    /// Socket path, or `$XDG_RUNTIME_DIR/fixonce-relay.sock` (temp dir when
    /// there is no runtime dir).
    pub fn socket_path_or_default(&self) -> PathBuf {
        self.socket_path.clone().unwrap_or_else(|| {
            dirs::runtime_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(DEFAULT_SOCKET_NAME)
        })
    }
}

/// Batching queue settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct QueueSettings {
    /// Records per batch.
    #[serde(default)]
    pub batch_size: usize,

    /// Delay before a partial batch is sent.
    #[serde(default)]
    pub flush_delay_ms: u64,

    /// Interval between reachability probes.
    #[serde(default)]
    pub probe_interval_secs: u64,

    /// Pending records kept while the service is unreachable.
    #[serde(default)]
    pub max_pending: usize,
}

impl QueueSettings {
    fn merge(&mut self, other: QueueSettings) {
        if other.batch_size != 0 {
            self.batch_size = other.batch_size;
        }
        if other.flush_delay_ms != 0 {
            self.flush_delay_ms = other.flush_delay_ms;
        }
        if other.probe_interval_secs != 0 {
            self.probe_interval_secs = other.probe_interval_secs;
        }
        if other.max_pending != 0 {
            self.max_pending = other.max_pending;
        }
    }

    /// Resolve into a [`QueueConfig`], filling unset values from its default.
    pub fn to_queue_config(&self, request_timeout: Duration) -> QueueConfig {
        let defaults = QueueConfig::default();
        QueueConfig {
            batch_size: nonzero_or(self.batch_size, defaults.batch_size),
            flush_delay: match self.flush_delay_ms {
                0 => defaults.flush_delay,
                ms => Duration::from_millis(ms),
            },
            probe_interval: match self.probe_interval_secs {
                0 => defaults.probe_interval,
                secs => Duration::from_secs(secs),
            },
            request_timeout,
            max_pending: nonzero_or(self.max_pending, defaults.max_pending),
        }
    }
}

fn nonzero_or(value: usize, default: usize) -> usize {
    if value == 0 { default } else { value }
}

/// Capture hook settings.
///
/// Toggles are options so that a later layer can switch a hook off.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CaptureSettings {
    /// Console capture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console: Option<bool>,
    /// Panic capture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncaught: Option<bool>,
    /// Task failure capture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejections: Option<bool>,
    /// Fetch-style HTTP capture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch: Option<bool>,
    /// XHR-style HTTP capture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xhr: Option<bool>,
    /// Records per rolling minute; 0 disables the limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_per_minute: Option<u32>,
    /// Capture mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<CaptureMode>,
}

impl CaptureSettings {
    fn merge(&mut self, other: CaptureSettings) {
        self.console = other.console.or(self.console);
        self.uncaught = other.uncaught.or(self.uncaught);
        self.rejections = other.rejections.or(self.rejections);
        self.fetch = other.fetch.or(self.fetch);
        self.xhr = other.xhr.or(self.xhr);
        self.max_per_minute = other.max_per_minute.or(self.max_per_minute);
        self.mode = other.mode.or(self.mode);
    }

    /// Resolve into a [`CaptureConfig`] for a page.
    pub fn to_capture_config(&self, page_url: impl Into<String>) -> CaptureConfig {
        CaptureConfig {
            console: self.console.unwrap_or(true),
            uncaught: self.uncaught.unwrap_or(true),
            rejections: self.rejections.unwrap_or(true),
            fetch: self.fetch.unwrap_or(true),
            xhr: self.xhr.unwrap_or(true),
            max_per_minute: self.max_per_minute.unwrap_or(DEFAULT_MAX_PER_MINUTE),
            mode: self.mode.unwrap_or_default(),
            page_url: page_url.into(),
        }
    }
}

/// Admission policy settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AdmissionConfig {
    /// Whitelist state file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_path: Option<PathBuf>,

    /// Extra ports treated as local dev servers.
    #[serde(default)]
    pub dev_ports: Vec<u16>,

    /// Extra host patterns that are always admitted.
    ///
    /// `*.suffix` matches subdomains, `prefix.*` matches any domain under
    /// that first label.
    #[serde(default)]
    pub auto_patterns: Vec<String>,
}

impl AdmissionConfig {
    fn merge(&mut self, other: AdmissionConfig) {
        if other.state_path.is_some() {
            self.state_path = other.state_path;
        }
        self.dev_ports.extend(other.dev_ports);
        self.auto_patterns.extend(other.auto_patterns);
    }

    /// State path, or `~/.config/fixonce-relay/admission.toml`.
    pub fn state_path_or_default(&self) -> PathBuf {
        self.state_path.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from(".config"))
                .join(APP_DIR)
                .join(STATE_FILE)
        })
    }
}
