//! Configuration system for fixonce-relay.
//!
//! This module provides TOML configuration loading with hierarchy merging.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Embedded defaults (`config/default.toml`)
//! 2. System config: `/etc/fixonce-relay/config.toml`
//! 3. User config: `~/.config/fixonce-relay/config.toml`
//! 4. Additional config file (via `--config` flag)
//! 5. CLI flags (highest priority)
//!
//! # Merge Behavior
//!
//! - **Lists** (candidate_ports, dev_ports, auto_patterns) are **merged** (appended)
//! - **Scalars** (timeouts, log_level, toggles) are **overridden** when set
//!
//! # Example
//!
//! ```toml
//! [server]
//! candidate_ports = [5010]
//!
//! [capture]
//! xhr = false
//!
//! [admission]
//! auto_patterns = ["*.internal"]
//! ```

mod error;
mod loader;
mod schema;

pub use error::ConfigError;
pub use loader::{embedded_defaults, ConfigLoader, SYSTEM_CONFIG_PATH};
pub use schema::{
    AdmissionConfig, CaptureSettings, Config, GeneralConfig, QueueSettings, ServerConfig,
    DEFAULT_HOST, DEFAULT_PORTS, DEFAULT_REQUEST_TIMEOUT_MS,
};
