//! Per-origin admission decisions.
//!
//! # Evaluation Order
//!
//! 1. Auto-allow: loopback hosts, auto patterns, known dev ports
//! 2. Permanent whitelist
//! 3. Session whitelist
//! 4. Blocked
//!
//! Auto-allow is derived from the origin alone and never stored. Whitelist
//! entries match either the full `host:port` key or, when the entry has no
//! port, any port on that host.
//!
//! A store that cannot be read blocks everything not auto-allowed.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::error::AdmissionError;
use super::origin::{matches_pattern, Origin};
use super::store::{AdmissionState, AdmissionStore};
use crate::config::AdmissionConfig;
use crate::telemetry::{self, AuditEvent, Scope};

/// Ports commonly used by local dev servers.
pub const DEFAULT_DEV_PORTS: &[u16] = &[
    3000, 3001, 4200, 5000, 5173, 5174, 8000, 8080, 8081, 8888, 9000,
];

/// Host patterns that are always allowed.
pub const DEFAULT_AUTO_PATTERNS: &[&str] =
    &["*.local", "*.localhost", "local.*", "dev.*", "staging.*"];

/// Why an origin was or was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionReason {
    /// Matched an auto-allow host pattern or dev port.
    Auto,
    /// On the permanent whitelist.
    Whitelist,
    /// On the session whitelist.
    Session,
    /// Not admitted.
    Blocked,
}

impl fmt::Display for AdmissionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auto => "auto",
            Self::Whitelist => "whitelist",
            Self::Session => "session",
            Self::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdmissionDecision {
    /// Whether capture is active for the origin.
    pub allowed: bool,
    /// Which rule decided.
    pub reason: AdmissionReason,
}

impl AdmissionDecision {
    fn allow(reason: AdmissionReason) -> Self {
        Self {
            allowed: true,
            reason,
        }
    }

    fn blocked() -> Self {
        Self {
            allowed: false,
            reason: AdmissionReason::Blocked,
        }
    }
}

/// Which whitelist an origin is added to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhitelistScope {
    /// Survives restarts.
    Permanent,
    /// Cleared by [`AdmissionPolicy::begin_session`].
    Session,
}

impl From<WhitelistScope> for Scope {
    fn from(scope: WhitelistScope) -> Self {
        match scope {
            WhitelistScope::Permanent => Scope::Permanent,
            WhitelistScope::Session => Scope::Session,
        }
    }
}

/// Admission policy over a whitelist store.
///
/// Mutations are serialized through an internal lock so that concurrent
/// read-modify-write cycles against the store cannot lose updates. Every
/// mutation that changes state bumps a revision on a `watch` channel.
pub struct AdmissionPolicy {
    store: Arc<dyn AdmissionStore>,
    dev_ports: HashSet<u16>,
    auto_patterns: Vec<String>,
    write_lock: Mutex<()>,
    changes: watch::Sender<u64>,
}

impl AdmissionPolicy {
    /// Create a policy with the default dev ports and auto patterns.
    pub fn new(store: Arc<dyn AdmissionStore>) -> Self {
        Self::from_config(&AdmissionConfig::default(), store)
    }

    /// Create a policy from configuration.
    ///
    /// Configured dev ports and patterns are added to the defaults.
    pub fn from_config(config: &AdmissionConfig, store: Arc<dyn AdmissionStore>) -> Self {
        let dev_ports = DEFAULT_DEV_PORTS
            .iter()
            .chain(config.dev_ports.iter())
            .copied()
            .collect();

        let mut auto_patterns: Vec<String> =
            DEFAULT_AUTO_PATTERNS.iter().map(|p| p.to_string()).collect();
        for pattern in &config.auto_patterns {
            let pattern = pattern.to_lowercase();
            if !auto_patterns.contains(&pattern) {
                auto_patterns.push(pattern);
            }
        }

        let (changes, _) = watch::channel(0);

        Self {
            store,
            dev_ports,
            auto_patterns,
            write_lock: Mutex::new(()),
            changes,
        }
    }

    /// Decide whether capture is active for `origin`.
    pub fn is_allowed(&self, origin: &str) -> AdmissionDecision {
        let Some(origin) = Origin::parse(origin) else {
            debug!("Unparseable origin {:?}, blocking", origin);
            return AdmissionDecision::blocked();
        };

        if self.is_auto(&origin) {
            return AdmissionDecision::allow(AdmissionReason::Auto);
        }

        let state = match self.store.load() {
            Ok(state) => state,
            Err(e) => {
                warn!("Admission store unreadable, blocking {}: {}", origin, e);
                return AdmissionDecision::blocked();
            }
        };

        if list_matches(&state.whitelist, &origin) {
            return AdmissionDecision::allow(AdmissionReason::Whitelist);
        }
        if list_matches(&state.session_whitelist, &origin) {
            return AdmissionDecision::allow(AdmissionReason::Session);
        }

        AdmissionDecision::blocked()
    }

    /// Add an origin to a whitelist.
    ///
    /// Returns `true` if the state changed. Adding an entry that is already
    /// present is a no-op and does not notify.
    pub fn add_to_whitelist(
        &self,
        origin: &str,
        scope: WhitelistScope,
    ) -> Result<bool, AdmissionError> {
        let key = normalize(origin)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| AdmissionError::LockPoisoned)?;

        let mut state = self.store.load()?;
        let list = match scope {
            WhitelistScope::Permanent => &mut state.whitelist,
            WhitelistScope::Session => &mut state.session_whitelist,
        };
        if list.contains(&key) {
            return Ok(false);
        }
        list.push(key.clone());
        self.store.save(&state)?;

        info!("Whitelisted {} ({:?})", key, scope);
        telemetry::record(AuditEvent::WhitelistAdd {
            origin: key,
            scope: scope.into(),
        });
        self.notify();
        Ok(true)
    }

    /// Remove an origin from both whitelists.
    ///
    /// Returns `true` if it was present in either.
    pub fn remove_from_whitelist(&self, origin: &str) -> Result<bool, AdmissionError> {
        let key = normalize(origin)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| AdmissionError::LockPoisoned)?;

        let mut state = self.store.load()?;
        let before = state.whitelist.len() + state.session_whitelist.len();
        state.whitelist.retain(|e| normalize_entry(e) != key);
        state.session_whitelist.retain(|e| normalize_entry(e) != key);
        if state.whitelist.len() + state.session_whitelist.len() == before {
            return Ok(false);
        }
        self.store.save(&state)?;

        info!("Removed {} from whitelists", key);
        telemetry::record(AuditEvent::WhitelistRemove { origin: key });
        self.notify();
        Ok(true)
    }

    /// Start a new session: the session whitelist is cleared.
    pub fn begin_session(&self) -> Result<(), AdmissionError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| AdmissionError::LockPoisoned)?;

        let mut state = self.store.load()?;
        if state.session_whitelist.is_empty() {
            return Ok(());
        }
        debug!(
            "Clearing {} session whitelist entries",
            state.session_whitelist.len()
        );
        state.session_whitelist.clear();
        self.store.save(&state)?;
        self.notify();
        Ok(())
    }

    /// Current persisted state.
    pub fn snapshot(&self) -> Result<AdmissionState, AdmissionError> {
        self.store.load()
    }

    /// Subscribe to admission changes.
    ///
    /// The value is a revision counter; receivers only care that it changed.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn is_auto(&self, origin: &Origin) -> bool {
        origin.is_loopback()
            || origin.port.is_some_and(|p| self.dev_ports.contains(&p))
            || self
                .auto_patterns
                .iter()
                .any(|p| matches_pattern(p, &origin.host))
    }

    fn notify(&self) {
        self.changes.send_modify(|rev| *rev += 1);
    }
}

/// Normalize a caller-supplied origin to its whitelist key.
fn normalize(origin: &str) -> Result<String, AdmissionError> {
    Origin::parse(origin)
        .map(|o| o.key())
        .ok_or_else(|| AdmissionError::InvalidOrigin(origin.to_string()))
}

/// Normalize a stored entry; unparseable entries compare as their raw text.
fn normalize_entry(entry: &str) -> String {
    Origin::parse(entry)
        .map(|o| o.key())
        .unwrap_or_else(|| entry.to_string())
}

fn list_matches(list: &[String], origin: &Origin) -> bool {
    list.iter().filter_map(|e| Origin::parse(e)).any(|entry| {
        entry.host == origin.host && (entry.port.is_none() || entry.port == origin.port)
    })
}
