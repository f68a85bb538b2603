//! Persisted admission state.
//!
//! The state file is TOML:
//!
//! ```toml
//! whitelist = ["example.com", "shop.io:8443"]
//! sessionWhitelist = ["staging-box:9999"]
//! ```
//!
//! A missing file is an empty state. Writes go to a sibling temp file that is
//! then renamed over the original, so readers never see a half-written file.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::AdmissionError;

/// Whitelist state as persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionState {
    /// Permanent entries.
    #[serde(default)]
    pub whitelist: Vec<String>,

    /// Entries cleared at every session start.
    #[serde(default, rename = "sessionWhitelist")]
    pub session_whitelist: Vec<String>,
}

/// Backing storage for admission state.
pub trait AdmissionStore: Send + Sync {
    /// Read the current state.
    fn load(&self) -> Result<AdmissionState, AdmissionError>;

    /// Replace the stored state.
    fn save(&self, state: &AdmissionState) -> Result<(), AdmissionError>;
}

/// TOML file store.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Create a store backed by `path`. The file need not exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path to the state file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AdmissionStore for FileStore {
    fn load(&self) -> Result<AdmissionState, AdmissionError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => toml::from_str(&contents).map_err(|e| AdmissionError::ParseError {
                path: self.path.clone(),
                source: e,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AdmissionState::default()),
            Err(e) => Err(AdmissionError::ReadError {
                path: self.path.clone(),
                source: e,
            }),
        }
    }

    fn save(&self, state: &AdmissionState) -> Result<(), AdmissionError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| AdmissionError::WriteError {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let contents = toml::to_string_pretty(state)?;
        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, contents).map_err(|e| AdmissionError::WriteError {
            path: tmp.clone(),
            source: e,
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| AdmissionError::WriteError {
            path: self.path.clone(),
            source: e,
        })?;

        debug!("Wrote admission state to {:?}", self.path);
        Ok(())
    }
}

/// In-memory store, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<AdmissionState>,
}

impl MemoryStore {
    /// Create a store seeded with `state`.
    pub fn new(state: AdmissionState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }
}

impl AdmissionStore for MemoryStore {
    fn load(&self) -> Result<AdmissionState, AdmissionError> {
        self.state
            .lock()
            .map(|s| s.clone())
            .map_err(|_| AdmissionError::LockPoisoned)
    }

    fn save(&self, state: &AdmissionState) -> Result<(), AdmissionError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| AdmissionError::LockPoisoned)?;
        *guard = state.clone();
        Ok(())
    }
}
