//! Configuration loading with hierarchy merging.
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Embedded defaults (compiled into binary)
//! 2. System config: `/etc/fixonce-relay/config.toml`
//! 3. User config: `~/.config/fixonce-relay/config.toml`
//! 4. Additional config file (via `--config` flag)
//! 5. CLI flags (highest priority)
//!
//! Lists (candidate_ports, dev_ports) are **merged** (appended).
//! Scalars (timeouts, log_level) are **overridden**.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::ConfigError;
use super::schema::{Config, APP_DIR};
use crate::cli::Cli;

/// System-wide configuration path.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/fixonce-relay/config.toml";

/// User configuration filename.
pub const USER_CONFIG_FILE: &str = "config.toml";

/// Defaults shipped with the binary.
const EMBEDDED_DEFAULTS: &str = include_str!("../../config/default.toml");

/// Configuration loader with support for hierarchy merging.
pub struct ConfigLoader {
    /// Path to system-wide configuration.
    system_path: PathBuf,
    /// Path to user configuration.
    user_path: PathBuf,
}

impl ConfigLoader {
    /// Create a new ConfigLoader with default paths.
    #[must_use]
    pub fn new() -> Self {
        let user_config_dir = dirs::config_dir()
            .map(|p| p.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from(".config").join(APP_DIR));

        Self {
            system_path: PathBuf::from(SYSTEM_CONFIG_PATH),
            user_path: user_config_dir.join(USER_CONFIG_FILE),
        }
    }

    /// Create a ConfigLoader with custom paths (for testing).
    #[must_use]
    pub fn with_paths(system_path: PathBuf, user_path: PathBuf) -> Self {
        Self {
            system_path,
            user_path,
        }
    }

    /// Load and merge configuration from all sources.
    ///
    /// Missing system and user files are skipped. A missing `--config` file,
    /// invalid TOML, or an invalid value is an error.
    pub fn load(&self, cli: &Cli) -> Result<Config, ConfigError> {
        let mut config = embedded_defaults()?;
        debug!("Loaded embedded default configuration");

        if let Some(system_config) = self.load_file(&self.system_path)? {
            config.merge(system_config);
            debug!("Loaded system config from {:?}", self.system_path);
        } else {
            debug!("No system config found at {:?}", self.system_path);
        }

        if let Some(user_config) = self.load_file(&self.user_path)? {
            config.merge(user_config);
            debug!("Loaded user config from {:?}", self.user_path);
        } else {
            debug!("No user config found at {:?}", self.user_path);
        }

        if let Some(ref cli_config_path) = cli.config {
            match self.load_file(cli_config_path)? {
                Some(cli_config) => {
                    config.merge(cli_config);
                    debug!("Loaded additional config from {:?}", cli_config_path);
                }
                None => {
                    // Unlike system/user config, a missing CLI-specified config is an error
                    return Err(ConfigError::ReadError {
                        path: cli_config_path.clone(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "Specified config file not found",
                        ),
                    });
                }
            }
        }

        apply_cli_flags(&mut config, cli);
        config.validate()?;
        Ok(config)
    }

    /// Path of the user config file.
    pub fn user_path(&self) -> &Path {
        &self.user_path
    }

    /// Load a config file, returning None if it doesn't exist.
    fn load_file(&self, path: &PathBuf) -> Result<Option<Config>, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config: Config =
                    toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
                        path: path.clone(),
                        source: e,
                    })?;
                Ok(Some(config))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigError::ReadError {
                path: path.clone(),
                source: e,
            }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// The embedded default configuration.
pub fn embedded_defaults() -> Result<Config, ConfigError> {
    toml::from_str(EMBEDDED_DEFAULTS).map_err(|e| ConfigError::ParseError {
        path: PathBuf::from("<embedded:default.toml>"),
        source: e,
    })
}

/// CLI flags replace rather than append: `--port` is an explicit choice.
fn apply_cli_flags(config: &mut Config, cli: &Cli) {
    if !cli.ports.is_empty() {
        config.server.candidate_ports = cli.ports.clone();
        debug!("Using {} candidate ports from CLI flags", cli.ports.len());
    }
    if let Some(ref socket) = cli.socket {
        config.server.socket_path = Some(socket.clone());
    }
    if let Some(ref state) = cli.state {
        config.admission.state_path = Some(state.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::tempdir;

    fn create_test_cli(args: &[&str]) -> Cli {
        let mut argv = vec!["fixonce-relay"];
        argv.extend_from_slice(args);
        argv.push("run");
        Cli::parse_from(argv)
    }

    fn loader_in(dir: &Path) -> ConfigLoader {
        ConfigLoader::with_paths(dir.join("system.toml"), dir.join("user.toml"))
    }

    #[test]
    fn test_missing_files_use_defaults() {
        let dir = tempdir().unwrap();
        let config = loader_in(dir.path()).load(&create_test_cli(&[])).unwrap();

        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.server.ports_or_default().first(), Some(&5000));
        assert_eq!(config.queue.batch_size, 10);
    }

    #[test]
    fn test_user_config_overrides_system() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("system.toml"),
            "[server]\nrequest_timeout_ms = 1000\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("user.toml"),
            "[server]\nrequest_timeout_ms = 2000\n",
        )
        .unwrap();

        let config = loader_in(dir.path()).load(&create_test_cli(&[])).unwrap();

        assert_eq!(config.server.request_timeout_ms, 2000);
    }

    #[test]
    fn test_lists_are_merged() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("system.toml"), "[admission]\ndev_ports = [4000]\n").unwrap();
        fs::write(dir.path().join("user.toml"), "[admission]\ndev_ports = [4001]\n").unwrap();

        let config = loader_in(dir.path()).load(&create_test_cli(&[])).unwrap();

        assert_eq!(config.admission.dev_ports, vec![4000, 4001]);
    }

    #[test]
    fn test_cli_config_file_is_merged_last() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("user.toml"), "[queue]\nbatch_size = 20\n").unwrap();
        let extra = dir.path().join("extra.toml");
        fs::write(&extra, "[queue]\nbatch_size = 30\n").unwrap();

        let cli = create_test_cli(&["--config", extra.to_str().unwrap()]);
        let config = loader_in(dir.path()).load(&cli).unwrap();

        assert_eq!(config.queue.batch_size, 30);
    }

    #[test]
    fn test_missing_cli_config_is_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let cli = create_test_cli(&["--config", missing.to_str().unwrap()]);

        let err = loader_in(dir.path()).load(&cli).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn test_cli_flags_replace_ports() {
        let dir = tempdir().unwrap();
        let cli = create_test_cli(&["-p", "6001", "--socket", "/tmp/x.sock", "--state", "/tmp/s.toml"]);

        let config = loader_in(dir.path()).load(&cli).unwrap();

        assert_eq!(config.server.ports_or_default(), vec![6001]);
        assert_eq!(config.server.socket_path, Some(PathBuf::from("/tmp/x.sock")));
        assert_eq!(config.admission.state_path, Some(PathBuf::from("/tmp/s.toml")));
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("system.toml"), "this is not valid TOML [[[").unwrap();

        let err = loader_in(dir.path()).load(&create_test_cli(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_invalid_value_returns_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("user.toml"), "[general]\nlog_level = \"chatty\"\n").unwrap();

        let err = loader_in(dir.path()).load(&create_test_cli(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
