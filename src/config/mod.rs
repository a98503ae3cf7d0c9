//! Daemon Configuration
//!
//! Loads configuration from YAML files with a cascading priority system:
//! 1. `./bfdd.yaml` (current directory - highest priority)
//! 2. `~/.config/bfdd/bfdd.yaml` (user config directory)
//! 3. `/etc/bfdd/bfdd.yaml` (system - lowest priority)
//!
//! Values from higher priority files override those from lower priority
//! files; peer lists replace rather than merge.
//!
//! ```yaml
//! daemon:
//!   listen: 0.0.0.0
//! peers:
//!   - peer: 198.51.100.2
//!     tx_interval_ms: 300
//!     rx_interval_ms: 300
//!     detect_multiplier: 3
//! ```

mod peer;

pub use peer::PeerProfile;

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default config filename.
const CONFIG_FILENAME: &str = "bfdd.yaml";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

/// Daemon-wide settings (`daemon.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Address the control and echo listeners bind. Unspecified address
    /// of each family when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<IpAddr>,

    /// Serve the echo port. On by default.
    #[serde(default = "default_true")]
    pub echo_listener: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: None,
            echo_listener: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Daemon settings (`daemon.*`).
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Sessions to bring up at startup (`peers`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peers: Vec<PeerProfile>,
}

impl Config {
    /// Create a new empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the standard search paths.
    ///
    /// Returns a tuple of (config, paths_loaded) where paths_loaded
    /// contains the paths that were successfully loaded.
    pub fn load() -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let search_paths = Self::search_paths();
        Self::load_from_paths(&search_paths)
    }

    /// Load configuration from specific paths.
    ///
    /// Paths are processed in order, with later paths overriding earlier
    /// ones.
    pub fn load_from_paths(paths: &[PathBuf]) -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let mut config = Config::default();
        let mut loaded_paths = Vec::new();

        for path in paths {
            if path.exists() {
                let file_config = Self::load_file(path)?;
                config.merge(file_config);
                loaded_paths.push(path.clone());
            }
        }

        Ok((config, loaded_paths))
    }

    /// Load configuration from a single file.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        serde_yaml::from_str(&contents).map_err(|e| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the standard search paths in priority order (lowest to
    /// highest).
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // System config (lowest priority)
        paths.push(PathBuf::from("/etc/bfdd").join(CONFIG_FILENAME));

        // User config directory
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("bfdd").join(CONFIG_FILENAME));
        }

        // Current directory (highest priority)
        paths.push(PathBuf::from(".").join(CONFIG_FILENAME));

        paths
    }

    /// Merge another configuration into this one.
    ///
    /// Values from `other` override values in `self` when present.
    pub fn merge(&mut self, other: Config) {
        if other.daemon.listen.is_some() {
            self.daemon.listen = other.daemon.listen;
        }
        if !other.daemon.echo_listener {
            self.daemon.echo_listener = false;
        }
        // Peers replace if non-empty
        if !other.peers.is_empty() {
            self.peers = other.peers;
        }
    }

    /// Get the configured peers.
    pub fn peers(&self) -> &[PeerProfile] {
        &self.peers
    }

    /// Serialize this configuration to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}
