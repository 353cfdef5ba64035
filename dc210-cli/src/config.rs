//! Configuration file support for dc210.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (DC210_*)
//! 3. Local config file (./dc210.toml)
//! 4. Global config file (~/.config/dc210/config.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Local config file name, looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "dc210.toml";

/// Serial connection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Serial port name/path.
    pub port: Option<String>,
    /// Baud rate to negotiate after the handshake.
    pub baud: Option<u32>,
    /// Skip speed negotiation.
    #[serde(default)]
    pub no_baud: bool,
}

/// Download settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Directory pictures are written into.
    pub output_dir: Option<PathBuf>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Download settings.
    #[serde(default)]
    pub download: DownloadConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        Self::load_layered(Self::global_config_path().as_deref(), Path::new(LOCAL_CONFIG_FILE))
    }

    fn load_layered(global: Option<&Path>, local: &Path) -> Self {
        let mut config = Self::default();

        if let Some(global_path) = global {
            if let Some(global_config) = Self::load_from_file(global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(local) {
            debug!("Loaded local config from {}", local.display());
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "dc210").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.connection.port.is_some() {
            self.connection.port = other.connection.port;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }
        if other.connection.no_baud {
            self.connection.no_baud = true;
        }
        if other.download.output_dir.is_some() {
            self.download.output_dir = other.download.output_dir;
        }
    }
}
