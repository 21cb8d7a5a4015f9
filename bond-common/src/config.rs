//! Configuration loading and root folder resolution
//!
//! Bootstrap settings come from a TOML file. Every field is optional; a
//! missing file means compiled defaults, not a startup failure.

use crate::collections::CollectionSet;
use crate::sync::SyncTiming;
use crate::time::millis_to_duration;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "BONDAPP_CONFIG";

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV_VAR: &str = "BONDAPP_ROOT_FOLDER";

/// Local database file name inside the root folder
pub const DATABASE_FILE: &str = "bondapp.db";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// Folder holding the local database
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Shared SQLite document store acting as the remote
    #[serde(default)]
    pub remote_path: Option<PathBuf>,

    /// Explicit device identity (overrides the persisted one)
    #[serde(default)]
    pub device_id: Option<String>,

    /// Mint and persist a device id when none is configured or persisted
    #[serde(default = "default_generate_device_id")]
    pub generate_device_id: bool,

    #[serde(default)]
    pub collections: CollectionSet,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Sync timing settings
#[derive(Debug, Clone, Deserialize)]
pub struct SyncSettings {
    /// Delay before a success status falls back to idle
    #[serde(default = "default_success_reset_ms")]
    pub success_reset_ms: u64,

    /// Delay before an error status falls back to idle
    #[serde(default = "default_error_reset_ms")]
    pub error_reset_ms: u64,

    /// Poll interval for subscriptions on the SQLite document store
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_generate_device_id() -> bool {
    true
}

fn default_success_reset_ms() -> u64 {
    3000
}

fn default_error_reset_ms() -> u64 {
    5000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            success_reset_ms: default_success_reset_ms(),
            error_reset_ms: default_error_reset_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            remote_path: None,
            device_id: None,
            generate_device_id: default_generate_device_id(),
            collections: CollectionSet::default(),
            sync: SyncSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SyncSettings {
    pub fn timing(&self) -> SyncTiming {
        SyncTiming {
            success_reset: millis_to_duration(self.success_reset_ms),
            error_reset: millis_to_duration(self.error_reset_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        millis_to_duration(self.poll_interval_ms.max(1))
    }
}

impl TomlConfig {
    /// Parse TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))?;

        if config.collections.is_empty() {
            return Err(Error::Config("collections.names must not be empty".to_string()));
        }
        if config.collections.prefix.is_empty() {
            return Err(Error::Config("collections.prefix must not be empty".to_string()));
        }

        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        let config = Self::parse(&content)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }
}

/// Load the bootstrap configuration
///
/// Priority order:
/// 1. Explicit path (command line); failure to read it is an error
/// 2. `BONDAPP_CONFIG` environment variable; failure is an error
/// 3. `<config dir>/bondapp/config.toml` if it exists
/// 4. Compiled defaults
pub fn load_config(cli_path: Option<&Path>) -> Result<TomlConfig> {
    if let Some(path) = cli_path {
        return TomlConfig::from_file(path);
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return TomlConfig::from_file(Path::new(&path));
    }

    if let Some(path) = default_config_path() {
        if path.exists() {
            return TomlConfig::from_file(&path);
        }
    }

    warn!("No config file found, using defaults");
    Ok(TomlConfig::default())
}

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV_VAR) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(path) = &config.root_folder {
        return path.clone();
    }

    // Priority 4: OS-dependent compiled default
    get_default_root_folder()
}

/// Local database path inside a root folder
pub fn database_path(root_folder: &Path) -> PathBuf {
    root_folder.join(DATABASE_FILE)
}

/// Platform config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("bondapp").join("config.toml"))
}

/// Get OS-dependent default root folder path
pub fn get_default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/bondapp
        dirs::data_local_dir()
            .map(|d| d.join("bondapp"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/bondapp"))
    } else if cfg!(target_os = "macos") {
        // ~/Library/Application Support/bondapp
        dirs::data_dir()
            .map(|d| d.join("bondapp"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/bondapp"))
    } else if cfg!(target_os = "windows") {
        // %LOCALAPPDATA%\bondapp
        dirs::data_local_dir()
            .map(|d| d.join("bondapp"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\bondapp"))
    } else {
        PathBuf::from("./bondapp_data")
    }
}
