//! Configuration management with versioning and migration

use crate::audio::RetryPolicy;
use crate::error::{AppError, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Current configuration version
pub const CONFIG_VERSION: u32 = 2;

/// Settings files larger than this are refused
pub const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Portable mode marker filename
const PORTABLE_MARKER: &str = "portable.txt";

/// Configuration filename
const CONFIG_FILENAME: &str = "config.toml";

/// Per-user data directory name
const APP_DIR_NAME: &str = "BtAudioReceiver";

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Configuration version for migration
    #[serde(default = "default_version")]
    pub config_version: u32,

    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Connection retry settings
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Language override (None = use system locale, Some = use specified locale)
    #[serde(default)]
    pub language: Option<String>,

    /// Reconnect to the last device once enumeration completes
    #[serde(default)]
    pub auto_connect: bool,

    #[serde(default)]
    pub last_device_id: Option<String>,

    #[serde(default)]
    pub last_device_name: Option<String>,

    #[serde(default = "default_true")]
    pub show_notifications: bool,
}

fn default_true() -> bool {
    true
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            language: None,
            auto_connect: false,
            last_device_id: None,
            last_device_name: None,
            show_notifications: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Attempts per open request
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between attempts in milliseconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// How long to wait for the platform to report the opened state
    #[serde(default = "default_state_wait_timeout")]
    pub state_wait_timeout_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    500
}

fn default_state_wait_timeout() -> u64 {
    500
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 500,
            state_wait_timeout_ms: 500,
        }
    }
}

impl ConnectionConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            state_wait_timeout: Duration::from_millis(self.state_wait_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum log file size in bytes
    #[serde(default = "default_max_log_size")]
    pub max_file_size: u64,

    /// Number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: u32,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_size() -> u64 {
    5 * 1024 * 1024 // 5MB
}

fn default_max_log_files() -> u32 {
    3
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            max_file_size: 5 * 1024 * 1024,
            max_files: 3,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_version: CONFIG_VERSION,
            general: GeneralConfig::default(),
            connection: ConnectionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Migrate config from older version
    fn migrate(&mut self) {
        if self.config_version < CONFIG_VERSION {
            info!(
                "Migrating config from version {} to {}",
                self.config_version, CONFIG_VERSION
            );

            // v1 to v2: added the [connection] table, filled from defaults by serde
            if self.config_version < 2 {
                info!("Migrated config from v1 to v2: added connection settings");
            }

            self.config_version = CONFIG_VERSION;
        }
    }

    /// Device to reconnect to on startup, if auto-connect is enabled
    pub fn auto_connect_device(&self) -> Option<&str> {
        if !self.general.auto_connect {
            return None;
        }
        self.general
            .last_device_id
            .as_deref()
            .filter(|id| !id.is_empty())
    }
}

/// Manages configuration loading, saving, and migration
pub struct ConfigManager {
    config_path: PathBuf,
    is_portable: bool,
}

impl ConfigManager {
    /// Create a new config manager, detecting portable vs installed mode
    pub fn new() -> Result<Self> {
        let (config_path, is_portable) = Self::detect_config_path()?;
        Ok(Self {
            config_path,
            is_portable,
        })
    }

    /// Use an explicit config file path (portable layout)
    pub fn with_path(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            is_portable: true,
        }
    }

    /// Detect whether we're running in portable mode and get config path
    fn detect_config_path() -> Result<(PathBuf, bool)> {
        let exe_path = std::env::current_exe()
            .map_err(|e| AppError::ConfigError(format!("Could not get exe path: {}", e)))?;
        let exe_dir = exe_path.parent().ok_or_else(|| {
            AppError::ConfigError("Could not get exe directory".to_string())
        })?;

        // Check for portable marker
        if exe_dir.join(PORTABLE_MARKER).exists() {
            debug!("Portable mode detected via marker file");
            return Ok((exe_dir.join(CONFIG_FILENAME), true));
        }

        match user_data_dir() {
            Some(base) => {
                let config_dir = base.join(APP_DIR_NAME);
                fs::create_dir_all(&config_dir)?;
                Ok((config_dir.join(CONFIG_FILENAME), false))
            }
            None => {
                debug!("No per-user data directory, using portable layout");
                Ok((exe_dir.join(CONFIG_FILENAME), true))
            }
        }
    }

    /// Check if running in portable mode
    pub fn is_portable(&self) -> bool {
        self.is_portable
    }

    /// Get the config file path
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Get the log directory
    pub fn log_dir(&self) -> PathBuf {
        let base = self
            .config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        if self.is_portable {
            base.join("logs")
        } else {
            base
        }
    }

    /// Load configuration from file.
    ///
    /// Missing or oversized files yield defaults; a file that cannot be
    /// parsed is an error.
    pub fn load(&self) -> Result<AppConfig> {
        let metadata = match fs::metadata(&self.config_path) {
            Ok(metadata) => metadata,
            Err(_) => {
                info!("Config file not found, using defaults");
                return Ok(AppConfig::default());
            }
        };

        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            warn!(
                "Config file is {} bytes (limit {}), using defaults",
                metadata.len(),
                MAX_CONFIG_FILE_SIZE
            );
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(&self.config_path)
            .map_err(|e| AppError::ConfigError(format!("Could not read config: {}", e)))?;

        let mut config: AppConfig = toml::from_str(&content)
            .map_err(|e| AppError::ConfigError(format!("Could not parse config: {}", e)))?;

        // Migrate if needed
        if config.config_version < CONFIG_VERSION {
            config.migrate();
            self.save(&config)?;
        }

        info!("Loaded config from {:?}", self.config_path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(config)
            .map_err(|e| AppError::ConfigError(format!("Could not serialize config: {}", e)))?;

        fs::write(&self.config_path, content)
            .map_err(|e| AppError::ConfigError(format!("Could not write config: {}", e)))?;

        info!("Saved config to {:?}", self.config_path);
        Ok(())
    }

    /// Record the device of a successful connection for the next start
    pub fn remember_device(&self, config: &mut AppConfig, id: &str, name: &str) -> Result<()> {
        if config.general.last_device_id.as_deref() == Some(id)
            && config.general.last_device_name.as_deref() == Some(name)
        {
            return Ok(());
        }
        config.general.last_device_id = Some(id.to_string());
        config.general.last_device_name = Some(name.to_string());
        self.save(config)
    }
}

#[cfg(windows)]
fn user_data_dir() -> Option<PathBuf> {
    std::env::var_os("LOCALAPPDATA").map(PathBuf::from)
}

#[cfg(not(windows))]
fn user_data_dir() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.config_version, CONFIG_VERSION);
        assert!(!config.general.auto_connect);
        assert!(config.general.show_notifications);
        assert_eq!(config.connection.max_attempts, 3);
        assert_eq!(config.connection.retry_delay_ms, 500);
        assert_eq!(config.logging.max_file_size, 5 * 1024 * 1024);
    }

    #[test]
    fn test_retry_policy_clamps_attempts() {
        let connection = ConnectionConfig {
            max_attempts: 0,
            retry_delay_ms: 250,
            state_wait_timeout_ms: 100,
        };
        let policy = connection.retry_policy();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.retry_delay, Duration::from_millis(250));
        assert_eq!(policy.state_wait_timeout, Duration::from_millis(100));
    }

    #[test]
    fn test_auto_connect_device() {
        let mut config = AppConfig::default();
        config.general.last_device_id = Some("dev1".to_string());
        assert_eq!(config.auto_connect_device(), None);

        config.general.auto_connect = true;
        assert_eq!(config.auto_connect_device(), Some("dev1"));

        config.general.last_device_id = Some(String::new());
        assert_eq!(config.auto_connect_device(), None);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [general]
            auto_connect = true
            "#,
        )
        .unwrap();
        assert!(config.general.auto_connect);
        assert_eq!(config.connection, ConnectionConfig::default());
        assert_eq!(config.logging.level, "info");
    }
}
