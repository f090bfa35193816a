use crate::service::HandshakeOptions;
use crate::suggestions::SuggestionSettings;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to find config directory")]
    NoConfigDir,

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub cli: CliConfig,

    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub watcher: WatcherConfig,

    /// SnippetSense settings, forwarded verbatim to the analysis engine
    #[serde(default)]
    pub suggestions: SuggestionSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How the espanso executable is located and invoked.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CliConfig {
    /// Pin a specific espanso executable. `ESPANSO_CLI` still wins when set.
    #[serde(default)]
    pub executable: Option<String>,

    /// Timeout for foreground commands (package, log, doctor, ...)
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Timeout for lightweight `--version` / `status` probes
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            executable: None,
            command_timeout_secs: default_command_timeout(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

fn default_command_timeout() -> u64 {
    30
}

fn default_probe_timeout() -> u64 {
    5
}

impl CliConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Daemon handshake and status polling settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServiceConfig {
    /// Status polls after a detached `start`
    #[serde(default = "default_status_attempts")]
    pub status_attempts: u32,

    /// Delay between status polls (seconds)
    #[serde(default = "default_status_delay")]
    pub status_delay_secs: f64,

    /// Window after a failed start during which no new start is attempted
    #[serde(default = "default_retry_window")]
    pub retry_window_secs: f64,

    /// How long a cached `status` result is served to the dashboard
    #[serde(default = "default_status_ttl")]
    pub status_ttl_secs: f64,

    /// How long a passing connection check is trusted
    #[serde(default = "default_connection_ttl")]
    pub connection_ttl_secs: f64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            status_attempts: default_status_attempts(),
            status_delay_secs: default_status_delay(),
            retry_window_secs: default_retry_window(),
            status_ttl_secs: default_status_ttl(),
            connection_ttl_secs: default_connection_ttl(),
        }
    }
}

fn default_status_attempts() -> u32 {
    3
}

fn default_status_delay() -> f64 {
    2.0
}

fn default_retry_window() -> f64 {
    60.0
}

fn default_status_ttl() -> f64 {
    10.0
}

fn default_connection_ttl() -> f64 {
    30.0
}

impl ServiceConfig {
    pub fn status_delay(&self) -> Duration {
        seconds(self.status_delay_secs, default_status_delay())
    }

    pub fn retry_window(&self) -> Duration {
        seconds(self.retry_window_secs, default_retry_window())
    }

    pub fn status_ttl(&self) -> Duration {
        seconds(self.status_ttl_secs, default_status_ttl())
    }

    pub fn connection_ttl(&self) -> Duration {
        seconds(self.connection_ttl_secs, default_connection_ttl())
    }
}

/// Upper bound for every seconds-valued setting (one day).
const MAX_SECONDS: f64 = 86_400.0;

/// Seconds as a `Duration`, or the default when the value is negative, NaN or
/// out of range. Configs built in code skip `validate`, so this must not panic.
fn seconds(value: f64, default: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_else(|_| Duration::from_secs_f64(default))
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WatcherConfig {
    /// Quiet period before a snippet reload after file changes
    #[serde(default = "default_debounce")]
    pub debounce_secs: f64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_secs: default_debounce(),
        }
    }
}

fn default_debounce() -> f64 {
    2.0
}

impl WatcherConfig {
    pub fn debounce(&self) -> Duration {
        seconds(self.debounce_secs, default_debounce())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also write a daily-rolling log file into the data directory
    #[serde(default)]
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        ProjectDirs::from("com", "espanso-companion", "espanso-companion")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Get the data directory path (logs, pending suggestions, installer cache)
    pub fn data_dir() -> Result<PathBuf, ConfigError> {
        ProjectDirs::from("com", "espanso-companion", "espanso-companion")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Get the config file path
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load config from an explicit path, writing defaults there if missing.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let contents = fs::read_to_string(path)?;
            let config: Config = toml::from_str(&contents)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.status_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "status_attempts must be at least 1".into(),
            ));
        }

        let non_negative = [
            ("status_delay_secs", self.service.status_delay_secs),
            ("status_ttl_secs", self.service.status_ttl_secs),
            ("connection_ttl_secs", self.service.connection_ttl_secs),
            ("debounce_secs", self.watcher.debounce_secs),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be a non-negative number",
                    name
                )));
            }
            if value > MAX_SECONDS {
                return Err(ConfigError::ValidationError(format!(
                    "{} must not exceed {} seconds",
                    name, MAX_SECONDS
                )));
            }
        }

        let window = self.service.retry_window_secs;
        if !window.is_finite() || !(1.0..=MAX_SECONDS).contains(&window) {
            return Err(ConfigError::ValidationError(format!(
                "retry_window_secs must be between 1 and {} seconds",
                MAX_SECONDS
            )));
        }

        if self.cli.command_timeout_secs == 0 || self.cli.probe_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "command timeouts must be greater than zero".into(),
            ));
        }

        if let Some(ref exe) = self.cli.executable {
            if exe.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "cli.executable must not be empty when set".into(),
                ));
            }
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "unknown log level '{}'",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        // Create config directory if needed
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;

        info!("Config saved to: {}", path.display());
        Ok(())
    }

    /// Handshake tuning derived from the `[service]` and `[cli]` tables. The
    /// retry window goes to the [`StatusCache`](crate::service::StatusCache).
    pub fn handshake_options(&self) -> HandshakeOptions {
        HandshakeOptions {
            status_attempts: self.service.status_attempts,
            status_delay: self.service.status_delay(),
            probe_timeout: self.cli.probe_timeout(),
        }
    }
}

/// Show current configuration
pub fn show() -> anyhow::Result<()> {
    let config = Config::load()?;
    let path = Config::config_path()?;

    println!("Config file: {}\n", path.display());
    println!("{}", toml::to_string_pretty(&config)?);

    Ok(())
}
