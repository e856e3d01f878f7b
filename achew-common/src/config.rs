//! Client configuration loading and server URL resolution
//!
//! Bootstrap settings come from a small TOML file. The server URL is
//! resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

/// Compiled default backend address
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8000";

/// Environment variable naming the backend address
pub const SERVER_URL_ENV: &str = "ACHEW_SERVER_URL";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TomlConfig {
    /// Backend base URL (scheme, host and port)
    #[serde(default)]
    pub server_url: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Push channel settings
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Settle delay for debounced edits in milliseconds
    #[serde(default = "default_edit_debounce_ms")]
    pub edit_debounce_ms: u64,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            request_timeout_secs: default_request_timeout_secs(),
            channel: ChannelConfig::default(),
            edit_debounce_ms: default_edit_debounce_ms(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Reconnection policy for the push channel
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ChannelConfig {
    /// First reconnect delay in milliseconds
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,

    /// Upper bound on the reconnect delay in milliseconds
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,

    /// Consecutive failures before giving up; 0 retries forever
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

impl ChannelConfig {
    /// Delay before reconnect attempt `attempt` (1-based), doubling up to the cap
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.reconnect_initial_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(self.reconnect_max_ms))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_edit_debounce_ms() -> u64 {
    600
}

fn default_reconnect_initial_ms() -> u64 {
    500
}

fn default_reconnect_max_ms() -> u64 {
    15_000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TomlConfig {
    /// Load configuration from an explicit path, or the platform default path.
    ///
    /// A missing default file yields built-in defaults; a missing explicit
    /// file is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid config: {}", e)))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn edit_debounce(&self) -> Duration {
        Duration::from_millis(self.edit_debounce_ms)
    }
}

/// Default configuration file path for the platform (`<config dir>/achew/achew-ui.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("achew").join("achew-ui.toml"))
}

/// Resolve the backend URL: CLI > ENV > TOML > compiled default.
///
/// The result is validated and normalized without a trailing slash.
pub fn resolve_server_url(
    cli_arg: Option<&str>,
    env_var_name: &str,
    config: &TomlConfig,
) -> Result<String> {
    // Priority 1: Command-line argument
    if let Some(url) = cli_arg {
        return normalize_server_url(url);
    }

    // Priority 2: Environment variable
    if let Ok(url) = std::env::var(env_var_name) {
        if !url.trim().is_empty() {
            return normalize_server_url(&url);
        }
    }

    // Priority 3: TOML config file
    if let Some(url) = config.server_url.as_deref() {
        return normalize_server_url(url);
    }

    // Priority 4: Compiled default
    normalize_server_url(DEFAULT_SERVER_URL)
}

fn normalize_server_url(url: &str) -> Result<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(Error::Config(format!(
            "Server URL must start with http:// or https://: {}",
            url
        )));
    }
    Ok(trimmed.to_string())
}

/// WebSocket endpoint for a normalized server URL
pub fn websocket_url(server_url: &str) -> String {
    if let Some(rest) = server_url.strip_prefix("https://") {
        format!("wss://{}/ws", rest)
    } else if let Some(rest) = server_url.strip_prefix("http://") {
        format!("ws://{}/ws", rest)
    } else {
        format!("{}/ws", server_url)
    }
}
