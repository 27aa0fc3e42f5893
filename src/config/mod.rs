//! Configuration management for routerpkg
//!
//! Loaded in layers, each overriding only the keys it sets:
//! 1. Embedded default_config.toml (compile-time defaults)
//! 2. User config at ~/.config/routerpkg/config.toml (or platform-specific location)
//! 3. Project-local config at ./.routerpkg/config.toml
//! 4. An explicit file given on the command line

use crate::credentials::DEFAULT_SSH_PORT;
use crate::domain::command::RunnerConfig;
use crate::domain::opkg::OpkgCommands;
use crate::error::{ConfigError, ConfigResult};
use crate::infrastructure::ssh::SshConnectorConfig;
use crate::relay::EventRelay;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration embedded in binary
const DEFAULT_CONFIG: &str = include_str!("../../default_config.toml");

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub opkg: OpkgConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// SSH connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(default = "default_port")]
    pub default_port: u16,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub keepalive_interval_secs: Option<u64>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            default_port: default_port(),
            connect_timeout_secs: default_connect_timeout(),
            keepalive_interval_secs: None,
        }
    }
}

/// Streaming relay settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Seconds without output before the client is probed; 0 disables
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            keepalive_secs: default_keepalive(),
        }
    }
}

/// Package manager settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpkgConfig {
    #[serde(default = "default_opkg_binary")]
    pub binary: String,
}

impl Default for OpkgConfig {
    fn default() -> Self {
        Self {
            binary: default_opkg_binary(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_true")]
    pub timestamps: bool,
    #[serde(default)]
    pub file_line: bool,
    #[serde(default)]
    pub file_output: bool,
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            timestamps: true,
            file_line: false,
            file_output: false,
            file_path: None,
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_connect_timeout() -> u64 {
    15
}

fn default_channel_capacity() -> usize {
    64
}

fn default_keepalive() -> u64 {
    15
}

fn default_opkg_binary() -> String {
    "opkg".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Configuration loading
// ============================================================================

/// What happened to one config file layer during [`AppConfig::load`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerOutcome {
    Loaded(PathBuf),
    Skipped { path: PathBuf, reason: String },
}

impl LayerOutcome {
    /// Report through tracing; call once a subscriber is installed
    pub fn log(&self) {
        match self {
            LayerOutcome::Loaded(path) => tracing::info!("Loaded config from {:?}", path),
            LayerOutcome::Skipped { path, reason } => {
                tracing::warn!("Failed to load config {:?}: {}", path, reason)
            }
        }
    }
}

impl AppConfig {
    /// Load configuration with fallback chain:
    /// 1. Embedded default_config.toml
    /// 2. User config ~/.config/routerpkg/config.toml
    /// 3. Project-local .routerpkg/config.toml
    /// 4. `explicit`, which must exist when given
    ///
    /// Loading runs before logging is set up, so each file layer is
    /// returned as a [`LayerOutcome`] for the caller to log.
    pub fn load(explicit: Option<&Path>) -> ConfigResult<(Self, Vec<LayerOutcome>)> {
        let optional = [Self::user_config_path(), Self::project_config_path()];
        Self::load_layers(optional.into_iter().flatten(), explicit)
    }

    fn load_layers(
        optional: impl IntoIterator<Item = PathBuf>,
        explicit: Option<&Path>,
    ) -> ConfigResult<(Self, Vec<LayerOutcome>)> {
        let mut merged = parse_table(DEFAULT_CONFIG, "embedded default config")?;
        let mut outcomes = Vec::new();

        for path in optional {
            if !path.exists() {
                continue;
            }
            match read_table(&path) {
                Ok(layer) => {
                    merge(&mut merged, layer);
                    outcomes.push(LayerOutcome::Loaded(path));
                }
                Err(e) => outcomes.push(LayerOutcome::Skipped {
                    path,
                    reason: e.to_string(),
                }),
            }
        }

        if let Some(path) = explicit {
            if !path.exists() {
                return Err(ConfigError::FileNotFound {
                    path: path.to_path_buf(),
                });
            }
            merge(&mut merged, read_table(path)?);
            outcomes.push(LayerOutcome::Loaded(path.to_path_buf()));
        }

        let config: AppConfig = toml::Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok((config, outcomes))
    }

    /// Load configuration from a specific file, without layering
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: AppConfig = toml::from_str(&contents).map_err(|e| {
            ConfigError::ParseError(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Get the user config path (~/.config/routerpkg/config.toml)
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|config_dir| config_dir.join("routerpkg").join("config.toml"))
    }

    /// Get the project-local config path (./.routerpkg/config.toml)
    pub fn project_config_path() -> Option<PathBuf> {
        std::env::current_dir()
            .ok()
            .map(|cwd| cwd.join(".routerpkg").join("config.toml"))
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.relay.channel_capacity == 0 {
            return Err(ConfigError::Invalid("relay.channel_capacity must be at least 1".into()));
        }
        if self.ssh.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid("ssh.connect_timeout_secs must be at least 1".into()));
        }
        if self.ssh.default_port == 0 {
            return Err(ConfigError::Invalid("ssh.default_port must not be 0".into()));
        }
        if self.opkg.binary.trim().is_empty() {
            return Err(ConfigError::Invalid("opkg.binary must not be empty".into()));
        }
        Ok(())
    }

    pub fn ssh_connector_config(&self) -> SshConnectorConfig {
        SshConnectorConfig {
            connect_timeout: Duration::from_secs(self.ssh.connect_timeout_secs),
            keepalive_interval: self.ssh.keepalive_interval_secs.map(Duration::from_secs),
        }
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            channel_capacity: self.relay.channel_capacity,
        }
    }

    pub fn event_relay(&self) -> EventRelay {
        EventRelay::new().with_keepalive(Some(Duration::from_secs(self.relay.keepalive_secs)))
    }

    pub fn opkg_commands(&self) -> OpkgCommands {
        OpkgCommands::new(self.opkg.binary.clone())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|_| Self {
            ssh: SshConfig::default(),
            relay: RelayConfig::default(),
            opkg: OpkgConfig::default(),
            logging: LoggingConfig::default(),
        })
    }
}

fn parse_table(contents: &str, origin: &str) -> ConfigResult<toml::Table> {
    contents
        .parse::<toml::Table>()
        .map_err(|e| ConfigError::ParseError(format!("Failed to parse {}: {}", origin, e)))
}

fn read_table(path: &Path) -> ConfigResult<toml::Table> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
    parse_table(&contents, &path.display().to_string())
}

/// Deep merge: tables merge key by key, anything else is replaced
fn merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(base_table)), toml::Value::Table(overlay_table)) => {
                merge(base_table, overlay_table);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
