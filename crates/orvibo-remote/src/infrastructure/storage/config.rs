//! TOML-based configuration for the remote client.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\OrviboRemote\config.toml`
//! - Linux:    `~/.config/orvibo-remote/config.toml`
//! - macOS:    `~/Library/Application Support/OrviboRemote/config.toml`
//!
//! Example:
//!
//! ```toml
//! [network]
//! bind_address = "0.0.0.0"
//! local_port = 10000
//!
//! [protocol]
//! response_timeout_secs = 3
//! retries = 3
//!
//! [[devices]]
//! name = "living-room"
//! host = "192.168.25.41"
//! mac = "ac:cf:23:72:5a:50"
//! ```
//!
//! Every field falls back to a default when absent, so an empty file (or no
//! file at all) is a valid configuration.  The client never writes runtime
//! state back; [`save_config`] exists only to create a starter file.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use orvibo_core::protocol::DEFAULT_PORT;
use orvibo_core::HardwareId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::network::connection_manager::TransportConfig;
use crate::infrastructure::network::discovery::DiscoveryOptions;
use crate::infrastructure::network::endpoint::DEFAULT_QUEUE_CAPACITY;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The config parsed but a value is unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

/// Socket settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// Local interface to bind.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    /// Local UDP port.  Devices reply to 10000, so change with care.
    #[serde(default = "default_port")]
    pub local_port: u16,
    /// Port devices listen on.
    #[serde(default = "default_port")]
    pub device_port: u16,
    /// Target of discovery probes.
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: IpAddr,
    /// Bound of each per-peer inbound queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Exchange timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProtocolConfig {
    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_discovery_timeout_secs")]
    pub discovery_timeout_secs: u64,
    /// How long `learn` waits for a key press.  Capped by the 40 s device window.
    #[serde(default = "default_learn_timeout_secs")]
    pub learn_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// A named AllOne with a fixed address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceEntry {
    pub name: String,
    pub host: IpAddr,
    pub mac: HardwareId,
    /// Overrides `network.device_port` for this device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_broadcast_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::BROADCAST)
}
fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}
fn default_response_timeout_secs() -> u64 {
    3
}
fn default_retries() -> u32 {
    3
}
fn default_discovery_timeout_secs() -> u64 {
    5
}
fn default_learn_timeout_secs() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            local_port: default_port(),
            device_port: default_port(),
            broadcast_address: default_broadcast_address(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            response_timeout_secs: default_response_timeout_secs(),
            retries: default_retries(),
            discovery_timeout_secs: default_discovery_timeout_secs(),
            learn_timeout_secs: default_learn_timeout_secs(),
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

// ── Derived runtime settings ──────────────────────────────────────────────────

impl AppConfig {
    /// Checks values serde cannot reject on its own.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero queue capacity, a zero
    /// response timeout, or duplicate device names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "network.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.protocol.response_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "protocol.response_timeout_secs must be at least 1".to_string(),
            ));
        }
        for (i, device) in self.devices.iter().enumerate() {
            if self.devices[..i].iter().any(|d| d.name == device.name) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate device name {:?}",
                    device.name
                )));
            }
        }
        Ok(())
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            bind_address: SocketAddr::new(self.network.bind_address, self.network.local_port),
            allow_broadcast: true,
            queue_capacity: self.network.queue_capacity,
        }
    }

    pub fn discovery_options(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            target: self.network.broadcast_address,
            port: self.network.device_port,
            timeout: Duration::from_secs(self.protocol.discovery_timeout_secs),
            retries: self.protocol.retries,
            broadcast: true,
        }
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.protocol.response_timeout_secs)
    }

    pub fn learn_timeout(&self) -> Duration {
        Duration::from_secs(self.protocol.learn_timeout_secs)
    }

    /// Looks up a configured device by name.
    pub fn device(&self, name: &str) -> Option<&DeviceEntry> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// The device's address, using the configured device port by default.
    pub fn device_address(&self, device: &DeviceEntry) -> SocketAddr {
        SocketAddr::new(device.host, device.port.unwrap_or(self.network.device_port))
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from the platform path, returning defaults if the file
/// does not yet exist.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads and validates `AppConfig` from `path`, returning defaults if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] if the TOML is malformed and
/// [`ConfigError::Invalid`] if validation fails.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let cfg: AppConfig = toml::from_str(&content)?;
            cfg.validate()?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to the platform path and returns that path.
///
/// # Errors
///
/// See [`save_config_to`].
pub fn save_config(config: &AppConfig) -> Result<PathBuf, ConfigError> {
    let path = config_file_path()?;
    save_config_to(config, &path)?;
    Ok(path)
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config directory including the app subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("OrviboRemote"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("orvibo-remote"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("OrviboRemote")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
