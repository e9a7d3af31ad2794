//! Configuration system for Tidal.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $TIDAL_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/tidal/config.toml
//!   3. ~/.config/tidal/config.toml

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pacing::DEFAULT_SLACK;
use crate::supervisor::{Supervisor, OVERALL_DEADLINE};
use crate::wire::{DEFAULT_PORT, DEFAULT_TRANSFER_UNIT, MAX_CHUNK_PAYLOAD};

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TidalConfig {
    pub network: NetworkConfig,
    pub stream: StreamConfig,
    pub library: LibraryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the server binds.
    pub bind: IpAddr,
    /// UDP port shared by requests and streaming.
    pub port: u16,
    /// Concurrent sessions the server accepts. Further requests are refused.
    pub max_sessions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Maximum audio bytes per chunk.
    pub transfer_unit: usize,
    /// Factor applied to the ideal packet interval.
    pub slack: f64,
    /// How long either side tolerates a silent peer, in milliseconds.
    pub deadline_ms: u64,
    /// Datagrams buffered per session between listener and session task.
    pub inbox_depth: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Directory requested filenames are resolved against.
    pub root: PathBuf,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for TidalConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            stream: StreamConfig::default(),
            library: LibraryConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            max_sessions: 16,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            transfer_unit: DEFAULT_TRANSFER_UNIT,
            slack: DEFAULT_SLACK,
            deadline_ms: OVERALL_DEADLINE.as_millis() as u64,
            inbox_depth: 64,
        }
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("tidal")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl TidalConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit file (defaults when it does not exist), then
    /// apply environment overrides and validate.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            TidalConfig::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("TIDAL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        Self::write_default_to(&path)?;
        Ok(path)
    }

    fn write_default_to(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text =
            toml::to_string_pretty(&TidalConfig::default()).map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))
    }

    /// Apply TIDAL_* overrides. Unparseable values are ignored.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("TIDAL_NETWORK__BIND") {
            if let Ok(ip) = v.parse() {
                self.network.bind = ip;
            }
        }
        if let Some(v) = var("TIDAL_NETWORK__PORT") {
            if let Ok(p) = v.parse() {
                self.network.port = p;
            }
        }
        if let Some(v) = var("TIDAL_STREAM__DEADLINE_MS") {
            if let Ok(ms) = v.parse() {
                self.stream.deadline_ms = ms;
            }
        }
        if let Some(v) = var("TIDAL_LIBRARY__ROOT") {
            self.library.root = PathBuf::from(v);
        }
    }

    /// Reject values the protocol cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.stream;
        if s.transfer_unit == 0 || s.transfer_unit > MAX_CHUNK_PAYLOAD {
            return Err(ConfigError::Invalid {
                key: "stream.transfer_unit",
                reason: format!("{} not in 1..={MAX_CHUNK_PAYLOAD}", s.transfer_unit),
            });
        }
        if !(s.slack > 0.0 && s.slack <= 1.0) {
            return Err(ConfigError::Invalid {
                key: "stream.slack",
                reason: format!("{} not in (0, 1]", s.slack),
            });
        }
        if s.deadline_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "stream.deadline_ms",
                reason: "must be positive".into(),
            });
        }
        if s.inbox_depth == 0 {
            return Err(ConfigError::Invalid {
                key: "stream.inbox_depth",
                reason: "must be positive".into(),
            });
        }
        if self.network.max_sessions == 0 {
            return Err(ConfigError::Invalid {
                key: "network.max_sessions",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.network.bind, self.network.port)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.stream.deadline_ms)
    }

    pub fn supervisor(&self) -> Supervisor {
        Supervisor::new(self.deadline())
    }
}
