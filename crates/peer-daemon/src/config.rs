//! Peer configuration loading.
//!
//! The file is YAML with everything under a top-level `peer` key:
//!
//! ```yaml
//! peer:
//!   address: 0.0.0.0:30303
//!   tls:
//!     enabled: true
//!     server-host-override: peer0.example
//!     cert:
//!       file: /etc/peer/ca.pem
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default connect deadline.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 3;

/// Default deadline for the handshake reply during a relay.
pub const DEFAULT_REPLY_TIMEOUT_SECS: u64 = 10;

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub peer: PeerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PeerConfig {
    /// Address the server listens on, and the default relay target
    #[serde(default = "default_address")]
    pub address: String,

    /// Connect deadline in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Handshake reply deadline in seconds
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout_secs: u64,

    #[serde(default)]
    pub tls: TlsConfig,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            connect_timeout_secs: default_connect_timeout(),
            reply_timeout_secs: default_reply_timeout(),
            tls: TlsConfig::default(),
        }
    }
}

impl PeerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TlsConfig {
    /// Whether transport encryption is used
    #[serde(default)]
    pub enabled: bool,

    /// Hostname checked against the server certificate instead of the dialed host
    #[serde(default)]
    pub server_host_override: Option<String>,

    /// Trust material (PEM certificates). Absent means any certificate is accepted.
    #[serde(default)]
    pub cert: FileRef,

    /// Private key for the server role (PEM)
    #[serde(default)]
    pub key: FileRef,
}

impl TlsConfig {
    /// The server name override, ignoring empty strings.
    pub fn server_name_override(&self) -> Option<&str> {
        self.server_host_override
            .as_deref()
            .filter(|name| !name.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileRef {
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl FileRef {
    /// The configured path, treating an empty string as unset.
    pub fn path(&self) -> Option<&Path> {
        self.file
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
    }
}

fn default_address() -> String {
    "0.0.0.0:30303".to_string()
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_reply_timeout() -> u64 {
    DEFAULT_REPLY_TIMEOUT_SECS
}

impl Config {
    /// Load configuration from a YAML file, falling back to defaults if it doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Config::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }
}
