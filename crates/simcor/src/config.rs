// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SimCor node configuration.

use crate::message::Address;
use crate::transaction::FactoryConfig;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// SimCor node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimCorConfig {
    /// Address to bind to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// TCP port to listen on (default: 11997)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Remote endpoint for roles that connect out
    #[serde(default)]
    pub remote_address: Option<SocketAddr>,

    /// Local model name
    #[serde(default = "default_model")]
    pub model: String,

    /// Optional sub-component suffix of the local address
    #[serde(default)]
    pub suffix: Option<String>,

    /// Content of session open/close commands
    #[serde(default = "default_system_description")]
    pub system_description: String,

    /// Transaction timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Delay between state machine iterations in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Grace period between broadcasting session-close and dropping clients
    #[serde(default = "default_close_delay_ms")]
    pub close_delay_ms: u64,

    /// Outbound connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Maximum frame size (bytes)
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// JSON-lines transaction archive; absent disables archiving
    #[serde(default)]
    pub archive_path: Option<PathBuf>,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    11997
}

fn default_model() -> String {
    "MDL-00".to_string()
}

fn default_system_description() -> String {
    "SimCor node".to_string()
}

fn default_timeout_ms() -> u64 {
    3_000_000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_close_delay_ms() -> u64 {
    2000
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_max_message_size() -> usize {
    1024 * 1024 // 1 MB
}

impl Default for SimCorConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            remote_address: None,
            model: default_model(),
            suffix: None,
            system_description: default_system_description(),
            default_timeout_ms: default_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            close_delay_ms: default_close_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_message_size: default_max_message_size(),
            archive_path: None,
        }
    }
}

impl SimCorConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    pub fn bind_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// Local address stamped on outgoing messages.
    pub fn address(&self) -> Address {
        let address = Address::new(self.model.clone());
        match &self.suffix {
            Some(suffix) => address.with_suffix(suffix.clone()),
            None => address,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn close_delay(&self) -> Duration {
        Duration::from_millis(self.close_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Factory defaults derived from this configuration.
    pub fn factory_config(&self) -> FactoryConfig {
        FactoryConfig {
            address: self.address(),
            system_description: self.system_description.clone(),
            default_timeout: self.default_timeout(),
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidValue("model cannot be empty".into()));
        }
        if self.default_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue("default_timeout_ms cannot be 0".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue("poll_interval_ms cannot be 0".into()));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::InvalidValue("max_message_size cannot be 0".into()));
        }
        Ok(())
    }

    /// Validate for a role that accepts inbound connections.
    pub fn validate_listening(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("port cannot be 0".into()));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, Clone)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(s) => write!(f, "I/O error: {}", s),
            Self::ParseError(s) => write!(f, "Parse error: {}", s),
            Self::SerializeError(s) => write!(f, "Serialize error: {}", s),
            Self::InvalidValue(s) => write!(f, "Invalid value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}
