//! Client configuration.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::client::poll::PollStrategy;
use crate::fabric::EpCaps;

/// Configuration loading error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration file: {0}")]
    Io(#[from] io::Error),

    #[error("bad configuration file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("rdma_client configuration not found")]
    MissingTable,

    #[error("invalid {0}: {1}")]
    Invalid(&'static str, String),
}

/// Settings of one client run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Server address.
    pub server: String,

    /// Server port or service name.
    #[serde(deserialize_with = "de_port")]
    pub port: String,

    /// Size of the message to receive, in bytes.
    pub msg_size: usize,

    /// Inline threshold requested at endpoint creation.
    pub max_inline_data: u32,

    /// Also send the send buffer after connecting and wait for its completion.
    pub send: bool,

    /// Give up on a completion after this many milliseconds. Unset means
    /// busy-poll forever.
    pub poll_timeout_ms: Option<u64>,

    /// Exit non-zero when the received payload does not match the pattern.
    pub fail_on_mismatch: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            server: Self::DEFAULT_SERVER.to_string(),
            port: Self::DEFAULT_PORT.to_string(),
            msg_size: Self::DEFAULT_MSG_SIZE,
            max_inline_data: EpCaps::DEFAULT_INLINE_DATA,
            send: false,
            poll_timeout_ms: None,
            fail_on_mismatch: false,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    rdma_client: Option<ClientConfig>,
}

fn de_port<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Num(u16),
        Name(String),
    }

    Ok(match Port::deserialize(d)? {
        Port::Num(n) => n.to_string(),
        Port::Name(s) => s,
    })
}

impl ClientConfig {
    pub const DEFAULT_SERVER: &'static str = "127.0.0.1";
    pub const DEFAULT_PORT: &'static str = "7471";
    pub const DEFAULT_MSG_SIZE: usize = 1 << 30;

    /// Largest message a single RDMA send/recv can carry.
    pub const MAX_MSG_SIZE: usize = 1 << 31;

    /// Load the `[rdma_client]` table of a TOML file.
    pub fn load_toml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let toml_str = fs::read_to_string(path)?;
        Self::from_toml_str(&toml_str)
    }

    /// Parse the `[rdma_client]` table of a TOML document.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(toml_str)?;
        let cfg = file.rdma_client.ok_or(ConfigError::MissingTable)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.is_empty() {
            return Err(ConfigError::Invalid("server", "empty address".to_string()));
        }
        if self.msg_size == 0 || self.msg_size > Self::MAX_MSG_SIZE {
            return Err(ConfigError::Invalid(
                "msg_size",
                format!("{} not in 1..={}", self.msg_size, Self::MAX_MSG_SIZE),
            ));
        }
        Ok(())
    }

    /// Replace the server and/or port.
    pub fn override_with(&mut self, server: Option<String>, port: Option<String>) {
        if let Some(server) = server {
            self.server = server;
        }
        if let Some(port) = port {
            self.port = port;
        }
    }

    /// How completions are waited for.
    pub fn poll_strategy(&self) -> PollStrategy {
        match self.poll_timeout_ms {
            Some(ms) => PollStrategy::Deadline(Duration::from_millis(ms)),
            None => PollStrategy::Spin,
        }
    }
}
