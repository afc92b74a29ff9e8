//! Forwarding daemon configuration

use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::error::ConfigError;
use crate::types::{AuthMethod, ForwardRule};

/// Default SSH server port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default pause between a tunnel ending and the next start attempt
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Default timeout for establishing the SSH connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Top-level configuration: one SSH host and the rules tunneled through it
#[derive(Debug, Clone, Deserialize)]
pub struct ForwardConfig {
    /// SSH server host name or address
    pub host: String,

    /// Path to the private key; empty selects SSH agent auth
    #[serde(default)]
    pub key: String,

    /// Remote user name
    pub user: String,

    /// Forwarding rules
    #[serde(default)]
    pub ports: Vec<ForwardRule>,

    /// SSH server port
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Delay between a tunnel ending and the next attempt
    #[serde(default = "default_retry_interval", with = "duration_secs")]
    pub retry_interval: Duration,

    /// SSH connect timeout
    #[serde(default = "default_connect_timeout", with = "duration_secs")]
    pub connect_timeout: Duration,
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_retry_interval() -> Duration {
    DEFAULT_RETRY_INTERVAL
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

impl ForwardConfig {
    /// Authentication mode implied by `key`
    pub fn auth_method(&self) -> AuthMethod {
        AuthMethod::from_key(&self.key)
    }

    /// `host:port` of the SSH server
    pub fn ssh_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reject values that decode but cannot describe a usable connection
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".to_string()));
        }
        if self.user.trim().is_empty() {
            return Err(ConfigError::Invalid("user must not be empty".to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for ForwardConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rules = self
            .ports
            .iter()
            .map(|rule| rule.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(
            f,
            "{}@{} via {}, retry every {:?}, rules [{}]",
            self.user,
            self.ssh_address(),
            self.auth_method(),
            self.retry_interval,
            rules
        )
    }
}
