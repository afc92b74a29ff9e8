//! Core error types for portkeep

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for portkeep
#[derive(Error, Debug)]
pub enum PkError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Tunnel error
    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors. All of these are fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Config file exists but could not be read
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML parse error, including forwarding rules of the wrong shape
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Errors returned by a tunnel's `start`. These are never fatal; the
/// supervisor logs them and tries again.
#[derive(Error, Debug)]
pub enum TunnelError {
    /// Private key file could not be loaded
    #[error("Private key not found at {path}: {message}")]
    KeyNotFound { path: PathBuf, message: String },

    /// SSH agent unavailable or offered no usable identity
    #[error("SSH agent error: {0}")]
    Agent(String),

    /// Connecting to the SSH server failed or timed out
    #[error("Failed to connect to {address}: {message}")]
    Connect { address: String, message: String },

    /// Server rejected every authentication attempt
    #[error("Authentication rejected for user '{0}'")]
    AuthRejected(String),

    /// Local listener could not be bound
    #[error("Failed to bind local port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// The SSH session stopped accepting channels
    #[error("SSH session lost: {0}")]
    SessionLost(String),

    /// Other SSH protocol error
    #[error("SSH error: {0}")]
    Ssh(String),
}
