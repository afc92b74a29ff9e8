//! Configuration loading for portkeep

mod forward;
mod rule;
pub mod serde_utils;

pub use forward::{
    ForwardConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_RETRY_INTERVAL, DEFAULT_SSH_PORT,
};

use crate::error::ConfigError;
use std::path::Path;

/// Config path used when none is given on the command line
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Load and validate the configuration from a TOML file
pub fn load_config(path: &Path) -> Result<ForwardConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    parse_config(&content)
}

/// Parse and validate a configuration from TOML text
pub fn parse_config(content: &str) -> Result<ForwardConfig, ConfigError> {
    let config: ForwardConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}
