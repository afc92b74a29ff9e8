//! Shared serde helpers for configuration

/// Helper module for `Duration` fields written as whole seconds
///
/// # Example
///
/// ```ignore
/// #[derive(Deserialize)]
/// struct Config {
///     #[serde(with = "duration_secs")]
///     retry_interval: Duration,
/// }
/// ```
pub mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    /// Deserialize a Duration from seconds (u64)
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
