//! Declarative ring settings loaded from a TOML file.
//!
//! Participants that want their ring parameters outside the binary can
//! share one settings file; both sides then construct the ring from the
//! same values, which is the easiest way to avoid configuration
//! mismatches at open time.

use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize, Debug, Clone)]
pub struct RingConfig {
    /// Backing file of the ring. Put it on tmpfs for lowest latency.
    pub path: String,
    #[serde(default = "defaults::capacity")]
    pub capacity: usize,
    pub max_message_size: usize,
    #[serde(default = "defaults::consumers")]
    pub consumers: usize,
    #[serde(default = "defaults::fall_behind_tolerance")]
    pub fall_behind_tolerance: f64,
    #[serde(default)]
    pub checksum: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse ring settings")]
    Parse(#[from] toml::de::Error),
}

mod defaults {
    pub fn capacity() -> usize {
        crate::layout::DEFAULT_CAPACITY
    }

    pub fn consumers() -> usize {
        1
    }

    pub fn fall_behind_tolerance() -> f64 {
        1.0
    }
}

impl RingConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let config: RingConfig = toml::from_str(&text)?;
        Ok(config)
    }
}
