//! Configuration for the settlement engine

use ledger_core::types::CountryCode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settlement engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Ledger data directory
    pub ledger_data_dir: PathBuf,

    /// Corridors the periodic summary pass covers
    pub corridors: Vec<Corridor>,

    /// Summary pass interval (seconds)
    pub summary_interval_secs: u64,
}

/// One monitored corridor
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Corridor {
    /// First country of the pair
    pub from: CountryCode,

    /// Second country of the pair
    pub to: CountryCode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "wokopay-settlement".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            ledger_data_dir: PathBuf::from("./data/ledger"),
            corridors: vec![Corridor {
                from: CountryCode::MW,
                to: CountryCode::ZM,
            }],
            summary_interval_secs: 21600, // 6 hours
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(dir) = std::env::var("SETTLEMENT_LEDGER_DIR") {
            config.ledger_data_dir = PathBuf::from(dir);
        }

        if let Ok(interval) = std::env::var("SETTLEMENT_SUMMARY_INTERVAL_SECS") {
            config.summary_interval_secs = interval.parse().map_err(|_| {
                crate::Error::Config(format!(
                    "Invalid SETTLEMENT_SUMMARY_INTERVAL_SECS: {}",
                    interval
                ))
            })?;
        }

        Ok(config)
    }
}
