//! Configuration for the ledger

use crate::fees::FeeSchedule;
use crate::types::Currency;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Fee schedule
    pub fees: FeeSchedule,

    /// Rate provider configuration
    pub rates: RateConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/ledger"),
            service_name: "wokopay-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            fees: FeeSchedule::default(),
            rates: RateConfig::default(),
        }
    }
}

/// Rate provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateConfig {
    /// Cache time-to-live (seconds)
    pub cache_ttl_secs: u64,

    /// Per-source lookup timeout (milliseconds)
    pub lookup_timeout_ms: u64,

    /// Static fallback rates used when every source fails
    pub fallback_rates: Vec<FallbackRate>,
}

/// One static fallback rate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackRate {
    /// Source currency
    pub from: Currency,

    /// Target currency
    pub to: Currency,

    /// Rate (1 `from` = `rate` `to`)
    pub rate: Decimal,
}

impl Default for RateConfig {
    fn default() -> Self {
        // Last-known-good corridor rates; degraded accuracy beats blocking
        // a payment when every external source is down.
        let fallback_rates = vec![
            FallbackRate {
                from: Currency::MWK,
                to: Currency::ZMW,
                rate: Decimal::new(32, 4), // 0.0032
            },
            FallbackRate {
                from: Currency::MWK,
                to: Currency::ZAR,
                rate: Decimal::new(85, 4), // 0.0085
            },
            FallbackRate {
                from: Currency::MWK,
                to: Currency::USD,
                rate: Decimal::new(59, 5), // 0.00059
            },
            FallbackRate {
                from: Currency::ZMW,
                to: Currency::MWK,
                rate: Decimal::new(3125, 1), // 312.5
            },
            FallbackRate {
                from: Currency::ZAR,
                to: Currency::MWK,
                rate: Decimal::new(11765, 2), // 117.65
            },
            FallbackRate {
                from: Currency::USD,
                to: Currency::MWK,
                rate: Decimal::new(169492, 2), // 1694.92
            },
        ];

        Self {
            cache_ttl_secs: 300,
            lookup_timeout_ms: 8000,
            fallback_rates,
        }
    }
}

impl RateConfig {
    /// Fallback rates keyed by ordered pair
    pub fn fallback_table(&self) -> HashMap<(Currency, Currency), Decimal> {
        self.fallback_rates
            .iter()
            .map(|f| ((f.from, f.to), f.rate))
            .collect()
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Configuration(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("WOKOPAY_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(ttl) = std::env::var("WOKOPAY_RATE_TTL_SECS") {
            config.rates.cache_ttl_secs = ttl.parse().map_err(|_| {
                crate::Error::Configuration(format!("Invalid WOKOPAY_RATE_TTL_SECS: {}", ttl))
            })?;
        }

        if let Ok(timeout) = std::env::var("WOKOPAY_RATE_TIMEOUT_MS") {
            config.rates.lookup_timeout_ms = timeout.parse().map_err(|_| {
                crate::Error::Configuration(format!("Invalid WOKOPAY_RATE_TIMEOUT_MS: {}", timeout))
            })?;
        }

        Ok(config)
    }
}
