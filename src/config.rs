//! Service configuration, loaded from environment variables with defaults.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Default payment window of a new order.
pub const DEFAULT_PAYMENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default cadence of the timeout sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: invalid value '{value}'")]
    Invalid { key: &'static str, value: String },

    #[error("sweep interval ({sweep:?}) must be shorter than the payment timeout ({timeout:?})")]
    SweepTooSlow { sweep: Duration, timeout: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Address the TCP transport listens on
    pub bind_addr: String,
    /// How long an order may wait for payment
    pub payment_timeout: Duration,
    /// How often overdue orders are expired
    pub sweep_interval: Duration,
    /// Optional csv file of trains loaded at startup
    pub seed_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8888".to_string(),
            payment_timeout: DEFAULT_PAYMENT_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            seed_path: None,
        }
    }
}

impl Config {
    /// Read `RAIL_BIND_ADDR`, `RAIL_PAYMENT_TIMEOUT_SECS`,
    /// `RAIL_SWEEP_INTERVAL_SECS` and `RAIL_SEED_FILE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup; missing keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let config = Config {
            bind_addr: lookup("RAIL_BIND_ADDR").unwrap_or(defaults.bind_addr),
            payment_timeout: seconds(&lookup, "RAIL_PAYMENT_TIMEOUT_SECS")?
                .unwrap_or(defaults.payment_timeout),
            sweep_interval: seconds(&lookup, "RAIL_SWEEP_INTERVAL_SECS")?
                .unwrap_or(defaults.sweep_interval),
            seed_path: lookup("RAIL_SEED_FILE")
                .filter(|path| !path.trim().is_empty())
                .map(PathBuf::from),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval >= self.payment_timeout {
            return Err(ConfigError::SweepTooSlow {
                sweep: self.sweep_interval,
                timeout: self.payment_timeout,
            });
        }
        Ok(())
    }
}

fn seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Some(Duration::from_secs(secs))),
        _ => Err(ConfigError::Invalid { key, value }),
    }
}
