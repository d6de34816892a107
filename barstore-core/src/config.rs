//! Serializable store and provider configuration.
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! root = "data/history/daily"
//! timeframe = "1Day"
//! lookback_days = 1825
//! stale_threshold_days = 3
//!
//! [provider]
//! feed = "iex"
//! max_retries = 3
//! ```

use crate::domain::Timeframe;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Longest accepted lookback or staleness threshold (100 years).
pub const MAX_DAYS: i64 = 365 * 100;

/// Retries per request; backoff doubles on each, so this also caps the wait.
pub const MAX_RETRIES: u32 = 10;

/// Location, granularity, and refresh policy of one store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory holding one subdirectory per symbol.
    pub root: PathBuf,

    /// Granularity of every series in the store.
    pub timeframe: Timeframe,

    /// History fetched when a symbol is first added.
    pub lookback_days: i64,

    /// Age past which a symbol is reported as out of date.
    pub stale_threshold_days: i64,

    pub provider: ProviderConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            timeframe: Timeframe::DAY,
            lookback_days: 365 * 5,
            stale_threshold_days: 3,
            provider: ProviderConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Load a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_DAYS).contains(&self.lookback_days) {
            return Err(ConfigError::Invalid(format!(
                "lookback_days must be between 1 and {MAX_DAYS}, got {}",
                self.lookback_days
            )));
        }
        if !(0..=MAX_DAYS).contains(&self.stale_threshold_days) {
            return Err(ConfigError::Invalid(format!(
                "stale_threshold_days must be between 0 and {MAX_DAYS}, got {}",
                self.stale_threshold_days
            )));
        }
        if self.provider.max_retries > MAX_RETRIES {
            return Err(ConfigError::Invalid(format!(
                "provider.max_retries must be at most {MAX_RETRIES}, got {}",
                self.provider.max_retries
            )));
        }
        Ok(())
    }

    /// Saturates for values `validate` would reject.
    pub fn lookback(&self) -> Duration {
        Duration::try_days(self.lookback_days).unwrap_or(Duration::MAX)
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::try_days(self.stale_threshold_days).unwrap_or(Duration::MAX)
    }
}

/// Settings for the Alpaca market data client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,

    /// Alpaca data feed: `iex` (free tier) or `sip`.
    pub feed: String,

    pub max_retries: u32,
    pub timeout_secs: u64,
    pub breaker_cooldown_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://data.alpaca.markets".into(),
            feed: "iex".into(),
            max_retries: 3,
            timeout_secs: 30,
            breaker_cooldown_secs: 30 * 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = StoreConfig::from_toml("").unwrap();
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.lookback(), Duration::days(1825));
        assert_eq!(config.stale_threshold(), Duration::days(3));
    }

    #[test]
    fn parses_timeframe_and_provider_table() {
        let config = StoreConfig::from_toml(
            r#"
            root = "data/history/minute"
            timeframe = "1Min"

            [provider]
            feed = "sip"
            "#,
        )
        .unwrap();
        assert_eq!(config.timeframe, Timeframe::MINUTE);
        assert_eq!(config.root, PathBuf::from("data/history/minute"));
        assert_eq!(config.provider.feed, "sip");
        assert_eq!(config.provider.max_retries, 3);
    }

    #[test]
    fn rejects_bad_timeframe() {
        assert!(matches!(
            StoreConfig::from_toml(r#"timeframe = "3Day""#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn rejects_non_positive_lookback() {
        assert!(matches!(
            StoreConfig::from_toml("lookback_days = 0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_values() {
        for toml in [
            "lookback_days = 200000000",
            "stale_threshold_days = -1",
            "stale_threshold_days = 9223372036854775807",
            "[provider]\nmax_retries = 33",
        ] {
            assert!(
                matches!(StoreConfig::from_toml(toml), Err(ConfigError::Invalid(_))),
                "accepted {toml:?}"
            );
        }
        assert!(StoreConfig::from_toml("lookback_days = 36500").is_ok());
    }

    #[test]
    fn durations_saturate_instead_of_panicking() {
        let config = StoreConfig {
            lookback_days: i64::MAX,
            stale_threshold_days: i64::MAX,
            ..StoreConfig::default()
        };
        assert_eq!(config.lookback(), Duration::MAX);
        assert_eq!(config.stale_threshold(), Duration::MAX);
    }

    #[test]
    fn from_file_reports_missing_path() {
        let err = StoreConfig::from_file(Path::new("/nonexistent/barstore.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
