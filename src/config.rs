use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;

/// Process configuration, read from `PARKWISE_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// WAL appends before the compactor rewrites the log.
    pub compact_threshold: u64,
    pub compact_interval: Duration,
    /// Zone used for dates, weekdays and "HH:MM" comparisons.
    pub timezone: Tz,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(30),
            timezone: Tz::UTC,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "config error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable numbers fall back to defaults;
    /// an unknown timezone is an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let data_dir = lookup("PARKWISE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let metrics_port = lookup("PARKWISE_METRICS_PORT").and_then(|s| s.parse().ok());
        let compact_threshold = lookup("PARKWISE_COMPACT_THRESHOLD")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.compact_threshold);
        let compact_interval = lookup("PARKWISE_COMPACT_INTERVAL_SECS")
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.compact_interval);
        let timezone = match lookup("PARKWISE_TIMEZONE") {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|e| ConfigError(format!("PARKWISE_TIMEZONE={name}: {e}")))?,
            None => defaults.timezone,
        };

        Ok(Self {
            data_dir,
            metrics_port,
            compact_threshold,
            compact_interval,
            timezone,
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("parkwise.wal")
    }
}
