//! Configuration for vitals-sync.

use crate::core::{ReferenceRanges, DEFAULT_CAPACITY};
use crate::session::SessionOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Table holding the metric rows in the remote store.
pub const DEFAULT_TABLE: &str = "health_metrics";

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum number of records kept in the sync window
    pub window_capacity: usize,

    /// Page size for the initial fetch
    pub fetch_limit: usize,

    /// How often the HTTP adapter polls for changes
    #[serde(with = "duration_serde")]
    pub poll_interval: Duration,

    /// IANA timezone used when rendering timestamps
    pub display_timezone: String,

    /// Healthy ranges used to flag readings
    pub ranges: ReferenceRanges,

    /// Path for storing sync statistics
    pub data_path: PathBuf,

    /// User to sync when none is given on the command line
    pub default_user: Option<String>,

    /// Base URL of the remote store
    pub store_url: Option<String>,

    /// API key for the remote store
    pub store_key: Option<String>,

    /// Table holding the metric rows
    pub table: String,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vitals-sync");

        Self {
            window_capacity: DEFAULT_CAPACITY,
            fetch_limit: DEFAULT_CAPACITY,
            poll_interval: Duration::from_secs(5),
            display_timezone: "UTC".to_string(),
            ranges: ReferenceRanges::default(),
            data_path: data_dir,
            default_user: None,
            store_url: None,
            store_key: None,
            table: DEFAULT_TABLE.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vitals-sync")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Check values that would make a session unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_capacity == 0 {
            return Err(ConfigError::Invalid(
                "window_capacity must be at least 1".to_string(),
            ));
        }
        if self.fetch_limit == 0 {
            return Err(ConfigError::Invalid(
                "fetch_limit must be at least 1".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "poll_interval must be at least 1 second".to_string(),
            ));
        }
        self.timezone()?;

        let ranges = [
            ("heart_rate", self.ranges.heart_rate),
            ("blood_oxygen", self.ranges.blood_oxygen),
            ("temperature", self.ranges.temperature),
            ("activity_level", self.ranges.activity_level),
        ];
        for (name, range) in ranges {
            if !(range.min <= range.max) {
                return Err(ConfigError::Invalid(format!(
                    "range for {name} is empty ({range})"
                )));
            }
        }
        Ok(())
    }

    /// Parse the display timezone.
    pub fn timezone(&self) -> Result<chrono_tz::Tz, ConfigError> {
        self.display_timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| {
                ConfigError::Invalid(format!("unknown timezone '{}'", self.display_timezone))
            })
    }

    /// Session sizing derived from this configuration.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            capacity: self.window_capacity,
            fetch_limit: self.fetch_limit,
        }
    }

    /// Where sync statistics are persisted.
    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("sync_stats.json")
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Range;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.window_capacity, 100);
        assert_eq!(config.fetch_limit, 100);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.table, "health_metrics");
        assert!(config.validate().is_ok());
        assert!(config.stats_path().ends_with("sync_stats.json"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"window_capacity": 50, "poll_interval": 30}"#).unwrap();
        assert_eq!(config.window_capacity, 50);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.fetch_limit, 100);
        assert_eq!(config.session_options().capacity, 50);
    }

    #[test]
    fn test_validation() {
        let config = Config {
            window_capacity: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = Config {
            display_timezone: "Mars/Olympus".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.ranges.temperature = Range::new(38.0, 36.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timezone_parsing() {
        let config = Config {
            display_timezone: "Europe/Berlin".to_string(),
            ..Config::default()
        };
        assert_eq!(config.timezone().unwrap(), chrono_tz::Europe::Berlin);
    }
}
