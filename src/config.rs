//! Sync Configuration
//!
//! Loaded once at startup from a TOML file and then passed by reference
//! into every component. Lookup order for the file:
//! - `--config` / `DB_CUSTOM_METRICS_CONFIG`
//! - `config.toml` in the working directory
//! - `~/.config/db-custom-metrics/config.toml`
//!
//! The events API key may also come from `EVENTS_API_KEY`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SyncError};
use crate::filters::FilterSpec;
use crate::publisher::DEFAULT_BATCH_SIZE;

/// Environment variable consulted when `events_api.key` is empty
pub const API_KEY_ENV: &str = "EVENTS_API_KEY";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub app: AppConfig,
    pub events_api: EventsApiConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// Sync behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Lookback for the existing-data query in backfill mode (minutes)
    pub timerange_historial_data_in_min: u32,
    /// Ordered filter dimensions
    pub filters: FilterSpec,
    /// Records per publish call
    pub batch_size: usize,
}

/// Events API connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsApiConfig {
    pub url: String,
    pub account_name: String,
    #[serde(default)]
    pub key: String,
    /// Events schema rows are published to and queried from
    pub schema: String,
    /// Request timeout; unset means wait indefinitely
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Source database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file
    pub path: PathBuf,
    /// Statement to run every cycle
    pub query: String,
    /// How long to wait on a locked database; unset fails immediately
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// When cycles fire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Seconds between cycles
    pub interval_secs: u64,
    /// Offset into each interval, e.g. 2 fires at second :02 of every minute
    pub at_second: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            timerange_historial_data_in_min: 1440,
            filters: FilterSpec::default(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            at_second: 2,
        }
    }
}

impl DatabaseConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl SyncConfig {
    /// File name looked up in the working and config directories
    pub const FILE_NAME: &'static str = "config.toml";

    /// Resolve which config file to read
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }

        let local = PathBuf::from(Self::FILE_NAME);
        if local.exists() {
            return local;
        }

        dirs::config_dir()
            .map(|d| d.join("db-custom-metrics").join(Self::FILE_NAME))
            .unwrap_or(local)
    }

    /// Read, apply environment overrides and validate
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;

        let mut config = Self::from_toml(&content)?;
        if config.events_api.key.is_empty() {
            if let Ok(key) = std::env::var(API_KEY_ENV) {
                config.events_api.key = key;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse without validation
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SyncError::Config(e.to_string()))
    }

    /// Check everything a cycle relies on
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("events_api.url", self.events_api.url.as_str()),
            ("events_api.account_name", self.events_api.account_name.as_str()),
            ("events_api.key", self.events_api.key.as_str()),
            ("events_api.schema", self.events_api.schema.as_str()),
            ("database.query", self.database.query.as_str()),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(SyncError::Config(format!("{} is required", key)));
            }
        }
        if self.database.path.as_os_str().is_empty() {
            return Err(SyncError::Config("database.path is required".to_string()));
        }

        let identifier = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex");
        let mut seen = HashSet::new();
        for filter in &self.app.filters {
            if !identifier.is_match(&filter.name) {
                return Err(SyncError::Config(format!(
                    "filter name '{}' must be a plain identifier",
                    filter.name
                )));
            }
            if !seen.insert(filter.name.as_str()) {
                return Err(SyncError::Config(format!("duplicate filter '{}'", filter.name)));
            }
            if filter.values.is_empty() {
                return Err(SyncError::Config(format!("filter '{}' has no values", filter.name)));
            }
        }

        if self.app.batch_size == 0 {
            return Err(SyncError::Config("app.batch_size must be positive".to_string()));
        }
        if self.schedule.interval_secs == 0 {
            return Err(SyncError::Config("schedule.interval_secs must be positive".to_string()));
        }
        if self.schedule.at_second >= self.schedule.interval_secs {
            return Err(SyncError::Config(
                "schedule.at_second must be smaller than schedule.interval_secs".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [events_api]
        url = "https://analytics.example.com"
        account_name = "acme"
        key = "secret"
        schema = "db_metrics"

        [database]
        path = "/var/lib/metrics.db"
        query = "SELECT ts, region, hits FROM samples WHERE region IN ({Region})"
    "#;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(config.app.timerange_historial_data_in_min, 1440);
        assert_eq!(config.app.batch_size, 5000);
        assert!(config.app.filters.is_empty());
        assert_eq!(config.schedule.interval_secs, 60);
        assert_eq!(config.schedule.at_second, 2);
        assert_eq!(config.events_api.timeout_secs, None);
        assert_eq!(config.database.timeout(), None);
        config.validate().unwrap();
    }

    #[test]
    fn test_filters_section() {
        let content = format!(
            r#"
            [app]
            timerange_historial_data_in_min = 60
            filters = [
                {{ Name = "Region", Values = ["eu", "us"] }},
                {{ Name = "Service", Values = ["api"] }},
            ]
            {}"#,
            MINIMAL
        );
        let config = SyncConfig::from_toml(&content).unwrap();

        assert_eq!(config.app.timerange_historial_data_in_min, 60);
        assert_eq!(config.app.filters.names(), vec!["Region", "Service"]);
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_section_is_config_error() {
        let err = SyncConfig::from_toml("[app]\nbatch_size = 10\n").unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_validation_failures() {
        let base = SyncConfig::from_toml(MINIMAL).unwrap();

        let mut config = base.clone();
        config.events_api.key.clear();
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.app.filters = serde_json::from_str(r#"[{"Name": "Region", "Values": []}]"#).unwrap();
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.app.filters = serde_json::from_str(r#"[{"Name": "Region) OR (1", "Values": ["x"]}]"#).unwrap();
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.app.filters = serde_json::from_str(
            r#"[{"Name": "Region", "Values": ["a"]}, {"Name": "Region", "Values": ["b"]}]"#,
        )
        .unwrap();
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.schedule.at_second = 60;
        assert!(config.validate().is_err());

        let mut config = base;
        config.app.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = SyncConfig::load(&path).unwrap();
        assert_eq!(config.events_api.schema, "db_metrics");
        assert!(SyncConfig::load(&dir.path().join("absent.toml")).is_err());
    }
}
