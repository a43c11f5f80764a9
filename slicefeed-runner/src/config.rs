//! Serializable run configuration, loaded from TOML.
//!
//! ```toml
//! data_folder = "data"
//! start = "2020-01-01"
//! end = "2020-12-31"
//!
//! [reader]
//! min_price_scale_factor = 1e-5
//!
//! [logging]
//! level = "info"
//! format = "compact"
//!
//! [[subscriptions]]
//! ticker = "SPY"
//! resolution = "daily"
//! normalization = "adjusted"
//! ```

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use slicefeed_core::data::{CacheSettings, CustomDataSpec, DownloadSettings, ReaderSettings};
use slicefeed_core::domain::{DataType, NormalizationMode, Resolution, SecurityType, SubscriptionRequest, Symbol};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::logging::LogConfig;

/// Unique identifier for a run configuration (content-addressable hash).
pub type RunId = String;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },

    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("start {start} is after end {end}")]
    InvertedRange { start: NaiveDate, end: NaiveDate },

    #[error("no subscriptions configured")]
    NoSubscriptions,

    #[error("subscription {index}: {reason}")]
    BadSubscription { index: usize, reason: String },

    #[error("custom data '{name}': {reason}")]
    BadCustomData { name: String, reason: String },

    #[error("invalid setting {field}: {reason}")]
    InvalidSetting { field: &'static str, reason: String },
}

/// Everything needed to reproduce a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    /// Root of the LEAN-style data folder.
    pub data_folder: PathBuf,

    /// First date (inclusive)
    pub start: NaiveDate,

    /// Last date (inclusive)
    pub end: NaiveDate,

    /// Run live readers instead of historical ones.
    #[serde(default)]
    pub live: bool,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub reader: ReaderSettings,

    #[serde(default)]
    pub logging: LogConfig,

    /// Remote downloads are enabled when this table is present.
    #[serde(default)]
    pub download: Option<DownloadSettings>,

    pub subscriptions: Vec<SubscriptionEntry>,

    #[serde(default)]
    pub custom_data: Vec<CustomDataSpec>,

    /// Market holidays applied to default equity hours.
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,
}

fn default_market() -> String {
    "usa".to_string()
}

fn default_data_type() -> String {
    "trade".to_string()
}

fn default_true() -> bool {
    true
}

/// One `[[subscriptions]]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionEntry {
    pub ticker: String,

    #[serde(default = "default_security_type")]
    pub security_type: SecurityType,

    #[serde(default = "default_market")]
    pub market: String,

    pub resolution: Resolution,

    /// `trade`, `quote`, `tick`, or the name of a `[[custom_data]]` type.
    #[serde(default = "default_data_type")]
    pub data_type: String,

    /// Defaults to adjusted for equities and raw for everything else.
    #[serde(default)]
    pub normalization: Option<NormalizationMode>,

    #[serde(default)]
    pub extended_hours: bool,

    #[serde(default = "default_true")]
    pub fill_forward: bool,
}

fn default_security_type() -> SecurityType {
    SecurityType::Equity
}

impl SubscriptionEntry {
    pub fn data_type(&self) -> DataType {
        match self.data_type.to_ascii_lowercase().as_str() {
            "trade" => DataType::Trade,
            "quote" => DataType::Quote,
            "tick" => DataType::Tick,
            _ => DataType::Custom(self.data_type.clone()),
        }
    }

    pub fn symbol(&self) -> Symbol {
        Symbol::new(self.ticker.clone(), self.security_type, self.market.clone())
    }

    pub fn to_request(&self, start: NaiveDateTime, end: NaiveDateTime) -> SubscriptionRequest {
        let mut request = SubscriptionRequest::new(self.symbol(), self.data_type(), self.resolution, start, end)
            .with_extended_hours(self.extended_hours)
            .with_fill_forward(self.fill_forward);
        if let Some(mode) = self.normalization {
            request = request.with_normalization(mode);
        }
        request
    }
}

impl RunConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml(&content)
    }

    /// Structural checks. Combinations only a reader can judge (say, adjusted
    /// forex) are left to the subscription manager, which reports them and
    /// carries on with the other subscriptions.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start > self.end {
            return Err(ConfigError::InvertedRange { start: self.start, end: self.end });
        }
        if self.subscriptions.is_empty() {
            return Err(ConfigError::NoSubscriptions);
        }
        if !(self.reader.min_price_scale_factor > 0.0) {
            return Err(ConfigError::InvalidSetting {
                field: "reader.min_price_scale_factor",
                reason: "must be positive".into(),
            });
        }
        if self.reader.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "reader.poll_interval_ms",
                reason: "must be at least 1".into(),
            });
        }

        let mut names = HashSet::new();
        for spec in &self.custom_data {
            if !names.insert(spec.name.to_ascii_lowercase()) {
                return Err(ConfigError::BadCustomData { name: spec.name.clone(), reason: "defined twice".into() });
            }
            if matches!(spec.name.to_ascii_lowercase().as_str(), "trade" | "quote" | "tick") {
                return Err(ConfigError::BadCustomData { name: spec.name.clone(), reason: "shadows a built-in type".into() });
            }
            if spec.source.trim().is_empty() {
                return Err(ConfigError::BadCustomData { name: spec.name.clone(), reason: "empty source".into() });
            }
        }

        for (index, entry) in self.subscriptions.iter().enumerate() {
            if entry.ticker.trim().is_empty() {
                return Err(ConfigError::BadSubscription { index, reason: "empty ticker".into() });
            }
            if let DataType::Custom(name) = entry.data_type() {
                if !names.contains(&name.to_ascii_lowercase()) {
                    return Err(ConfigError::BadSubscription {
                        index,
                        reason: format!("unknown data type '{name}'"),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn start_time(&self) -> NaiveDateTime {
        self.start.and_time(NaiveTime::MIN)
    }

    /// End of the last day.
    pub fn end_time(&self) -> NaiveDateTime {
        self.end.and_time(NaiveTime::MIN) + chrono::Duration::days(1) - chrono::Duration::nanoseconds(1)
    }

    pub fn requests(&self) -> Vec<SubscriptionRequest> {
        let (start, end) = (self.start_time(), self.end_time());
        self.subscriptions.iter().map(|s| s.to_request(start, end)).collect()
    }

    /// Deterministic hash of the configuration.
    pub fn run_id(&self) -> RunId {
        let json = serde_json::to_string(self).unwrap_or_default();
        blake3::hash(json.as_bytes()).to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        data_folder = "data"
        start = "2020-01-01"
        end = "2020-03-31"

        [cache]
        ttl_secs = 5
        background_sweep = false

        [reader]
        max_empty_days = 10

        [logging]
        level = "debug"
        format = "json"

        [[subscriptions]]
        ticker = "SPY"
        resolution = "daily"

        [[subscriptions]]
        ticker = "EURUSD"
        security_type = "forex"
        market = "oanda"
        resolution = "minute"
        data_type = "quote"
        fill_forward = false

        [[subscriptions]]
        ticker = "WEATHER"
        security_type = "custom"
        resolution = "daily"
        data_type = "weather"

        [[custom_data]]
        name = "weather"
        source = "custom/{ticker}.csv"
        columns = ["value", "rain"]
    "#;

    #[test]
    fn parses_sample_config() {
        let config = RunConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.subscriptions.len(), 3);
        assert_eq!(config.cache.ttl_secs, 5);
        assert_eq!(config.reader.max_empty_days, Some(10));
        assert_eq!(config.reader.min_price_scale_factor, 1e-5);
        assert_eq!(config.logging.level, "debug");
        assert!(config.download.is_none());

        let requests = config.requests();
        assert_eq!(requests[0].normalization, NormalizationMode::Adjusted);
        assert_eq!(requests[1].normalization, NormalizationMode::Raw);
        assert_eq!(requests[1].data_type, DataType::Quote);
        assert!(!requests[1].fill_forward);
        assert_eq!(requests[2].data_type, DataType::Custom("weather".into()));
        assert!(requests[0].end < NaiveDate::from_ymd_opt(2020, 4, 1).unwrap().and_time(NaiveTime::MIN));
    }

    #[test]
    fn rejects_inverted_range() {
        let toml = SAMPLE.replace("end = \"2020-03-31\"", "end = \"2019-03-31\"");
        assert!(matches!(RunConfig::from_toml(&toml), Err(ConfigError::InvertedRange { .. })));
    }

    #[test]
    fn rejects_unknown_custom_type() {
        let toml = SAMPLE.replace("data_type = \"weather\"", "data_type = \"pollen\"");
        let err = RunConfig::from_toml(&toml).unwrap_err();
        assert!(matches!(err, ConfigError::BadSubscription { index: 2, .. }), "{err}");
    }

    #[test]
    fn rejects_bad_toml() {
        assert!(matches!(RunConfig::from_toml("start = "), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn run_id_is_deterministic() {
        let a = RunConfig::from_toml(SAMPLE).unwrap();
        let b = RunConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(a.run_id(), b.run_id());
        let mut c = a.clone();
        c.live = true;
        assert_ne!(a.run_id(), c.run_id());
    }
}
