use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bar period of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Tick,
    Second,
    Minute,
    Hour,
    Daily,
}

impl Resolution {
    /// Length of one bar. Zero for ticks.
    pub fn period(&self) -> Duration {
        match self {
            Resolution::Tick => Duration::zero(),
            Resolution::Second => Duration::seconds(1),
            Resolution::Minute => Duration::minutes(1),
            Resolution::Hour => Duration::hours(1),
            Resolution::Daily => Duration::days(1),
        }
    }

    /// Hour and daily data live in one file per instrument; finer resolutions
    /// use one file per trading day.
    pub fn is_single_file(&self) -> bool {
        matches!(self, Resolution::Hour | Resolution::Daily)
    }

    pub fn folder(&self) -> &'static str {
        match self {
            Resolution::Tick => "tick",
            Resolution::Second => "second",
            Resolution::Minute => "minute",
            Resolution::Hour => "hour",
            Resolution::Daily => "daily",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.folder())
    }
}

/// How emitted prices relate to the raw prices on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMode {
    /// Prices exactly as stored.
    Raw,
    /// Scaled by the combined split and dividend factor.
    #[default]
    Adjusted,
    /// Scaled by the split factor only.
    SplitAdjusted,
    /// Split adjusted with the running dividend sum added back.
    TotalReturn,
}

impl NormalizationMode {
    pub fn is_raw(&self) -> bool {
        matches!(self, NormalizationMode::Raw)
    }
}

/// The kind of data a subscription asks for. Resolved to a parser/source
/// factory through the `DataFactoryRegistry`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Trade,
    Quote,
    Tick,
    Custom(String),
}

impl DataType {
    /// File-name tag used in the minute/second/tick layout.
    pub fn file_tag(&self) -> &str {
        match self {
            DataType::Trade | DataType::Tick => "trade",
            DataType::Quote => "quote",
            DataType::Custom(name) => name,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Trade => f.write_str("trade"),
            DataType::Quote => f.write_str("quote"),
            DataType::Tick => f.write_str("tick"),
            DataType::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}
