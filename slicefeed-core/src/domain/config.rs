//! Subscription configuration.
//!
//! `SubscriptionConfig` is shared as `Arc<SubscriptionConfig>` between the
//! reader that owns the subscription and anyone valuing positions with it.
//! The descriptor fields never change. The state block (mapped ticker and the
//! adjustment factors) is written only by the subscription's own reader and
//! may be read from any thread; floats are published with release stores and
//! read with acquire loads.

use super::ids::SubscriptionKey;
use super::resolution::{DataType, NormalizationMode, Resolution};
use super::symbol::{SecurityType, Symbol};
use chrono::NaiveDateTime;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Invalid subscription configuration. Fatal for that subscription only.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("no data factory registered for data type '{0}'")]
    UnregisteredDataType(DataType),

    #[error("normalization mode {mode:?} requires equity data, got {security_type}")]
    NormalizationNotSupported { mode: NormalizationMode, security_type: SecurityType },

    #[error("data type '{data_type}' cannot be requested at {resolution} resolution")]
    ResolutionMismatch { data_type: DataType, resolution: Resolution },

    #[error("start {start} is after end {end}")]
    InvertedRange { start: NaiveDateTime, end: NaiveDateTime },
}

/// Cumulative factors in force on a date.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentFactors {
    /// price_factor * split_factor
    pub price_scale_factor: f64,
    pub split_factor: f64,
    /// Sum of split-adjusted dividends paid so far (total-return mode).
    pub dividend_sum: f64,
}

impl Default for AdjustmentFactors {
    fn default() -> Self {
        Self { price_scale_factor: 1.0, split_factor: 1.0, dividend_sum: 0.0 }
    }
}

/// f64 published through its bit pattern.
#[derive(Debug)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(v: f64) -> Self {
        Self(AtomicU64::new(v.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, v: f64) {
        self.0.store(v.to_bits(), Ordering::Release);
    }
}

#[derive(Debug)]
struct SubscriptionState {
    mapped_ticker: RwLock<String>,
    price_scale_factor: AtomicF64,
    split_factor: AtomicF64,
    dividend_sum: AtomicF64,
}

#[derive(Debug)]
pub struct SubscriptionConfig {
    pub symbol: Symbol,
    pub data_type: DataType,
    pub resolution: Resolution,
    pub normalization: NormalizationMode,
    pub extended_hours: bool,
    pub fill_forward: bool,
    state: SubscriptionState,
}

impl SubscriptionConfig {
    pub fn new(
        symbol: Symbol,
        data_type: DataType,
        resolution: Resolution,
        normalization: NormalizationMode,
        extended_hours: bool,
        fill_forward: bool,
    ) -> Self {
        let mapped = symbol.ticker.clone();
        Self {
            symbol,
            data_type,
            resolution,
            normalization,
            extended_hours,
            fill_forward,
            state: SubscriptionState {
                mapped_ticker: RwLock::new(mapped),
                price_scale_factor: AtomicF64::new(1.0),
                split_factor: AtomicF64::new(1.0),
                dividend_sum: AtomicF64::new(0.0),
            },
        }
    }

    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey::new(self.symbol.clone(), self.data_type.clone())
    }

    /// Check the descriptor for combinations no reader can serve.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.normalization.is_raw() && self.symbol.security_type != SecurityType::Equity {
            return Err(ConfigError::NormalizationNotSupported {
                mode: self.normalization,
                security_type: self.symbol.security_type,
            });
        }
        let tick_type = matches!(self.data_type, DataType::Tick);
        let tick_res = self.resolution == Resolution::Tick;
        let bar_type = matches!(self.data_type, DataType::Trade | DataType::Quote);
        if (tick_type && !tick_res) || (bar_type && tick_res) {
            return Err(ConfigError::ResolutionMismatch {
                data_type: self.data_type.clone(),
                resolution: self.resolution,
            });
        }
        Ok(())
    }

    /// Ticker the instrument trades under at the reader's current date.
    pub fn mapped_ticker(&self) -> String {
        self.state.mapped_ticker.read().clone()
    }

    /// Reader-only.
    pub fn set_mapped_ticker(&self, ticker: impl Into<String>) {
        *self.state.mapped_ticker.write() = ticker.into();
    }

    pub fn factors(&self) -> AdjustmentFactors {
        AdjustmentFactors {
            price_scale_factor: self.state.price_scale_factor.load(),
            split_factor: self.state.split_factor.load(),
            dividend_sum: self.state.dividend_sum.load(),
        }
    }

    /// Reader-only.
    pub fn publish_factors(&self, factors: AdjustmentFactors) {
        self.state.price_scale_factor.store(factors.price_scale_factor);
        self.state.split_factor.store(factors.split_factor);
        self.state.dividend_sum.store(factors.dividend_sum);
    }

    pub fn price_scale_factor(&self) -> f64 {
        self.state.price_scale_factor.load()
    }

    pub fn dividend_sum(&self) -> f64 {
        self.state.dividend_sum.load()
    }
}

fn default_true() -> bool {
    true
}

/// What a caller asks for. Turned into a shared `SubscriptionConfig` plus a
/// date range for the reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    pub symbol: Symbol,
    pub data_type: DataType,
    pub resolution: Resolution,
    #[serde(default)]
    pub normalization: NormalizationMode,
    #[serde(default)]
    pub extended_hours: bool,
    #[serde(default = "default_true")]
    pub fill_forward: bool,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl SubscriptionRequest {
    pub fn new(symbol: Symbol, data_type: DataType, resolution: Resolution, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        let normalization = if symbol.security_type == SecurityType::Equity {
            NormalizationMode::Adjusted
        } else {
            NormalizationMode::Raw
        };
        Self {
            symbol,
            data_type,
            resolution,
            normalization,
            extended_hours: false,
            fill_forward: true,
            start,
            end,
        }
    }

    pub fn with_normalization(mut self, mode: NormalizationMode) -> Self {
        self.normalization = mode;
        self
    }

    pub fn with_fill_forward(mut self, on: bool) -> Self {
        self.fill_forward = on;
        self
    }

    pub fn with_extended_hours(mut self, on: bool) -> Self {
        self.extended_hours = on;
        self
    }

    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey::new(self.symbol.clone(), self.data_type.clone())
    }

    pub fn to_config(&self) -> Arc<SubscriptionConfig> {
        Arc::new(SubscriptionConfig::new(
            self.symbol.clone(),
            self.data_type.clone(),
            self.resolution,
            self.normalization,
            self.extended_hours,
            self.fill_forward,
        ))
    }

    pub fn validate(&self, config: &SubscriptionConfig) -> Result<(), ConfigError> {
        if self.start > self.end {
            return Err(ConfigError::InvertedRange { start: self.start, end: self.end });
        }
        config.validate()
    }
}
