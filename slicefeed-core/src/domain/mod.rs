//! Domain types for slicefeed

pub mod config;
pub mod ids;
pub mod point;
pub mod resolution;
pub mod slice;
pub mod symbol;

pub use config::{AdjustmentFactors, ConfigError, SubscriptionConfig, SubscriptionRequest};
pub use ids::{StreamHash, SubscriptionId, SubscriptionKey};
pub use point::{
    DataPoint, Delisting, DelistingKind, Dividend, Ohlc, Payload, PointKind, QuoteBar, Split, SplitKind,
    SymbolChanged, Tick, TradeBar,
};
pub use resolution::{DataType, NormalizationMode, Resolution};
pub use slice::Slice;
pub use symbol::{SecurityType, Symbol};
