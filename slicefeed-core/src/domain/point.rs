//! DataPoint: one parsed observation for one instrument.
//!
//! A point carries a start `time`, an `end_time` (the moment it becomes
//! observable, which is what the synchronizer orders on), a scalar `value` and
//! a typed payload. Auxiliary payloads (splits, dividends, delistings, symbol
//! changes) are synthesized by the reader from the corporate action tables.

use super::symbol::Symbol;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Open/high/low/close for one side of a quote bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ohlc {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Ohlc {
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            open: f(self.open),
            high: f(self.high),
            low: f(self.low),
            close: f(self.close),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeBar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuoteBar {
    pub bid: Option<Ohlc>,
    pub ask: Option<Ohlc>,
    pub last_bid_size: f64,
    pub last_ask_size: f64,
}

impl QuoteBar {
    /// Mid of the closing bid/ask, or whichever side is present.
    pub fn mid_close(&self) -> f64 {
        match (self.bid, self.ask) {
            (Some(b), Some(a)) => (b.close + a.close) / 2.0,
            (Some(b), None) => b.close,
            (None, Some(a)) => a.close,
            (None, None) => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub price: f64,
    pub quantity: f64,
    pub exchange: Option<String>,
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitKind {
    /// The split takes effect on the next trading day.
    Warning,
    /// The split is effective from this point on.
    Occurred,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub kind: SplitKind,
    /// Price multiplier of the split (0.5 for a 2-for-1).
    pub split_factor: f64,
    /// Raw close before the split.
    pub reference_price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dividend {
    /// Cash distribution per share, in raw prices.
    pub distribution: f64,
    /// Raw close the distribution was derived from.
    pub reference_price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DelistingKind {
    Warning,
    Delisted,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Delisting {
    pub kind: DelistingKind,
    /// Last known raw price.
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolChanged {
    pub old_ticker: String,
    pub new_ticker: String,
}

/// Payload of a point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    TradeBar(TradeBar),
    QuoteBar(QuoteBar),
    Tick(Tick),
    Split(Split),
    Dividend(Dividend),
    Delisting(Delisting),
    SymbolChanged(SymbolChanged),
    Custom(BTreeMap<String, f64>),
}

/// Fieldless discriminant of `Payload`, for counting and partitioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PointKind {
    TradeBar,
    QuoteBar,
    Tick,
    Split,
    Dividend,
    Delisting,
    SymbolChanged,
    Custom,
}

impl Payload {
    pub fn kind(&self) -> PointKind {
        match self {
            Payload::TradeBar(_) => PointKind::TradeBar,
            Payload::QuoteBar(_) => PointKind::QuoteBar,
            Payload::Tick(_) => PointKind::Tick,
            Payload::Split(_) => PointKind::Split,
            Payload::Dividend(_) => PointKind::Dividend,
            Payload::Delisting(_) => PointKind::Delisting,
            Payload::SymbolChanged(_) => PointKind::SymbolChanged,
            Payload::Custom(_) => PointKind::Custom,
        }
    }

    /// True for corporate-action events synthesized by the reader.
    pub fn is_auxiliary(&self) -> bool {
        matches!(
            self,
            Payload::Split(_) | Payload::Dividend(_) | Payload::Delisting(_) | Payload::SymbolChanged(_)
        )
    }

    /// True for payloads carrying market prices that normalization applies to.
    pub fn is_price_data(&self) -> bool {
        matches!(self, Payload::TradeBar(_) | Payload::QuoteBar(_) | Payload::Tick(_))
    }

    /// The scalar value a point of this payload reports.
    pub fn value(&self) -> f64 {
        match self {
            Payload::TradeBar(b) => b.close,
            Payload::QuoteBar(q) => q.mid_close(),
            Payload::Tick(t) => t.price,
            Payload::Split(s) => s.reference_price,
            Payload::Dividend(d) => d.distribution,
            Payload::Delisting(d) => d.price,
            Payload::SymbolChanged(_) => 0.0,
            Payload::Custom(fields) => fields.get("value").copied().unwrap_or(0.0),
        }
    }

    /// Apply `price` to every price field and `size` to every volume/size
    /// field. Non-price payloads are returned unchanged.
    pub fn map_prices(&self, price: impl Fn(f64) -> f64, size: impl Fn(f64) -> f64) -> Payload {
        match self {
            Payload::TradeBar(b) => Payload::TradeBar(TradeBar {
                open: price(b.open),
                high: price(b.high),
                low: price(b.low),
                close: price(b.close),
                volume: size(b.volume),
            }),
            Payload::QuoteBar(q) => Payload::QuoteBar(QuoteBar {
                bid: q.bid.map(|o| o.map(&price)),
                ask: q.ask.map(|o| o.map(&price)),
                last_bid_size: size(q.last_bid_size),
                last_ask_size: size(q.last_ask_size),
            }),
            Payload::Tick(t) => Payload::Tick(Tick {
                price: price(t.price),
                quantity: size(t.quantity),
                exchange: t.exchange.clone(),
                condition: t.condition.clone(),
            }),
            other => other.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub symbol: Symbol,
    pub time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub value: f64,
    pub payload: Payload,
    /// Set on copies the synchronizer repeats for silent subscriptions.
    #[serde(default)]
    pub is_fill_forward: bool,
    /// Pre-normalization payload, present only when an adjustment changed it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Box<Payload>>,
}

impl DataPoint {
    pub fn new(symbol: Symbol, time: NaiveDateTime, end_time: NaiveDateTime, payload: Payload) -> Self {
        Self {
            value: payload.value(),
            symbol,
            time,
            end_time,
            payload,
            is_fill_forward: false,
            raw: None,
        }
    }

    pub fn trade_bar(symbol: Symbol, time: NaiveDateTime, period: Duration, bar: TradeBar) -> Self {
        Self::new(symbol, time, time + period, Payload::TradeBar(bar))
    }

    /// An auxiliary event observable at `time` (zero-length).
    pub fn auxiliary(symbol: Symbol, time: NaiveDateTime, payload: Payload) -> Self {
        Self::new(symbol, time, time, payload)
    }

    pub fn kind(&self) -> PointKind {
        self.payload.kind()
    }

    pub fn is_auxiliary(&self) -> bool {
        self.payload.is_auxiliary()
    }

    /// The payload before normalization, or the payload itself if it was never adjusted.
    pub fn raw_payload(&self) -> &Payload {
        self.raw.as_deref().unwrap_or(&self.payload)
    }

    /// A fill-forward copy of this point.
    pub fn fill_forward(&self) -> Self {
        let mut copy = self.clone();
        copy.is_fill_forward = true;
        copy
    }
}
