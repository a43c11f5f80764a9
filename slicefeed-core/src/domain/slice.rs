//! Slice: every point the synchronizer emits at one timestamp.

use super::point::{DataPoint, Delisting, Dividend, Payload, PointKind, QuoteBar, Split, SymbolChanged, Tick, TradeBar};
use super::symbol::Symbol;
use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Points sharing one emission time, grouped by symbol.
///
/// Symbols iterate in `Symbol` order. Points for the same symbol keep the
/// order their reader produced them in. Serialized form is a flat point
/// list, since JSON map keys must be strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slice {
    pub time: NaiveDateTime,
    #[serde(with = "flat_points")]
    points: BTreeMap<Symbol, Vec<DataPoint>>,
}

mod flat_points {
    use super::*;

    pub fn serialize<S: Serializer>(points: &BTreeMap<Symbol, Vec<DataPoint>>, s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(points.values().flatten())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<Symbol, Vec<DataPoint>>, D::Error> {
        let flat = Vec::<DataPoint>::deserialize(d)?;
        let mut points: BTreeMap<Symbol, Vec<DataPoint>> = BTreeMap::new();
        for p in flat {
            points.entry(p.symbol.clone()).or_default().push(p);
        }
        Ok(points)
    }
}

impl Slice {
    pub fn new(time: NaiveDateTime) -> Self {
        Self { time, points: BTreeMap::new() }
    }

    pub(crate) fn push(&mut self, point: DataPoint) {
        self.points.entry(point.symbol.clone()).or_default().push(point);
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Number of points across all symbols.
    pub fn len(&self) -> usize {
        self.points.values().map(Vec::len).sum()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.points.keys()
    }

    /// All points for `symbol`.
    pub fn get(&self, symbol: &Symbol) -> &[DataPoint] {
        self.points.get(symbol).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.points.contains_key(symbol)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DataPoint> {
        self.points.values().flatten()
    }

    pub fn count(&self, kind: PointKind) -> usize {
        self.iter().filter(|p| p.kind() == kind).count()
    }

    pub fn has_auxiliary(&self) -> bool {
        self.iter().any(DataPoint::is_auxiliary)
    }

    fn collect<'a, T: 'a>(&'a self, pick: impl Fn(&'a Payload) -> Option<&'a T>) -> BTreeMap<&'a Symbol, &'a T> {
        let mut out = BTreeMap::new();
        for (symbol, points) in &self.points {
            // last one wins, matching what a per-symbol dictionary would hold
            for p in points {
                if let Some(v) = pick(&p.payload) {
                    out.insert(symbol, v);
                }
            }
        }
        out
    }

    pub fn bars(&self) -> BTreeMap<&Symbol, &TradeBar> {
        self.collect(|p| match p {
            Payload::TradeBar(b) => Some(b),
            _ => None,
        })
    }

    pub fn quote_bars(&self) -> BTreeMap<&Symbol, &QuoteBar> {
        self.collect(|p| match p {
            Payload::QuoteBar(q) => Some(q),
            _ => None,
        })
    }

    /// Ticks keep every tick, not just the last per symbol.
    pub fn ticks(&self) -> BTreeMap<&Symbol, Vec<&Tick>> {
        let mut out: BTreeMap<&Symbol, Vec<&Tick>> = BTreeMap::new();
        for (symbol, points) in &self.points {
            for p in points {
                if let Payload::Tick(t) = &p.payload {
                    out.entry(symbol).or_default().push(t);
                }
            }
        }
        out
    }

    pub fn splits(&self) -> BTreeMap<&Symbol, &Split> {
        self.collect(|p| match p {
            Payload::Split(s) => Some(s),
            _ => None,
        })
    }

    pub fn dividends(&self) -> BTreeMap<&Symbol, &Dividend> {
        self.collect(|p| match p {
            Payload::Dividend(d) => Some(d),
            _ => None,
        })
    }

    pub fn delistings(&self) -> BTreeMap<&Symbol, &Delisting> {
        self.collect(|p| match p {
            Payload::Delisting(d) => Some(d),
            _ => None,
        })
    }

    pub fn symbol_changes(&self) -> BTreeMap<&Symbol, &SymbolChanged> {
        self.collect(|p| match p {
            Payload::SymbolChanged(s) => Some(s),
            _ => None,
        })
    }

    pub fn custom(&self) -> BTreeMap<&Symbol, &BTreeMap<String, f64>> {
        self.collect(|p| match p {
            Payload::Custom(fields) => Some(fields),
            _ => None,
        })
    }
}
