//! Property tests for pipeline invariants.
//!
//! Uses proptest to verify:
//! 1. Price round trip: unadjusting an adjusted price recovers the raw price
//! 2. Ordering: slice times strictly increase, points match their slice time
//! 3. Exactly once: every source point shows up in exactly one slice
//! 4. Aux before price: a date's split event precedes that date's bars
//! 5. Fill-forward: repeats carry the last real payload, and repeating is idempotent

use chrono::{Duration, NaiveDate, NaiveDateTime};
use proptest::prelude::*;
use slicefeed_core::data::{ExchangeHours, MarketHoursDatabase, MemoryCacheProvider, DataEnvironment};
use slicefeed_core::domain::{
    AdjustmentFactors, DataPoint, DataType, NormalizationMode, Payload, Resolution, SecurityType, Slice,
    SplitKind, SubscriptionConfig, SubscriptionId, Symbol, TradeBar,
};
use slicefeed_core::engine::{adjust_price, unadjust_price, PointSource, Pull, SubscriptionReader, Synchronizer};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_price() -> impl Strategy<Value = f64> {
    (1.0..5000.0_f64).prop_map(|p| (p * 100.0).round() / 100.0)
}

fn arb_factors() -> impl Strategy<Value = AdjustmentFactors> {
    (0.001..1.0_f64, 0.01..1.0_f64, 0.0..50.0_f64).prop_map(|(psf, sf, div)| AdjustmentFactors {
        price_scale_factor: psf,
        split_factor: sf,
        dividend_sum: div,
    })
}

fn arb_mode() -> impl Strategy<Value = NormalizationMode> {
    prop_oneof![
        Just(NormalizationMode::Raw),
        Just(NormalizationMode::Adjusted),
        Just(NormalizationMode::SplitAdjusted),
        Just(NormalizationMode::TotalReturn),
    ]
}

/// Per source: sorted, distinct day offsets on which it has a bar.
fn arb_sources() -> impl Strategy<Value = Vec<Vec<i64>>> {
    prop::collection::vec(prop::collection::btree_set(0..40_i64, 0..15), 1..5)
        .prop_map(|sets| sets.into_iter().map(|s| s.into_iter().collect()).collect())
}

// ── Helpers ──────────────────────────────────────────────────────────

struct Scripted(VecDeque<DataPoint>);

impl PointSource for Scripted {
    fn pull(&mut self) -> Pull {
        match self.0.pop_front() {
            Some(p) => Pull::Ready(p),
            None => Pull::Exhausted,
        }
    }
}

fn day0() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2021, 3, 1).unwrap().and_hms_opt(0, 0, 0).unwrap()
}

fn ticker(i: usize) -> String {
    format!("S{i}")
}

fn bar(i: usize, offset: i64) -> DataPoint {
    let close = 10.0 * (i as f64 + 1.0) + offset as f64;
    let b = TradeBar { open: close, high: close, low: close, close, volume: 1.0 };
    DataPoint::trade_bar(Symbol::equity(ticker(i)), day0() + Duration::days(offset), Duration::days(1), b)
}

fn config(i: usize, fill_forward: bool) -> Arc<SubscriptionConfig> {
    Arc::new(SubscriptionConfig::new(
        Symbol::equity(ticker(i)),
        DataType::Trade,
        Resolution::Daily,
        NormalizationMode::Raw,
        false,
        fill_forward,
    ))
}

fn merge(sources: &[Vec<i64>], fill_forward: bool) -> Vec<Slice> {
    let mut sync = Synchronizer::new();
    for (i, days) in sources.iter().enumerate() {
        let points = days.iter().map(|&d| bar(i, d)).collect();
        sync.add(SubscriptionId(i as u64 + 1), config(i, fill_forward), Box::new(Scripted(points)));
    }
    sync.collect()
}

// ── 1. Price round trip ──────────────────────────────────────────────

proptest! {
    #[test]
    fn unadjust_recovers_raw_price(price in arb_price(), f in arb_factors(), mode in arb_mode()) {
        let back = unadjust_price(adjust_price(price, mode, &f), mode, &f);
        prop_assert!((back - price).abs() <= 1e-9 * price.max(1.0), "{mode:?}: {price} -> {back}");
    }
}

// ── 2. Ordering ──────────────────────────────────────────────────────

proptest! {
    #[test]
    fn slice_times_strictly_increase(sources in arb_sources()) {
        let slices = merge(&sources, true);
        for pair in slices.windows(2) {
            prop_assert!(pair[0].time < pair[1].time);
        }
        for slice in &slices {
            for p in slice.iter().filter(|p| !p.is_fill_forward) {
                prop_assert_eq!(p.end_time, slice.time);
            }
        }
    }
}

// ── 3. Exactly once ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn every_point_is_emitted_once(sources in arb_sources()) {
        let slices = merge(&sources, false);
        let mut seen: HashMap<(String, NaiveDateTime), usize> = HashMap::new();
        for p in slices.iter().flat_map(|s| s.iter()) {
            *seen.entry((p.symbol.ticker.clone(), p.time)).or_default() += 1;
        }
        let expected: usize = sources.iter().map(Vec::len).sum();
        prop_assert_eq!(seen.len(), expected);
        prop_assert!(seen.values().all(|&n| n == 1));
        for (i, days) in sources.iter().enumerate() {
            for &d in days {
                prop_assert!(seen.contains_key(&(ticker(i), day0() + Duration::days(d))));
            }
        }
    }
}

// ── 4. Aux before price ──────────────────────────────────────────────

fn reader_points(split_days: &[u32], closes: &[f64]) -> Vec<DataPoint> {
    let cache = Arc::new(MemoryCacheProvider::new());
    let body: String = closes
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let p = (c * 10000.0).round() as i64;
            format!("202006{:02} 00:00,{p},{p},{p},{p},100\n", i + 1)
        })
        .collect();
    cache.insert("equity/usa/daily/x.zip#x.csv", body);

    let mut factors = String::from("20200101,1.0,1.0\n");
    let mut sf = 1.0;
    for d in split_days {
        sf *= 0.5;
        factors.push_str(&format!("202006{d:02},1.0,{sf}\n"));
    }
    cache.insert("equity/usa/factor_files/x.csv", factors);

    let mut hours = MarketHoursDatabase::default();
    hours.insert("usa", SecurityType::Equity, Arc::new(ExchangeHours::always_open()));
    let env = DataEnvironment::new(cache).with_market_hours(hours);
    let config = Arc::new(SubscriptionConfig::new(
        Symbol::equity("X"),
        DataType::Trade,
        Resolution::Daily,
        NormalizationMode::Adjusted,
        false,
        true,
    ));
    let start = NaiveDate::from_ymd_opt(2020, 6, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
    let end = start + Duration::days(closes.len() as i64 - 1);
    match SubscriptionReader::new(config, start, end, &env, false) {
        Ok(reader) => reader.collect(),
        Err(_) => Vec::new(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn split_events_precede_that_days_bars(
        split_days in prop::collection::btree_set(2..20_u32, 0..4),
        closes in prop::collection::vec(arb_price(), 20..25),
    ) {
        let split_days: Vec<u32> = split_days.into_iter().collect();
        let points = reader_points(&split_days, &closes);
        prop_assert!(!points.is_empty());

        let occurred: Vec<(usize, NaiveDateTime)> = points
            .iter()
            .enumerate()
            .filter(|(_, p)| matches!(&p.payload, Payload::Split(s) if s.kind == SplitKind::Occurred))
            .map(|(i, p)| (i, p.time))
            .collect();
        prop_assert_eq!(occurred.len(), split_days.len());

        for (idx, time) in occurred {
            let first_bar = points.iter().position(|p| !p.is_auxiliary() && p.time == time);
            if let Some(bar_idx) = first_bar {
                prop_assert!(idx < bar_idx);
            }
            prop_assert!(points[..idx].iter().all(|p| p.is_auxiliary() || p.time < time));
        }
    }
}

// ── 5. Fill-forward ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn fill_forward_repeats_last_real_payload(sources in arb_sources()) {
        let slices = merge(&sources, true);
        let mut last: HashMap<String, DataPoint> = HashMap::new();
        for slice in &slices {
            for p in slice.iter() {
                if p.is_fill_forward {
                    let prev = last.get(&p.symbol.ticker);
                    prop_assert!(prev.is_some());
                    let prev = prev.unwrap();
                    prop_assert_eq!(&p.payload, &prev.payload);
                    prop_assert_eq!(p.time, prev.time);
                    prop_assert_eq!(&p.fill_forward(), p);
                } else {
                    last.insert(p.symbol.ticker.clone(), p.clone());
                }
            }
            // Every instrument seen so far has exactly one point in the slice.
            for ticker in last.keys() {
                prop_assert_eq!(slice.get(&Symbol::equity(ticker.clone())).len(), 1);
            }
        }
    }
}
