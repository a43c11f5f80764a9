//! Criterion benchmarks for slicefeed hot paths.
//!
//! Benchmarks:
//! 1. Price normalization of a single point
//! 2. Factor file lookup by date
//! 3. Full pipeline: N daily subscriptions merged into slices

use chrono::{Duration, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

use slicefeed_core::data::{DataEnvironment, ExchangeHours, FactorFile, MarketHoursDatabase, MemoryCacheProvider};
use slicefeed_core::domain::{
    AdjustmentFactors, DataPoint, DataType, NormalizationMode, Resolution, SecurityType, SubscriptionRequest,
    Symbol, TradeBar,
};
use slicefeed_core::engine::{adjust_point, factors_as_of, SubscriptionManager};

// ── Helpers ──────────────────────────────────────────────────────────

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2015, 1, 1).unwrap()
}

fn daily_body(days: usize, seed: f64) -> String {
    (0..days)
        .map(|i| {
            let date = start() + Duration::days(i as i64);
            let close = 100.0 + ((i as f64 * 0.1) + seed).sin() * 10.0;
            let p = (close * 10000.0).round() as i64;
            format!("{} 00:00,{p},{},{},{p},{}\n", date.format("%Y%m%d"), p + 500, p - 500, 1_000_000 + i)
        })
        .collect()
}

fn factor_body(days: usize) -> String {
    let mut out = String::from("20000101,1.0,1.0\n");
    let mut sf = 1.0;
    for i in (250..days).step_by(250) {
        sf *= 0.5;
        let date = start() + Duration::days(i as i64);
        out.push_str(&format!("{},0.99,{sf}\n", date.format("%Y%m%d")));
    }
    out
}

fn environment(instruments: usize, days: usize) -> DataEnvironment {
    let cache = Arc::new(MemoryCacheProvider::new());
    for n in 0..instruments {
        let t = format!("s{n}");
        cache.insert(format!("equity/usa/daily/{t}.zip#{t}.csv"), daily_body(days, n as f64));
        cache.insert(format!("equity/usa/factor_files/{t}.csv"), factor_body(days));
    }
    let mut hours = MarketHoursDatabase::default();
    hours.insert("usa", SecurityType::Equity, Arc::new(ExchangeHours::always_open()));
    DataEnvironment::new(cache).with_market_hours(hours)
}

// ── Benchmarks ───────────────────────────────────────────────────────

fn bench_adjust_point(c: &mut Criterion) {
    let t = start().and_hms_opt(0, 0, 0).unwrap();
    let bar = TradeBar { open: 100.0, high: 101.0, low: 99.0, close: 100.5, volume: 1e6 };
    let point = DataPoint::trade_bar(Symbol::equity("SPY"), t, Duration::days(1), bar);
    let f = AdjustmentFactors { price_scale_factor: 0.47, split_factor: 0.5, dividend_sum: 3.2 };

    c.bench_function("adjust_point_total_return", |b| {
        b.iter(|| adjust_point(black_box(point.clone()), NormalizationMode::TotalReturn, black_box(&f)))
    });
}

fn bench_factor_lookup(c: &mut Criterion) {
    let ff = FactorFile::parse(factor_body(5000).as_bytes()).unwrap();
    let date = start() + Duration::days(3333);
    c.bench_function("factor_file_row_as_of", |b| b.iter(|| factors_as_of(black_box(&ff), black_box(date), 0.0)));
}

fn bench_pipeline(c: &mut Criterion) {
    let days = 1000;
    let mut group = c.benchmark_group("pipeline_daily");
    group.sample_size(10);
    for instruments in [1usize, 10, 50] {
        let env = environment(instruments, days);
        let from = start().and_hms_opt(0, 0, 0).unwrap();
        let to = from + Duration::days(days as i64);
        group.bench_with_input(BenchmarkId::from_parameter(instruments), &instruments, |b, &n| {
            b.iter(|| {
                let mut mgr = SubscriptionManager::new(env.clone());
                let requests = (0..n)
                    .map(|i| SubscriptionRequest::new(Symbol::equity(format!("S{i}")), DataType::Trade, Resolution::Daily, from, to))
                    .collect();
                mgr.add_many(requests);
                black_box(mgr.count())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_adjust_point, bench_factor_lookup, bench_pipeline);
criterion_main!(benches);
