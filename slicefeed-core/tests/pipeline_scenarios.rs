//! End-to-end scenarios over a LEAN-style data folder on disk.
//!
//! Each test writes zip archives, factor files and map files into a fresh
//! temp folder, then drives subscriptions through the manager and checks the
//! slices that come out.

use chrono::{NaiveDate, NaiveDateTime};
use slicefeed_core::data::{
    CacheSettings, DataCacheProvider, DataEnvironment, ExchangeHours, LocalDiskProvider, MarketHoursDatabase,
    ZipDataCacheProvider,
};
use slicefeed_core::diagnostics::{DiagnosticKind, RecordingResultChannel};
use slicefeed_core::domain::{
    DataType, NormalizationMode, Payload, PointKind, Resolution, SecurityType, Slice, SplitKind,
    SubscriptionRequest, Symbol,
};
use slicefeed_core::engine::SubscriptionManager;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

// ── Fixture helpers ──────────────────────────────────────────────────

fn data_folder() -> PathBuf {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!("slicefeed_scenario_{}_{id}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_zip(root: &Path, path: &str, member: &str, body: &str) {
    let full = root.join(path);
    std::fs::create_dir_all(full.parent().unwrap()).unwrap();
    let file = std::fs::File::create(&full).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    zip.start_file(member, zip::write::SimpleFileOptions::default()).unwrap();
    zip.write_all(body.as_bytes()).unwrap();
    zip.finish().unwrap();
}

fn write_plain(root: &Path, path: &str, body: &str) {
    let full = root.join(path);
    std::fs::create_dir_all(full.parent().unwrap()).unwrap();
    std::fs::write(full, body).unwrap();
}

/// Daily equity lines in deci-cents: (month, day, close).
fn daily_lines(days: &[(u32, u32, f64)]) -> String {
    days.iter()
        .map(|(m, d, close)| {
            let p = (close * 10000.0).round() as i64;
            format!("2020{m:02}{d:02} 00:00,{p},{p},{p},{p},1000\n")
        })
        .collect()
}

fn at(m: u32, d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2020, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
}

fn always_open() -> MarketHoursDatabase {
    let mut hours = MarketHoursDatabase::default();
    hours.insert("usa", SecurityType::Equity, Arc::new(ExchangeHours::always_open()));
    hours
}

fn no_sweep() -> CacheSettings {
    CacheSettings { ttl_secs: 10, background_sweep: false }
}

fn environment(root: &Path, results: Arc<RecordingResultChannel>) -> DataEnvironment {
    DataEnvironment::local(root, &no_sweep()).with_market_hours(always_open()).with_results(results)
}

fn daily(ticker: &str, start: NaiveDateTime, end: NaiveDateTime, mode: NormalizationMode) -> SubscriptionRequest {
    SubscriptionRequest::new(Symbol::equity(ticker), DataType::Trade, Resolution::Daily, start, end)
        .with_normalization(mode)
}

// ── Scenarios ────────────────────────────────────────────────────────

#[test]
fn factor_file_split_is_applied_and_announced() {
    let root = data_folder();
    let days: Vec<(u32, u32, f64)> = (12..=20).map(|d| (6, d, 100.0)).collect();
    write_zip(&root, "equity/usa/daily/x.zip", "x.csv", &daily_lines(&days));
    write_plain(&root, "equity/usa/factor_files/x.csv", "20200101,1.0,1.0\n20200615,1.0,0.5\n");

    let results = Arc::new(RecordingResultChannel::new());
    let mut mgr = SubscriptionManager::new(environment(&root, results.clone()));
    let id = mgr.add(daily("X", at(6, 12), at(6, 20), NormalizationMode::Adjusted)).unwrap();
    let slices: Vec<Slice> = mgr.by_ref().collect();

    let closes: Vec<(NaiveDateTime, f64)> = slices
        .iter()
        .flat_map(|s| s.iter())
        .filter(|p| p.kind() == PointKind::TradeBar && !p.is_fill_forward)
        .map(|p| (p.time, p.value))
        .collect();
    assert_eq!(closes.last().copied(), Some((at(6, 20), 50.0)));
    assert_eq!(closes.iter().find(|(t, _)| *t == at(6, 14)).map(|c| c.1), Some(100.0));

    let occurred: Vec<&Slice> = slices
        .iter()
        .filter(|s| s.splits().values().any(|sp| sp.kind == SplitKind::Occurred))
        .collect();
    assert_eq!(occurred.len(), 1);
    assert_eq!(occurred[0].time, at(6, 15));
    assert!(slices.iter().any(|s| s.splits().values().any(|sp| sp.kind == SplitKind::Warning)));

    assert_eq!(mgr.get(id).unwrap().config.price_scale_factor(), 0.5);
    assert_eq!(results.count(DiagnosticKind::ReaderError), 0);
    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn two_instruments_merge_with_fill_forward() {
    let root = data_folder();
    write_zip(&root, "equity/usa/daily/a.zip", "a.csv", &daily_lines(&[(1, 1, 10.0), (1, 2, 11.0)]));
    write_zip(&root, "equity/usa/daily/b.zip", "b.csv", &daily_lines(&[(1, 1, 20.0)]));

    let results = Arc::new(RecordingResultChannel::new());
    let mut mgr = SubscriptionManager::new(environment(&root, results));
    mgr.add_many(vec![
        daily("A", at(1, 1), at(1, 2), NormalizationMode::Raw),
        daily("B", at(1, 1), at(1, 2), NormalizationMode::Raw),
    ]);
    let slices: Vec<Slice> = mgr.by_ref().collect();

    assert_eq!(slices.len(), 2);
    assert_eq!(slices[0].time, at(1, 2));
    assert_eq!(slices[0].count(PointKind::TradeBar), 2);

    let a = slices[1].get(&Symbol::equity("A"));
    assert_eq!(a.len(), 1);
    assert_eq!(a[0].value, 11.0);
    assert!(!a[0].is_fill_forward);

    let b = slices[1].get(&Symbol::equity("B"));
    assert_eq!(b.len(), 1);
    assert!(b[0].is_fill_forward);
    assert_eq!(b[0].value, 20.0);
    assert_eq!(b[0].time, at(1, 1));
    let _ = std::fs::remove_dir_all(&root);
}

/// Counts error-level events.
struct ErrorCounter(Arc<AtomicUsize>);

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for ErrorCounter {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        if *event.metadata().level() == tracing::Level::ERROR {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[test]
fn corrupt_archive_logs_one_error_and_other_instruments_continue() {
    use tracing_subscriber::prelude::*;

    let root = data_folder();
    write_zip(&root, "equity/usa/daily/good.zip", "good.csv", &daily_lines(&[(1, 2, 5.0), (1, 3, 6.0)]));
    write_plain(&root, "equity/usa/daily/bad.zip", "this is not a zip archive");

    let errors = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(ErrorCounter(Arc::clone(&errors)));

    let slices: Vec<Slice> = tracing::subscriber::with_default(subscriber, || {
        let env = DataEnvironment::local(&root, &no_sweep()).with_market_hours(always_open());
        let mut mgr = SubscriptionManager::new(env);
        mgr.add(daily("GOOD", at(1, 2), at(1, 3), NormalizationMode::Raw)).unwrap();
        mgr.add(daily("BAD", at(1, 2), at(1, 3), NormalizationMode::Raw)).unwrap();
        mgr.collect()
    });

    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(slices.len(), 2);
    assert!(slices.iter().all(|s| !s.contains(&Symbol::equity("BAD"))));
    let closes: Vec<f64> = slices.iter().map(|s| s.get(&Symbol::equity("GOOD"))[0].value).collect();
    assert_eq!(closes, vec![5.0, 6.0]);
    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn rename_switches_source_file_mid_stream() {
    let root = data_folder();
    write_zip(&root, "equity/usa/daily/old.zip", "old.csv", &daily_lines(&[(2, 27, 10.0), (2, 28, 10.0)]));
    write_zip(&root, "equity/usa/daily/new.zip", "new.csv", &daily_lines(&[(2, 28, 99.0), (3, 2, 12.0), (3, 3, 13.0)]));
    write_plain(&root, "equity/usa/map_files/old.csv", "20000101,OLD\n20200301,NEW\n");

    let results = Arc::new(RecordingResultChannel::new());
    let mut mgr = SubscriptionManager::new(environment(&root, results));
    let id = mgr.add(daily("OLD", at(2, 27), at(3, 3), NormalizationMode::Raw)).unwrap();
    let slices: Vec<Slice> = mgr.by_ref().collect();

    let changes: Vec<&Slice> = slices.iter().filter(|s| !s.symbol_changes().is_empty()).collect();
    assert_eq!(changes.len(), 1);
    let change = changes[0].symbol_changes()[&Symbol::equity("OLD")];
    assert_eq!(change.old_ticker, "OLD");
    assert_eq!(change.new_ticker, "NEW");

    let closes: Vec<f64> = slices
        .iter()
        .flat_map(|s| s.get(&Symbol::equity("OLD")))
        .filter(|p| p.kind() == PointKind::TradeBar && !p.is_fill_forward)
        .map(|p| p.value)
        .collect();
    assert_eq!(closes, vec![10.0, 10.0, 12.0, 13.0]);
    assert_eq!(mgr.get(id).unwrap().config.mapped_ticker(), "NEW");
    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn minute_archives_are_fetched_once_per_day() {
    let root = data_folder();
    for day in 2..=3u32 {
        let ymd = format!("202001{day:02}");
        let body: String = (0..3)
            .map(|i| {
                let ms = 34_200_000 + i * 60_000;
                let p = 1_000_000 + i * 100;
                format!("{ms},{p},{p},{p},{p},10\n")
            })
            .collect();
        write_zip(&root, &format!("equity/usa/minute/x/{ymd}_trade.zip"), &format!("{ymd}_x_minute_trade.csv"), &body);
    }

    let storage = Arc::new(LocalDiskProvider::new(&root));
    let cache = Arc::new(ZipDataCacheProvider::new(storage, &no_sweep()));
    let env = DataEnvironment::new(cache.clone()).with_market_hours(always_open());

    let request = SubscriptionRequest::new(Symbol::equity("X"), DataType::Trade, Resolution::Minute, at(1, 2), at(1, 4))
        .with_normalization(NormalizationMode::Raw)
        .with_fill_forward(false);
    let first: Vec<Slice> = {
        let mut mgr = SubscriptionManager::new(env.clone());
        mgr.add(request.clone()).unwrap();
        mgr.collect()
    };
    assert_eq!(first.len(), 6);
    assert_eq!(first[0].get(&Symbol::equity("X"))[0].value, 100.0);
    let fetched = cache.stats().storage_fetches;

    let second: Vec<Slice> = {
        let mut mgr = SubscriptionManager::new(env);
        mgr.add(request).unwrap();
        mgr.collect()
    };
    assert_eq!(first, second);
    let stats = cache.stats();
    assert_eq!(stats.storage_fetches, fetched);
    assert!(stats.hits >= 2);
    assert!(cache
        .fetch_stream("equity/usa/minute/x/20200102_trade.zip#20200102_x_minute_trade.csv")
        .is_some());
    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn dividend_shows_up_in_total_return_prices() {
    let root = data_folder();
    write_zip(&root, "equity/usa/daily/x.zip", "x.csv", &daily_lines(&[(1, 9, 100.0), (1, 10, 98.0)]));
    write_plain(&root, "equity/usa/factor_files/x.csv", "20200101,1.0,1.0\n20200110,0.98,1.0,100\n");

    let results = Arc::new(RecordingResultChannel::new());
    let mut mgr = SubscriptionManager::new(environment(&root, results));
    mgr.add(daily("X", at(1, 9), at(1, 10), NormalizationMode::TotalReturn)).unwrap();
    let slices: Vec<Slice> = mgr.by_ref().collect();

    let dividends: Vec<f64> = slices
        .iter()
        .flat_map(|s| s.iter())
        .filter_map(|p| match &p.payload {
            Payload::Dividend(d) => Some(d.distribution),
            _ => None,
        })
        .collect();
    assert_eq!(dividends.len(), 1);
    assert!((dividends[0] - 2.0).abs() < 1e-9);
    let last = slices.last().unwrap().get(&Symbol::equity("X"))[0].value;
    assert!((last - 100.0).abs() < 1e-9);
    let _ = std::fs::remove_dir_all(&root);
}
