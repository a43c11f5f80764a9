//! End-to-end: synthetic data folder -> TOML config -> run -> summary/export.

use std::path::Path;

use chrono::NaiveDate;
use slicefeed_core::diagnostics::DiagnosticKind;
use slicefeed_core::domain::{PointKind, Slice};
use slicefeed_runner::{
    export_json, generate, import_json, run, CsvSliceWriter, NullHandler, RunConfig, RunContext, SynthOptions,
};

fn synth(root: &Path, tickers: &[&str]) {
    let options = SynthOptions {
        tickers: tickers.iter().map(|t| t.to_string()).collect(),
        start: NaiveDate::from_ymd_opt(2021, 1, 4).unwrap(),
        end: NaiveDate::from_ymd_opt(2021, 3, 31).unwrap(),
        minute_bars: false,
        corporate_actions: true,
    };
    generate(root, &options).unwrap();
}

fn config(root: &Path, extra: &str) -> RunConfig {
    let toml = format!(
        r#"
        data_folder = "{}"
        start = "2021-01-04"
        end = "2021-03-31"

        [cache]
        ttl_secs = 10
        background_sweep = false

        [[subscriptions]]
        ticker = "SPY"
        resolution = "daily"

        [[subscriptions]]
        ticker = "QQQ"
        resolution = "daily"
        normalization = "total_return"
        {extra}
        "#,
        root.display().to_string().replace('\\', "/")
    );
    RunConfig::from_toml(&toml).unwrap()
}

#[test]
fn synthetic_run_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    synth(dir.path(), &["SPY", "QQQ"]);
    let cfg = config(dir.path(), "");

    let first = run(&cfg, &mut NullHandler).unwrap();
    let second = run(&cfg, &mut NullHandler).unwrap();
    assert_eq!(first.fingerprint, second.fingerprint);
    assert_eq!(first.run_id, second.run_id);

    assert!(first.slice_count > 50);
    assert_eq!(first.subscriptions, 2);
    // Per ticker: a split warning, the split, one dividend.
    assert_eq!(first.points_by_kind.get(&PointKind::Split), Some(&4));
    assert_eq!(first.points_by_kind.get(&PointKind::Dividend), Some(&2));
    assert_eq!(first.aux_events(), 6);
    assert_eq!(first.diagnostics_by_kind.get(&DiagnosticKind::ReaderError), None);
}

#[test]
fn slices_arrive_in_time_order() {
    let dir = tempfile::tempdir().unwrap();
    synth(dir.path(), &["SPY", "QQQ"]);
    let cfg = config(dir.path(), "");

    let mut times = Vec::new();
    let mut handler = |slice: &Slice, _ctx: &mut RunContext| times.push(slice.time);
    run(&cfg, &mut handler).unwrap();
    assert!(times.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn bad_subscription_does_not_stop_the_others() {
    let dir = tempfile::tempdir().unwrap();
    synth(dir.path(), &["SPY", "QQQ"]);
    let cfg = config(
        dir.path(),
        r#"
        [[subscriptions]]
        ticker = "EURUSD"
        security_type = "forex"
        market = "oanda"
        resolution = "minute"
        data_type = "quote"
        normalization = "adjusted"
        "#,
    );

    let summary = run(&cfg, &mut NullHandler).unwrap();
    assert!(summary.diagnostics_by_kind.get(&DiagnosticKind::InvalidConfiguration).copied().unwrap_or(0) >= 1);
    assert!(summary.points_by_symbol.get("SPY").copied().unwrap_or(0) > 0);
    assert!(summary.points_by_symbol.get("QQQ").copied().unwrap_or(0) > 0);
    assert!(!summary.points_by_symbol.contains_key("EURUSD"));
}

#[test]
fn missing_ticker_yields_no_points_and_no_failure() {
    let dir = tempfile::tempdir().unwrap();
    synth(dir.path(), &["SPY", "QQQ"]);
    let cfg = config(
        dir.path(),
        r#"
        [[subscriptions]]
        ticker = "NOPE"
        resolution = "daily"
        "#,
    );

    let summary = run(&cfg, &mut NullHandler).unwrap();
    assert!(!summary.points_by_symbol.contains_key("NOPE"));
    assert!(summary.points_by_symbol.get("SPY").copied().unwrap_or(0) > 0);
}

#[test]
fn summary_and_csv_export() {
    let dir = tempfile::tempdir().unwrap();
    synth(dir.path(), &["SPY", "QQQ"]);
    let cfg = config(dir.path(), "");

    let mut writer = CsvSliceWriter::new(Vec::new()).unwrap();
    let summary = run(&cfg, &mut writer).unwrap();
    let points: usize = summary.points_by_symbol.values().sum();
    assert_eq!(writer.rows(), points);

    let csv = String::from_utf8(writer.finish().unwrap()).unwrap();
    assert_eq!(csv.lines().count(), points + 1);
    assert!(csv.lines().any(|l| l.contains(",SPY,Split,")));

    let json = export_json(&summary).unwrap();
    assert_eq!(import_json(&json).unwrap(), summary);
}
