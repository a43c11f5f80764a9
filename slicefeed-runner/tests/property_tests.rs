//! Property tests for run configuration identity.
//!
//! Uses proptest to verify:
//! 1. Key order: reordering TOML keys and tables leaves the run id unchanged
//! 2. Sensitivity: changing a subscription changes the run id

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use slicefeed_runner::RunConfig;

#[derive(Debug, Clone)]
struct Sub {
    ticker: String,
    resolution: &'static str,
    normalization: &'static str,
    fill_forward: bool,
}

#[derive(Debug, Clone)]
struct Shape {
    start: NaiveDate,
    end: NaiveDate,
    live: bool,
    ttl_secs: u64,
    subs: Vec<Sub>,
}

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_sub() -> impl Strategy<Value = Sub> {
    (
        "[A-Z]{1,5}",
        prop_oneof![Just("daily"), Just("hour"), Just("minute")],
        prop_oneof![Just("raw"), Just("adjusted"), Just("total_return")],
        any::<bool>(),
    )
        .prop_map(|(ticker, resolution, normalization, fill_forward)| Sub {
            ticker,
            resolution,
            normalization,
            fill_forward,
        })
}

fn arb_shape() -> impl Strategy<Value = Shape> {
    (0..365i64, 0..365i64, any::<bool>(), 1..120u64, prop::collection::vec(arb_sub(), 1..4)).prop_map(
        |(offset, length, live, ttl_secs, subs)| {
            let base = NaiveDate::from_ymd_opt(2019, 1, 1).unwrap();
            let start = base + Duration::days(offset);
            Shape { start, end: start + Duration::days(length), live, ttl_secs, subs }
        },
    )
}

// ── Rendering ────────────────────────────────────────────────────────

fn rotated(mut lines: Vec<String>, by: usize) -> Vec<String> {
    if !lines.is_empty() {
        let n = by % lines.len();
        lines.rotate_left(n);
    }
    lines
}

/// TOML for `shape`. `by` rotates the keys inside every table; `cache_last`
/// moves the `[cache]` table behind the subscriptions.
fn render(shape: &Shape, by: usize, cache_last: bool) -> String {
    let top = vec![
        "data_folder = \"data\"".to_string(),
        format!("start = \"{}\"", shape.start),
        format!("end = \"{}\"", shape.end),
        format!("live = {}", shape.live),
    ];
    let cache = vec![format!("ttl_secs = {}", shape.ttl_secs), "background_sweep = false".to_string()];

    let mut out = rotated(top, by).join("\n");
    let cache_table = format!("\n\n[cache]\n{}", rotated(cache, by).join("\n"));
    if !cache_last {
        out.push_str(&cache_table);
    }
    for sub in &shape.subs {
        let keys = vec![
            format!("ticker = \"{}\"", sub.ticker),
            format!("resolution = \"{}\"", sub.resolution),
            format!("normalization = \"{}\"", sub.normalization),
            format!("fill_forward = {}", sub.fill_forward),
        ];
        out.push_str("\n\n[[subscriptions]]\n");
        out.push_str(&rotated(keys, by).join("\n"));
    }
    if cache_last {
        out.push_str(&cache_table);
    }
    out.push('\n');
    out
}

// ── 1. Key order ─────────────────────────────────────────────────────

proptest! {
    #[test]
    fn run_id_ignores_key_order(shape in arb_shape(), by in 1..8usize) {
        let a = RunConfig::from_toml(&render(&shape, 0, false)).unwrap();
        let b = RunConfig::from_toml(&render(&shape, by, true)).unwrap();
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.run_id(), b.run_id());
        prop_assert_eq!(a.run_id().len(), 64);
    }
}

// ── 2. Sensitivity ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn run_id_tracks_subscription_changes(shape in arb_shape(), suffix in "[A-Z]{1,3}") {
        let mut changed = shape.clone();
        changed.subs[0].ticker.push_str(&suffix);

        let a = RunConfig::from_toml(&render(&shape, 0, false)).unwrap();
        let b = RunConfig::from_toml(&render(&changed, 0, false)).unwrap();
        prop_assert_ne!(a.run_id(), b.run_id());
    }
}
