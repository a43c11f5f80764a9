//! Export: run summaries as JSON, slice streams as CSV.
//!
//! Persisted summaries carry a `schema_version`; unknown versions are
//! rejected on load.

use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use slicefeed_core::domain::Slice;

use crate::runner::{RunContext, RunSummary, SliceHandler, SCHEMA_VERSION};

// ─── JSON export ────────────────────────────────────────────────────

pub fn export_json(summary: &RunSummary) -> Result<String> {
    summary.to_json().context("failed to serialize RunSummary to JSON")
}

/// Deserialize a `RunSummary`, rejecting unknown schema versions.
pub fn import_json(json: &str) -> Result<RunSummary> {
    let summary: RunSummary = serde_json::from_str(json).context("failed to deserialize RunSummary from JSON")?;
    if summary.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            summary.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(summary)
}

pub fn write_json(summary: &RunSummary, path: &Path) -> Result<()> {
    let json = export_json(summary)?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

// ─── CSV export ─────────────────────────────────────────────────────

/// Slice handler that writes one CSV row per point.
///
/// Columns: slice_time, ticker, kind, time, end_time, value, fill_forward
pub struct CsvSliceWriter<W: Write> {
    writer: csv::Writer<W>,
    rows: usize,
    error: Option<csv::Error>,
}

impl<W: Write> CsvSliceWriter<W> {
    pub fn new(inner: W) -> Result<Self> {
        let mut writer = csv::Writer::from_writer(inner);
        writer.write_record(["slice_time", "ticker", "kind", "time", "end_time", "value", "fill_forward"])?;
        Ok(Self { writer, rows: 0, error: None })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    fn write_slice(&mut self, slice: &Slice) -> csv::Result<()> {
        let slice_time = slice.time.to_string();
        for p in slice.iter() {
            let kind = format!("{:?}", p.kind());
            let time = p.time.to_string();
            let end_time = p.end_time.to_string();
            let value = format!("{:.6}", p.value);
            self.writer.write_record([
                slice_time.as_str(),
                p.symbol.ticker.as_str(),
                kind.as_str(),
                time.as_str(),
                end_time.as_str(),
                value.as_str(),
                if p.is_fill_forward { "true" } else { "false" },
            ])?;
            self.rows += 1;
        }
        Ok(())
    }

    /// Flush and hand back the inner writer, or the first write error.
    pub fn finish(mut self) -> Result<W> {
        if let Some(e) = self.error.take() {
            return Err(e).context("failed to write slice CSV");
        }
        self.writer.into_inner().map_err(|e| anyhow::anyhow!("failed to flush slice CSV: {}", e.error()))
    }
}

impl<W: Write> SliceHandler for CsvSliceWriter<W> {
    fn on_slice(&mut self, slice: &Slice, ctx: &mut RunContext) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = self.write_slice(slice) {
            self.error = Some(e);
            ctx.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::runner::run_with_environment;
    use slicefeed_core::data::{DataEnvironment, ExchangeHours, MarketHoursDatabase, MemoryCacheProvider};
    use slicefeed_core::diagnostics::RecordingResultChannel;
    use slicefeed_core::domain::SecurityType;
    use std::sync::Arc;

    fn sample_run(handler: &mut dyn SliceHandler) -> RunSummary {
        let config = RunConfig::from_toml(
            r#"
            data_folder = "unused"
            start = "2020-01-02"
            end = "2020-01-03"

            [[subscriptions]]
            ticker = "A"
            resolution = "daily"
            normalization = "raw"
            "#,
        )
        .unwrap();
        let cache = Arc::new(MemoryCacheProvider::new());
        cache.insert("equity/usa/daily/a.zip#a.csv", "20200102 00:00,10000,10000,10000,10000,5\n20200103 00:00,20000,20000,20000,20000,5\n");
        let mut hours = MarketHoursDatabase::default();
        hours.insert("usa", SecurityType::Equity, Arc::new(ExchangeHours::always_open()));
        let results = Arc::new(RecordingResultChannel::new());
        let env = DataEnvironment::new(cache).with_market_hours(hours).with_results(results.clone());
        run_with_environment(&config, env, results, handler).unwrap()
    }

    #[test]
    fn json_round_trip() {
        let summary = sample_run(&mut crate::runner::NullHandler);
        let json = export_json(&summary).unwrap();
        assert_eq!(import_json(&json).unwrap(), summary);
    }

    #[test]
    fn newer_schema_is_rejected() {
        let mut summary = sample_run(&mut crate::runner::NullHandler);
        summary.schema_version = SCHEMA_VERSION + 1;
        let json = export_json(&summary).unwrap();
        assert!(import_json(&json).is_err());
    }

    #[test]
    fn csv_has_one_row_per_point() {
        let mut writer = CsvSliceWriter::new(Vec::new()).unwrap();
        sample_run(&mut writer);
        assert_eq!(writer.rows(), 2);
        let bytes = writer.finish().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("slice_time,ticker,kind"));
        assert!(lines[2].contains(",A,TradeBar,"));
        assert!(lines[2].ends_with("2.000000,false"));
    }
}
