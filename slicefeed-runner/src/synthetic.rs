//! Synthetic LEAN-layout data folders.
//!
//! Writes zipped daily bars (and optionally minute bars) plus factor and map
//! files for a list of equity tickers. Each ticker's random walk is seeded
//! from the BLAKE3 hash of its name, so the same request always produces the
//! same bytes. Results produced on synthetic data are for development only.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

#[derive(Debug, Error)]
pub enum SynthError {
    #[error("I/O error at {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },

    #[error("zip error at {path}: {source}")]
    Zip { path: PathBuf, source: zip::result::ZipError },

    #[error("start {start} is after end {end}")]
    InvertedRange { start: NaiveDate, end: NaiveDate },
}

#[derive(Debug, Clone)]
pub struct SynthOptions {
    pub tickers: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Also write one minute archive per trading day.
    pub minute_bars: bool,
    /// Put a 2-for-1 split and a small dividend in each factor file.
    pub corporate_actions: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SynthReport {
    pub files_written: usize,
    pub daily_bars: usize,
    pub minute_bars: usize,
}

struct DailyBar {
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
}

fn rng_for(ticker: &str) -> StdRng {
    let seed: [u8; 32] = *blake3::hash(ticker.as_bytes()).as_bytes();
    StdRng::from_seed(seed)
}

fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

fn deci_cents(price: f64) -> i64 {
    (price * 10000.0).round() as i64
}

fn random_walk(rng: &mut StdRng, start: NaiveDate, end: NaiveDate) -> Vec<DailyBar> {
    let mut bars = Vec::new();
    let mut price = rng.gen_range(20.0..200.0_f64);
    let mut current = start;
    while current <= end {
        if is_weekday(current) {
            let daily_return: f64 = rng.gen_range(-0.03..0.03);
            let open = price;
            let close = price * (1.0 + daily_return);
            let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
            let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.01));
            let volume = rng.gen_range(500_000..5_000_000u64);
            bars.push(DailyBar { date: current, open, high, low, close, volume });
            price = close;
        }
        current += Duration::days(1);
    }
    bars
}

/// 390 one-minute bars from 09:30, drifting from the day's open to its close.
fn minute_lines(rng: &mut StdRng, bar: &DailyBar) -> String {
    let mut out = String::new();
    let steps = 390;
    for i in 0..steps {
        let ms = (9 * 3600 + 30 * 60 + i * 60) * 1000;
        let t = i as f64 / (steps - 1) as f64;
        let mid = bar.open + (bar.close - bar.open) * t;
        let noise = mid * rng.gen_range(-0.001..0.001);
        let p = (mid + noise).clamp(bar.low, bar.high);
        let v = bar.volume / steps as u64;
        let q = deci_cents(p);
        out.push_str(&format!("{ms},{q},{q},{q},{q},{v}\n"));
    }
    out
}

fn write_zip(path: &Path, member: &str, body: &str) -> Result<(), SynthError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| SynthError::Io { path: parent.to_path_buf(), source })?;
    }
    let file = File::create(path).map_err(|source| SynthError::Io { path: path.to_path_buf(), source })?;
    let mut zip = ZipWriter::new(file);
    let zip_err = |source| SynthError::Zip { path: path.to_path_buf(), source };
    zip.start_file(member, SimpleFileOptions::default()).map_err(zip_err)?;
    zip.write_all(body.as_bytes())
        .map_err(|source| SynthError::Io { path: path.to_path_buf(), source })?;
    zip.finish().map_err(zip_err)?;
    Ok(())
}

fn write_text(path: &Path, body: &str) -> Result<(), SynthError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| SynthError::Io { path: parent.to_path_buf(), source })?;
    }
    fs::write(path, body).map_err(|source| SynthError::Io { path: path.to_path_buf(), source })
}

/// Factor file rows: neutral from the first bar, then optionally a dividend
/// a third of the way in and a 2-for-1 split two thirds in.
fn factor_file(bars: &[DailyBar], corporate_actions: bool) -> String {
    let Some(first) = bars.first() else {
        return String::new();
    };
    let mut out = format!("{},1,1\n", first.date.format("%Y%m%d"));
    if corporate_actions && bars.len() >= 6 {
        let dividend = &bars[bars.len() / 3];
        let previous_close = bars[bars.len() / 3 - 1].close;
        out.push_str(&format!("{},0.99,1,{:.4}\n", dividend.date.format("%Y%m%d"), previous_close));
        let split = &bars[bars.len() * 2 / 3];
        out.push_str(&format!("{},0.99,0.5\n", split.date.format("%Y%m%d")));
    }
    out
}

/// Write the data folder. Existing files for the same tickers are replaced.
pub fn generate(root: &Path, options: &SynthOptions) -> Result<SynthReport, SynthError> {
    if options.start > options.end {
        return Err(SynthError::InvertedRange { start: options.start, end: options.end });
    }
    let mut report = SynthReport::default();

    for ticker in &options.tickers {
        let lower = ticker.to_lowercase();
        let mut rng = rng_for(&ticker.to_uppercase());
        let bars = random_walk(&mut rng, options.start, options.end);

        let daily: String = bars
            .iter()
            .map(|b| {
                format!(
                    "{} 00:00,{},{},{},{},{}\n",
                    b.date.format("%Y%m%d"),
                    deci_cents(b.open),
                    deci_cents(b.high),
                    deci_cents(b.low),
                    deci_cents(b.close),
                    b.volume
                )
            })
            .collect();
        write_zip(&root.join(format!("equity/usa/daily/{lower}.zip")), &format!("{lower}.csv"), &daily)?;
        report.files_written += 1;
        report.daily_bars += bars.len();

        if options.minute_bars {
            for bar in &bars {
                let ymd = bar.date.format("%Y%m%d").to_string();
                let path = root.join(format!("equity/usa/minute/{lower}/{ymd}_trade.zip"));
                write_zip(&path, &format!("{ymd}_{lower}_minute_trade.csv"), &minute_lines(&mut rng, bar))?;
                report.files_written += 1;
                report.minute_bars += 390;
            }
        }

        write_text(
            &root.join(format!("equity/usa/factor_files/{lower}.csv")),
            &factor_file(&bars, options.corporate_actions),
        )?;
        write_text(
            &root.join(format!("equity/usa/map_files/{lower}.csv")),
            &format!("19980101,{}\n", ticker.to_uppercase()),
        )?;
        report.files_written += 2;
        debug!(ticker = %ticker, bars = bars.len(), "synthetic ticker written");
    }

    info!(
        root = %root.display(),
        tickers = options.tickers.len(),
        files = report.files_written,
        "synthetic data folder written"
    );
    Ok(report)
}
