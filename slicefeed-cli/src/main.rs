//! Slicefeed CLI: run, synthetic data, file inspection and cache commands.
//!
//! Commands:
//! - `run`: synchronize the subscriptions of a TOML config and summarize
//! - `synth`: write a deterministic synthetic data folder
//! - `inspect factor|map`: print a factor or map file with derived events
//! - `cache status`: archive counts and sizes per data folder branch

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use slicefeed_core::data::{FactorEventKind, FactorFile, MapFile};
use slicefeed_core::diagnostics::DiagnosticKind;
use slicefeed_runner::{
    generate, init_logging, run, write_json, CsvSliceWriter, LogConfig, LogFormat, NullHandler, RunConfig,
    RunSummary, SynthOptions,
};

#[derive(Parser)]
#[command(
    name = "slicefeed",
    about = "Slicefeed CLI: subscription data synchronization and price adjustment"
)]
struct Cli {
    /// Log filter, e.g. `info` or `slicefeed_core=debug`. Overrides the config file.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format: pretty, compact or json.
    #[arg(long, global = true)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize the subscriptions of a TOML config and print a summary.
    Run {
        /// Path to a TOML config file.
        #[arg(long)]
        config: PathBuf,

        /// Write the run summary as JSON.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Write every point of every slice as CSV.
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Write a deterministic synthetic data folder.
    Synth {
        /// Data folder root.
        #[arg(long, default_value = "data")]
        out: PathBuf,

        /// Tickers to generate (e.g., SPY QQQ).
        #[arg(long, required = true, num_args = 1..)]
        tickers: Vec<String>,

        /// Start date (YYYY-MM-DD).
        #[arg(long)]
        start: String,

        /// End date (YYYY-MM-DD).
        #[arg(long)]
        end: String,

        /// Also write minute archives.
        #[arg(long, default_value_t = false)]
        minute: bool,

        /// Leave splits and dividends out of the factor files.
        #[arg(long, default_value_t = false)]
        no_corporate_actions: bool,
    },
    /// Print a factor or map file.
    Inspect {
        #[command(subcommand)]
        file: InspectTarget,
    },
    /// Data folder commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum InspectTarget {
    /// A factor file: rows, price scale factors and derived split/dividend events.
    Factor {
        path: PathBuf,
        /// Print rows as JSON instead of a table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// A map file: rows, renames and delisting date.
    Map {
        path: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Archive counts and sizes per `<security_type>/<market>/<resolution>`.
    Status {
        /// Data folder. Defaults to ./data.
        #[arg(long, default_value = "data")]
        data_folder: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let (level, format) = (cli.log_level, cli.log_format);

    match cli.command {
        Commands::Run { config, output, csv } => {
            let mut run_config = RunConfig::load(&config)?;
            run_config.logging = log_config(run_config.logging.clone(), &level, &format);
            init_logging(&run_config.logging)?;
            run_cmd(&run_config, output, csv)
        }
        Commands::Synth { out, tickers, start, end, minute, no_corporate_actions } => {
            init_logging(&log_config(LogConfig::default(), &level, &format))?;
            run_synth(&out, tickers, &start, &end, minute, !no_corporate_actions)
        }
        Commands::Inspect { file } => {
            init_logging(&log_config(LogConfig::default(), &level, &format))?;
            match file {
                InspectTarget::Factor { path, json } => inspect_factor(&path, json),
                InspectTarget::Map { path, json } => inspect_map(&path, json),
            }
        }
        Commands::Cache { action } => match action {
            CacheAction::Status { data_folder } => run_cache_status(&data_folder),
        },
    }
}

fn log_config(base: LogConfig, level: &Option<String>, format: &Option<String>) -> LogConfig {
    let mut config = base;
    if let Some(level) = level {
        config = config.with_level(level.clone());
    }
    if let Some(format) = format {
        config = config.with_format(LogFormat::parse(format));
    }
    config
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("bad date '{s}', expected YYYY-MM-DD"))
}

fn run_cmd(config: &RunConfig, output: Option<PathBuf>, csv: Option<PathBuf>) -> Result<()> {
    let summary = match &csv {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
            let mut writer = CsvSliceWriter::new(file)?;
            let summary = run(config, &mut writer)?;
            let rows = writer.rows();
            writer.finish()?;
            println!("Wrote {rows} rows to {}", path.display());
            summary
        }
        None => run(config, &mut NullHandler)?,
    };

    print_summary(&summary);

    if let Some(path) = output {
        write_json(&summary, &path)?;
        println!("Summary saved to: {}", path.display());
    }
    Ok(())
}

fn run_synth(out: &Path, tickers: Vec<String>, start: &str, end: &str, minute: bool, corporate_actions: bool) -> Result<()> {
    let options = SynthOptions {
        tickers,
        start: parse_date(start)?,
        end: parse_date(end)?,
        minute_bars: minute,
        corporate_actions,
    };
    let report = generate(out, &options)?;
    println!("Data folder:    {}", out.display());
    println!("Files written:  {}", report.files_written);
    println!("Daily bars:     {}", report.daily_bars);
    if minute {
        println!("Minute bars:    {}", report.minute_bars);
    }
    println!();
    println!("WARNING: SYNTHETIC data, for development only");
    Ok(())
}

fn inspect_factor(path: &Path, json: bool) -> Result<()> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let factors = FactorFile::parse(file)?;
    if json {
        println!("{}", serde_json::to_string_pretty(factors.rows())?);
        return Ok(());
    }
    if factors.is_empty() {
        println!("Factor file is empty: {}", path.display());
        return Ok(());
    }

    println!("{:<12} {:>14} {:>14} {:>14} {:>12}", "Date", "Price Factor", "Split Factor", "Scale", "Ref Price");
    println!("{}", "-".repeat(70));
    for row in factors.rows() {
        println!(
            "{:<12} {:>14.8} {:>14.8} {:>14.8} {:>12.4}",
            row.date,
            row.price_factor,
            row.split_factor,
            row.price_scale_factor(),
            row.reference_price
        );
    }

    let events = factors.events_between(NaiveDate::MIN, NaiveDate::MAX);
    if !events.is_empty() {
        println!();
        println!("Events:");
        for event in events {
            match event.kind {
                FactorEventKind::Split { ratio } => println!("  {}  split     ratio {:.6}", event.date, ratio),
                FactorEventKind::Dividend { price_factor_ratio } => {
                    println!("  {}  dividend  price factor ratio {:.6}", event.date, price_factor_ratio)
                }
            }
        }
    }
    Ok(())
}

fn inspect_map(path: &Path, json: bool) -> Result<()> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let map = MapFile::parse(file)?;
    if json {
        println!("{}", serde_json::to_string_pretty(map.rows())?);
        return Ok(());
    }
    if map.is_empty() {
        println!("Map file is empty: {}", path.display());
        return Ok(());
    }

    println!("{:<12} {:<10}", "From", "Ticker");
    println!("{}", "-".repeat(24));
    for row in map.rows() {
        let ticker = if row.ticker.is_empty() { "(no data)" } else { row.ticker.as_str() };
        println!("{:<12} {:<10}", row.date, ticker);
    }

    let renames: Vec<_> = map
        .rows()
        .windows(2)
        .filter_map(|w| map.rename_between(w[0].date, w[1].date))
        .collect();
    if !renames.is_empty() {
        println!();
        println!("Renames:");
        for r in &renames {
            println!("  {}  {} -> {}", r.date, r.old_ticker, r.new_ticker);
        }
    }
    if let Some(date) = map.delisting_date() {
        println!();
        println!("Delisted: {date}");
    }
    Ok(())
}

fn run_cache_status(data_folder: &Path) -> Result<()> {
    if !data_folder.exists() {
        println!("Data folder does not exist: {}", data_folder.display());
        return Ok(());
    }

    // <security_type>/<market>/<resolution-or-table> -> (files, bytes)
    let mut branches: BTreeMap<String, (usize, u64)> = BTreeMap::new();
    for security in read_dirs(data_folder)? {
        for market in read_dirs(&security)? {
            for branch in read_dirs(&market)? {
                let (files, bytes) = tree_size(&branch);
                let key = format!("{}/{}/{}", file_name(&security), file_name(&market), file_name(&branch));
                branches.insert(key, (files, bytes));
            }
        }
    }

    if branches.is_empty() {
        bail!("no <security_type>/<market>/<resolution> folders under {}", data_folder.display());
    }

    let total_files: usize = branches.values().map(|(f, _)| f).sum();
    let total_size: u64 = branches.values().map(|(_, b)| b).sum();
    println!("Data folder: {}", data_folder.display());
    println!("Files: {total_files}");
    println!("Total size: {}", format_size(total_size));
    println!();
    println!("{:<36} {:>8} {:>10}", "Branch", "Files", "Size");
    println!("{}", "-".repeat(56));
    for (branch, (files, bytes)) in &branches {
        println!("{:<36} {:>8} {:>10}", branch, files, format_size(*bytes));
    }
    Ok(())
}

fn read_dirs(path: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(path).with_context(|| format!("failed to read {}", path.display()))? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
}

fn tree_size(path: &Path) -> (usize, u64) {
    let mut files = 0;
    let mut size = 0u64;
    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            let Ok(meta) = entry.metadata() else { continue };
            if meta.is_dir() {
                let (f, s) = tree_size(&entry.path());
                files += f;
                size += s;
            } else {
                files += 1;
                size += meta.len();
            }
        }
    }
    (files, size)
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("=== Run Summary ===");
    println!("Run id:         {}", summary.run_id);
    println!("Subscriptions:  {}", summary.subscriptions);
    println!("Slices:         {}", summary.slice_count);
    if let (Some(first), Some(last)) = (summary.first_slice, summary.last_slice) {
        println!("Period:         {first} to {last}");
    }
    println!("Fill-forward:   {}", summary.fill_forward_points);
    println!("Aux events:     {}", summary.aux_events());
    println!("Fingerprint:    {}", summary.fingerprint);
    println!();
    println!("--- Points ---");
    for (ticker, count) in &summary.points_by_symbol {
        println!("{ticker:<14}  {count}");
    }
    for (kind, count) in &summary.points_by_kind {
        println!("{:<14}  {count}", format!("{kind:?}"));
    }
    if !summary.diagnostics.is_empty() {
        println!();
        println!("--- Diagnostics ---");
        for (kind, count) in &summary.diagnostics_by_kind {
            println!("{:<26}  {count}", format!("{kind:?}"));
        }
        for d in summary.diagnostics.iter().filter(|d| d.kind() != DiagnosticKind::Debug) {
            println!("WARNING: {}", d.message());
        }
    }
    println!();
}
