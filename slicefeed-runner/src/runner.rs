//! Run driver: wires a `RunConfig` into a data environment and a subscription
//! manager, feeds every slice to a handler, and summarizes the stream.
//!
//! Two entry points:
//! - `run()`: builds the environment from the config. Used by the CLI.
//! - `run_with_environment()`: takes a prepared environment. Used by tests
//!   and embedders that inject their own cache or result channel.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use slicefeed_core::data::{
    CircuitBreaker, CsvCustomFactory, DataEnvironment, DataError, DataFactoryRegistry, HttpRemoteSource,
    MarketHoursDatabase,
};
use slicefeed_core::diagnostics::{Diagnostic, DiagnosticKind, RecordingResultChannel};
use slicefeed_core::domain::{
    DataType, PointKind, Slice, StreamHash, SubscriptionId, SubscriptionKey, SubscriptionRequest,
};
use slicefeed_core::engine::{SubscriptionCommands, SubscriptionManager, SyncStep};

use crate::config::{ConfigError, RunConfig, RunId};

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data error: {0}")]
    Data(#[from] DataError),
    #[error("could not serialize summary: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Current schema version for persisted summaries.
pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// What the handler can do from inside `on_slice`.
pub struct RunContext {
    commands: SubscriptionCommands,
    stop: bool,
}

impl RunContext {
    /// Subscribe; takes effect from the next slice.
    pub fn subscribe(&self, request: SubscriptionRequest) {
        self.commands.add(request);
    }

    pub fn unsubscribe(&self, key: SubscriptionKey) {
        self.commands.remove_key(key);
    }

    pub fn unsubscribe_id(&self, id: SubscriptionId) {
        self.commands.remove(id);
    }

    /// End the run after this slice.
    pub fn stop(&mut self) {
        self.stop = true;
    }
}

/// Strategy callback.
pub trait SliceHandler {
    fn on_slice(&mut self, slice: &Slice, ctx: &mut RunContext);
}

/// Handler that only lets the summary count.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHandler;

impl SliceHandler for NullHandler {
    fn on_slice(&mut self, _slice: &Slice, _ctx: &mut RunContext) {}
}

impl<F: FnMut(&Slice, &mut RunContext)> SliceHandler for F {
    fn on_slice(&mut self, slice: &Slice, ctx: &mut RunContext) {
        self(slice, ctx)
    }
}

/// Aggregate view of one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub run_id: RunId,
    pub subscriptions: usize,
    pub slice_count: usize,
    pub first_slice: Option<NaiveDateTime>,
    pub last_slice: Option<NaiveDateTime>,
    /// Points per ticker, fill-forward copies included.
    pub points_by_symbol: BTreeMap<String, usize>,
    pub points_by_kind: BTreeMap<PointKind, usize>,
    pub fill_forward_points: usize,
    pub diagnostics_by_kind: BTreeMap<DiagnosticKind, usize>,
    pub diagnostics: Vec<Diagnostic>,
    /// BLAKE3 over the serialized slice stream. Equal for equal streams.
    pub fingerprint: StreamHash,
}

impl RunSummary {
    pub fn to_json(&self) -> Result<String, RunError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn aux_events(&self) -> usize {
        [PointKind::Split, PointKind::Dividend, PointKind::Delisting, PointKind::SymbolChanged]
            .iter()
            .map(|k| self.points_by_kind.get(k).copied().unwrap_or(0))
            .sum()
    }
}

struct SummaryBuilder {
    hasher: blake3::Hasher,
    slice_count: usize,
    first: Option<NaiveDateTime>,
    last: Option<NaiveDateTime>,
    by_symbol: BTreeMap<String, usize>,
    by_kind: BTreeMap<PointKind, usize>,
    fill_forward: usize,
}

impl SummaryBuilder {
    fn new() -> Self {
        Self {
            hasher: blake3::Hasher::new(),
            slice_count: 0,
            first: None,
            last: None,
            by_symbol: BTreeMap::new(),
            by_kind: BTreeMap::new(),
            fill_forward: 0,
        }
    }

    fn record(&mut self, slice: &Slice) -> Result<(), RunError> {
        self.hasher.update(&serde_json::to_vec(slice)?);
        self.slice_count += 1;
        self.first.get_or_insert(slice.time);
        self.last = Some(slice.time);
        for p in slice.iter() {
            *self.by_symbol.entry(p.symbol.ticker.clone()).or_default() += 1;
            *self.by_kind.entry(p.kind()).or_default() += 1;
            if p.is_fill_forward {
                self.fill_forward += 1;
            }
        }
        Ok(())
    }

    fn finish(self, run_id: RunId, subscriptions: usize, diagnostics: Vec<Diagnostic>) -> RunSummary {
        let mut diagnostics_by_kind = BTreeMap::new();
        for d in &diagnostics {
            *diagnostics_by_kind.entry(d.kind()).or_default() += 1;
        }
        RunSummary {
            schema_version: SCHEMA_VERSION,
            run_id,
            subscriptions,
            slice_count: self.slice_count,
            first_slice: self.first,
            last_slice: self.last,
            points_by_symbol: self.by_symbol,
            points_by_kind: self.by_kind,
            fill_forward_points: self.fill_forward,
            diagnostics_by_kind,
            diagnostics,
            fingerprint: StreamHash(self.hasher.finalize().to_hex().to_string()),
        }
    }
}

/// Environment for `config`: local data folder behind the zip cache, custom
/// factories, holidays, optional remote downloads.
pub fn build_environment(config: &RunConfig, results: Arc<RecordingResultChannel>) -> Result<DataEnvironment, RunError> {
    let mut factories = DataFactoryRegistry::with_builtin();
    for spec in &config.custom_data {
        factories.register(DataType::Custom(spec.name.clone()), Arc::new(CsvCustomFactory::new(spec.clone())));
    }

    let mut env = DataEnvironment::local(&config.data_folder, &config.cache)
        .with_factories(factories)
        .with_market_hours(MarketHoursDatabase::new(config.holidays.iter().copied()))
        .with_results(results)
        .with_settings(config.reader.clone());

    if let Some(download) = &config.download {
        let remote = HttpRemoteSource::new(download, Arc::new(CircuitBreaker::for_downloads()))?;
        env = env.with_remote(Arc::new(remote));
    }
    Ok(env)
}

/// Run `config` end to end.
pub fn run(config: &RunConfig, handler: &mut dyn SliceHandler) -> Result<RunSummary, RunError> {
    config.validate()?;
    let results = Arc::new(RecordingResultChannel::new());
    let env = build_environment(config, Arc::clone(&results))?;
    run_with_environment(config, env, results, handler)
}

/// Run with a prepared environment. `results` must be the channel `env`
/// reports to; its diagnostics end up in the summary.
pub fn run_with_environment(
    config: &RunConfig,
    env: DataEnvironment,
    results: Arc<RecordingResultChannel>,
    handler: &mut dyn SliceHandler,
) -> Result<RunSummary, RunError> {
    let mut manager = if config.live { SubscriptionManager::live(env) } else { SubscriptionManager::new(env) };
    let requests = config.requests();
    let added = manager.add_many(requests);
    for outcome in &added {
        if let Err(e) = outcome {
            warn!(error = %e, "subscription rejected");
        }
    }
    info!(
        run_id = %config.run_id(),
        subscriptions = manager.len(),
        live = config.live,
        "run started"
    );

    let end = config.end_time();
    let mut ctx = RunContext { commands: manager.commands(), stop: false };
    let mut summary = SummaryBuilder::new();
    loop {
        match manager.step() {
            SyncStep::Slice(slice) => {
                if config.live && slice.time > end {
                    break;
                }
                summary.record(&slice)?;
                handler.on_slice(&slice, &mut ctx);
                if ctx.stop {
                    break;
                }
            }
            SyncStep::Idle => std::thread::sleep(Duration::from_millis(10)),
            SyncStep::Finished => break,
        }
    }

    let summary = summary.finish(config.run_id(), manager.len(), results.diagnostics());
    info!(
        slices = summary.slice_count,
        fingerprint = %summary.fingerprint,
        diagnostics = summary.diagnostics.len(),
        "run finished"
    );
    Ok(summary)
}
