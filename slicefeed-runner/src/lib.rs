//! Slicefeed Runner: run orchestration on top of `slicefeed-core`.
//!
//! - TOML run configuration with content-addressed run ids
//! - Logging setup (`tracing-subscriber`, pretty/compact/json)
//! - The run loop: subscriptions in, slices to a handler, summary out
//! - JSON summary and CSV slice export
//! - Deterministic synthetic data folders for development

pub mod config;
pub mod export;
pub mod logging;
pub mod runner;
pub mod synthetic;

pub use config::{ConfigError, RunConfig, RunId, SubscriptionEntry};
pub use export::{export_json, import_json, write_json, CsvSliceWriter};
pub use logging::{init_logging, LogConfig, LogFormat, LoggingError};
pub use runner::{
    build_environment, run, run_with_environment, NullHandler, RunContext, RunError, RunSummary, SliceHandler,
    SCHEMA_VERSION,
};
pub use synthetic::{generate, SynthError, SynthOptions, SynthReport};
