//! Slicefeed Core: subscription data pipeline.
//!
//! This crate turns data subscriptions into one time-ordered stream of slices:
//! - Domain types (symbols, resolutions, data points, slices, subscription configs)
//! - Storage access with a zip archive cache and remote downloads
//! - Factor and map files, applied as splits, dividends, renames and delistings
//! - Per-subscription readers that normalize prices as they go
//! - A synchronizer that merges many readers and live queues with fill-forward
//! - A subscription manager that adds and removes subscriptions mid-run

pub mod data;
pub mod diagnostics;
pub mod domain;
pub mod engine;
