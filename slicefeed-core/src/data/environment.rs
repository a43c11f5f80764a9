//! Everything a reader needs from the outside world, built once at bootstrap.

use super::cache::{CacheSettings, DataCacheProvider, ZipDataCacheProvider};
use super::calendar::MarketHoursDatabase;
use super::corporate::CorporateActionStore;
use super::factory::DataFactoryRegistry;
use super::filter::{AcceptAll, ContentFilter};
use super::provider::LocalDiskProvider;
use super::stream::{RemoteSource, StreamReaderFactory};
use crate::diagnostics::{LogResultChannel, ResultChannel};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn default_live_max_empty_days() -> u32 {
    30
}

fn default_min_price_scale_factor() -> f64 {
    1e-5
}

fn default_poll_interval_ms() -> u64 {
    1000
}

/// Reader tuning, loadable from the `[reader]` config table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaderSettings {
    /// Consecutive dates without a source before a historical reader gives
    /// up. `None` lets the requested date range bound the scan.
    #[serde(default)]
    pub max_empty_days: Option<u32>,
    #[serde(default = "default_live_max_empty_days")]
    pub live_max_empty_days: u32,
    /// Price scale factors below this are too small to rescale prices with.
    #[serde(default = "default_min_price_scale_factor")]
    pub min_price_scale_factor: f64,
    /// Minimum gap between two REST polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            max_empty_days: None,
            live_max_empty_days: default_live_max_empty_days(),
            min_price_scale_factor: default_min_price_scale_factor(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Injected collaborators shared by all readers.
#[derive(Clone)]
pub struct DataEnvironment {
    pub cache: Arc<dyn DataCacheProvider>,
    pub corporate: Arc<CorporateActionStore>,
    pub factories: Arc<DataFactoryRegistry>,
    pub market_hours: Arc<MarketHoursDatabase>,
    pub streams: Arc<StreamReaderFactory>,
    pub results: Arc<dyn ResultChannel>,
    pub filter: Arc<dyn ContentFilter>,
    pub settings: ReaderSettings,
}

impl DataEnvironment {
    /// Built-in factories, default calendar, logging result channel, no filter.
    pub fn new(cache: Arc<dyn DataCacheProvider>) -> Self {
        let settings = ReaderSettings::default();
        Self {
            corporate: Arc::new(CorporateActionStore::new(Arc::clone(&cache))),
            factories: Arc::new(DataFactoryRegistry::with_builtin()),
            market_hours: Arc::new(MarketHoursDatabase::default()),
            streams: Arc::new(StreamReaderFactory::new(
                Arc::clone(&cache),
                None,
                Duration::from_millis(settings.poll_interval_ms),
            )),
            results: Arc::new(LogResultChannel),
            filter: Arc::new(AcceptAll),
            settings,
            cache,
        }
    }

    /// Local data folder behind a zip cache provider.
    pub fn local(data_folder: impl Into<PathBuf>, cache_settings: &CacheSettings) -> Self {
        let storage = Arc::new(LocalDiskProvider::new(data_folder));
        Self::new(Arc::new(ZipDataCacheProvider::new(storage, cache_settings)))
    }

    pub fn with_factories(mut self, factories: DataFactoryRegistry) -> Self {
        self.factories = Arc::new(factories);
        self
    }

    pub fn with_market_hours(mut self, market_hours: MarketHoursDatabase) -> Self {
        self.market_hours = Arc::new(market_hours);
        self
    }

    pub fn with_results(mut self, results: Arc<dyn ResultChannel>) -> Self {
        self.results = results;
        self
    }

    pub fn with_filter(mut self, filter: Arc<dyn ContentFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_settings(mut self, settings: ReaderSettings) -> Self {
        self.settings = settings;
        self.streams = Arc::new(StreamReaderFactory::new(
            Arc::clone(&self.cache),
            self.streams.remote().cloned(),
            Duration::from_millis(self.settings.poll_interval_ms),
        ));
        self
    }

    /// Enable remote-file and REST transports.
    pub fn with_remote(mut self, remote: Arc<dyn RemoteSource>) -> Self {
        self.streams = Arc::new(StreamReaderFactory::new(
            Arc::clone(&self.cache),
            Some(remote),
            Duration::from_millis(self.settings.poll_interval_ms),
        ));
        self
    }
}
