//! Data access: storage, archive cache, corporate action tables, stream
//! readers, parsers and the injected environment readers run in.

pub mod cache;
pub mod calendar;
pub mod circuit_breaker;
pub mod corporate;
pub mod custom;
pub mod environment;
pub mod factor_file;
pub mod factory;
pub mod filter;
pub mod lean;
pub mod map_file;
pub mod provider;
pub mod source;
pub mod stream;

pub use cache::{CacheSettings, CacheStats, DataCacheProvider, MemoryCacheProvider, ZipDataCacheProvider};
pub use calendar::{ExchangeHours, MarketHours, MarketHoursDatabase, Session};
pub use circuit_breaker::CircuitBreaker;
pub use corporate::CorporateActionStore;
pub use custom::{CsvCustomFactory, CustomDataSpec};
pub use environment::{DataEnvironment, ReaderSettings};
pub use factor_file::{FactorEvent, FactorEventKind, FactorFile, FactorRow};
pub use factory::{DataFactory, DataFactoryRegistry, ParseError};
pub use filter::{AcceptAll, ContentFilter, FilterError, FnFilter};
pub use map_file::{MapFile, MapRow, Rename};
pub use provider::{DataError, LocalDiskProvider, StorageProvider};
pub use source::{FileFormat, SubscriptionDataSource, Transport};
pub use stream::{DownloadSettings, HttpRemoteSource, RemoteSource, StreamReader, StreamReaderFactory};
