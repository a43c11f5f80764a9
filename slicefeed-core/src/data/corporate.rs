//! Corporate action store: loads factor and map files once per instrument.

use super::cache::DataCacheProvider;
use super::factor_file::FactorFile;
use super::map_file::MapFile;
use crate::domain::{SecurityType, Symbol};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub fn factor_file_path(symbol: &Symbol) -> String {
    format!(
        "{}/{}/factor_files/{}.csv",
        symbol.security_type.folder(),
        symbol.market,
        symbol.ticker.to_lowercase()
    )
}

pub fn map_file_path(symbol: &Symbol) -> String {
    format!(
        "{}/{}/map_files/{}.csv",
        symbol.security_type.folder(),
        symbol.market,
        symbol.ticker.to_lowercase()
    )
}

/// Shared, lazily filled tables. Only equities carry corporate actions;
/// every other security type gets empty tables without touching storage.
pub struct CorporateActionStore {
    cache: Arc<dyn DataCacheProvider>,
    factor_files: RwLock<HashMap<Symbol, Arc<FactorFile>>>,
    map_files: RwLock<HashMap<Symbol, Arc<MapFile>>>,
}

impl CorporateActionStore {
    pub fn new(cache: Arc<dyn DataCacheProvider>) -> Self {
        Self {
            cache,
            factor_files: RwLock::new(HashMap::new()),
            map_files: RwLock::new(HashMap::new()),
        }
    }

    pub fn factor_file(&self, symbol: &Symbol) -> Arc<FactorFile> {
        if let Some(ff) = self.factor_files.read().get(symbol) {
            return Arc::clone(ff);
        }
        let loaded = Arc::new(self.load_factor_file(symbol));
        Arc::clone(self.factor_files.write().entry(symbol.clone()).or_insert(loaded))
    }

    pub fn map_file(&self, symbol: &Symbol) -> Arc<MapFile> {
        if let Some(mf) = self.map_files.read().get(symbol) {
            return Arc::clone(mf);
        }
        let loaded = Arc::new(self.load_map_file(symbol));
        Arc::clone(self.map_files.write().entry(symbol.clone()).or_insert(loaded))
    }

    /// Install a table directly, replacing anything loaded.
    pub fn insert_factor_file(&self, symbol: Symbol, file: FactorFile) {
        self.factor_files.write().insert(symbol, Arc::new(file));
    }

    pub fn insert_map_file(&self, symbol: Symbol, file: MapFile) {
        self.map_files.write().insert(symbol, Arc::new(file));
    }

    fn load_factor_file(&self, symbol: &Symbol) -> FactorFile {
        if symbol.security_type != SecurityType::Equity {
            return FactorFile::empty();
        }
        let path = factor_file_path(symbol);
        let Some(stream) = self.cache.fetch_stream(&path) else {
            debug!(%path, "no factor file, using raw factors");
            return FactorFile::empty();
        };
        FactorFile::parse(stream).unwrap_or_else(|e| {
            warn!(%path, error = %e, "unreadable factor file, using raw factors");
            FactorFile::empty()
        })
    }

    fn load_map_file(&self, symbol: &Symbol) -> MapFile {
        if symbol.security_type != SecurityType::Equity {
            return MapFile::empty();
        }
        let path = map_file_path(symbol);
        let Some(stream) = self.cache.fetch_stream(&path) else {
            debug!(%path, "no map file");
            return MapFile::empty();
        };
        MapFile::parse(stream).unwrap_or_else(|e| {
            warn!(%path, error = %e, "unreadable map file");
            MapFile::empty()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedCache {
        body: &'static str,
        calls: AtomicUsize,
    }

    impl DataCacheProvider for FixedCache {
        fn fetch_stream(&self, key: &str) -> Option<Box<dyn Read + Send>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            key.contains("factor_files").then(|| Box::new(Cursor::new(self.body.as_bytes().to_vec())) as Box<dyn Read + Send>)
        }
    }

    #[test]
    fn paths_follow_data_layout() {
        let spy = Symbol::equity("SPY");
        assert_eq!(factor_file_path(&spy), "equity/usa/factor_files/spy.csv");
        assert_eq!(map_file_path(&spy), "equity/usa/map_files/spy.csv");
    }

    #[test]
    fn tables_are_loaded_once() {
        let cache = Arc::new(FixedCache { body: "20200101,1,1\n20200615,1,0.5\n", calls: AtomicUsize::new(0) });
        let store = CorporateActionStore::new(cache.clone());
        let spy = Symbol::equity("SPY");
        assert_eq!(store.factor_file(&spy).rows().len(), 2);
        assert_eq!(store.factor_file(&spy).rows().len(), 2);
        assert!(store.map_file(&spy).is_empty());
        assert!(store.map_file(&spy).is_empty());
        assert_eq!(cache.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn non_equities_never_hit_storage() {
        let cache = Arc::new(FixedCache { body: "", calls: AtomicUsize::new(0) });
        let store = CorporateActionStore::new(cache.clone());
        let btc = Symbol::new("BTCUSD", SecurityType::Crypto, "coinbase");
        assert!(store.factor_file(&btc).is_empty());
        assert!(store.map_file(&btc).is_empty());
        assert_eq!(cache.calls.load(Ordering::SeqCst), 0);
    }
}
