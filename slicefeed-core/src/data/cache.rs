//! Data cache provider: `fetch_stream` over plain files and zip archive members.
//!
//! Keys are `path` or `path#member`. Plain files go straight to the storage
//! provider. Zip archives are fetched once, their central directory parsed,
//! and the parsed archive kept in memory until it has not been touched for a
//! TTL (10 seconds by default). Archives the storage reported missing are
//! remembered for the same TTL so repeated lookups skip storage. A background
//! thread sweeps expired entries; `sweep_expired` runs the same pass on demand.
//!
//! A `ZipArchive` reader is stateful, so each cached archive sits behind its
//! own mutex. The map of archives is behind a `RwLock` so lookups from
//! several set-up threads do not serialize on each other.

use super::provider::{DataError, StorageProvider};
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};
use zip::ZipArchive;

/// Something that hands out byte streams by key.
pub trait DataCacheProvider: Send + Sync {
    /// `None` means "no data": missing file, missing member or a corrupt archive.
    fn fetch_stream(&self, key: &str) -> Option<Box<dyn Read + Send>>;
}

/// Cache settings, loadable from the `[cache]` config table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_true")]
    pub background_sweep: bool,
}

fn default_ttl_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { ttl_secs: default_ttl_secs(), background_sweep: true }
    }
}

/// Split `path#member` into its parts.
pub fn split_key(key: &str) -> (&str, Option<&str>) {
    match key.split_once('#') {
        Some((path, member)) if !member.is_empty() => (path, Some(member)),
        Some((path, _)) => (path, None),
        None => (key, None),
    }
}

/// Upper bound on the buffer reserved from a member's declared size.
const MAX_PREALLOC: usize = 64 * 1024 * 1024;

/// Initial capacity for a member declaring `size` bytes. The header is not
/// trusted beyond `MAX_PREALLOC`; larger members grow the buffer as read.
fn preallocation(size: u64) -> usize {
    usize::try_from(size).unwrap_or(usize::MAX).min(MAX_PREALLOC)
}

fn is_archive(path: &str) -> bool {
    path.to_ascii_lowercase().ends_with(".zip")
}

struct CachedArchive {
    archive: Mutex<ZipArchive<Cursor<Vec<u8>>>>,
    last_access: Mutex<Instant>,
}

impl CachedArchive {
    fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.last_access.lock().elapsed() > ttl
    }

    /// Decompress one member fully. No member name means the first entry.
    fn read_member(&self, path: &str, member: Option<&str>) -> Result<Vec<u8>, DataError> {
        let mut archive = self.archive.lock();
        let mut file = match member {
            Some(name) => archive.by_name(name).map_err(|e| match e {
                zip::result::ZipError::FileNotFound => DataError::MemberNotFound {
                    path: path.to_string(),
                    member: name.to_string(),
                },
                other => DataError::CorruptArchive { path: path.to_string(), reason: other.to_string() },
            })?,
            None => archive.by_index(0).map_err(|_| DataError::MemberNotFound {
                path: path.to_string(),
                member: "<first entry>".to_string(),
            })?,
        };
        let mut buf = Vec::with_capacity(preallocation(file.size()));
        file.read_to_end(&mut buf)
            .map_err(|e| DataError::CorruptArchive { path: path.to_string(), reason: e.to_string() })?;
        Ok(buf)
    }
}

/// Counters for cache behaviour.
#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    storage_fetches: AtomicU64,
    evictions: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub storage_fetches: u64,
    pub evictions: u64,
}

type ArchiveMap = Arc<RwLock<HashMap<String, Arc<CachedArchive>>>>;
/// Archive paths the storage reported missing, with when it did.
type MissingMap = Arc<RwLock<HashMap<String, Instant>>>;

fn evict_expired(entries: &ArchiveMap, missing: &MissingMap, ttl: Duration, counters: &CacheCounters) -> usize {
    missing.write().retain(|_, seen| seen.elapsed() <= ttl);
    let mut map = entries.write();
    let before = map.len();
    map.retain(|path, archive| {
        let keep = !archive.is_expired(ttl);
        if !keep {
            debug!(path = %path, "evicting cached archive");
        }
        keep
    });
    let evicted = before - map.len();
    counters.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
    evicted
}

struct Sweeper {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        // Dropping the sender disconnects the channel and ends the loop.
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("zip cache sweeper thread panicked");
            }
        }
    }
}

/// Zip-aware cache provider.
pub struct ZipDataCacheProvider {
    storage: Arc<dyn StorageProvider>,
    entries: ArchiveMap,
    missing: MissingMap,
    ttl: Duration,
    counters: Arc<CacheCounters>,
    sweeper: Option<Sweeper>,
}

impl ZipDataCacheProvider {
    pub fn new(storage: Arc<dyn StorageProvider>, settings: &CacheSettings) -> Self {
        Self::with_ttl(storage, Duration::from_secs(settings.ttl_secs), settings.background_sweep)
    }

    pub fn with_ttl(storage: Arc<dyn StorageProvider>, ttl: Duration, background_sweep: bool) -> Self {
        let entries: ArchiveMap = Arc::new(RwLock::new(HashMap::new()));
        let missing: MissingMap = Arc::new(RwLock::new(HashMap::new()));
        let counters = Arc::new(CacheCounters::default());
        let sweeper = if background_sweep {
            spawn_sweeper(Arc::clone(&entries), Arc::clone(&missing), ttl, Arc::clone(&counters))
        } else {
            None
        };
        Self { storage, entries, missing, ttl, counters, sweeper }
    }

    /// Evict archives untouched for longer than the TTL. Returns how many went.
    pub fn sweep_expired(&self) -> usize {
        evict_expired(&self.entries, &self.missing, self.ttl, &self.counters)
    }

    /// Number of archives currently held.
    pub fn cached_archives(&self) -> usize {
        self.entries.read().len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            storage_fetches: self.counters.storage_fetches.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }

    pub fn has_background_sweeper(&self) -> bool {
        self.sweeper.is_some()
    }

    /// Drop every cached archive and every remembered miss.
    pub fn clear(&self) {
        self.entries.write().clear();
        self.missing.write().clear();
    }

    fn known_missing(&self, path: &str) -> bool {
        self.missing.read().get(path).is_some_and(|seen| seen.elapsed() <= self.ttl)
    }

    fn archive(&self, path: &str) -> Option<Arc<CachedArchive>> {
        if let Some(hit) = self.entries.read().get(path).cloned() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            hit.touch();
            debug!(path, "zip cache hit");
            return Some(hit);
        }
        if self.known_missing(path) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!(path, "archive known missing");
            return None;
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        let bytes = match self.fetch_bytes(path) {
            Ok(b) => b,
            Err(DataError::NotFound { .. }) => {
                debug!(path, "archive not found");
                self.missing.write().insert(path.to_string(), Instant::now());
                return None;
            }
            Err(e) => {
                warn!(path, error = %e, "storage fetch failed");
                return None;
            }
        };

        let archive = match ZipArchive::new(Cursor::new(bytes)) {
            Ok(a) => a,
            Err(e) => {
                error!(path, error = %e, "corrupt archive, treating as no data");
                return None;
            }
        };

        let cached = Arc::new(CachedArchive {
            archive: Mutex::new(archive),
            last_access: Mutex::new(Instant::now()),
        });
        // Another thread may have parsed the same archive meanwhile; keep the first.
        let mut map = self.entries.write();
        Some(Arc::clone(map.entry(path.to_string()).or_insert(cached)))
    }

    fn fetch_bytes(&self, path: &str) -> Result<Vec<u8>, DataError> {
        self.counters.storage_fetches.fetch_add(1, Ordering::Relaxed);
        let mut stream = self.storage.fetch(path)?;
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes).map_err(|e| DataError::io(path, e))?;
        Ok(bytes)
    }
}

fn spawn_sweeper(entries: ArchiveMap, missing: MissingMap, ttl: Duration, counters: Arc<CacheCounters>) -> Option<Sweeper> {
    let (tx, rx) = channel::bounded::<()>(0);
    let spawned = std::thread::Builder::new()
        .name("zip-cache-sweeper".into())
        .spawn(move || loop {
            match rx.recv_timeout(ttl) {
                Err(RecvTimeoutError::Timeout) => {
                    evict_expired(&entries, &missing, ttl, &counters);
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });
    match spawned {
        Ok(handle) => Some(Sweeper { stop: Some(tx), handle: Some(handle) }),
        Err(e) => {
            warn!(error = %e, "could not start zip cache sweeper, relying on manual sweeps");
            None
        }
    }
}

impl DataCacheProvider for ZipDataCacheProvider {
    fn fetch_stream(&self, key: &str) -> Option<Box<dyn Read + Send>> {
        let (path, member) = split_key(key);
        if !is_archive(path) {
            return match self.storage.fetch(path) {
                Ok(stream) => Some(stream),
                Err(e) => {
                    debug!(path, error = %e, "no stream");
                    None
                }
            };
        }

        let archive = self.archive(path)?;
        match archive.read_member(path, member) {
            Ok(bytes) => Some(Box::new(Cursor::new(bytes))),
            Err(e @ DataError::CorruptArchive { .. }) => {
                error!(key, error = %e, "corrupt archive member, treating as no data");
                None
            }
            Err(e) => {
                debug!(key, error = %e, "archive member unavailable");
                None
            }
        }
    }
}

impl Drop for ZipDataCacheProvider {
    fn drop(&mut self) {
        self.sweeper.take();
        self.clear();
    }
}

/// Keys mapped straight to contents, for fixtures and benchmarks.
#[derive(Debug, Default)]
pub struct MemoryCacheProvider {
    entries: RwLock<HashMap<String, Arc<Vec<u8>>>>,
}

impl MemoryCacheProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.entries.write().insert(key.into(), Arc::new(contents.into()));
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl DataCacheProvider for MemoryCacheProvider {
    fn fetch_stream(&self, key: &str) -> Option<Box<dyn Read + Send>> {
        let bytes = self.entries.read().get(key).cloned()?;
        Some(Box::new(Cursor::new(bytes.as_ref().clone())))
    }
}
