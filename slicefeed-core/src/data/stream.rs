//! Stream readers: "read the next line" over local files, downloaded remote
//! files and polled REST endpoints.
//!
//! The reader state machine only ever sees `StreamReader`; which transport is
//! behind it is decided by `StreamReaderFactory` from the source descriptor.

use super::cache::{split_key, DataCacheProvider};
use super::circuit_breaker::CircuitBreaker;
use super::provider::DataError;
use super::source::{SubscriptionDataSource, Transport};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub trait StreamReader: Send {
    /// Next line without its terminator. `None` when nothing is available now.
    fn read_line(&mut self) -> Option<String>;

    /// True once no further line will ever be produced.
    fn end_of_stream(&self) -> bool;

    /// Release the underlying handle. Idempotent.
    fn close(&mut self);
}

/// Line reader over any byte stream.
pub struct LineStreamReader {
    inner: Option<Box<dyn BufRead + Send>>,
    peeked: Option<String>,
}

impl LineStreamReader {
    pub fn new(stream: Box<dyn Read + Send>) -> Self {
        let mut reader = Self { inner: Some(Box::new(BufReader::new(stream))), peeked: None };
        reader.fill();
        reader
    }

    fn fill(&mut self) {
        let Some(inner) = self.inner.as_mut() else {
            return;
        };
        let mut buf = Vec::new();
        match inner.read_until(b'\n', &mut buf) {
            Ok(0) => self.close(),
            Ok(_) => {
                // invalid bytes become U+FFFD; the factory rejects the line, not the stream
                let line = match String::from_utf8(buf) {
                    Ok(line) => line,
                    Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
                };
                self.peeked = Some(line.trim_end_matches(['\n', '\r']).to_string());
            }
            Err(e) => {
                warn!(error = %e, "stream read failed, ending stream");
                self.close();
            }
        }
    }
}

impl StreamReader for LineStreamReader {
    fn read_line(&mut self) -> Option<String> {
        let line = self.peeked.take()?;
        self.fill();
        Some(line)
    }

    fn end_of_stream(&self) -> bool {
        self.peeked.is_none()
    }

    fn close(&mut self) {
        self.inner = None;
    }
}

/// Download settings, loadable from the `[download]` config table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadSettings {
    #[serde(default = "default_folder")]
    pub folder: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_folder() -> PathBuf {
    std::env::temp_dir().join("slicefeed_downloads")
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            folder: default_folder(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Network side of remote sources.
pub trait RemoteSource: Send + Sync {
    /// Local path of the downloaded file, downloading it if needed.
    fn download(&self, url: &str) -> Result<PathBuf, DataError>;

    /// Body of a GET request.
    fn get_text(&self, url: &str) -> Result<String, DataError>;
}

/// Folder a URL downloads into: a BLAKE3 hash of the URL, so the same URL
/// always lands in the same place and different URLs never collide.
pub fn download_path(folder: &Path, url: &str) -> PathBuf {
    let hash = blake3::hash(url.as_bytes()).to_hex();
    let file_name = url
        .rsplit('/')
        .next()
        .map(|s| s.split(['?', '#']).next().unwrap_or(""))
        .filter(|s| !s.is_empty())
        .unwrap_or("download");
    folder.join(&hash.as_str()[..16]).join(file_name)
}

/// Blocking HTTP client guarded by a circuit breaker.
pub struct HttpRemoteSource {
    client: reqwest::blocking::Client,
    breaker: Arc<CircuitBreaker>,
    folder: PathBuf,
}

impl HttpRemoteSource {
    pub fn new(settings: &DownloadSettings, breaker: Arc<CircuitBreaker>) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(concat!("slicefeed/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, breaker, folder: settings.folder.clone() })
    }

    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, DataError> {
        if !self.breaker.is_allowed() {
            return Err(DataError::CircuitBreakerTripped);
        }
        let failed = |reason: String| DataError::DownloadFailed { url: url.to_string(), reason };
        let resp = match self.client.get(url).send() {
            Ok(resp) => resp,
            Err(e) => {
                self.breaker.record_failure();
                return Err(if e.is_connect() || e.is_timeout() {
                    DataError::NetworkUnreachable(e.to_string())
                } else {
                    failed(e.to_string())
                });
            }
        };
        let status = resp.status();
        if status == reqwest::StatusCode::FORBIDDEN || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            self.breaker.trip();
            return Err(failed(format!("HTTP {status}")));
        }
        if !status.is_success() {
            self.breaker.record_failure();
            return Err(failed(format!("HTTP {status}")));
        }
        let bytes = resp.bytes().map_err(|e| failed(e.to_string()))?;
        self.breaker.record_success();
        Ok(bytes.to_vec())
    }
}

impl RemoteSource for HttpRemoteSource {
    fn download(&self, url: &str) -> Result<PathBuf, DataError> {
        let target = download_path(&self.folder, url);
        if target.exists() {
            debug!(url, path = %target.display(), "reusing downloaded file");
            return Ok(target);
        }
        let bytes = self.get_bytes(url)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| DataError::io(parent, e))?;
        }
        // write to .part then rename; a half-written file is never reused
        let tmp = target.with_extension("part");
        fs::write(&tmp, &bytes).map_err(|e| DataError::io(&tmp, e))?;
        fs::rename(&tmp, &target).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            DataError::io(&target, e)
        })?;
        debug!(url, path = %target.display(), bytes = bytes.len(), "downloaded");
        Ok(target)
    }

    fn get_text(&self, url: &str) -> Result<String, DataError> {
        let bytes = self.get_bytes(url)?;
        String::from_utf8(bytes).map_err(|e| DataError::DownloadFailed { url: url.to_string(), reason: e.to_string() })
    }
}

/// Polls a REST endpoint. In backtests the endpoint is read once; live
/// readers poll again whenever the previous response is used up, no more
/// often than `min_interval`.
pub struct RestStreamReader {
    remote: Arc<dyn RemoteSource>,
    url: String,
    is_live: bool,
    min_interval: Duration,
    last_poll: Option<Instant>,
    buffered: VecDeque<String>,
    closed: bool,
}

impl RestStreamReader {
    pub fn new(remote: Arc<dyn RemoteSource>, url: impl Into<String>, is_live: bool, min_interval: Duration) -> Self {
        Self {
            remote,
            url: url.into(),
            is_live,
            min_interval,
            last_poll: None,
            buffered: VecDeque::new(),
            closed: false,
        }
    }

    fn poll(&mut self) {
        if let Some(last) = self.last_poll {
            let since = last.elapsed();
            if since < self.min_interval {
                std::thread::sleep(self.min_interval - since);
            }
        }
        self.last_poll = Some(Instant::now());
        match self.remote.get_text(&self.url) {
            Ok(body) => self
                .buffered
                .extend(body.lines().filter(|l| !l.trim().is_empty()).map(str::to_string)),
            Err(e) => warn!(url = %self.url, error = %e, "REST poll failed"),
        }
    }
}

impl StreamReader for RestStreamReader {
    fn read_line(&mut self) -> Option<String> {
        if self.closed {
            return None;
        }
        if self.buffered.is_empty() && (self.is_live || self.last_poll.is_none()) {
            self.poll();
        }
        self.buffered.pop_front()
    }

    fn end_of_stream(&self) -> bool {
        self.closed || (!self.is_live && self.last_poll.is_some() && self.buffered.is_empty())
    }

    fn close(&mut self) {
        self.closed = true;
        self.buffered.clear();
    }
}

/// Opens a `StreamReader` for a source descriptor.
pub struct StreamReaderFactory {
    cache: Arc<dyn DataCacheProvider>,
    remote: Option<Arc<dyn RemoteSource>>,
    poll_interval: Duration,
}

impl StreamReaderFactory {
    pub fn new(cache: Arc<dyn DataCacheProvider>, remote: Option<Arc<dyn RemoteSource>>, poll_interval: Duration) -> Self {
        Self { cache, remote, poll_interval }
    }

    pub fn cache(&self) -> &Arc<dyn DataCacheProvider> {
        &self.cache
    }

    fn open_local(&self, key: &str) -> Result<Box<dyn StreamReader>, DataError> {
        let stream = self
            .cache
            .fetch_stream(key)
            .ok_or_else(|| DataError::NotFound { path: key.to_string() })?;
        Ok(Box::new(LineStreamReader::new(stream)))
    }

    pub fn remote(&self) -> Option<&Arc<dyn RemoteSource>> {
        self.remote.as_ref()
    }

    fn require_remote(&self) -> Result<&Arc<dyn RemoteSource>, DataError> {
        self.remote
            .as_ref()
            .ok_or_else(|| DataError::Other("no remote source configured".into()))
    }

    pub fn open(&self, source: &SubscriptionDataSource, is_live: bool) -> Result<Box<dyn StreamReader>, DataError> {
        match source.transport {
            Transport::LocalFile => self.open_local(&source.path),
            Transport::RemoteFile => {
                let (url, member) = split_key(&source.path);
                let local = self.require_remote()?.download(url)?;
                let key = match member {
                    Some(m) => format!("{}#{m}", local.display()),
                    None => local.display().to_string(),
                };
                self.open_local(&key)
            }
            Transport::Rest => Ok(Box::new(RestStreamReader::new(
                Arc::clone(self.require_remote()?),
                source.path.clone(),
                is_live,
                self.poll_interval,
            ))),
        }
    }
}
