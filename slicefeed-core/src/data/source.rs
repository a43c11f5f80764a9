//! Where one date's data for a subscription comes from.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transport medium of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// A path understood by the cache provider, possibly `archive.zip#member`.
    #[default]
    LocalFile,
    /// An http(s) URL downloaded once into the download folder.
    RemoteFile,
    /// An http(s) endpoint polled for new lines.
    Rest,
}

/// How lines of a source turn into points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    /// One point (or none) per line.
    #[default]
    Csv,
    /// One line may unfold into many points.
    Collection,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionDataSource {
    pub path: String,
    pub transport: Transport,
    #[serde(default)]
    pub format: FileFormat,
}

impl SubscriptionDataSource {
    pub fn local(path: impl Into<String>) -> Self {
        Self { path: path.into(), transport: Transport::LocalFile, format: FileFormat::Csv }
    }

    pub fn remote(url: impl Into<String>) -> Self {
        Self { path: url.into(), transport: Transport::RemoteFile, format: FileFormat::Csv }
    }

    pub fn rest(url: impl Into<String>) -> Self {
        Self { path: url.into(), transport: Transport::Rest, format: FileFormat::Csv }
    }

    pub fn with_format(mut self, format: FileFormat) -> Self {
        self.format = format;
        self
    }
}

impl fmt::Display for SubscriptionDataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.transport, self.path)
    }
}
