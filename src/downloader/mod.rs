//! Downloader abstraction: one trait over every download backend.
//!
//! - [`DownloaderClient`] - uniform operations over a single configured backend
//! - [`registry`] - type tag to builder function mapping
//! - [`manager`] - cache of live, connectivity-tested clients
//! - [`qbittorrent`] - qBittorrent Web API v2 adapter
//!
//! Adding a backend means writing one adapter plus one registry entry. The worker
//! only ever talks to `Arc<dyn DownloaderClient>`.

pub mod manager;
pub mod qbittorrent;
pub mod registry;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

pub use manager::Manager;
pub use registry::{Builder, Registry};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{DownloaderError, Result};
use crate::types::{InstanceId, Protocol};

/// Backend kinds the registry can know about
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloaderType {
    /// qBittorrent Web API v2
    Qbittorrent,
    /// SABnzbd (no adapter yet)
    Sabnzbd,
    /// NZBGet (no adapter yet)
    Nzbget,
}

impl DownloaderType {
    /// Type tag as stored in downloader configs
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloaderType::Qbittorrent => "qbittorrent",
            DownloaderType::Sabnzbd => "sabnzbd",
            DownloaderType::Nzbget => "nzbget",
        }
    }
}

impl std::fmt::Display for DownloaderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored configuration of one downloader instance
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfigRecord {
    /// Instance identity
    pub id: InstanceId,
    /// Type tag, e.g. "qbittorrent"
    pub kind: String,
    /// Base URL of the backend
    pub url: String,
    /// Login user
    pub username: Option<String>,
    /// Login password
    pub password: Option<String>,
    /// Type-specific JSON config
    pub config: Option<serde_json::Value>,
}

/// Link submitted to a backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadLink {
    /// Magnet URI or URL of a .torrent file
    Torrent(String),
    /// URL of an NZB file
    Usenet(String),
}

impl DownloadLink {
    /// Build a link for a job's protocol
    pub fn new(protocol: Protocol, link: impl Into<String>) -> Self {
        match protocol {
            Protocol::Torrent => DownloadLink::Torrent(link.into()),
            Protocol::Usenet => DownloadLink::Usenet(link.into()),
        }
    }

    /// The raw link
    pub fn as_str(&self) -> &str {
        match self {
            DownloadLink::Torrent(s) | DownloadLink::Usenet(s) => s,
        }
    }
}

/// Parameters of an add call
#[derive(Clone, Debug)]
pub struct AddRequest {
    /// What to download
    pub link: DownloadLink,
    /// Backend category
    pub category: Option<String>,
    /// Tags applied after the add
    pub tags: Vec<String>,
    /// Add without starting
    pub paused: bool,
    /// Download directory, if the backend supports choosing one
    pub save_path: Option<String>,
}

impl AddRequest {
    /// Request with no optional settings
    pub fn new(link: DownloadLink) -> Self {
        Self {
            link,
            category: None,
            tags: Vec::new(),
            paused: false,
            save_path: None,
        }
    }
}

/// Outcome of an add call
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddResult {
    /// Backend identifier (torrent infohash, NZB id, ...)
    pub external_id: String,
    /// Best-effort display name
    pub name: String,
}

/// Backend item status folded into a small closed set
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Waiting in the backend queue
    Queued,
    /// Transferring
    Downloading,
    /// Finished, not seeding
    Completed,
    /// Finished and seeding
    Seeding,
    /// Paused
    Paused,
    /// Backend reports an error
    Errored,
    /// Anything unrecognized
    Unknown,
}

impl ItemStatus {
    /// String form
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Queued => "queued",
            ItemStatus::Downloading => "downloading",
            ItemStatus::Completed => "completed",
            ItemStatus::Seeding => "seeding",
            ItemStatus::Paused => "paused",
            ItemStatus::Errored => "errored",
            ItemStatus::Unknown => "unknown",
        }
    }
}

/// One item (torrent, NZB) as the backend sees it
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Item {
    /// Backend identifier
    pub external_id: String,
    /// Display name
    pub name: String,
    /// Unified status
    pub status: ItemStatus,
    /// Backend-native status string
    pub native_status: String,
    /// Progress fraction (0.0-1.0)
    pub progress: f64,
    /// Save directory as seen by the backend
    pub save_path: String,
    /// Content root as seen by the backend
    pub content_path: String,
    /// Unix timestamp of when the item was added
    pub added_at: i64,
    /// Reason reported alongside an `Errored` status
    pub error: Option<String>,
}

/// One file inside an item
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Path, relative to the item root where possible
    pub path: String,
    /// Size in bytes
    pub size: i64,
    /// Progress fraction (0.0-1.0)
    pub progress: f64,
    /// Backend priority
    pub priority: i32,
}

/// Result of a connectivity test
///
/// Failures a user can fix (wrong URL, wrong password) are reported here with
/// `success = false` rather than as an `Err`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    /// Whether the backend is reachable and accepts the credentials
    pub success: bool,
    /// Success message
    pub message: Option<String>,
    /// User-facing failure reason
    pub error: Option<String>,
    /// Application version
    pub version: Option<String>,
    /// Web API version
    pub web_api_version: Option<String>,
    /// Round-trip time of the test in milliseconds
    pub latency_ms: Option<u64>,
}

impl TestResult {
    /// Failed test with a user-facing reason
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

fn unsupported<T>(op: &str) -> Result<T> {
    Err(DownloaderError::Unsupported(op.to_string()).into())
}

/// Uniform operations over one configured download backend
///
/// `list`, `list_files`, `pause`, `resume` and `remove` are optional; the default
/// implementations report [`DownloaderError::Unsupported`].
#[async_trait]
pub trait DownloaderClient: Send + Sync {
    /// Backend kind
    fn downloader_type(&self) -> DownloaderType;

    /// Configured instance this client belongs to
    fn instance_id(&self) -> &InstanceId;

    /// Connectivity, authentication and version check
    async fn test(&self) -> Result<TestResult>;

    /// Submit a link
    async fn add(&self, request: &AddRequest) -> Result<AddResult>;

    /// Current state of one item
    async fn get(&self, external_id: &str) -> Result<Item>;

    /// Current state of every item
    async fn list(&self) -> Result<Vec<Item>> {
        unsupported("list")
    }

    /// Files inside one item
    async fn list_files(&self, external_id: &str) -> Result<Vec<RemoteFile>> {
        let _ = external_id;
        unsupported("list_files")
    }

    /// Pause one item
    async fn pause(&self, external_id: &str) -> Result<()> {
        let _ = external_id;
        unsupported("pause")
    }

    /// Resume one item
    async fn resume(&self, external_id: &str) -> Result<()> {
        let _ = external_id;
        unsupported("resume")
    }

    /// Remove one item, optionally with its data
    async fn remove(&self, external_id: &str, delete_data: bool) -> Result<()> {
        let _ = (external_id, delete_data);
        unsupported("remove")
    }
}
