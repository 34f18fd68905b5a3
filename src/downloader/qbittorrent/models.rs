//! Wire models of the qBittorrent Web API v2.

use serde::Deserialize;

/// Entry of `GET /api/v2/torrents/info`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TorrentInfo {
    /// Torrent infohash
    pub hash: String,
    /// Torrent name
    pub name: String,
    /// Native state string
    pub state: String,
    /// Progress (0.0-1.0)
    pub progress: f64,
    /// Save directory
    pub save_path: String,
    /// Content root (file or top directory)
    pub content_path: String,
    /// Unix timestamp the torrent was added
    pub added_on: i64,
}

/// Entry of `GET /api/v2/torrents/files`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TorrentFile {
    /// Path relative to the torrent root
    pub name: String,
    /// Size in bytes
    pub size: i64,
    /// Progress (0.0-1.0)
    pub progress: f64,
    /// File priority (0 = skip)
    pub priority: i32,
}

/// Torrent source for `POST /api/v2/torrents/add`
#[derive(Debug, Clone)]
pub enum AddSource {
    /// Magnet URI, sent in the `urls` field
    Url(String),
    /// Downloaded .torrent file, uploaded as multipart `torrents`
    File {
        /// Raw file contents
        bytes: Vec<u8>,
        /// File name for the multipart part
        filename: String,
    },
}

/// Optional add parameters
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    /// Download directory
    pub save_path: Option<String>,
    /// Category
    pub category: Option<String>,
    /// Add paused
    pub paused: bool,
}
