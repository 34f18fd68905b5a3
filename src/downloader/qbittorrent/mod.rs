//! qBittorrent adapter (Web API v2)
//!
//! Authenticates with a form login and the `SID` session cookie. Every call runs
//! inside a short retry loop that drops the session and logs in again when the
//! server rejects it.
//!
//! Adding a magnet link yields its infohash directly. Adding a `.torrent` URL
//! cannot, so the file is fetched and uploaded, and the new torrent is found by
//! diffing the torrent list before and after the upload.

mod api;
pub mod magnet;
pub mod models;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use self::api::WebApi;
use self::models::{AddOptions, AddSource, TorrentFile, TorrentInfo};
use super::{
    AddRequest, AddResult, ConfigRecord, DownloadLink, DownloaderClient, DownloaderType, Item,
    ItemStatus, Registry, RemoteFile, TestResult,
};
use crate::config::RetryConfig;
use crate::error::{DownloaderError, Error, Result};
use crate::retry::with_retry;
use crate::types::InstanceId;

const UNREACHABLE_MESSAGE: &str =
    "Unable to connect to qBittorrent. Check if qBittorrent is running and the URL is correct.";
const AUTH_FAILED_MESSAGE: &str = "Authentication failed - check username and password";

/// Type-specific settings read from the downloader's JSON config
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QbittorrentConfig {
    /// HTTP request timeout in seconds
    pub timeout_secs: u64,
    /// Extra attempts after a failed call (0 = no retry)
    pub max_retries: u32,
    /// Pause between attempts in milliseconds
    pub retry_delay_ms: u64,
    /// How many times to poll the torrent list when identifying an uploaded file
    pub identify_poll_attempts: u32,
    /// Pause between identification polls in milliseconds
    pub identify_poll_interval_ms: u64,
}

impl Default for QbittorrentConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 2,
            retry_delay_ms: 1000,
            identify_poll_attempts: 10,
            identify_poll_interval_ms: 500,
        }
    }
}

impl QbittorrentConfig {
    /// Parse the optional JSON config; missing keys keep their defaults
    pub fn from_value(value: Option<&serde_json::Value>) -> Result<Self> {
        match value {
            None | Some(serde_json::Value::Null) => Ok(Self::default()),
            Some(v) => serde_json::from_value(v.clone()).map_err(|e| {
                Error::permanent(Error::Config {
                    message: format!("invalid qBittorrent config: {e}"),
                    key: None,
                })
            }),
        }
    }
}

/// Register the qBittorrent builder
pub fn register(registry: &mut Registry) {
    registry.register_type(DownloaderType::Qbittorrent, |record: &ConfigRecord| {
        let client = QbittorrentClient::from_record(record)?;
        Ok(Arc::new(client) as Arc<dyn DownloaderClient>)
    });
}

/// Map a native torrent state onto [`ItemStatus`]
pub fn map_state(state: &str) -> ItemStatus {
    match state {
        "downloading" | "metaDL" | "forcedMetaDL" | "stalledDL" | "checkingDL" | "forcedDL"
        | "allocating" => ItemStatus::Downloading,
        "uploading" | "stalledUP" | "checkingUP" | "forcedUP" | "seeding" => ItemStatus::Seeding,
        "completed" => ItemStatus::Completed,
        "pausedDL" | "pausedUP" | "stoppedDL" | "stoppedUP" => ItemStatus::Paused,
        "queuedDL" | "queuedUP" | "queuedForChecking" | "checkingResumeData" | "moving" => {
            ItemStatus::Queued
        }
        "error" | "missingFiles" => ItemStatus::Errored,
        _ => ItemStatus::Unknown,
    }
}

/// Client for one qBittorrent instance
pub struct QbittorrentClient {
    id: InstanceId,
    api: WebApi,
    retry: RetryConfig,
    config: QbittorrentConfig,
}

impl QbittorrentClient {
    /// Build a client from a stored config record
    ///
    /// No network traffic happens here; the first call logs in.
    pub fn from_record(record: &ConfigRecord) -> Result<Self> {
        if record.url.trim().is_empty() {
            return Err(Error::permanent(Error::Config {
                message: "qBittorrent URL is required".into(),
                key: Some("url".into()),
            }));
        }

        let config = QbittorrentConfig::from_value(record.config.as_ref())?;
        let api = WebApi::new(
            &record.url,
            record.username.as_deref(),
            record.password.as_deref(),
            Duration::from_secs(config.timeout_secs),
        )?;

        Ok(Self {
            id: record.id.clone(),
            api,
            retry: RetryConfig::fixed(
                config.max_retries,
                Duration::from_millis(config.retry_delay_ms),
            ),
            config,
        })
    }

    /// Run an API call with login and session recovery
    async fn session<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let api = &self.api;
        let op = &op;
        with_retry(&self.retry, move || async move {
            api.ensure_logged_in().await?;
            match op().await {
                Err(e) if e.is_auth() => {
                    tracing::debug!(error = %e, "qBittorrent session rejected, logging in again");
                    api.invalidate_session().await;
                    Err(e)
                }
                other => other,
            }
        })
        .await
    }

    async fn torrent_hashes(&self) -> Result<HashSet<String>> {
        let torrents = self.session(|| self.api.torrents(None)).await?;
        Ok(torrents.into_iter().map(|t| t.hash.to_lowercase()).collect())
    }

    /// Find a torrent that appeared after an upload
    ///
    /// Polls for the newest torrent not in `before`; if none shows up, falls back
    /// to an exact name match on `expected_name`.
    async fn identify_added(
        &self,
        before: &HashSet<String>,
        expected_name: Option<&str>,
    ) -> Result<AddResult> {
        let interval = Duration::from_millis(self.config.identify_poll_interval_ms);
        let mut latest: Vec<TorrentInfo> = Vec::new();

        for attempt in 1..=self.config.identify_poll_attempts.max(1) {
            tokio::time::sleep(interval).await;
            latest = self.session(|| self.api.torrents(None)).await?;

            if let Some(t) = latest
                .iter()
                .filter(|t| !before.contains(&t.hash.to_lowercase()))
                .max_by_key(|t| t.added_on)
            {
                tracing::debug!(hash = %t.hash, attempt, "identified uploaded torrent");
                return Ok(AddResult {
                    external_id: t.hash.to_lowercase(),
                    name: t.name.clone(),
                });
            }
        }

        if let Some(name) = expected_name
            && let Some(t) = latest.iter().find(|t| t.name == name)
        {
            tracing::debug!(hash = %t.hash, name, "identified uploaded torrent by name");
            return Ok(AddResult {
                external_id: t.hash.to_lowercase(),
                name: t.name.clone(),
            });
        }

        Err(DownloaderError::NotIdentified(
            expected_name.unwrap_or("uploaded torrent").to_string(),
        )
        .into())
    }
}

impl std::fmt::Debug for QbittorrentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QbittorrentClient")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn to_item(t: TorrentInfo) -> Item {
    let status = map_state(&t.state);
    let error = (status == ItemStatus::Errored)
        .then(|| format!("downloader reported state {}", t.state));
    Item {
        external_id: t.hash.to_lowercase(),
        name: t.name,
        status,
        native_status: t.state,
        progress: t.progress,
        save_path: t.save_path,
        content_path: t.content_path,
        added_at: t.added_on,
        error,
    }
}

fn to_remote_file(f: TorrentFile) -> RemoteFile {
    RemoteFile {
        path: f.name,
        size: f.size,
        progress: f.progress,
        priority: f.priority,
    }
}

fn describe_test_failure(err: &Error) -> String {
    match err.root() {
        Error::Network(e) if e.is_connect() || e.is_timeout() => UNREACHABLE_MESSAGE.to_string(),
        Error::Downloader(DownloaderError::Auth(_)) => AUTH_FAILED_MESSAGE.to_string(),
        _ => format!("Connection test failed: {err}"),
    }
}

#[async_trait]
impl DownloaderClient for QbittorrentClient {
    fn downloader_type(&self) -> DownloaderType {
        DownloaderType::Qbittorrent
    }

    fn instance_id(&self) -> &InstanceId {
        &self.id
    }

    async fn test(&self) -> Result<TestResult> {
        let started = Instant::now();

        // Always a fresh login so stale sessions cannot mask bad credentials
        self.api.invalidate_session().await;
        if let Err(e) = self.api.login().await {
            tracing::debug!(error = %e, downloader_id = %self.id, "qBittorrent login failed");
            return Ok(TestResult::failed(describe_test_failure(&e)));
        }

        let version = match self.api.version().await {
            Ok(v) => v,
            Err(e) => {
                return Ok(TestResult::failed(format!(
                    "Connected but unable to retrieve version information: {e}"
                )));
            }
        };
        let web_api_version = self.api.webapi_version().await.ok();

        Ok(TestResult {
            success: true,
            message: Some("Connection test successful".into()),
            error: None,
            version: Some(version),
            web_api_version,
            latency_ms: Some(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)),
        })
    }

    async fn add(&self, request: &AddRequest) -> Result<AddResult> {
        let link = match &request.link {
            DownloadLink::Torrent(link) => link.as_str(),
            DownloadLink::Usenet(_) => {
                return Err(Error::permanent(DownloaderError::UnsupportedProtocol(
                    "usenet".into(),
                )));
            }
        };

        let options = AddOptions {
            save_path: request.save_path.clone(),
            category: request.category.clone(),
            paused: request.paused,
        };

        let (source, known_hash, expected_name) = if magnet::is_magnet(link) {
            let hash = match magnet::extract_hash(link) {
                Ok(hash) => Some(hash),
                Err(e) => {
                    tracing::warn!(error = %e, "magnet link has no usable infohash");
                    None
                }
            };
            (AddSource::Url(link.to_string()), hash, magnet::extract_name(link))
        } else {
            let (bytes, filename) = self.api.fetch_torrent(link).await?;
            let stem = std::path::Path::new(&filename)
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string);
            (AddSource::File { bytes, filename }, None, stem)
        };

        let before = match known_hash {
            Some(_) => HashSet::new(),
            None => self.torrent_hashes().await?,
        };

        self.session(|| self.api.add(&source, &options)).await?;

        let result = match known_hash {
            Some(hash) => AddResult {
                name: expected_name.unwrap_or_else(|| hash.clone()),
                external_id: hash,
            },
            None => {
                self.identify_added(&before, expected_name.as_deref())
                    .await?
            }
        };

        if !request.tags.is_empty()
            && let Err(e) = self
                .session(|| self.api.add_tags(&result.external_id, &request.tags))
                .await
        {
            tracing::warn!(error = %e, hash = %result.external_id, "failed to tag torrent");
        }

        tracing::info!(
            downloader_id = %self.id,
            hash = %result.external_id,
            name = %result.name,
            "added torrent"
        );
        Ok(result)
    }

    async fn get(&self, external_id: &str) -> Result<Item> {
        let hash = external_id.to_lowercase();
        let torrents = self.session(|| self.api.torrents(Some(&hash))).await?;
        torrents
            .into_iter()
            .find(|t| t.hash.eq_ignore_ascii_case(&hash))
            .map(to_item)
            .ok_or_else(|| DownloaderError::NotFound(external_id.to_string()).into())
    }

    async fn list(&self) -> Result<Vec<Item>> {
        let torrents = self.session(|| self.api.torrents(None)).await?;
        Ok(torrents.into_iter().map(to_item).collect())
    }

    async fn list_files(&self, external_id: &str) -> Result<Vec<RemoteFile>> {
        let hash = external_id.to_lowercase();
        let files = self.session(|| self.api.files(&hash)).await?;
        Ok(files.into_iter().map(to_remote_file).collect())
    }

    async fn pause(&self, external_id: &str) -> Result<()> {
        let hash = external_id.to_lowercase();
        self.session(|| self.api.pause(&hash)).await
    }

    async fn resume(&self, external_id: &str) -> Result<()> {
        let hash = external_id.to_lowercase();
        self.session(|| self.api.resume(&hash)).await
    }

    async fn remove(&self, external_id: &str, delete_data: bool) -> Result<()> {
        let hash = external_id.to_lowercase();
        self.session(|| self.api.delete(&hash, delete_data)).await
    }
}
