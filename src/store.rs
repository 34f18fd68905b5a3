//! Repository contract consumed by the workers and the downloader manager.
//!
//! [`Database`](crate::db::Database) implements every trait here on SQLite. Any
//! other implementation is acceptable as long as `claim_runnable` and
//! `claim_imports` are exclusive: a row handed to one caller must not be handed
//! to another until its lease runs out or it is written back.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{ErrorCategory, Result};
use crate::importer::PlacementMethod;
use crate::types::{
    DownloadJob, DownloadJobId, DownloaderRecord, Episode, ImportTask, ImportTaskId, InstanceId,
    JobSnapshot, NewImportTask, NewJobEvent, Protocol, Season,
};

/// Job, task and audit-event persistence
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Atomically claim up to `limit` non-terminal jobs whose `next_run_at` has passed
    ///
    /// Claimed jobs stay invisible to other claimers for `lease`.
    async fn claim_runnable(&self, limit: u32, lease: Duration) -> Result<Vec<DownloadJob>>;

    /// Read one job
    async fn get_download_job(&self, id: DownloadJobId) -> Result<DownloadJob>;

    /// Read one episode
    async fn get_episode(&self, id: i64) -> Result<Episode>;

    /// Read one season
    async fn get_season(&self, id: i64) -> Result<Season>;

    /// Record the backend id and move `created -> enqueued`
    async fn set_enqueued(&self, id: DownloadJobId, external_id: &str) -> Result<DownloadJob>;

    /// Persist the latest backend snapshot (status, progress, paths)
    async fn set_snapshot(&self, id: DownloadJobId, snapshot: &JobSnapshot) -> Result<DownloadJob>;

    /// Move to `failed` with the given error
    async fn mark_failed(
        &self,
        id: DownloadJobId,
        message: &str,
        category: ErrorCategory,
    ) -> Result<DownloadJob>;

    /// Count a failed attempt and push `next_run_at` out, leaving status unchanged
    async fn schedule_retry(
        &self,
        id: DownloadJobId,
        message: &str,
        category: ErrorCategory,
        next_run_at: i64,
    ) -> Result<DownloadJob>;

    /// Create an import task; creating the same (job, source path) twice returns the existing task
    async fn create_import_task(&self, task: &NewImportTask) -> Result<ImportTask>;

    /// Append an immutable audit event
    async fn append_job_event(&self, event: &NewJobEvent) -> Result<()>;

    /// Get or create a season of a series
    async fn upsert_season(&self, media_item_id: i64, season_number: i64) -> Result<Season>;

    /// Get or create an episode of a season
    async fn upsert_episode(&self, season_id: i64, episode_number: i64) -> Result<Episode>;
}

/// Import task claiming and lifecycle writes
#[async_trait]
pub trait ImportTaskStore: Send + Sync {
    /// Atomically claim up to `limit` pending or in-progress tasks whose `next_run_at` has passed
    async fn claim_imports(&self, limit: u32, lease: Duration) -> Result<Vec<ImportTask>>;

    /// Move `pending -> in_progress`
    async fn start_import(&self, id: ImportTaskId) -> Result<ImportTask>;

    /// Move `in_progress -> completed`, recording the placed file
    async fn complete_import(
        &self,
        id: ImportTaskId,
        dest_path: &str,
        method: PlacementMethod,
    ) -> Result<ImportTask>;

    /// Move `in_progress -> failed` with the given error
    async fn fail_import(
        &self,
        id: ImportTaskId,
        message: &str,
        category: ErrorCategory,
    ) -> Result<ImportTask>;

    /// Count a failed attempt and push `next_run_at` out; the task stays in progress
    async fn schedule_import_retry(
        &self,
        id: ImportTaskId,
        message: &str,
        category: ErrorCategory,
        next_run_at: i64,
    ) -> Result<ImportTask>;
}

/// Downloader configuration lookup
#[async_trait]
pub trait DownloaderStore: Send + Sync {
    /// Every configured downloader, enabled or not
    async fn list_downloaders(&self) -> Result<Vec<DownloaderRecord>>;

    /// One downloader by id
    async fn get_downloader(&self, id: &InstanceId) -> Result<DownloaderRecord>;

    /// The downloader marked default for a protocol
    async fn get_default_downloader(&self, protocol: Protocol) -> Result<DownloaderRecord>;
}
