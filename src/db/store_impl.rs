//! [`JobStore`], [`ImportTaskStore`] and [`DownloaderStore`] on top of [`Database`].

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{DatabaseError, ErrorCategory};
use crate::importer::PlacementMethod;
use crate::store::{DownloaderStore, ImportTaskStore, JobStore};
use crate::types::{
    DownloadJob, DownloadJobId, DownloaderRecord, Episode, ImportTask, ImportTaskId, InstanceId,
    JobSnapshot, NewImportTask, NewJobEvent, Protocol, Season,
};
use crate::{Error, Result};

use super::Database;

#[async_trait]
impl JobStore for Database {
    async fn claim_runnable(&self, limit: u32, lease: Duration) -> Result<Vec<DownloadJob>> {
        self.claim_runnable_jobs(limit, lease).await
    }

    async fn get_download_job(&self, id: DownloadJobId) -> Result<DownloadJob> {
        self.find_download_job(id)
            .await?
            .ok_or_else(|| Error::Database(DatabaseError::NotFound(format!("download job {}", id))))
    }

    async fn get_episode(&self, id: i64) -> Result<Episode> {
        self.find_episode(id)
            .await?
            .ok_or_else(|| Error::Database(DatabaseError::NotFound(format!("episode {}", id))))
    }

    async fn get_season(&self, id: i64) -> Result<Season> {
        self.find_season(id)
            .await?
            .ok_or_else(|| Error::Database(DatabaseError::NotFound(format!("season {}", id))))
    }

    async fn set_enqueued(&self, id: DownloadJobId, external_id: &str) -> Result<DownloadJob> {
        self.set_job_enqueued(id, external_id).await
    }

    async fn set_snapshot(&self, id: DownloadJobId, snapshot: &JobSnapshot) -> Result<DownloadJob> {
        self.set_job_snapshot(id, snapshot).await
    }

    async fn mark_failed(
        &self,
        id: DownloadJobId,
        message: &str,
        category: ErrorCategory,
    ) -> Result<DownloadJob> {
        self.mark_job_failed(id, message, category).await
    }

    async fn schedule_retry(
        &self,
        id: DownloadJobId,
        message: &str,
        category: ErrorCategory,
        next_run_at: i64,
    ) -> Result<DownloadJob> {
        self.schedule_job_retry(id, message, category, next_run_at)
            .await
    }

    async fn create_import_task(&self, task: &NewImportTask) -> Result<ImportTask> {
        self.insert_import_task(task).await
    }

    async fn append_job_event(&self, event: &NewJobEvent) -> Result<()> {
        self.insert_job_event(event).await
    }

    async fn upsert_season(&self, media_item_id: i64, season_number: i64) -> Result<Season> {
        self.upsert_season_record(media_item_id, season_number)
            .await
    }

    async fn upsert_episode(&self, season_id: i64, episode_number: i64) -> Result<Episode> {
        self.upsert_episode_record(season_id, episode_number).await
    }
}

#[async_trait]
impl ImportTaskStore for Database {
    async fn claim_imports(&self, limit: u32, lease: Duration) -> Result<Vec<ImportTask>> {
        self.claim_runnable_import_tasks(limit, lease).await
    }

    async fn start_import(&self, id: ImportTaskId) -> Result<ImportTask> {
        self.start_import_task(id).await
    }

    async fn complete_import(
        &self,
        id: ImportTaskId,
        dest_path: &str,
        method: PlacementMethod,
    ) -> Result<ImportTask> {
        self.complete_import_task(id, dest_path, method).await
    }

    async fn fail_import(
        &self,
        id: ImportTaskId,
        message: &str,
        category: ErrorCategory,
    ) -> Result<ImportTask> {
        self.fail_import_task(id, message, category).await
    }

    async fn schedule_import_retry(
        &self,
        id: ImportTaskId,
        message: &str,
        category: ErrorCategory,
        next_run_at: i64,
    ) -> Result<ImportTask> {
        self.schedule_import_task_retry(id, message, category, next_run_at)
            .await
    }
}

#[async_trait]
impl DownloaderStore for Database {
    async fn list_downloaders(&self) -> Result<Vec<DownloaderRecord>> {
        self.list_downloader_records().await
    }

    async fn get_downloader(&self, id: &InstanceId) -> Result<DownloaderRecord> {
        self.find_downloader(id)
            .await?
            .ok_or_else(|| Error::Database(DatabaseError::NotFound(format!("downloader {}", id))))
    }

    async fn get_default_downloader(&self, protocol: Protocol) -> Result<DownloaderRecord> {
        self.find_default_downloader(protocol).await?.ok_or_else(|| {
            Error::Database(DatabaseError::NotFound(format!(
                "default {} downloader",
                protocol
            )))
        })
    }
}
