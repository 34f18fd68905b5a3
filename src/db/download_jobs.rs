//! Download job CRUD, claiming and state writes.
//!
//! Every write that changes a job's status or schedule carries a terminal guard,
//! so a finished job is never touched again.

use std::time::Duration;

use crate::error::{DatabaseError, ErrorCategory};
use crate::types::{DownloadJob, DownloadJobId, DownloadJobStatus, JobSnapshot, NewDownloadJob};
use crate::{Error, Result};

use super::{Database, now};

impl Database {
    /// Insert a new job in status `created`, runnable immediately
    pub async fn insert_download_job(&self, job: &NewDownloadJob) -> Result<DownloadJob> {
        let now = now();

        sqlx::query_as::<_, DownloadJob>(concat!(
            r#"
            INSERT INTO download_jobs (
                status, protocol, candidate_link, candidate_title, downloader_id,
                media_type, media_item_id, episode_id, library_id, name_template_id,
                attempt_count, next_run_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?)
            RETURNING "#,
            job_columns!()
        ))
        .bind(DownloadJobStatus::Created)
        .bind(&job.protocol)
        .bind(&job.candidate_link)
        .bind(&job.candidate_title)
        .bind(&job.downloader_id)
        .bind(job.media_type)
        .bind(job.media_item_id)
        .bind(job.episode_id)
        .bind(job.library_id)
        .bind(job.name_template_id)
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert download job: {}",
                e
            )))
        })
    }

    /// Get a job by ID
    pub async fn find_download_job(&self, id: DownloadJobId) -> Result<Option<DownloadJob>> {
        sqlx::query_as::<_, DownloadJob>(concat!(
            "SELECT ",
            job_columns!(),
            " FROM download_jobs WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get download job: {}",
                e
            )))
        })
    }

    /// List jobs, newest first, optionally restricted to one status
    pub async fn list_download_jobs(
        &self,
        status: Option<DownloadJobStatus>,
    ) -> Result<Vec<DownloadJob>> {
        sqlx::query_as::<_, DownloadJob>(concat!(
            "SELECT ",
            job_columns!(),
            " FROM download_jobs WHERE (?1 IS NULL OR status = ?1) ORDER BY created_at DESC, id DESC"
        ))
        .bind(status)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list download jobs: {}",
                e
            )))
        })
    }

    /// Claim up to `limit` runnable jobs
    ///
    /// One statement selects non-terminal jobs whose `next_run_at` has passed and
    /// pushes their `next_run_at` out by `lease`. SQLite serializes writers, so two
    /// concurrent claimers never receive the same job while the lease holds.
    pub async fn claim_runnable_jobs(
        &self,
        limit: u32,
        lease: Duration,
    ) -> Result<Vec<DownloadJob>> {
        let now = now();
        let lease_until = now.saturating_add(i64::try_from(lease.as_secs()).unwrap_or(i64::MAX));

        sqlx::query_as::<_, DownloadJob>(concat!(
            r#"
            UPDATE download_jobs
            SET next_run_at = ?
            WHERE id IN (
                SELECT id FROM download_jobs
                WHERE status NOT IN "#,
            terminal_statuses!(),
            r#"
                  AND next_run_at <= ?
                ORDER BY next_run_at ASC, id ASC
                LIMIT ?
            )
            RETURNING "#,
            job_columns!()
        ))
        .bind(lease_until)
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to claim download jobs: {}",
                e
            )))
        })
    }

    /// Record the backend id and move `created -> enqueued`
    pub async fn set_job_enqueued(
        &self,
        id: DownloadJobId,
        external_id: &str,
    ) -> Result<DownloadJob> {
        let now = now();

        let row = sqlx::query_as::<_, DownloadJob>(concat!(
            r#"
            UPDATE download_jobs
            SET status = ?, downloader_external_id = ?, next_run_at = ?, updated_at = ?
            WHERE id = ? AND status = ?
            RETURNING "#,
            job_columns!()
        ))
        .bind(DownloadJobStatus::Enqueued)
        .bind(external_id)
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(DownloadJobStatus::Created)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to enqueue download job: {}",
                e
            )))
        })?;

        self.guarded(id, row, DownloadJobStatus::Enqueued).await
    }

    /// Persist the latest backend snapshot; the job becomes runnable again
    pub async fn set_job_snapshot(
        &self,
        id: DownloadJobId,
        snapshot: &JobSnapshot,
    ) -> Result<DownloadJob> {
        let now = now();

        let row = sqlx::query_as::<_, DownloadJob>(concat!(
            r#"
            UPDATE download_jobs
            SET status = ?, downloader_status = ?, progress = ?, save_path = ?,
                content_path = ?, next_run_at = ?, updated_at = ?
            WHERE id = ? AND status NOT IN "#,
            terminal_statuses!(),
            " RETURNING ",
            job_columns!()
        ))
        .bind(snapshot.status)
        .bind(&snapshot.downloader_status)
        .bind(snapshot.progress)
        .bind(&snapshot.save_path)
        .bind(&snapshot.content_path)
        .bind(now)
        .bind(now)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update download job snapshot: {}",
                e
            )))
        })?;

        self.guarded(id, row, snapshot.status).await
    }

    /// Move a job to `failed`
    pub async fn mark_job_failed(
        &self,
        id: DownloadJobId,
        message: &str,
        category: ErrorCategory,
    ) -> Result<DownloadJob> {
        let now = now();

        let row = sqlx::query_as::<_, DownloadJob>(concat!(
            r#"
            UPDATE download_jobs
            SET status = ?, last_error = ?, last_error_category = ?, next_run_at = ?, updated_at = ?
            WHERE id = ? AND status NOT IN "#,
            terminal_statuses!(),
            " RETURNING ",
            job_columns!()
        ))
        .bind(DownloadJobStatus::Failed)
        .bind(message)
        .bind(category)
        .bind(now)
        .bind(now)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark download job failed: {}",
                e
            )))
        })?;

        self.guarded(id, row, DownloadJobStatus::Failed).await
    }

    /// Count a failed attempt and reschedule, leaving status unchanged
    pub async fn schedule_job_retry(
        &self,
        id: DownloadJobId,
        message: &str,
        category: ErrorCategory,
        next_run_at: i64,
    ) -> Result<DownloadJob> {
        let row = sqlx::query_as::<_, DownloadJob>(concat!(
            r#"
            UPDATE download_jobs
            SET attempt_count = attempt_count + 1, last_error = ?, last_error_category = ?,
                next_run_at = ?, updated_at = ?
            WHERE id = ? AND status NOT IN "#,
            terminal_statuses!(),
            " RETURNING ",
            job_columns!()
        ))
        .bind(message)
        .bind(category)
        .bind(next_run_at)
        .bind(now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to schedule download job retry: {}",
                e
            )))
        })?;

        match row {
            Some(job) => Ok(job),
            None => Err(self.rejected_write(id, None).await),
        }
    }

    /// Cancel a job that has not finished yet
    pub async fn cancel_download_job(&self, id: DownloadJobId) -> Result<DownloadJob> {
        let now = now();

        let row = sqlx::query_as::<_, DownloadJob>(concat!(
            r#"
            UPDATE download_jobs
            SET status = ?, updated_at = ?
            WHERE id = ? AND status NOT IN "#,
            terminal_statuses!(),
            " RETURNING ",
            job_columns!()
        ))
        .bind(DownloadJobStatus::Cancelled)
        .bind(now)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to cancel download job: {}",
                e
            )))
        })?;

        self.guarded(id, row, DownloadJobStatus::Cancelled).await
    }

    async fn guarded(
        &self,
        id: DownloadJobId,
        row: Option<DownloadJob>,
        to: DownloadJobStatus,
    ) -> Result<DownloadJob> {
        match row {
            Some(job) => Ok(job),
            None => Err(self.rejected_write(id, Some(to)).await),
        }
    }

    /// Explain why a guarded update matched no row
    async fn rejected_write(&self, id: DownloadJobId, to: Option<DownloadJobStatus>) -> Error {
        match self.find_download_job(id).await {
            Ok(Some(job)) => Error::InvalidTransition {
                kind: "download job",
                from: job.status.to_string(),
                to: to.unwrap_or(job.status).to_string(),
            },
            Ok(None) => {
                Error::Database(DatabaseError::NotFound(format!("download job {}", id)))
            }
            Err(e) => e,
        }
    }
}
