//! Download job and import task poll loops
//!
//! The [`Worker`] ticks on a fixed interval. Each tick claims a bounded batch of
//! runnable jobs from the [`JobStore`] and advances every job one step:
//!
//! - `created`: submit the link to the job's downloader and move to `enqueued`
//! - `enqueued` / `downloading`: poll the backend, persist the snapshot, and on
//!   the first observation of `completed` spawn import tasks
//!
//! Every error from a step goes through one path: permanent errors fail the job,
//! transient ones are rescheduled with exponential backoff until the attempt
//! ceiling is reached. One job's failure never affects the rest of its batch.
//!
//! Correctness across processes rests on the store's claim being exclusive; the
//! worker itself holds no cross-job locks.
//!
//! Placing the files of spawned import tasks is the [`ImportWorker`]'s job.

mod import;
mod process;
mod spawn;

pub use import::ImportWorker;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::downloader::{ItemStatus, Manager};
use crate::error::{Error, ErrorCategory, Result, ResultExt};
use crate::retry::backoff_delay;
use crate::state::DownloadJobStatus;
use crate::store::JobStore;
use crate::types::{DownloadJob, DownloadJobId, Event, JobEventType, NewJobEvent};

/// Drives download jobs through their state machine
pub struct Worker {
    store: Arc<dyn JobStore>,
    manager: Arc<Manager>,
    config: WorkerConfig,
    event_tx: broadcast::Sender<Event>,
}

impl Worker {
    /// Create a worker over a store and a populated client manager
    pub fn new(
        store: Arc<dyn JobStore>,
        manager: Arc<Manager>,
        config: WorkerConfig,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            store,
            manager,
            config,
            event_tx,
        }
    }

    /// Tick until `cancel` fires
    ///
    /// Cancellation is checked between ticks and also races the tick itself, so
    /// in-flight downloader calls are dropped rather than awaited. A job caught
    /// mid-step stays claimed until its lease runs out.
    pub async fn run(&self, cancel: CancellationToken) {
        let period = self.config.poll_interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            poll_interval_ms = period.as_millis() as u64,
            claim_limit = self.config.claim_limit,
            max_attempts = self.config.max_attempts,
            "download worker started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        result = self.tick() => {
                            if let Err(e) = result {
                                tracing::error!(error = %e, "download worker tick failed");
                            }
                        }
                    }
                }
            }
        }

        tracing::info!("download worker stopped");
    }

    /// Claim one batch and advance every job in it
    ///
    /// Returns the number of jobs claimed. Only the claim itself can fail this
    /// call; per-job errors are recorded on the jobs.
    pub async fn tick(&self) -> Result<usize> {
        let jobs = self
            .store
            .claim_runnable(self.config.claim_limit, self.config.claim_lease)
            .await
            .context("claim runnable jobs")?;

        let claimed = jobs.len();
        if claimed > 0 {
            tracing::debug!(claimed, "claimed download jobs");
        }

        futures::stream::iter(jobs)
            .for_each_concurrent(self.config.batch_concurrency.max(1), |job| self.run_job(job))
            .await;

        Ok(claimed)
    }

    async fn run_job(&self, job: DownloadJob) {
        let Err(err) = self.process_job(&job).await else {
            return;
        };

        if let Err(e) = self.handle_error(&job, &err).await {
            tracing::error!(
                job_id = %job.id,
                error = %e,
                original_error = %err,
                "failed to record download job error"
            );
        }
    }

    /// Fail or reschedule a job after a step failed
    ///
    /// Permanent errors fail the job at once. Transient errors count an attempt;
    /// the job fails when that attempt reaches `max_attempts`, and is otherwise
    /// pushed out by the backoff for that attempt with its status untouched.
    async fn handle_error(&self, job: &DownloadJob, err: &Error) -> Result<()> {
        let message = err.to_string();
        let category = err.category();
        let attempt = job.attempt_count.saturating_add(1);

        tracing::error!(
            job_id = %job.id,
            error = %err,
            category = %category,
            attempt,
            "download job error"
        );

        self.append_event(
            job.id,
            JobEventType::Error,
            Some(message.clone()),
            Some(serde_json::json!({
                "category": category,
                "attempt_count": attempt,
            })),
        )
        .await;

        if category == ErrorCategory::Permanent {
            let failed = self.store.mark_failed(job.id, &message, category).await?;
            self.publish_job(failed);
            return Ok(());
        }

        let max_attempts = i64::from(self.config.max_attempts);
        if attempt >= max_attempts {
            let failed = self
                .store
                .mark_failed(
                    job.id,
                    &format!("max attempts ({max_attempts}) exceeded: {message}"),
                    ErrorCategory::Transient,
                )
                .await?;
            self.publish_job(failed);
            return Ok(());
        }

        let backoff = backoff_delay(
            &self.config.backoff,
            u32::try_from(attempt).unwrap_or(u32::MAX),
        );
        let backoff_secs = i64::try_from(backoff.as_secs()).unwrap_or(i64::MAX);
        let next_run_at = chrono::Utc::now().timestamp().saturating_add(backoff_secs);

        self.append_event(
            job.id,
            JobEventType::RetryScheduled,
            Some(message.clone()),
            Some(serde_json::json!({
                "next_run_at": next_run_at,
                "backoff_secs": backoff_secs,
            })),
        )
        .await;

        let rescheduled = self
            .store
            .schedule_retry(job.id, &message, category, next_run_at)
            .await?;

        tracing::info!(
            job_id = %job.id,
            attempt,
            backoff_secs,
            "download job retry scheduled"
        );
        self.publish_job(rescheduled);
        Ok(())
    }

    /// Record a status change in the job's audit trail
    async fn record_status_change(
        &self,
        job: &DownloadJob,
        to: DownloadJobStatus,
        progress: Option<f64>,
    ) {
        self.append_event(
            job.id,
            JobEventType::StatusChanged,
            Some(format!("{} -> {}", job.status, to)),
            Some(serde_json::json!({
                "old_status": job.status,
                "new_status": to,
                "progress": progress,
            })),
        )
        .await;
    }

    /// Append an audit event; a failed write is logged, never propagated
    async fn append_event(
        &self,
        job_id: DownloadJobId,
        event_type: JobEventType,
        message: Option<String>,
        metadata: Option<serde_json::Value>,
    ) {
        let event = NewJobEvent {
            download_job_id: job_id,
            event_type,
            message,
            metadata,
        };

        if let Err(e) = self.store.append_job_event(&event).await {
            tracing::warn!(
                job_id = %job_id,
                event_type = event_type.as_str(),
                error = %e,
                "failed to record download job event"
            );
        }
    }

    fn publish_job(&self, job: DownloadJob) {
        // No subscribers is fine
        self.event_tx.send(Event::DownloadJobUpdated { job }).ok();
    }
}

/// Fold a backend item status into the job state machine
///
/// Seeding counts as completed. Paused, queued and unrecognized items are still
/// downloading from the job's point of view.
pub fn map_item_status(status: ItemStatus) -> DownloadJobStatus {
    match status {
        ItemStatus::Completed | ItemStatus::Seeding => DownloadJobStatus::Completed,
        ItemStatus::Errored => DownloadJobStatus::Failed,
        ItemStatus::Queued | ItemStatus::Downloading | ItemStatus::Paused | ItemStatus::Unknown => {
            DownloadJobStatus::Downloading
        }
    }
}
