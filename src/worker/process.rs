//! One step of a single job: submit or poll.

use crate::downloader::{AddRequest, DownloadLink, DownloaderClient, Item};
use crate::error::{Error, ErrorCategory, Result, ResultExt};
use crate::state::DownloadJobStatus;
use crate::types::{DownloadJob, JobEventType, JobSnapshot, Protocol};

use super::{Worker, map_item_status};

impl Worker {
    pub(super) async fn process_job(&self, job: &DownloadJob) -> Result<()> {
        // A stale claim can still hand us a finished job
        if job.status.is_terminal() {
            tracing::debug!(job_id = %job.id, status = %job.status, "skipping terminal job");
            return Ok(());
        }

        let client = self
            .manager
            .get_client(&job.downloader_id)
            .await
            .permanent()
            .context("get downloader client")?;

        match job.status {
            DownloadJobStatus::Created => self.submit(client.as_ref(), job).await,
            DownloadJobStatus::Enqueued | DownloadJobStatus::Downloading => {
                self.poll(client.as_ref(), job).await
            }
            DownloadJobStatus::Completed
            | DownloadJobStatus::Failed
            | DownloadJobStatus::Cancelled => Ok(()),
        }
    }

    /// `created -> enqueued`: hand the link to the backend
    async fn submit(&self, client: &dyn DownloaderClient, job: &DownloadJob) -> Result<()> {
        let protocol: Protocol = job
            .protocol
            .parse()
            .permanent()
            .context("build add request")?;
        job.status.must_transition(DownloadJobStatus::Enqueued)?;

        tracing::info!(
            job_id = %job.id,
            protocol = %protocol,
            downloader_id = %job.downloader_id,
            "adding download to client"
        );

        let request = AddRequest::new(DownloadLink::new(protocol, job.candidate_link.clone()));
        let added = client.add(&request).await.context("downloader add")?;

        let updated = self
            .store
            .set_enqueued(job.id, &added.external_id)
            .await
            .context("set enqueued")?;

        self.record_status_change(job, DownloadJobStatus::Enqueued, None)
            .await;
        tracing::info!(
            job_id = %job.id,
            external_id = %added.external_id,
            name = %added.name,
            "download enqueued"
        );
        self.publish_job(updated);
        Ok(())
    }

    /// Mirror the backend's view of the item onto the job
    async fn poll(&self, client: &dyn DownloaderClient, job: &DownloadJob) -> Result<()> {
        let external_id = job
            .downloader_external_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                Error::permanent(Error::Other(
                    "job missing downloader_external_id".to_string(),
                ))
            })?;

        let item = client.get(external_id).await.context("downloader get")?;
        let new_status = map_item_status(item.status);

        if new_status != job.status && !job.status.can_transition(new_status) {
            tracing::warn!(
                job_id = %job.id,
                from = %job.status,
                to = %new_status,
                "invalid state transition, ignoring"
            );
            return Ok(());
        }

        if new_status == DownloadJobStatus::Failed {
            return self.fail_from_backend(job, &item).await;
        }

        // Tasks first: if spawning fails the job is still non-terminal and the
        // next tick observes `completed` again
        if new_status == DownloadJobStatus::Completed && job.status != new_status {
            self.spawn_import_tasks(client, job, &item)
                .await
                .context("spawn import tasks")?;
        }

        let updated = self
            .store
            .set_snapshot(job.id, &snapshot(new_status, &item))
            .await
            .context("update snapshot")?;

        if job.status != new_status {
            self.record_status_change(job, new_status, Some(item.progress))
                .await;
            tracing::info!(
                job_id = %job.id,
                from = %job.status,
                to = %new_status,
                progress = item.progress,
                "download job status changed"
            );
        }

        self.publish_job(updated);
        Ok(())
    }

    /// The backend gave up on the item; the job fails without retry
    async fn fail_from_backend(&self, job: &DownloadJob, item: &Item) -> Result<()> {
        let reason = item
            .error
            .clone()
            .unwrap_or_else(|| "downloader reported failed status".to_string());

        // Keep the current status in the snapshot; the failure is applied next
        self.store
            .set_snapshot(job.id, &snapshot(job.status, item))
            .await
            .context("update snapshot")?;

        self.append_event(job.id, JobEventType::Error, Some(reason.clone()), None)
            .await;

        let failed = self
            .store
            .mark_failed(job.id, &reason, ErrorCategory::Permanent)
            .await
            .context("mark failed")?;

        self.record_status_change(job, DownloadJobStatus::Failed, Some(item.progress))
            .await;
        tracing::warn!(job_id = %job.id, reason = %reason, "downloader reported failure");
        self.publish_job(failed);
        Ok(())
    }
}

fn snapshot(status: DownloadJobStatus, item: &Item) -> JobSnapshot {
    JobSnapshot {
        status,
        downloader_status: item.native_status.clone(),
        progress: item.progress,
        save_path: item.save_path.clone(),
        content_path: item.content_path.clone(),
    }
}
