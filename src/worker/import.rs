//! Import task poll loop
//!
//! The [`ImportWorker`] claims runnable import tasks and places each task's
//! source file at the path its [`DestinationResolver`] names. A task must point
//! at an existing regular file. An occupied destination is only replaced when
//! the task is a reimport of an earlier one.
//!
//! Errors take the same path as download job errors: permanent ones fail the
//! task, transient ones are retried with backoff until `max_attempts`.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::ImportConfig;
use crate::error::{Error, ErrorCategory, Result, ResultExt};
use crate::importer::{DestinationResolver, hardlink_or_copy, with_source_extension};
use crate::retry::backoff_delay;
use crate::state::ImportTaskStatus;
use crate::store::ImportTaskStore;
use crate::types::{Event, ImportTask};

/// Places the files of import tasks into the library
pub struct ImportWorker {
    store: Arc<dyn ImportTaskStore>,
    resolver: Arc<dyn DestinationResolver>,
    config: ImportConfig,
    event_tx: broadcast::Sender<Event>,
}

impl ImportWorker {
    /// Create an import worker over a store and a destination resolver
    pub fn new(
        store: Arc<dyn ImportTaskStore>,
        resolver: Arc<dyn DestinationResolver>,
        config: ImportConfig,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            store,
            resolver,
            config,
            event_tx,
        }
    }

    /// Tick until `cancel` fires
    ///
    /// A task interrupted mid-placement stays in progress and is claimed again
    /// once its lease runs out.
    pub async fn run(&self, cancel: CancellationToken) {
        let period = self.config.poll_interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            poll_interval_ms = period.as_millis() as u64,
            claim_limit = self.config.claim_limit,
            max_attempts = self.config.max_attempts,
            "import worker started"
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
                                tracing::error!(error = %e, "import worker tick failed");
                            }
                        }
                    }
                }
            }
        }

        tracing::info!("import worker stopped");
    }

    /// Claim one batch and try to place every task in it
    ///
    /// Returns the number of tasks claimed.
    pub async fn tick(&self) -> Result<usize> {
        let tasks = self
            .store
            .claim_imports(self.config.claim_limit, self.config.claim_lease)
            .await
            .context("claim import tasks")?;

        let claimed = tasks.len();
        if claimed > 0 {
            tracing::debug!(claimed, "claimed import tasks");
        }

        futures::stream::iter(tasks)
            .for_each_concurrent(self.config.batch_concurrency.max(1), |task| {
                self.run_task(task)
            })
            .await;

        Ok(claimed)
    }

    async fn run_task(&self, task: ImportTask) {
        let Err(err) = self.process_task(&task).await else {
            return;
        };

        if let Err(e) = self.handle_error(&task, &err).await {
            tracing::error!(
                task_id = %task.id,
                error = %e,
                original_error = %err,
                "failed to record import task error"
            );
        }
    }

    async fn process_task(&self, task: &ImportTask) -> Result<()> {
        if task.status == ImportTaskStatus::Pending {
            let started = self
                .store
                .start_import(task.id)
                .await
                .context("start import task")?;
            tracing::info!(
                task_id = %started.id,
                job_id = %started.download_job_id,
                source = %started.source_path,
                "import task started"
            );
            self.publish(started);
        }

        let source = Path::new(&task.source_path);
        check_source(source).await?;

        let dest = self
            .resolver
            .resolve(task)
            .await
            .context("compute destination path")?;
        let dest = with_source_extension(dest, source);
        let dest_str = dest
            .to_str()
            .ok_or_else(|| {
                Error::permanent(Error::Import(format!(
                    "destination path is not valid UTF-8: {}",
                    dest.display()
                )))
            })?
            .to_string();

        if tokio::fs::symlink_metadata(&dest).await.is_ok() {
            if task.previous_task_id.is_none() {
                return Err(Error::permanent(Error::Import(format!(
                    "destination already exists: {dest_str}"
                ))));
            }

            match tokio::fs::remove_file(&dest).await {
                Ok(()) => tracing::info!(
                    task_id = %task.id,
                    dest = %dest_str,
                    "removed previous import for reimport"
                ),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(Error::Io(e).context(format!("remove previous import {dest_str}")));
                }
            }
        }

        let method = hardlink_or_copy(source, &dest)
            .await
            .context("place import file")?;

        let completed = self
            .store
            .complete_import(task.id, &dest_str, method)
            .await
            .context("complete import task")?;

        tracing::info!(
            task_id = %completed.id,
            job_id = %completed.download_job_id,
            dest = %dest_str,
            method = %method,
            "import task completed"
        );
        self.publish(completed);
        Ok(())
    }

    /// Fail or reschedule a task after placement failed
    async fn handle_error(&self, task: &ImportTask, err: &Error) -> Result<()> {
        let message = err.to_string();
        let category = err.category();
        let attempt = task.attempt_count.saturating_add(1);

        tracing::error!(
            task_id = %task.id,
            error = %err,
            category = %category,
            attempt,
            "import task error"
        );

        if category == ErrorCategory::Permanent {
            let failed = self.store.fail_import(task.id, &message, category).await?;
            self.publish(failed);
            return Ok(());
        }

        let max_attempts = i64::from(self.config.max_attempts);
        if attempt >= max_attempts {
            let failed = self
                .store
                .fail_import(
                    task.id,
                    &format!("max attempts ({max_attempts}) exceeded: {message}"),
                    ErrorCategory::Transient,
                )
                .await?;
            self.publish(failed);
            return Ok(());
        }

        let backoff = backoff_delay(
            &self.config.backoff,
            u32::try_from(attempt).unwrap_or(u32::MAX),
        );
        let backoff_secs = i64::try_from(backoff.as_secs()).unwrap_or(i64::MAX);
        let next_run_at = chrono::Utc::now().timestamp().saturating_add(backoff_secs);

        let rescheduled = self
            .store
            .schedule_import_retry(task.id, &message, category, next_run_at)
            .await?;

        tracing::info!(
            task_id = %task.id,
            attempt,
            backoff_secs,
            "import task retry scheduled"
        );
        self.publish(rescheduled);
        Ok(())
    }

    fn publish(&self, task: ImportTask) {
        self.event_tx.send(Event::ImportTaskUpdated { task }).ok();
    }
}

/// The source must be an existing regular file; anything else never heals
async fn check_source(source: &Path) -> Result<()> {
    match tokio::fs::metadata(source).await {
        Ok(meta) if meta.is_dir() => Err(Error::permanent(Error::Import(format!(
            "source is a directory, expected file: {}",
            source.display()
        )))),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::permanent(Error::Import(
            format!("source file not found: {}", source.display()),
        ))),
        Err(e) => Err(Error::Io(e).context(format!("inspect source {}", source.display()))),
    }
}
