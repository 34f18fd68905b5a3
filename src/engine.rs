//! [`MediaDl`]: the database, client manager and workers wired together.

use std::sync::Arc;

use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db::Database;
use crate::downloader::{ConfigRecord, Manager, Registry, TestResult};
use crate::error::{DownloaderError, Error, Result, ResultExt};
use crate::importer::DestinationResolver;
use crate::types::{
    DownloadJob, DownloadJobId, DownloaderRecord, Event, ImportTask, ImportTaskId, InstanceId,
    NewDownloadJob, NewDownloader,
};
use crate::worker::{ImportWorker, Worker};

/// Main entry point: owns the job database, the live downloader clients and
/// the poll loops
pub struct MediaDl {
    db: Arc<Database>,
    manager: Arc<Manager>,
    worker: Arc<Worker>,
    import_worker: Option<Arc<ImportWorker>>,
    event_tx: broadcast::Sender<Event>,
    cancel: CancellationToken,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
    /// Configuration this instance was built with
    pub config: Arc<Config>,
}

impl MediaDl {
    /// Open the database, initialize every enabled downloader and build the worker
    ///
    /// Downloaders that fail their connection test are logged and left out; they
    /// do not fail this call. Nothing is polled until [`start`](Self::start).
    pub async fn new(config: Config, registry: Registry) -> Result<Self> {
        let db = Arc::new(Database::new(&config.persistence.database_path).await?);

        let manager = Arc::new(Manager::new(registry, db.clone()));
        manager.initialize().await?;

        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let worker = Arc::new(Worker::new(
            db.clone(),
            manager.clone(),
            config.worker.clone(),
            event_tx.clone(),
        ));

        Ok(Self {
            db,
            manager,
            worker,
            import_worker: None,
            event_tx,
            cancel: CancellationToken::new(),
            worker_handles: Mutex::new(Vec::new()),
            config: Arc::new(config),
        })
    }

    /// Also place the files of import tasks, at paths named by `resolver`
    ///
    /// Without a resolver import tasks are created and left pending for the
    /// embedding application.
    pub fn with_destination_resolver(mut self, resolver: Arc<dyn DestinationResolver>) -> Self {
        self.import_worker = Some(Arc::new(ImportWorker::new(
            self.db.clone(),
            resolver,
            self.config.import.clone(),
            self.event_tx.clone(),
        )));
        self
    }

    /// Spawn the poll loops; calling it again while they run does nothing
    pub async fn start(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let mut handles = self.worker_handles.lock().await;
        if handles.iter().any(|h| !h.is_finished()) {
            return Ok(());
        }
        handles.clear();

        let worker = self.worker.clone();
        let cancel = self.cancel.child_token();
        handles.push(tokio::spawn(async move { worker.run(cancel).await }));

        if let Some(import_worker) = self.import_worker.clone() {
            let cancel = self.cancel.child_token();
            handles.push(tokio::spawn(async move { import_worker.run(cancel).await }));
        }
        Ok(())
    }

    /// Subscribe to job and import task events
    ///
    /// Slow receivers lag and drop old events; the worker never waits on them.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Queue a new download job; the next tick submits it
    pub async fn enqueue(&self, job: &NewDownloadJob) -> Result<DownloadJob> {
        if self.cancel.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let job = self.db.insert_download_job(job).await?;
        tracing::info!(
            job_id = %job.id,
            protocol = %job.protocol,
            downloader_id = %job.downloader_id,
            "download job created"
        );
        Ok(job)
    }

    /// Cancel a job that has not finished
    pub async fn cancel_job(&self, id: DownloadJobId) -> Result<DownloadJob> {
        let job = self.db.cancel_download_job(id).await?;
        self.event_tx
            .send(Event::DownloadJobUpdated { job: job.clone() })
            .ok();
        Ok(job)
    }

    /// Queue a completed or failed import task to be placed again
    ///
    /// The new task replaces whatever the earlier one left at its destination.
    pub async fn reimport(&self, id: ImportTaskId) -> Result<ImportTask> {
        let task = self.db.reimport_task(id).await?;
        self.event_tx
            .send(Event::ImportTaskCreated {
                job_id: task.download_job_id,
                task_id: task.id,
            })
            .ok();
        Ok(task)
    }

    /// Validate a downloader config against its backend, then store and activate it
    ///
    /// Nothing is stored when the connection test fails.
    pub async fn add_downloader(&self, downloader: &NewDownloader) -> Result<DownloaderRecord> {
        let candidate = ConfigRecord {
            id: InstanceId::new_v4(),
            kind: downloader.kind.clone(),
            url: downloader.url.clone(),
            username: downloader.username.clone(),
            password: downloader.password.clone(),
            config: downloader.config.clone(),
        };
        let client = self.manager.build_client_from_config(&candidate)?;
        let result = client.test().await.context("test connection")?;
        if !result.success {
            return Err(DownloaderError::TestFailed(result.error.unwrap_or_default()).into());
        }

        let record = self.db.insert_downloader(downloader).await?;
        if record.enabled
            && let Err(e) = self.manager.initialize_downloader(record.id.as_str()).await
        {
            // The backend went away between the two tests; keep nothing
            if let Err(cleanup) = self.db.delete_downloader(&record.id).await {
                tracing::warn!(
                    downloader_id = %record.id,
                    error = %cleanup,
                    "failed to remove downloader after activation failed"
                );
            }
            return Err(e);
        }
        Ok(record)
    }

    /// Replace a downloader's config and re-sync its live client
    pub async fn update_downloader(
        &self,
        id: &InstanceId,
        downloader: &NewDownloader,
    ) -> Result<DownloaderRecord> {
        let record = self.db.update_downloader(id, downloader).await?;
        self.manager.initialize_downloader(id.as_str()).await?;
        Ok(record)
    }

    /// Delete a downloader and drop its live client
    pub async fn remove_downloader(&self, id: &InstanceId) -> Result<()> {
        self.db.delete_downloader(id).await?;
        self.manager.remove_client(id.as_str()).await;
        Ok(())
    }

    /// Run the connection test of a stored downloader on a fresh client
    pub async fn test_downloader(&self, id: &InstanceId) -> Result<TestResult> {
        let client = self.manager.build_test_client(id.as_str()).await?;
        client.test().await
    }

    /// Job database
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Live downloader clients
    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    /// The download job loop, for driving ticks by hand
    pub fn worker(&self) -> &Arc<Worker> {
        &self.worker
    }

    /// The import task loop, if a destination resolver was given
    pub fn import_worker(&self) -> Option<&Arc<ImportWorker>> {
        self.import_worker.as_ref()
    }

    /// Stop the poll loops, wait for them, and release clients and the database
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");
        self.cancel.cancel();

        let handles: Vec<_> = self.worker_handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "worker task ended abnormally");
            }
        }

        self.manager.close().await;
        self.event_tx.send(Event::Shutdown).ok();
        self.db.pool().close().await;

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }
}

impl std::fmt::Debug for MediaDl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaDl")
            .field("manager", &self.manager)
            .field("imports_enabled", &self.import_worker.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
