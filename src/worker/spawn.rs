//! Import task spawning for jobs that just completed.
//!
//! Spawning is idempotent: the store returns the existing task for a
//! (job, source path, episode) that was already created, so a retried tick
//! never duplicates work.

use std::path::Path;

use crate::downloader::{DownloaderClient, Item};
use crate::error::{Error, Result, ResultExt};
use crate::importer::{match_files_to_episodes, pick_main_movie_file};
use crate::types::{DownloadJob, Event, ImportTask, MediaType, NewImportTask};

use super::Worker;

impl Worker {
    /// Create the import tasks of a completed job; returns how many exist
    pub(super) async fn spawn_import_tasks(
        &self,
        client: &dyn DownloaderClient,
        job: &DownloadJob,
        item: &Item,
    ) -> Result<usize> {
        let external_id = job.downloader_external_id.as_deref().unwrap_or_default();

        match job.media_type {
            MediaType::Movie => self
                .spawn_movie_import(client, job, external_id, item)
                .await
                .map(|_| 1),
            MediaType::Series => {
                self.spawn_series_imports(client, job, external_id, item)
                    .await
            }
        }
    }

    async fn spawn_movie_import(
        &self,
        client: &dyn DownloaderClient,
        job: &DownloadJob,
        external_id: &str,
        item: &Item,
    ) -> Result<ImportTask> {
        let files = match client.list_files(external_id).await {
            Ok(files) => files,
            Err(e) if e.is_unsupported() => Vec::new(),
            Err(e) => return Err(e.context("list files")),
        };

        let source_path = if files.is_empty() {
            // No listing: the content path is the file (or its folder)
            Some(item.content_path.clone()).filter(|p| !p.is_empty())
        } else {
            let main = pick_main_movie_file(&files).ok_or_else(|| {
                Error::permanent(Error::Import(
                    "no suitable video files found for import".to_string(),
                ))
            })?;
            resolve_source_path(&main.path, item)
        };

        let source_path = source_path.ok_or_else(|| {
            Error::permanent(Error::Import(
                "unable to determine source path for import".to_string(),
            ))
        })?;

        let task = self
            .store
            .create_import_task(&new_task(job, source_path, MediaType::Movie, None))
            .await
            .context("create import task")?;

        tracing::info!(
            job_id = %job.id,
            task_id = %task.id,
            source_path = %task.source_path,
            "spawned movie import task"
        );
        self.publish_task(&task);
        Ok(task)
    }

    async fn spawn_series_imports(
        &self,
        client: &dyn DownloaderClient,
        job: &DownloadJob,
        external_id: &str,
        item: &Item,
    ) -> Result<usize> {
        let files = client
            .list_files(external_id)
            .await
            .context("list files")?;

        let (target_season, target_episode) = self.series_targets(job).await;
        let matched = match_files_to_episodes(&files, target_season, target_episode);
        if matched.is_empty() {
            return Err(Error::permanent(Error::Import(
                "no files matched target episodes".to_string(),
            )));
        }

        let mut created = 0;
        for (episode_number, file) in matched {
            let Some(source_path) = resolve_source_path(&file.path, item) else {
                tracing::warn!(
                    job_id = %job.id,
                    episode = episode_number,
                    path = %file.path,
                    "unable to determine source path, skipping"
                );
                continue;
            };

            let episode_id = match self
                .resolve_episode_id(job.media_item_id, target_season, episode_number)
                .await
            {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(
                        job_id = %job.id,
                        episode = episode_number,
                        error = %e,
                        "failed to resolve episode id, skipping"
                    );
                    continue;
                }
            };

            let task = match self
                .store
                .create_import_task(&new_task(
                    job,
                    source_path,
                    MediaType::Series,
                    Some(episode_id),
                ))
                .await
            {
                Ok(task) => task,
                Err(e) => {
                    tracing::warn!(
                        job_id = %job.id,
                        episode = episode_number,
                        error = %e,
                        "failed to create import task"
                    );
                    continue;
                }
            };

            tracing::info!(
                job_id = %job.id,
                task_id = %task.id,
                episode = episode_number,
                source_path = %task.source_path,
                "spawned series import task"
            );
            self.publish_task(&task);
            created += 1;
        }

        if created == 0 {
            return Err(Error::permanent(Error::Import(
                "failed to create any import tasks".to_string(),
            )));
        }
        Ok(created)
    }

    /// Season and episode numbers of the job's linked episode, when it has one
    async fn series_targets(&self, job: &DownloadJob) -> (Option<i64>, Option<i64>) {
        let Some(episode_id) = job.episode_id else {
            return (None, None);
        };

        let episode = match self.store.get_episode(episode_id).await {
            Ok(episode) => episode,
            Err(e) => {
                tracing::warn!(job_id = %job.id, episode_id, error = %e, "failed to load target episode");
                return (None, None);
            }
        };

        match self.store.get_season(episode.season_id).await {
            Ok(season) => (Some(season.season_number), Some(episode.episode_number)),
            Err(e) => {
                tracing::warn!(job_id = %job.id, season_id = episode.season_id, error = %e, "failed to load target season");
                (None, Some(episode.episode_number))
            }
        }
    }

    async fn resolve_episode_id(
        &self,
        media_item_id: i64,
        target_season: Option<i64>,
        episode_number: i64,
    ) -> Result<i64> {
        let season = self
            .store
            .upsert_season(media_item_id, target_season.unwrap_or(1))
            .await
            .context("upsert season")?;
        let episode = self
            .store
            .upsert_episode(season.id, episode_number)
            .await
            .context("upsert episode")?;
        Ok(episode.id)
    }

    fn publish_task(&self, task: &ImportTask) {
        self.event_tx
            .send(Event::ImportTaskCreated {
                job_id: task.download_job_id,
                task_id: task.id,
            })
            .ok();
    }
}

/// Absolute paths as-is; relative ones under the save path, else the content path
fn resolve_source_path(path: &str, item: &Item) -> Option<String> {
    if path.is_empty() {
        return None;
    }
    if Path::new(path).is_absolute() {
        return Some(path.to_string());
    }

    [&item.save_path, &item.content_path]
        .into_iter()
        .find(|root| !root.is_empty())
        .map(|root| Path::new(root).join(path).to_string_lossy().into_owned())
}

fn new_task(
    job: &DownloadJob,
    source_path: String,
    media_type: MediaType,
    episode_id: Option<i64>,
) -> NewImportTask {
    NewImportTask {
        download_job_id: job.id,
        source_path,
        previous_task_id: None,
        media_type,
        media_item_id: job.media_item_id,
        episode_id,
        library_id: job.library_id,
        name_template_id: job.name_template_id,
    }
}
