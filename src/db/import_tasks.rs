//! Import task creation and lifecycle.

use std::time::Duration;

use crate::error::{DatabaseError, ErrorCategory};
use crate::importer::PlacementMethod;
use crate::state::ImportTaskStatus;
use crate::types::{DownloadJobId, ImportTask, ImportTaskId, NewImportTask};
use crate::{Error, Result};

use super::{Database, now};

impl Database {
    /// Create an import task
    ///
    /// A first-time task (no `previous_task_id`) for a (job, source path, episode)
    /// that already exists is not duplicated; the existing task is returned.
    pub async fn insert_import_task(&self, task: &NewImportTask) -> Result<ImportTask> {
        let now = now();

        let inserted = sqlx::query_as::<_, ImportTask>(concat!(
            r#"
            INSERT INTO import_tasks (
                download_job_id, status, source_path, previous_task_id, media_type,
                media_item_id, episode_id, library_id, name_template_id, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            RETURNING "#,
            task_columns!()
        ))
        .bind(task.download_job_id)
        .bind(ImportTaskStatus::Pending)
        .bind(&task.source_path)
        .bind(task.previous_task_id)
        .bind(task.media_type)
        .bind(task.media_item_id)
        .bind(task.episode_id)
        .bind(task.library_id)
        .bind(task.name_template_id)
        .bind(now)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert import task: {}",
                e
            )))
        })?;

        if let Some(task) = inserted {
            return Ok(task);
        }

        sqlx::query_as::<_, ImportTask>(concat!(
            "SELECT ",
            task_columns!(),
            r#"
            FROM import_tasks
            WHERE download_job_id = ? AND source_path = ? AND IFNULL(episode_id, 0) = IFNULL(?, 0)
              AND previous_task_id IS NULL
            "#
        ))
        .bind(task.download_job_id)
        .bind(&task.source_path)
        .bind(task.episode_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to load existing import task: {}",
                e
            )))
        })
    }

    /// Get an import task by ID
    pub async fn get_import_task(&self, id: ImportTaskId) -> Result<ImportTask> {
        sqlx::query_as::<_, ImportTask>(concat!(
            "SELECT ",
            task_columns!(),
            " FROM import_tasks WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get import task: {}",
                e
            )))
        })?
        .ok_or_else(|| Error::Database(DatabaseError::NotFound(format!("import task {}", id))))
    }

    /// Every import task of a job, oldest first
    pub async fn list_import_tasks_for_job(&self, job_id: DownloadJobId) -> Result<Vec<ImportTask>> {
        sqlx::query_as::<_, ImportTask>(concat!(
            "SELECT ",
            task_columns!(),
            " FROM import_tasks WHERE download_job_id = ? ORDER BY id ASC"
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list import tasks: {}",
                e
            )))
        })
    }

    /// Claim up to `limit` pending or in-progress tasks whose `next_run_at` has passed
    ///
    /// `next_run_at` is pushed out by `lease` in the same statement, so a task is
    /// handed to one claimer at a time. An in-progress task whose claimer died is
    /// claimed again once the lease runs out.
    pub async fn claim_runnable_import_tasks(
        &self,
        limit: u32,
        lease: Duration,
    ) -> Result<Vec<ImportTask>> {
        let now = now();
        let lease_until = now.saturating_add(i64::try_from(lease.as_secs()).unwrap_or(i64::MAX));

        sqlx::query_as::<_, ImportTask>(concat!(
            r#"
            UPDATE import_tasks
            SET next_run_at = ?
            WHERE id IN (
                SELECT id FROM import_tasks
                WHERE status IN ('pending', 'in_progress')
                  AND next_run_at <= ?
                ORDER BY next_run_at ASC, id ASC
                LIMIT ?
            )
            RETURNING "#,
            task_columns!()
        ))
        .bind(lease_until)
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to claim import tasks: {}",
                e
            )))
        })
    }

    /// `pending -> in_progress`
    pub async fn start_import_task(&self, id: ImportTaskId) -> Result<ImportTask> {
        self.transition_import_task(id, ImportTaskStatus::InProgress, None, None, None)
            .await
    }

    /// `in_progress -> completed`, recording where and how the file was placed
    pub async fn complete_import_task(
        &self,
        id: ImportTaskId,
        dest_path: &str,
        method: PlacementMethod,
    ) -> Result<ImportTask> {
        self.transition_import_task(
            id,
            ImportTaskStatus::Completed,
            Some(dest_path),
            Some(method.as_str()),
            None,
        )
        .await
    }

    /// `in_progress -> failed`
    pub async fn fail_import_task(
        &self,
        id: ImportTaskId,
        message: &str,
        category: ErrorCategory,
    ) -> Result<ImportTask> {
        self.transition_import_task(
            id,
            ImportTaskStatus::Failed,
            None,
            None,
            Some((message, category)),
        )
        .await
    }

    /// Count a failed attempt of an in-progress task and push `next_run_at` out
    pub async fn schedule_import_task_retry(
        &self,
        id: ImportTaskId,
        message: &str,
        category: ErrorCategory,
        next_run_at: i64,
    ) -> Result<ImportTask> {
        let row = sqlx::query_as::<_, ImportTask>(concat!(
            r#"
            UPDATE import_tasks
            SET attempt_count = attempt_count + 1, last_error = ?, last_error_category = ?,
                next_run_at = ?, updated_at = ?
            WHERE id = ? AND status = ?
            RETURNING "#,
            task_columns!()
        ))
        .bind(message)
        .bind(category)
        .bind(next_run_at)
        .bind(now())
        .bind(id)
        .bind(ImportTaskStatus::InProgress)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to schedule import task retry: {}",
                e
            )))
        })?;

        match row {
            Some(task) => Ok(task),
            None => {
                let current = self.get_import_task(id).await?;
                Err(Error::InvalidTransition {
                    kind: "import task",
                    from: current.status.to_string(),
                    to: "retry".to_string(),
                })
            }
        }
    }

    /// `pending -> cancelled`
    pub async fn cancel_import_task(&self, id: ImportTaskId) -> Result<ImportTask> {
        self.transition_import_task(id, ImportTaskStatus::Cancelled, None, None, None)
            .await
    }

    /// Queue a finished task to be imported again as a new pending task
    pub async fn reimport_task(&self, id: ImportTaskId) -> Result<ImportTask> {
        let previous = self.get_import_task(id).await?;
        if !previous.status.can_reimport() {
            return Err(Error::InvalidTransition {
                kind: "import task",
                from: previous.status.to_string(),
                to: "reimport".to_string(),
            });
        }

        let task = self
            .insert_import_task(&NewImportTask {
                download_job_id: previous.download_job_id,
                source_path: previous.source_path,
                previous_task_id: Some(previous.id),
                media_type: previous.media_type,
                media_item_id: previous.media_item_id,
                episode_id: previous.episode_id,
                library_id: previous.library_id,
                name_template_id: previous.name_template_id,
            })
            .await?;

        tracing::info!(task_id = %task.id, previous_task_id = %id, "queued reimport");
        Ok(task)
    }

    async fn transition_import_task(
        &self,
        id: ImportTaskId,
        to: ImportTaskStatus,
        dest_path: Option<&str>,
        import_method: Option<&str>,
        error: Option<(&str, ErrorCategory)>,
    ) -> Result<ImportTask> {
        let current = self.get_import_task(id).await?;
        current.status.must_transition(to)?;

        // Compare-and-set on the status read above
        let row = sqlx::query_as::<_, ImportTask>(concat!(
            r#"
            UPDATE import_tasks
            SET status = ?,
                dest_path = COALESCE(?, dest_path),
                import_method = COALESCE(?, import_method),
                last_error = COALESCE(?, last_error),
                last_error_category = COALESCE(?, last_error_category),
                updated_at = ?
            WHERE id = ? AND status = ?
            RETURNING "#,
            task_columns!()
        ))
        .bind(to)
        .bind(dest_path)
        .bind(import_method)
        .bind(error.map(|(message, _)| message))
        .bind(error.map(|(_, category)| category))
        .bind(now())
        .bind(id)
        .bind(current.status)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update import task: {}",
                e
            )))
        })?;

        row.ok_or_else(|| Error::InvalidTransition {
            kind: "import task",
            from: current.status.to_string(),
            to: to.to_string(),
        })
    }
}
