//! Append-only job audit trail.

use crate::error::DatabaseError;
use crate::types::{DownloadJobId, JobEvent, NewJobEvent};
use crate::{Error, Result};

use super::{Database, now};

impl Database {
    /// Append an event to a job's audit trail
    pub async fn insert_job_event(&self, event: &NewJobEvent) -> Result<()> {
        let metadata = event
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO download_job_events (download_job_id, event_type, message, metadata, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.download_job_id)
        .bind(event.event_type.as_str())
        .bind(&event.message)
        .bind(metadata)
        .bind(now())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert job event: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Every event of a job, in insertion order
    pub async fn list_job_events(&self, job_id: DownloadJobId) -> Result<Vec<JobEvent>> {
        sqlx::query_as::<_, JobEvent>(
            r#"
            SELECT id, download_job_id, event_type, message, metadata, created_at
            FROM download_job_events
            WHERE download_job_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list job events: {}",
                e
            )))
        })
    }
}
