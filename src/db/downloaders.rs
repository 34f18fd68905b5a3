//! Downloader configuration CRUD.
//!
//! At most one downloader per protocol carries `is_default`; a partial unique
//! index enforces it and [`Database::set_default_downloader`] moves the flag
//! inside one transaction.

use crate::error::DatabaseError;
use crate::types::{DownloaderRecord, InstanceId, NewDownloader, Protocol};
use crate::{Error, Result};

use super::{Database, now};

impl Database {
    /// Store a new downloader configuration under a fresh id
    pub async fn insert_downloader(&self, downloader: &NewDownloader) -> Result<DownloaderRecord> {
        let now = now();
        let config_json = downloader
            .config
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query_as::<_, DownloaderRecord>(concat!(
            r#"
            INSERT INTO downloaders (
                id, name, kind, protocol, url, username, password, config_json,
                enabled, is_default, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            RETURNING "#,
            downloader_columns!()
        ))
        .bind(InstanceId::new_v4())
        .bind(&downloader.name)
        .bind(&downloader.kind)
        .bind(downloader.protocol.as_str())
        .bind(&downloader.url)
        .bind(&downloader.username)
        .bind(&downloader.password)
        .bind(config_json)
        .bind(downloader.enabled)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert downloader: {}",
                e
            )))
        })
    }

    /// Replace a downloader's configuration, keeping its id and default flag
    pub async fn update_downloader(
        &self,
        id: &InstanceId,
        downloader: &NewDownloader,
    ) -> Result<DownloaderRecord> {
        let config_json = downloader
            .config
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query_as::<_, DownloaderRecord>(concat!(
            r#"
            UPDATE downloaders
            SET name = ?, kind = ?, protocol = ?, url = ?, username = ?, password = ?,
                config_json = ?, enabled = ?, updated_at = ?
            WHERE id = ?
            RETURNING "#,
            downloader_columns!()
        ))
        .bind(&downloader.name)
        .bind(&downloader.kind)
        .bind(downloader.protocol.as_str())
        .bind(&downloader.url)
        .bind(&downloader.username)
        .bind(&downloader.password)
        .bind(config_json)
        .bind(downloader.enabled)
        .bind(now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update downloader: {}",
                e
            )))
        })?
        .ok_or_else(|| Error::Database(DatabaseError::NotFound(format!("downloader {}", id))))
    }

    /// Delete a downloader configuration
    pub async fn delete_downloader(&self, id: &InstanceId) -> Result<()> {
        let result = sqlx::query("DELETE FROM downloaders WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete downloader: {}",
                    e
                )))
            })?;

        if result.rows_affected() == 0 {
            return Err(Error::Database(DatabaseError::NotFound(format!(
                "downloader {}",
                id
            ))));
        }
        Ok(())
    }

    /// Make a downloader the default for its protocol, clearing the previous default
    pub async fn set_default_downloader(&self, id: &InstanceId) -> Result<DownloaderRecord> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        let protocol: Option<String> =
            sqlx::query_scalar("SELECT protocol FROM downloaders WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to get downloader: {}",
                        e
                    )))
                })?;
        let Some(protocol) = protocol else {
            return Err(Error::Database(DatabaseError::NotFound(format!(
                "downloader {}",
                id
            ))));
        };

        sqlx::query("UPDATE downloaders SET is_default = 0 WHERE protocol = ? AND is_default = 1")
            .bind(&protocol)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to clear default downloader: {}",
                    e
                )))
            })?;

        let record = sqlx::query_as::<_, DownloaderRecord>(concat!(
            "UPDATE downloaders SET is_default = 1, updated_at = ? WHERE id = ? RETURNING ",
            downloader_columns!()
        ))
        .bind(now())
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to set default downloader: {}",
                e
            )))
        })?;

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit transaction: {}",
                e
            )))
        })?;

        tracing::info!(downloader_id = %id, protocol = %protocol, "default downloader changed");
        Ok(record)
    }

    /// Every configured downloader, ordered by name
    pub async fn list_downloader_records(&self) -> Result<Vec<DownloaderRecord>> {
        sqlx::query_as::<_, DownloaderRecord>(concat!(
            "SELECT ",
            downloader_columns!(),
            " FROM downloaders ORDER BY name ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list downloaders: {}",
                e
            )))
        })
    }

    /// Get a downloader by ID
    pub async fn find_downloader(&self, id: &InstanceId) -> Result<Option<DownloaderRecord>> {
        sqlx::query_as::<_, DownloaderRecord>(concat!(
            "SELECT ",
            downloader_columns!(),
            " FROM downloaders WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get downloader: {}",
                e
            )))
        })
    }

    /// The default downloader of a protocol, if one is set
    pub async fn find_default_downloader(
        &self,
        protocol: Protocol,
    ) -> Result<Option<DownloaderRecord>> {
        sqlx::query_as::<_, DownloaderRecord>(concat!(
            "SELECT ",
            downloader_columns!(),
            " FROM downloaders WHERE protocol = ? AND is_default = 1"
        ))
        .bind(protocol.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get default downloader: {}",
                e
            )))
        })
    }
}
