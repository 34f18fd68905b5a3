//! Seasons and episodes referenced by series imports.

use crate::error::DatabaseError;
use crate::types::{Episode, Season};
use crate::{Error, Result};

use super::Database;

impl Database {
    /// Get a season by ID
    pub async fn find_season(&self, id: i64) -> Result<Option<Season>> {
        sqlx::query_as::<_, Season>(
            "SELECT id, media_item_id, season_number FROM seasons WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get season: {}",
                e
            )))
        })
    }

    /// Get an episode by ID
    pub async fn find_episode(&self, id: i64) -> Result<Option<Episode>> {
        sqlx::query_as::<_, Episode>(
            "SELECT id, season_id, episode_number, title FROM episodes WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get episode: {}",
                e
            )))
        })
    }

    /// Get or create a season of a series
    pub async fn upsert_season_record(
        &self,
        media_item_id: i64,
        season_number: i64,
    ) -> Result<Season> {
        // DO UPDATE with a no-op assignment so RETURNING yields the existing row
        sqlx::query_as::<_, Season>(
            r#"
            INSERT INTO seasons (media_item_id, season_number) VALUES (?, ?)
            ON CONFLICT (media_item_id, season_number)
                DO UPDATE SET season_number = excluded.season_number
            RETURNING id, media_item_id, season_number
            "#,
        )
        .bind(media_item_id)
        .bind(season_number)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to upsert season: {}",
                e
            )))
        })
    }

    /// Get or create an episode of a season
    pub async fn upsert_episode_record(
        &self,
        season_id: i64,
        episode_number: i64,
    ) -> Result<Episode> {
        sqlx::query_as::<_, Episode>(
            r#"
            INSERT INTO episodes (season_id, episode_number) VALUES (?, ?)
            ON CONFLICT (season_id, episode_number)
                DO UPDATE SET episode_number = excluded.episode_number
            RETURNING id, season_id, episode_number, title
            "#,
        )
        .bind(season_id)
        .bind(episode_number)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to upsert episode: {}",
                e
            )))
        })
    }
}
