//! Database layer for media-dl
//!
//! Handles SQLite persistence for download jobs, import tasks, job events,
//! downloader configs and the season/episode records series imports point at.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - `migrations`: Database lifecycle, schema migrations
//! - `download_jobs`: Job CRUD, claiming and state writes
//! - `import_tasks`: Import task creation and lifecycle
//! - `events`: Append-only job audit trail
//! - `downloaders`: Downloader config CRUD
//! - `media`: Seasons and episodes
//!
//! [`Database`] implements [`JobStore`](crate::store::JobStore),
//! [`ImportTaskStore`](crate::store::ImportTaskStore) and
//! [`DownloaderStore`](crate::store::DownloaderStore).

use sqlx::sqlite::SqlitePool;

// Column lists, in struct field order, shared by every query of a table

macro_rules! job_columns {
    () => {
        "id, status, protocol, candidate_link, candidate_title, downloader_id, \
         downloader_external_id, downloader_status, progress, save_path, content_path, \
         attempt_count, last_error, last_error_category, next_run_at, media_type, \
         media_item_id, episode_id, library_id, name_template_id, created_at, updated_at"
    };
}

macro_rules! task_columns {
    () => {
        "id, download_job_id, status, source_path, dest_path, import_method, \
         previous_task_id, media_type, media_item_id, episode_id, library_id, \
         name_template_id, last_error, attempt_count, last_error_category, next_run_at, \
         created_at, updated_at"
    };
}

macro_rules! downloader_columns {
    () => {
        "id, name, kind, protocol, url, username, password, config_json, enabled, \
         is_default, created_at, updated_at"
    };
}

/// Statuses a job never leaves
macro_rules! terminal_statuses {
    () => {
        "('completed', 'failed', 'cancelled')"
    };
}

mod download_jobs;
mod downloaders;
mod events;
mod import_tasks;
mod media;
mod migrations;
mod store_impl;

/// Database handle for media-dl
pub struct Database {
    pool: SqlitePool,
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
