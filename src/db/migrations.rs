//! Database lifecycle and schema migrations.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use std::path::Path;
use std::str::FromStr;

use super::Database;

impl Database {
    /// Create a new database connection
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        // Foreign keys on, WAL so pollers and writers don't block each other
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })?;

        let db = Self { pool };
        db.run_migrations().await?;

        tracing::debug!(path = %path.display(), "database ready");
        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create schema_version table: {}",
                e
            )))
        })?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query schema version: {}",
                        e
                    )))
                })?
                .flatten();

        let current_version = current_version.unwrap_or(0);

        if current_version < 1 {
            Self::migrate_v1(&mut conn).await?;
        }
        if current_version < 2 {
            Self::migrate_v2(&mut conn).await?;
        }

        Ok(())
    }

    /// Migration v1: Create initial schema
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("Applying database migration v1");

        // Wrap migration in a transaction so partial failures don't leave the DB in a broken state
        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to begin transaction: {}",
                    e
                )))
            })?;

        let result = async {
            Self::create_downloaders_table(conn).await?;
            Self::create_media_tables(conn).await?;
            Self::create_download_jobs_schema(conn).await?;
            Self::create_import_tasks_schema(conn).await?;
            Self::create_job_events_schema(conn).await?;
            Self::record_migration(conn, 1).await?;
            Ok::<(), Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::MigrationFailed(format!(
                            "Failed to commit migration v1: {}",
                            e
                        )))
                    })?;
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(e);
            }
        }

        tracing::info!("Database migration v1 complete");
        Ok(())
    }

    /// Migration v2: Retry bookkeeping on import tasks
    ///
    /// Import tasks are claimed and retried like jobs, so they get the same
    /// attempt counter, error category and `next_run_at` lease column.
    async fn migrate_v2(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("Applying database migration v2");

        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to begin transaction: {}",
                    e
                )))
            })?;

        let result = async {
            for (sql, what) in [
                (
                    "ALTER TABLE import_tasks ADD COLUMN attempt_count INTEGER NOT NULL DEFAULT 0",
                    "import_tasks.attempt_count column",
                ),
                (
                    "ALTER TABLE import_tasks ADD COLUMN last_error_category TEXT",
                    "import_tasks.last_error_category column",
                ),
                (
                    "ALTER TABLE import_tasks ADD COLUMN next_run_at INTEGER NOT NULL DEFAULT 0",
                    "import_tasks.next_run_at column",
                ),
                (
                    "CREATE INDEX idx_import_tasks_runnable ON import_tasks(status, next_run_at)",
                    "import_tasks runnable index",
                ),
            ] {
                Self::execute_ddl(conn, sql, what).await?;
            }

            Self::record_migration(conn, 2).await?;
            Ok::<(), Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::MigrationFailed(format!(
                            "Failed to commit migration v2: {}",
                            e
                        )))
                    })?;
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(e);
            }
        }

        tracing::info!("Database migration v2 complete");
        Ok(())
    }

    async fn execute_ddl(conn: &mut SqliteConnection, sql: &str, what: &str) -> Result<()> {
        sqlx::query(sql).execute(&mut *conn).await.map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create {}: {}",
                what, e
            )))
        })?;
        Ok(())
    }

    /// Create downloaders table; at most one default per protocol
    async fn create_downloaders_table(conn: &mut SqliteConnection) -> Result<()> {
        Self::execute_ddl(
            conn,
            r#"
            CREATE TABLE downloaders (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                protocol TEXT NOT NULL,
                url TEXT NOT NULL,
                username TEXT,
                password TEXT,
                config_json TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                is_default INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            "downloaders table",
        )
        .await?;

        Self::execute_ddl(
            conn,
            "CREATE UNIQUE INDEX idx_downloaders_default ON downloaders(protocol) WHERE is_default = 1",
            "downloaders default index",
        )
        .await
    }

    /// Create seasons and episodes tables
    async fn create_media_tables(conn: &mut SqliteConnection) -> Result<()> {
        Self::execute_ddl(
            conn,
            r#"
            CREATE TABLE seasons (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                media_item_id INTEGER NOT NULL,
                season_number INTEGER NOT NULL,
                UNIQUE (media_item_id, season_number)
            )
            "#,
            "seasons table",
        )
        .await?;

        Self::execute_ddl(
            conn,
            r#"
            CREATE TABLE episodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                season_id INTEGER NOT NULL REFERENCES seasons(id) ON DELETE CASCADE,
                episode_number INTEGER NOT NULL,
                title TEXT,
                UNIQUE (season_id, episode_number)
            )
            "#,
            "episodes table",
        )
        .await
    }

    /// Create download_jobs table and its claim index
    async fn create_download_jobs_schema(conn: &mut SqliteConnection) -> Result<()> {
        Self::execute_ddl(
            conn,
            r#"
            CREATE TABLE download_jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                status TEXT NOT NULL DEFAULT 'created',
                protocol TEXT NOT NULL,
                candidate_link TEXT NOT NULL,
                candidate_title TEXT,
                downloader_id TEXT NOT NULL,
                downloader_external_id TEXT,
                downloader_status TEXT,
                progress REAL,
                save_path TEXT,
                content_path TEXT,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                last_error_category TEXT,
                next_run_at INTEGER NOT NULL,
                media_type TEXT NOT NULL,
                media_item_id INTEGER NOT NULL,
                episode_id INTEGER,
                library_id INTEGER NOT NULL,
                name_template_id INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            "download_jobs table",
        )
        .await?;

        Self::execute_ddl(
            conn,
            "CREATE INDEX idx_download_jobs_runnable ON download_jobs(status, next_run_at)",
            "download_jobs runnable index",
        )
        .await
    }

    /// Create import_tasks table
    ///
    /// First-time tasks are unique per (job, source file, episode), which is what
    /// makes spawning idempotent. Reimports are exempt.
    async fn create_import_tasks_schema(conn: &mut SqliteConnection) -> Result<()> {
        Self::execute_ddl(
            conn,
            r#"
            CREATE TABLE import_tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                download_job_id INTEGER NOT NULL REFERENCES download_jobs(id) ON DELETE CASCADE,
                status TEXT NOT NULL DEFAULT 'pending',
                source_path TEXT NOT NULL,
                dest_path TEXT,
                import_method TEXT,
                previous_task_id INTEGER REFERENCES import_tasks(id) ON DELETE SET NULL,
                media_type TEXT NOT NULL,
                media_item_id INTEGER NOT NULL,
                episode_id INTEGER,
                library_id INTEGER NOT NULL,
                name_template_id INTEGER NOT NULL,
                last_error TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            "import_tasks table",
        )
        .await?;

        Self::execute_ddl(
            conn,
            r#"
            CREATE UNIQUE INDEX idx_import_tasks_source
                ON import_tasks(download_job_id, source_path, IFNULL(episode_id, 0))
                WHERE previous_task_id IS NULL
            "#,
            "import_tasks source index",
        )
        .await?;

        Self::execute_ddl(
            conn,
            "CREATE INDEX idx_import_tasks_status ON import_tasks(status)",
            "import_tasks status index",
        )
        .await
    }

    /// Create download_job_events table
    async fn create_job_events_schema(conn: &mut SqliteConnection) -> Result<()> {
        Self::execute_ddl(
            conn,
            r#"
            CREATE TABLE download_job_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                download_job_id INTEGER NOT NULL REFERENCES download_jobs(id) ON DELETE CASCADE,
                event_type TEXT NOT NULL,
                message TEXT,
                metadata TEXT,
                created_at INTEGER NOT NULL
            )
            "#,
            "download_job_events table",
        )
        .await?;

        Self::execute_ddl(
            conn,
            "CREATE INDEX idx_job_events_job ON download_job_events(download_job_id, id)",
            "download_job_events index",
        )
        .await
    }

    async fn record_migration(conn: &mut SqliteConnection, version: i32) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to record migration: {}",
                    e
                )))
            })?;
        Ok(())
    }

    /// Close the database connection
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
