//! # media-dl
//!
//! Download-job orchestration library for media managers.
//!
//! A download job ties a candidate link (magnet, `.torrent` URL or NZB) to a
//! configured downloader instance and to the library item it is meant for. The
//! [`Worker`] submits each job to its downloader, mirrors the backend's progress
//! onto the job, and once the download completes creates the import tasks that
//! move its files into the library. Given a [`DestinationResolver`], the
//! [`ImportWorker`] then places each task's file there.
//!
//! ## Design Philosophy
//!
//! media-dl is designed to be:
//! - **Crash safe** - Every job step is a persisted state write; a restarted
//!   process picks up where the last one stopped
//! - **Multi-process** - Jobs are claimed with a lease, so several workers can
//!   share one database without processing a job twice
//! - **Backend agnostic** - Downloaders plug in through [`Registry`] builders
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use media_dl::{Config, MediaDl, Registry};
//! use media_dl::types::{MediaType, NewDownloadJob, NewDownloader, Protocol};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let media = MediaDl::new(Config::default(), Registry::with_defaults()).await?;
//!
//!     let downloader = media
//!         .add_downloader(&NewDownloader {
//!             name: "qbit".to_string(),
//!             kind: "qbittorrent".to_string(),
//!             protocol: Protocol::Torrent,
//!             url: "http://localhost:8080".to_string(),
//!             username: Some("admin".to_string()),
//!             password: Some("adminadmin".to_string()),
//!             config: None,
//!             enabled: true,
//!         })
//!         .await?;
//!
//!     // Subscribe to events
//!     let mut events = media.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     media
//!         .enqueue(&NewDownloadJob {
//!             protocol: Protocol::Torrent.to_string(),
//!             candidate_link: "magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567"
//!                 .to_string(),
//!             candidate_title: Some("Some.Movie.2024.1080p".to_string()),
//!             downloader_id: downloader.id,
//!             media_type: MediaType::Movie,
//!             media_item_id: 1,
//!             episode_id: None,
//!             library_id: 1,
//!             name_template_id: 1,
//!         })
//!         .await?;
//!
//!     media.start().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Downloader clients, registry and manager
pub mod downloader;
/// Error types
pub mod error;
/// Import file selection and placement
pub mod importer;
/// Retry logic with exponential backoff
pub mod retry;
/// Job and import task state machines
pub mod state;
/// Storage traits the worker and manager run against
pub mod store;
/// Core types and events
pub mod types;
/// Download job and import task poll loops
pub mod worker;

mod engine;

// Re-export commonly used types
pub use config::{Config, ImportConfig, PersistenceConfig, RetryConfig, WorkerConfig};
pub use db::Database;
pub use downloader::{DownloaderClient, Manager, Registry};
pub use importer::DestinationResolver;
pub use engine::MediaDl;
pub use error::{DatabaseError, DownloaderError, Error, ErrorCategory, Result, ResultExt};
pub use state::{DownloadJobStatus, ImportTaskStatus};
pub use store::{DownloaderStore, ImportTaskStore, JobStore};
pub use types::{DownloadJob, DownloadJobId, Event, ImportTask, InstanceId, Protocol};
pub use worker::{ImportWorker, Worker};

/// Helper function to run media-dl with graceful signal handling.
///
/// Waits for a termination signal and then calls [`MediaDl::shutdown`].
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use media_dl::{Config, MediaDl, Registry, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let media = MediaDl::new(Config::default(), Registry::with_defaults()).await?;
///     media.start().await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(media).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(media: MediaDl) -> Result<()> {
    wait_for_signal().await;
    media.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
