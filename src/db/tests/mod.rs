use crate::db::Database;
use crate::types::{InstanceId, MediaType, NewDownloadJob, NewDownloader, Protocol};
use tempfile::NamedTempFile;

mod close;
mod download_jobs;
mod media_events;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Open a fresh database; keep the temp file alive for the test's duration
async fn test_db() -> (Database, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    (db, temp_file)
}

/// A movie job pointing at a random downloader id
fn movie_job(link: &str) -> NewDownloadJob {
    NewDownloadJob {
        protocol: "torrent".to_string(),
        candidate_link: link.to_string(),
        candidate_title: Some("Big Buck Bunny 2008 1080p".to_string()),
        downloader_id: InstanceId::new_v4(),
        media_type: MediaType::Movie,
        media_item_id: 42,
        episode_id: None,
        library_id: 1,
        name_template_id: 1,
    }
}

fn qbittorrent(name: &str) -> NewDownloader {
    NewDownloader {
        name: name.to_string(),
        kind: "qbittorrent".to_string(),
        protocol: Protocol::Torrent,
        url: "http://qb:8080".to_string(),
        username: Some("admin".to_string()),
        password: Some("adminadmin".to_string()),
        config: Some(serde_json::json!({ "timeout_secs": 10 })),
        enabled: true,
    }
}
