//! Common test utilities for media-dl integration tests

#![allow(dead_code)]

use std::time::Duration;

use media_dl::config::{PersistenceConfig, WorkerConfig};
use media_dl::types::{MediaType, NewDownloadJob, NewDownloader, Protocol};
use media_dl::{Config, Event, InstanceId, MediaDl, Registry};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Infohash every mocked torrent uses
pub const HASH: &str = "0123456789abcdef0123456789abcdef01234567";

/// Create a media-dl instance over a fresh database in a temp directory
pub async fn create_test_media() -> (MediaDl, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();

    let config = Config {
        worker: WorkerConfig {
            poll_interval: Duration::from_millis(50),
            ..Default::default()
        },
        persistence: PersistenceConfig {
            database_path: temp_dir.path().join("media-dl.db"),
        },
        ..Default::default()
    };

    let media = MediaDl::new(config, Registry::with_defaults()).await.unwrap();
    (media, temp_dir)
}

/// qBittorrent downloader pointing at a mock server, with fast retries
pub fn qbittorrent(server: &MockServer) -> NewDownloader {
    NewDownloader {
        name: "qbit".to_string(),
        kind: "qbittorrent".to_string(),
        protocol: Protocol::Torrent,
        url: server.uri(),
        username: Some("admin".to_string()),
        password: Some("secret".to_string()),
        config: Some(json!({
            "timeout_secs": 5,
            "max_retries": 1,
            "retry_delay_ms": 10
        })),
        enabled: true,
    }
}

/// Movie job for a magnet of [`HASH`]
pub fn movie_job(downloader_id: InstanceId) -> NewDownloadJob {
    NewDownloadJob {
        protocol: "torrent".to_string(),
        candidate_link: format!("magnet:?xt=urn:btih:{HASH}&dn=Some.Movie.2024.1080p"),
        candidate_title: Some("Some.Movie.2024.1080p".to_string()),
        downloader_id,
        media_type: MediaType::Movie,
        media_item_id: 7,
        episode_id: None,
        library_id: 1,
        name_template_id: 1,
    }
}

/// Mount login and version endpoints so the connection test passes
pub async fn mount_healthy_qbittorrent(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/v2/auth/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "SID=abc123; HttpOnly; path=/")
                .set_body_string("Ok."),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v2/app/version"))
        .respond_with(ResponseTemplate::new(200).set_body_string("v4.6.2"))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v2/app/webapiVersion"))
        .respond_with(ResponseTemplate::new(200).set_body_string("2.9.3"))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v2/torrents/add"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Ok."))
        .mount(server)
        .await;
}

/// `torrents/info` entry for [`HASH`]
pub fn torrent(state: &str, progress: f64) -> serde_json::Value {
    json!([{
        "hash": HASH,
        "name": "Some.Movie.2024.1080p",
        "state": state,
        "progress": progress,
        "save_path": "/downloads",
        "content_path": "/downloads/Some.Movie.2024.1080p",
        "added_on": 1_700_000_000
    }])
}

/// Mount the file listing of a finished movie release
pub async fn mount_movie_files(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/v2/torrents/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"name": "Some.Movie.2024.1080p/sample.mkv", "size": 50_000_000, "progress": 1.0, "priority": 1},
            {"name": "Some.Movie.2024.1080p/Some.Movie.2024.1080p.mkv", "size": 4_000_000_000_i64, "progress": 1.0, "priority": 1},
            {"name": "Some.Movie.2024.1080p/Some.Movie.2024.1080p.nfo", "size": 2_000, "progress": 1.0, "priority": 1}
        ])))
        .mount(server)
        .await;
}

/// Wait for the first event matching `predicate`
pub async fn wait_for_event<F>(
    events: &mut tokio::sync::broadcast::Receiver<Event>,
    timeout: Duration,
    predicate: F,
) -> Option<Event>
where
    F: Fn(&Event) -> bool,
{
    let result = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(_) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    })
    .await;

    result.ok().flatten()
}
