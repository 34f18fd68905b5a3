//! End-to-end job lifecycle against a mocked qBittorrent Web API
//!
//! These tests drive [`MediaDl`] through its public surface only: a downloader
//! is added and connection-tested, a job is enqueued, and the worker carries it
//! from submission to the import tasks of the completed download. With a
//! destination resolver the import worker then places the files.

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use common::{
    HASH, create_test_media, mount_healthy_qbittorrent, mount_movie_files, movie_job, qbittorrent,
    torrent, wait_for_event,
};
use media_dl::{
    DestinationResolver, DownloadJobStatus, ErrorCategory, Event, ImportTask, ImportTaskStatus,
};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn movie_job_runs_from_submission_to_import_task() {
    let server = MockServer::start().await;
    mount_healthy_qbittorrent(&server).await;

    // First poll sees the download in flight, later ones see it seeding
    Mock::given(method("GET"))
        .and(path("/api/v2/torrents/info"))
        .and(query_param("hashes", HASH))
        .respond_with(ResponseTemplate::new(200).set_body_json(torrent("downloading", 0.5)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/torrents/info"))
        .and(query_param("hashes", HASH))
        .respond_with(ResponseTemplate::new(200).set_body_json(torrent("uploading", 1.0)))
        .mount(&server)
        .await;
    mount_movie_files(&server).await;

    let (media, _temp_dir) = create_test_media().await;
    let downloader = media.add_downloader(&qbittorrent(&server)).await.unwrap();
    let job = media.enqueue(&movie_job(downloader.id.clone())).await.unwrap();
    assert_eq!(job.status, DownloadJobStatus::Created);

    let db = media.database();
    let worker = media.worker();

    assert_eq!(worker.tick().await.unwrap(), 1);
    let job = db.find_download_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, DownloadJobStatus::Enqueued);
    assert_eq!(job.downloader_external_id.as_deref(), Some(HASH));

    assert_eq!(worker.tick().await.unwrap(), 1);
    let job = db.find_download_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, DownloadJobStatus::Downloading);
    assert_eq!(job.progress, Some(0.5));
    assert_eq!(job.downloader_status.as_deref(), Some("downloading"));

    assert_eq!(worker.tick().await.unwrap(), 1);
    let job = db.find_download_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, DownloadJobStatus::Completed);
    assert_eq!(job.downloader_status.as_deref(), Some("uploading"));
    assert_eq!(
        job.content_path.as_deref(),
        Some("/downloads/Some.Movie.2024.1080p")
    );

    let tasks = db.list_import_tasks_for_job(job.id).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, ImportTaskStatus::Pending);
    assert_eq!(
        tasks[0].source_path,
        "/downloads/Some.Movie.2024.1080p/Some.Movie.2024.1080p.mkv"
    );
    assert_eq!(tasks[0].media_item_id, 7);

    // Terminal jobs are never claimed again
    assert_eq!(worker.tick().await.unwrap(), 0);

    let transitions: Vec<String> = db
        .list_job_events(job.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.event_type == "status_changed")
        .filter_map(|e| e.message)
        .collect();
    assert_eq!(
        transitions,
        vec![
            "created -> enqueued",
            "enqueued -> downloading",
            "downloading -> completed"
        ]
    );

    media.shutdown().await.unwrap();
}

/// `<root>/Movie <id>/movie`; the worker appends the source extension
struct MovieFolders(PathBuf);

#[async_trait]
impl DestinationResolver for MovieFolders {
    async fn resolve(&self, task: &ImportTask) -> media_dl::Result<PathBuf> {
        Ok(self
            .0
            .join(format!("Movie {}", task.media_item_id))
            .join("movie"))
    }
}

#[tokio::test]
async fn completed_movie_is_placed_in_the_library() {
    let server = MockServer::start().await;
    mount_healthy_qbittorrent(&server).await;
    mount_movie_files(&server).await;

    let (media, temp_dir) = create_test_media().await;
    let downloads = temp_dir.path().join("downloads");
    let source = downloads.join("Some.Movie.2024.1080p/Some.Movie.2024.1080p.mkv");
    std::fs::create_dir_all(source.parent().unwrap()).unwrap();
    std::fs::write(&source, "feature").unwrap();

    Mock::given(method("GET"))
        .and(path("/api/v2/torrents/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "hash": HASH,
            "name": "Some.Movie.2024.1080p",
            "state": "uploading",
            "progress": 1.0,
            "save_path": downloads.to_str().unwrap(),
            "content_path": downloads.join("Some.Movie.2024.1080p").to_str().unwrap(),
            "added_on": 1_700_000_000
        }])))
        .mount(&server)
        .await;

    let library = temp_dir.path().join("library");
    let media = media.with_destination_resolver(Arc::new(MovieFolders(library.clone())));
    let downloader = media.add_downloader(&qbittorrent(&server)).await.unwrap();
    let job = media.enqueue(&movie_job(downloader.id)).await.unwrap();

    // Submit, then observe completion
    media.worker().tick().await.unwrap();
    media.worker().tick().await.unwrap();

    let db = media.database();
    let tasks = db.list_import_tasks_for_job(job.id).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].source_path, source.to_str().unwrap());

    let imports = media.import_worker().unwrap();
    assert_eq!(imports.tick().await.unwrap(), 1);

    let placed = library.join("Movie 7/movie.mkv");
    let task = db.get_import_task(tasks[0].id).await.unwrap();
    assert_eq!(task.status, ImportTaskStatus::Completed);
    assert_eq!(task.dest_path.as_deref(), Some(placed.to_str().unwrap()));
    assert_eq!(std::fs::read_to_string(&placed).unwrap(), "feature");

    // A reimport replaces the placed file; unlink first, it shares the source inode
    std::fs::remove_file(&placed).unwrap();
    std::fs::write(&placed, "stale").unwrap();
    let again = media.reimport(task.id).await.unwrap();
    assert_eq!(again.previous_task_id, Some(task.id));
    assert_eq!(imports.tick().await.unwrap(), 1);

    let again = db.get_import_task(again.id).await.unwrap();
    assert_eq!(again.status, ImportTaskStatus::Completed);
    assert_eq!(std::fs::read_to_string(&placed).unwrap(), "feature");

    media.shutdown().await.unwrap();
}

#[tokio::test]
async fn running_worker_publishes_job_and_task_events() {
    let server = MockServer::start().await;
    mount_healthy_qbittorrent(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v2/torrents/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(torrent("stalledUP", 1.0)))
        .mount(&server)
        .await;
    mount_movie_files(&server).await;

    let (media, _temp_dir) = create_test_media().await;
    let downloader = media.add_downloader(&qbittorrent(&server)).await.unwrap();

    let mut events = media.subscribe();
    media.start().await.unwrap();
    // Starting twice keeps the one loop
    media.start().await.unwrap();

    let job = media.enqueue(&movie_job(downloader.id)).await.unwrap();

    let created = wait_for_event(&mut events, Duration::from_secs(10), |e| {
        matches!(e, Event::ImportTaskCreated { job_id, .. } if *job_id == job.id)
    })
    .await;
    assert!(created.is_some(), "no import task event before timeout");

    let completed = wait_for_event(&mut events, Duration::from_secs(10), |e| {
        matches!(e, Event::DownloadJobUpdated { job: j } if j.id == job.id && j.status == DownloadJobStatus::Completed)
    })
    .await;
    assert!(completed.is_some(), "no completed job event before timeout");

    media.shutdown().await.unwrap();
    let shutdown = wait_for_event(&mut events, Duration::from_secs(5), |e| {
        matches!(e, Event::Shutdown)
    })
    .await;
    assert!(shutdown.is_some());

    // No new work after shutdown
    assert!(media.start().await.is_err());
    assert!(media.enqueue(&movie_job(job.downloader_id)).await.is_err());
}

#[tokio::test]
async fn backend_error_state_fails_job_without_retry() {
    let server = MockServer::start().await;
    mount_healthy_qbittorrent(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v2/torrents/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(torrent("missingFiles", 0.3)))
        .mount(&server)
        .await;

    let (media, _temp_dir) = create_test_media().await;
    let downloader = media.add_downloader(&qbittorrent(&server)).await.unwrap();
    let job = media.enqueue(&movie_job(downloader.id)).await.unwrap();

    media.worker().tick().await.unwrap();
    media.worker().tick().await.unwrap();

    let job = media.database().find_download_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, DownloadJobStatus::Failed);
    assert_eq!(job.last_error_category, Some(ErrorCategory::Permanent));
    assert_eq!(job.attempt_count, 0);
    assert_eq!(job.downloader_status.as_deref(), Some("missingFiles"));
    assert!(
        media
            .database()
            .list_import_tasks_for_job(job.id)
            .await
            .unwrap()
            .is_empty()
    );

    media.shutdown().await.unwrap();
}

#[tokio::test]
async fn rejected_credentials_store_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Fails."))
        .mount(&server)
        .await;

    let (media, _temp_dir) = create_test_media().await;
    let err = media.add_downloader(&qbittorrent(&server)).await.unwrap_err();
    assert!(err.to_string().contains("test failed"), "unexpected error: {err}");

    assert!(
        media
            .database()
            .list_downloader_records()
            .await
            .unwrap()
            .is_empty()
    );
    assert!(media.manager().list_clients().await.is_empty());

    media.shutdown().await.unwrap();
}

#[tokio::test]
async fn downloader_failing_activation_is_not_stored() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/auth/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "SID=abc123; HttpOnly; path=/")
                .set_body_string("Ok."),
        )
        .mount(&server)
        .await;
    // The validation test sees a version, the activation test does not
    Mock::given(method("GET"))
        .and(path("/api/v2/app/version"))
        .respond_with(ResponseTemplate::new(200).set_body_string("v4.6.2"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/app/version"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let (media, _temp_dir) = create_test_media().await;
    assert!(media.add_downloader(&qbittorrent(&server)).await.is_err());

    assert!(
        media
            .database()
            .list_downloader_records()
            .await
            .unwrap()
            .is_empty()
    );
    assert!(media.manager().list_clients().await.is_empty());

    media.shutdown().await.unwrap();
}

#[tokio::test]
async fn removed_downloader_fails_its_jobs_permanently() {
    let server = MockServer::start().await;
    mount_healthy_qbittorrent(&server).await;

    let (media, _temp_dir) = create_test_media().await;
    let downloader = media.add_downloader(&qbittorrent(&server)).await.unwrap();
    let test = media.test_downloader(&downloader.id).await.unwrap();
    assert!(test.success);
    assert_eq!(test.version.as_deref(), Some("v4.6.2"));

    let job = media.enqueue(&movie_job(downloader.id.clone())).await.unwrap();
    media.remove_downloader(&downloader.id).await.unwrap();
    assert!(media.manager().get_client(&downloader.id).await.is_err());

    media.worker().tick().await.unwrap();

    let job = media.database().find_download_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, DownloadJobStatus::Failed);
    assert_eq!(job.last_error_category, Some(ErrorCategory::Permanent));
    assert!(
        job.last_error
            .as_deref()
            .unwrap()
            .contains("get downloader client")
    );

    media.shutdown().await.unwrap();
}

#[tokio::test]
async fn cancelled_job_is_left_alone() {
    let server = MockServer::start().await;
    mount_healthy_qbittorrent(&server).await;

    let (media, _temp_dir) = create_test_media().await;
    let downloader = media.add_downloader(&qbittorrent(&server)).await.unwrap();
    let job = media.enqueue(&movie_job(downloader.id)).await.unwrap();

    let cancelled = media.cancel_job(job.id).await.unwrap();
    assert_eq!(cancelled.status, DownloadJobStatus::Cancelled);

    assert_eq!(media.worker().tick().await.unwrap(), 0);
    assert!(media.cancel_job(job.id).await.is_err());

    media.shutdown().await.unwrap();
}
