use super::{movie_job, test_db};
use crate::Error;
use crate::error::{DatabaseError, ErrorCategory};
use crate::types::{DownloadJobId, DownloadJobStatus, JobSnapshot};
use std::collections::HashSet;
use std::time::Duration;

const LEASE: Duration = Duration::from_secs(300);

fn snapshot(status: DownloadJobStatus, progress: f64) -> JobSnapshot {
    JobSnapshot {
        status,
        downloader_status: "downloading".to_string(),
        progress,
        save_path: "/downloads".to_string(),
        content_path: "/downloads/Big Buck Bunny".to_string(),
    }
}

#[tokio::test]
async fn test_insert_job_starts_created_and_runnable() {
    let (db, _temp) = test_db().await;

    let job = db
        .insert_download_job(&movie_job("magnet:?xt=urn:btih:aa"))
        .await
        .unwrap();

    assert!(job.id.get() > 0);
    assert_eq!(job.status, DownloadJobStatus::Created);
    assert_eq!(job.attempt_count, 0);
    assert!(job.downloader_external_id.is_none());
    assert!(job.next_run_at <= chrono::Utc::now().timestamp());

    let found = db.find_download_job(job.id).await.unwrap().unwrap();
    assert_eq!(found.candidate_link, "magnet:?xt=urn:btih:aa");
    assert_eq!(found.downloader_id, job.downloader_id);

    db.close().await;
}

#[tokio::test]
async fn test_find_missing_job_returns_none() {
    let (db, _temp) = test_db().await;
    assert!(db.find_download_job(DownloadJobId(999)).await.unwrap().is_none());
    db.close().await;
}

#[tokio::test]
async fn test_claim_respects_limit_and_lease() {
    let (db, _temp) = test_db().await;

    for i in 0..3 {
        db.insert_download_job(&movie_job(&format!("magnet:?xt=urn:btih:{i}")))
            .await
            .unwrap();
    }

    let first = db.claim_runnable_jobs(2, LEASE).await.unwrap();
    assert_eq!(first.len(), 2);
    let now = chrono::Utc::now().timestamp();
    assert!(first.iter().all(|j| j.next_run_at >= now + 299));

    let second = db.claim_runnable_jobs(10, LEASE).await.unwrap();
    assert_eq!(second.len(), 1);
    assert!(first.iter().all(|j| j.id != second[0].id));

    // Everything is leased now
    assert!(db.claim_runnable_jobs(10, LEASE).await.unwrap().is_empty());

    db.close().await;
}

#[tokio::test]
async fn test_concurrent_claims_never_share_a_job() {
    let (db, _temp) = test_db().await;

    for i in 0..20 {
        db.insert_download_job(&movie_job(&format!("magnet:?xt=urn:btih:{i}")))
            .await
            .unwrap();
    }

    let (a, b) = tokio::join!(
        db.claim_runnable_jobs(15, LEASE),
        db.claim_runnable_jobs(15, LEASE)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    let ids: HashSet<DownloadJobId> = a.iter().chain(b.iter()).map(|j| j.id).collect();
    assert_eq!(ids.len(), a.len() + b.len(), "a job was claimed twice");
    assert_eq!(ids.len(), 20);

    db.close().await;
}

#[tokio::test]
async fn test_write_makes_job_runnable_again() {
    let (db, _temp) = test_db().await;

    let job = db
        .insert_download_job(&movie_job("magnet:?xt=urn:btih:aa"))
        .await
        .unwrap();
    assert_eq!(db.claim_runnable_jobs(10, LEASE).await.unwrap().len(), 1);

    let enqueued = db.set_job_enqueued(job.id, "aa").await.unwrap();
    assert_eq!(enqueued.status, DownloadJobStatus::Enqueued);
    assert_eq!(enqueued.downloader_external_id.as_deref(), Some("aa"));

    let claimed = db.claim_runnable_jobs(10, LEASE).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, job.id);

    db.close().await;
}

#[tokio::test]
async fn test_enqueue_only_from_created() {
    let (db, _temp) = test_db().await;

    let job = db
        .insert_download_job(&movie_job("magnet:?xt=urn:btih:aa"))
        .await
        .unwrap();
    db.set_job_enqueued(job.id, "aa").await.unwrap();

    let err = db.set_job_enqueued(job.id, "bb").await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }), "{err:?}");

    let job = db.find_download_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.downloader_external_id.as_deref(), Some("aa"));

    db.close().await;
}

#[tokio::test]
async fn test_snapshot_updates_progress_and_paths() {
    let (db, _temp) = test_db().await;

    let job = db
        .insert_download_job(&movie_job("magnet:?xt=urn:btih:aa"))
        .await
        .unwrap();
    db.set_job_enqueued(job.id, "aa").await.unwrap();

    let updated = db
        .set_job_snapshot(job.id, &snapshot(DownloadJobStatus::Downloading, 0.5))
        .await
        .unwrap();

    assert_eq!(updated.status, DownloadJobStatus::Downloading);
    assert_eq!(updated.progress, Some(0.5));
    assert_eq!(updated.downloader_status.as_deref(), Some("downloading"));
    assert_eq!(updated.save_path.as_deref(), Some("/downloads"));
    assert_eq!(
        updated.content_path.as_deref(),
        Some("/downloads/Big Buck Bunny")
    );

    db.close().await;
}

#[tokio::test]
async fn test_terminal_job_is_never_written_again() {
    let (db, _temp) = test_db().await;

    let job = db
        .insert_download_job(&movie_job("magnet:?xt=urn:btih:aa"))
        .await
        .unwrap();
    let failed = db
        .mark_job_failed(job.id, "bad link", ErrorCategory::Permanent)
        .await
        .unwrap();
    assert_eq!(failed.status, DownloadJobStatus::Failed);
    assert_eq!(failed.last_error.as_deref(), Some("bad link"));
    assert_eq!(failed.last_error_category, Some(ErrorCategory::Permanent));

    let err = db
        .set_job_snapshot(job.id, &snapshot(DownloadJobStatus::Downloading, 0.1))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }), "{err:?}");

    assert!(db.cancel_download_job(job.id).await.is_err());
    assert!(
        db.schedule_job_retry(job.id, "later", ErrorCategory::Transient, 0)
            .await
            .is_err()
    );

    // Terminal jobs are never claimed
    assert!(db.claim_runnable_jobs(10, LEASE).await.unwrap().is_empty());

    let job = db.find_download_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, DownloadJobStatus::Failed);
    assert_eq!(job.last_error.as_deref(), Some("bad link"));

    db.close().await;
}

#[tokio::test]
async fn test_write_to_missing_job_is_not_found() {
    let (db, _temp) = test_db().await;

    let err = db
        .mark_job_failed(DownloadJobId(404), "x", ErrorCategory::Transient)
        .await
        .unwrap_err();
    assert!(
        matches!(err, Error::Database(DatabaseError::NotFound(_))),
        "{err:?}"
    );

    db.close().await;
}

#[tokio::test]
async fn test_schedule_retry_counts_attempts_and_defers() {
    let (db, _temp) = test_db().await;

    let job = db
        .insert_download_job(&movie_job("magnet:?xt=urn:btih:aa"))
        .await
        .unwrap();
    let later = chrono::Utc::now().timestamp() + 3600;

    let retried = db
        .schedule_job_retry(job.id, "connection refused", ErrorCategory::Transient, later)
        .await
        .unwrap();
    assert_eq!(retried.attempt_count, 1);
    assert_eq!(retried.status, DownloadJobStatus::Created);
    assert_eq!(retried.next_run_at, later);
    assert_eq!(retried.last_error_category, Some(ErrorCategory::Transient));

    assert!(db.claim_runnable_jobs(10, LEASE).await.unwrap().is_empty());

    let retried = db
        .schedule_job_retry(job.id, "connection refused", ErrorCategory::Transient, 0)
        .await
        .unwrap();
    assert_eq!(retried.attempt_count, 2);
    assert_eq!(db.claim_runnable_jobs(10, LEASE).await.unwrap().len(), 1);

    db.close().await;
}

#[tokio::test]
async fn test_list_jobs_filters_by_status() {
    let (db, _temp) = test_db().await;

    let a = db
        .insert_download_job(&movie_job("magnet:?xt=urn:btih:aa"))
        .await
        .unwrap();
    db.insert_download_job(&movie_job("magnet:?xt=urn:btih:bb"))
        .await
        .unwrap();
    db.cancel_download_job(a.id).await.unwrap();

    assert_eq!(db.list_download_jobs(None).await.unwrap().len(), 2);

    let cancelled = db
        .list_download_jobs(Some(DownloadJobStatus::Cancelled))
        .await
        .unwrap();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].id, a.id);

    let created = db
        .list_download_jobs(Some(DownloadJobStatus::Created))
        .await
        .unwrap();
    assert_eq!(created.len(), 1);
    assert_ne!(created[0].id, a.id);

    db.close().await;
}
