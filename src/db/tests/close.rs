use super::{movie_job, test_db};
use crate::store::JobStore;

/// Verify that querying the database after closing the pool returns an error
/// rather than hanging or panicking.
#[tokio::test]
async fn test_get_job_after_pool_close_returns_error() {
    let (db, _temp) = test_db().await;

    let job = db
        .insert_download_job(&movie_job("magnet:?xt=urn:btih:aa"))
        .await
        .unwrap();
    assert!(db.find_download_job(job.id).await.unwrap().is_some());

    db.pool().close().await;

    let result = db.get_download_job(job.id).await;
    assert!(
        result.is_err(),
        "get_download_job after pool close should return an error, got: {:?}",
        result
    );
}

/// A closed pool surfaces as an ordinary (transient) error from claiming
#[tokio::test]
async fn test_claim_after_pool_close_returns_error() {
    let (db, _temp) = test_db().await;

    db.pool().close().await;

    let result = db.claim_runnable(10, std::time::Duration::from_secs(60)).await;
    let err = result.unwrap_err();
    assert!(!err.is_permanent());
}
