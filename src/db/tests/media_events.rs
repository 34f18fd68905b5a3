use super::{movie_job, test_db};
use crate::store::JobStore;
use crate::types::{JobEventType, NewJobEvent};

#[tokio::test]
async fn test_upsert_season_and_episode_are_stable() {
    let (db, _temp) = test_db().await;

    let season = db.upsert_season(7, 2).await.unwrap();
    let again = db.upsert_season(7, 2).await.unwrap();
    assert_eq!(season.id, again.id);
    assert_eq!(season.media_item_id, 7);
    assert_eq!(season.season_number, 2);

    let other = db.upsert_season(7, 3).await.unwrap();
    assert_ne!(other.id, season.id);

    let episode = db.upsert_episode(season.id, 5).await.unwrap();
    let same = db.upsert_episode(season.id, 5).await.unwrap();
    assert_eq!(episode.id, same.id);
    assert_eq!(episode.season_id, season.id);

    assert_eq!(db.get_episode(episode.id).await.unwrap().episode_number, 5);
    assert_eq!(db.get_season(season.id).await.unwrap().season_number, 2);
    assert!(db.get_episode(9999).await.is_err());

    db.close().await;
}

#[tokio::test]
async fn test_job_events_keep_insertion_order() {
    let (db, _temp) = test_db().await;
    let job = db
        .insert_download_job(&movie_job("magnet:?xt=urn:btih:aa"))
        .await
        .unwrap();

    db.append_job_event(&NewJobEvent {
        download_job_id: job.id,
        event_type: JobEventType::StatusChanged,
        message: Some("created -> enqueued".to_string()),
        metadata: Some(serde_json::json!({ "from": "created", "to": "enqueued" })),
    })
    .await
    .unwrap();
    db.append_job_event(&NewJobEvent {
        download_job_id: job.id,
        event_type: JobEventType::Error,
        message: Some("connection refused".to_string()),
        metadata: None,
    })
    .await
    .unwrap();

    let events = db.list_job_events(job.id).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, "status_changed");
    assert_eq!(events[1].event_type, "error");
    assert!(events[1].metadata.is_none());

    let meta: serde_json::Value =
        serde_json::from_str(events[0].metadata.as_deref().unwrap()).unwrap();
    assert_eq!(meta["to"], "enqueued");

    db.close().await;
}
