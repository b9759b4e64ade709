mod common;

use chrono::{Duration, Utc};
use common::setup_db;
use serial_test::serial;
use strandflow_core::model::{BulkAction, NewJob, Selector};
use strandflow_core::store::JobStore;

#[tokio::test]
#[serial]
async fn find_available_orders_by_priority_then_run_at_then_id() {
    let pool = setup_db().await;
    let store = JobStore::new(pool);

    let now = Utc::now();
    let low = store
        .insert(NewJob::new("default", serde_json::json!({})).with_priority(10).with_run_at(now))
        .await
        .unwrap();
    let high = store
        .insert(NewJob::new("default", serde_json::json!({})).with_priority(0).with_run_at(now))
        .await
        .unwrap();
    let high_later = store
        .insert(NewJob::new("default", serde_json::json!({})).with_priority(0).with_run_at(now + Duration::seconds(5)))
        .await
        .unwrap();

    let available = store.find_available("default", i32::MIN, i32::MAX, 10).await.unwrap();
    assert_eq!(
        available.iter().map(|j| j.id).collect::<Vec<_>>(),
        vec![high.id, high_later.id, low.id]
    );
}

#[tokio::test]
#[serial]
async fn bulk_hold_then_unhold_restores_ready_state() {
    let pool = setup_db().await;
    let store = JobStore::new(pool);

    let job = common::insert_plain_job(&store, "default").await;

    let held = store.bulk_update(BulkAction::Hold, Selector { ids: Some(vec![job]), ..Default::default() }).await.unwrap();
    assert_eq!(held, 1);

    let available = store.find_available("default", i32::MIN, i32::MAX, 10).await.unwrap();
    assert!(available.is_empty(), "held jobs must not appear in the ready-set");

    let before_unhold = Utc::now();
    let unheld = store.bulk_update(BulkAction::Unhold, Selector { ids: Some(vec![job]), ..Default::default() }).await.unwrap();
    assert_eq!(unheld, 1);

    let available = store.find_available("default", i32::MIN, i32::MAX, 10).await.unwrap();
    assert_eq!(available.len(), 1);
    assert_eq!(available[0].attempts, 0);
    assert!(available[0].run_at >= before_unhold - Duration::seconds(1));
}

#[tokio::test]
#[serial]
async fn complete_fatal_moves_the_row_to_the_failed_set_exactly_once() {
    let pool = setup_db().await;
    let store = JobStore::new(pool);

    let job = common::insert_plain_job(&store, "default").await;
    let failed = store.complete_fatal(job, Some("boom")).await.unwrap().expect("row should move to failed set");

    assert_eq!(failed.original_job_id, job);
    assert_eq!(failed.last_error.as_deref(), Some("boom"));

    let still_active = store.find_available("default", i32::MIN, i32::MAX, 10).await.unwrap();
    assert!(still_active.is_empty());

    let failed_rows = store.list_failed_jobs(10, 0).await.unwrap();
    assert_eq!(failed_rows.len(), 1);
    assert_eq!(failed_rows[0].id, failed.id);
}

#[tokio::test]
#[serial]
async fn clear_locks_releases_every_job_attributed_to_a_worker() {
    let pool = setup_db().await;
    let store = JobStore::new(pool.clone());

    let j1 = common::insert_plain_job(&store, "default").await;
    let j2 = common::insert_plain_job(&store, "default").await;
    sqlx::query("UPDATE jobs SET locked_at = now(), locked_by = 'w1' WHERE id = ANY($1)")
        .bind(&[j1, j2][..])
        .execute(&pool)
        .await
        .unwrap();

    let released = store.clear_locks("w1").await.unwrap();
    assert_eq!(released, 2);

    let available = store.find_available("default", i32::MIN, i32::MAX, 10).await.unwrap();
    assert_eq!(available.len(), 2);
}
