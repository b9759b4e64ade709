mod common;

use chrono::{Duration, Utc};
use common::setup_db;
use serial_test::serial;
use strandflow_core::model::NewJob;
use strandflow_core::strand::create_singleton;

/// S3 — singleton coalescing: two back-to-back singleton enqueues on the
/// same strand collapse to one row, with `run_at` pulled to the earlier of
/// the two.
#[tokio::test]
#[serial]
async fn singleton_coalesces_to_earliest_run_at() {
    let pool = setup_db().await;
    let now = Utc::now();

    let first = create_singleton(
        &pool,
        NewJob::new("default", serde_json::json!({})).with_strand("cleanup", 1).with_run_at(now + Duration::seconds(100)),
    )
    .await
    .unwrap();

    let second = create_singleton(
        &pool,
        NewJob::new("default", serde_json::json!({})).with_strand("cleanup", 1).with_run_at(now + Duration::seconds(10)),
    )
    .await
    .unwrap();

    assert_eq!(first.id, second.id, "second enqueue should coalesce into the first row");

    let rows: Vec<(i64,)> = sqlx::query_as("SELECT id FROM jobs WHERE strand = 'cleanup'")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert!((second.run_at - (now + Duration::seconds(10))).num_seconds().abs() <= 1);
}

/// Singleton coalescing only applies to unlocked rows (§4.3, §9): a running
/// job on the strand does not block a fresh pending successor from being
/// inserted.
#[tokio::test]
#[serial]
async fn singleton_allows_one_running_and_one_pending() {
    let pool = setup_db().await;
    let now = Utc::now();

    let running = create_singleton(
        &pool,
        NewJob::new("default", serde_json::json!({})).with_strand("cleanup", 1).with_run_at(now),
    )
    .await
    .unwrap();

    sqlx::query("UPDATE jobs SET locked_at = now(), locked_by = 'w1' WHERE id = $1")
        .bind(running.id)
        .execute(&pool)
        .await
        .unwrap();

    let pending = create_singleton(
        &pool,
        NewJob::new("default", serde_json::json!({})).with_strand("cleanup", 1).with_run_at(now + Duration::seconds(30)),
    )
    .await
    .unwrap();

    assert_ne!(running.id, pending.id);

    let count: i64 = sqlx::query_scalar("SELECT count(*) FROM jobs WHERE strand = 'cleanup'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 2);
}
