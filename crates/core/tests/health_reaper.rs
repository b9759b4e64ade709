mod common;

use common::setup_db;
use serial_test::serial;
use std::sync::Arc;
use strandflow_core::model::NewJob;
use strandflow_core::reaper::{HealthReaper, ProcessRegistryOracle};
use strandflow_core::retry::RetryConfig;
use strandflow_core::store::JobStore;

/// S6 — dead worker reclaim: a job locked by a worker the liveness oracle
/// no longer reports is unlocked and rescheduled on the next sweep.
#[tokio::test]
#[serial]
async fn sweep_reschedules_jobs_held_by_dead_workers() {
    let pool = setup_db().await;
    let store = JobStore::new(pool.clone());

    let job = common::insert_plain_job(&store, "default").await;
    sqlx::query("UPDATE jobs SET locked_at = now(), locked_by = 'w7' WHERE id = $1")
        .bind(job)
        .execute(&pool)
        .await
        .unwrap();

    let oracle = Arc::new(ProcessRegistryOracle::new(std::time::Duration::from_secs(30)));
    oracle.touch("w-alive");
    // w7 is deliberately never touched: it is dead from the oracle's view.

    let reaper = HealthReaper::new(pool.clone(), oracle, RetryConfig::default());
    let recovered = reaper.sweep().await.unwrap();
    assert_eq!(recovered, 1);

    let row: (Option<String>, i32) = sqlx::query_as("SELECT locked_by, attempts FROM jobs WHERE id = $1")
        .bind(job)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(row.0, None);
    assert_eq!(row.1, 1);
}

#[tokio::test]
#[serial]
async fn sweep_moves_exhausted_jobs_to_the_failed_set() {
    let pool = setup_db().await;
    let store = JobStore::new(pool.clone());

    let job = store
        .insert(NewJob::new("default", serde_json::json!({})).with_priority(0))
        .await
        .unwrap();
    sqlx::query("UPDATE jobs SET locked_at = now(), locked_by = 'w7', attempts = $2, max_attempts = 1 WHERE id = $1")
        .bind(job.id)
        .bind(0)
        .execute(&pool)
        .await
        .unwrap();

    let oracle = Arc::new(strandflow_core::reaper::NullOracle);
    let reaper = HealthReaper::new(pool.clone(), oracle, RetryConfig::default());
    let recovered = reaper.sweep().await.unwrap();
    assert_eq!(recovered, 1);

    let still_active: Option<i64> = sqlx::query_scalar("SELECT id FROM jobs WHERE id = $1")
        .bind(job.id)
        .fetch_optional(&pool)
        .await
        .unwrap();
    assert!(still_active.is_none(), "exhausted job should have moved to failed_jobs");

    let failed_count: i64 = sqlx::query_scalar("SELECT count(*) FROM failed_jobs WHERE original_job_id = $1")
        .bind(job.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(failed_count, 1);
}

#[tokio::test]
#[serial]
async fn sweep_ignores_prefetch_owned_locks() {
    let pool = setup_db().await;
    let store = JobStore::new(pool.clone());

    let job = common::insert_plain_job(&store, "default").await;
    sqlx::query("UPDATE jobs SET locked_at = now(), locked_by = 'prefetch:host-a' WHERE id = $1")
        .bind(job)
        .execute(&pool)
        .await
        .unwrap();

    let oracle = Arc::new(strandflow_core::reaper::NullOracle);
    let reaper = HealthReaper::new(pool.clone(), oracle, RetryConfig::default());
    let recovered = reaper.sweep().await.unwrap();
    assert_eq!(recovered, 0, "prefetch-owned locks have their own sweep, not the reaper's");

    let still_locked: Option<String> = sqlx::query_scalar("SELECT locked_by FROM jobs WHERE id = $1")
        .bind(job)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(still_locked.as_deref(), Some("prefetch:host-a"));
}
