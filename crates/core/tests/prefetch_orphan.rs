mod common;

use common::setup_db;
use serial_test::serial;
use strandflow_core::store::JobStore;

/// S7 — after a broker crashes mid-prefetch, the store-resident orphan
/// sweep (not any particular broker's in-memory timeout) restores every
/// `prefetch:*`-locked job to the ready-set once it has aged past the
/// threshold.
#[tokio::test]
#[serial]
async fn unlock_orphaned_prefetched_jobs_restores_ready_set() {
    let pool = setup_db().await;
    let store = JobStore::new(pool.clone());

    let job = common::insert_plain_job(&store, "default").await;
    sqlx::query(
        "UPDATE jobs SET locked_at = now() - interval '5 minutes', locked_by = 'prefetch:dead-host' WHERE id = $1",
    )
    .bind(job)
    .execute(&pool)
    .await
    .unwrap();

    let recovered = store.unlock_orphaned_prefetched_jobs(std::time::Duration::from_secs(30)).await.unwrap();
    assert_eq!(recovered, 1);

    let available = store.find_available("default", i32::MIN, i32::MAX, 10).await.unwrap();
    assert_eq!(available.iter().map(|j| j.id).collect::<Vec<_>>(), vec![job]);
}

#[tokio::test]
#[serial]
async fn unlock_orphaned_prefetched_jobs_leaves_fresh_prefetches_alone() {
    let pool = setup_db().await;
    let store = JobStore::new(pool.clone());

    let job = common::insert_plain_job(&store, "default").await;
    sqlx::query("UPDATE jobs SET locked_at = now(), locked_by = 'prefetch:live-host' WHERE id = $1")
        .bind(job)
        .execute(&pool)
        .await
        .unwrap();

    let recovered = store.unlock_orphaned_prefetched_jobs(std::time::Duration::from_secs(30)).await.unwrap();
    assert_eq!(recovered, 0);
}
