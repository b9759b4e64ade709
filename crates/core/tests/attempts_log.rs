mod common;

use common::setup_db;
use serial_test::serial;
use strandflow_core::attempts::{AttemptOutcome, AttemptsLog};
use strandflow_core::store::JobStore;

#[tokio::test]
#[serial]
async fn records_and_lists_attempts_oldest_first() {
    let pool = setup_db().await;
    let store = JobStore::new(pool.clone());
    let attempts_log = AttemptsLog::new(pool);

    let job_id = common::insert_plain_job(&store, "default").await;

    attempts_log
        .record(job_id, 1, AttemptOutcome::Retried, Some("TIMEOUT"), Some("slow downstream"), "worker-a", Some(12), None)
        .await
        .unwrap();
    attempts_log
        .record(job_id, 2, AttemptOutcome::Succeeded, None, None, "worker-b", Some(8), None)
        .await
        .unwrap();

    let rows = attempts_log.list_for_job(job_id).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].attempt_no, 1);
    assert_eq!(rows[0].outcome, "retried");
    assert_eq!(rows[0].error_code.as_deref(), Some("TIMEOUT"));
    assert_eq!(rows[1].attempt_no, 2);
    assert_eq!(rows[1].outcome, "succeeded");
}

#[tokio::test]
#[serial]
async fn survives_deletion_of_its_job() {
    let pool = setup_db().await;
    let store = JobStore::new(pool.clone());
    let attempts_log = AttemptsLog::new(pool);

    let job_id = common::insert_plain_job(&store, "default").await;
    attempts_log
        .record(job_id, 1, AttemptOutcome::Failed, Some("PANIC"), Some("boom"), "worker-a", Some(1), None)
        .await
        .unwrap();

    store.delete(job_id).await.unwrap();

    let rows = attempts_log.list_for_job(job_id).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
#[serial]
async fn shutdown_reason_is_set_only_when_provided() {
    let pool = setup_db().await;
    let store = JobStore::new(pool.clone());
    let attempts_log = AttemptsLog::new(pool);

    let job_id = common::insert_plain_job(&store, "default").await;
    attempts_log
        .record(
            job_id,
            1,
            AttemptOutcome::Retried,
            None,
            Some("worker liveness lost"),
            "worker-a",
            None,
            Some("liveness_oracle_reported_dead"),
        )
        .await
        .unwrap();

    let rows = attempts_log.list_for_job(job_id).await.unwrap();
    assert_eq!(rows[0].shutdown_reason.as_deref(), Some("liveness_oracle_reported_dead"));
}
