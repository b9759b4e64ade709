//! Admin HTTP surface (ambient C8): metrics, job listing, and bulk
//! hold/unhold/destroy, wired so a CLI or dashboard can drive the store
//! without talking SQL directly. The actual CLI/daemon supervisor remains
//! external per §1 non-goals — this is just the HTTP seam it would call.

pub mod models;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::attempts::AttemptsLog;
use crate::error::StoreError;
use crate::model::{BulkAction, Flavor, Selector};
use crate::store::JobStore;

use models::{AdminState, JobView, Metrics, QueueMetrics, QueueRow, Totals, TotalsRow};

pub fn router(pool: sqlx::PgPool) -> Router {
    let state = AdminState { pool };
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/jobs", get(list_jobs))
        .route("/jobs/count", get(jobs_count))
        .route("/jobs/bulk", post(bulk_update))
        .route("/jobs/:id", get(get_job).delete(destroy_job))
        .route("/jobs/:id/timeline", get(job_timeline))
        .route("/jobs/:id/hold", post(hold_job))
        .route("/jobs/:id/unhold", post(unhold_job))
        .route("/tags", get(tag_counts))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

fn db_err(e: sqlx::Error) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

/// Maps the store's error taxonomy onto the admin surface (§7, §9 Open
/// Question: a strand concurrency clash on a single-id operation is a client
/// conflict, not a server fault).
fn store_err(e: StoreError) -> (StatusCode, String) {
    match e {
        StoreError::NotFound(id) => (StatusCode::NOT_FOUND, format!("job {id} not found")),
        StoreError::StrandConcurrencyMismatch { .. } => (StatusCode::CONFLICT, e.to_string()),
        StoreError::EmptyQueue | StoreError::InvalidMaxConcurrent(_) => (StatusCode::BAD_REQUEST, e.to_string()),
        StoreError::Transient(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn metrics(State(st): State<AdminState>) -> Result<Json<Metrics>, (StatusCode, String)> {
    let totals = sqlx::query_as::<_, TotalsRow>(
        r#"
        SELECT
          COUNT(*) FILTER (WHERE locked_at IS NULL AND next_in_strand AND run_at <= now()) AS runnable,
          COUNT(*) FILTER (WHERE locked_at IS NULL AND run_at > now())                      AS scheduled,
          COUNT(*) FILTER (WHERE locked_at IS NOT NULL AND locked_by <> 'on hold')           AS locked,
          COUNT(*) FILTER (WHERE locked_by = 'on hold')                                      AS on_hold,
          (SELECT COUNT(*) FROM failed_jobs)                                                 AS failed
        FROM jobs
        "#,
    )
    .fetch_one(&st.pool)
    .await
    .map_err(db_err)?;

    let per_queue = sqlx::query_as::<_, QueueRow>(
        r#"
        SELECT
          queue,
          COUNT(*) FILTER (WHERE locked_at IS NULL AND next_in_strand AND run_at <= now()) AS runnable,
          COUNT(*) FILTER (WHERE locked_at IS NULL AND run_at > now())                      AS scheduled,
          COUNT(*) FILTER (WHERE locked_at IS NOT NULL)                                     AS locked
        FROM jobs
        GROUP BY queue
        ORDER BY queue
        "#,
    )
    .fetch_all(&st.pool)
    .await
    .map_err(db_err)?;

    Ok(Json(Metrics {
        now_utc: chrono::Utc::now().to_rfc3339(),
        totals: Totals {
            runnable: totals.runnable,
            scheduled: totals.scheduled,
            locked: totals.locked,
            on_hold: totals.on_hold,
            failed: totals.failed,
        },
        per_queue: per_queue
            .into_iter()
            .map(|r| QueueMetrics { queue: r.queue, runnable: r.runnable, scheduled: r.scheduled, locked: r.locked })
            .collect(),
    }))
}

#[derive(Deserialize)]
struct ListQuery {
    flavor: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
    q: Option<String>,
}

fn parse_flavor(s: Option<&str>) -> Flavor {
    match s {
        Some("scheduled") => Flavor::Scheduled,
        Some("locked") => Flavor::Locked,
        Some("on_hold") => Flavor::OnHold,
        Some("failed") => Flavor::Failed,
        Some("all") => Flavor::All,
        _ => Flavor::Runnable,
    }
}

async fn list_jobs(
    State(st): State<AdminState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<JobView>>, (StatusCode, String)> {
    let store = JobStore::new(st.pool);
    let flavor = parse_flavor(q.flavor.as_deref());
    let jobs = store
        .list_jobs(flavor, q.limit.unwrap_or(50), q.offset.unwrap_or(0), q.q.as_deref())
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(jobs.into_iter().map(JobView::from).collect()))
}

async fn jobs_count(
    State(st): State<AdminState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let store = JobStore::new(st.pool);
    let flavor = parse_flavor(q.flavor.as_deref());
    let n = store
        .jobs_count(flavor, q.q.as_deref())
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(serde_json::json!({ "count": n })))
}

async fn tag_counts(
    State(st): State<AdminState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<(String, i64)>>, (StatusCode, String)> {
    let store = JobStore::new(st.pool);
    let flavor = parse_flavor(q.flavor.as_deref());
    let rows = store
        .tag_counts(flavor, q.limit.unwrap_or(50), q.offset.unwrap_or(0))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(rows))
}

#[derive(Deserialize)]
struct BulkRequest {
    action: String,
    ids: Option<Vec<i64>>,
    queue: Option<String>,
    tag: Option<String>,
}

async fn bulk_update(
    State(st): State<AdminState>,
    Json(req): Json<BulkRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let action = match req.action.as_str() {
        "hold" => BulkAction::Hold,
        "unhold" => BulkAction::Unhold,
        "destroy" => BulkAction::Destroy,
        other => return Err((StatusCode::BAD_REQUEST, format!("unknown bulk action: {other}"))),
    };

    let store = JobStore::new(st.pool);
    let affected = store
        .bulk_update(action, Selector { ids: req.ids, queue: req.queue, tag: req.tag })
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(serde_json::json!({ "affected": affected })))
}

async fn get_job(State(st): State<AdminState>, Path(id): Path<i64>) -> Result<Json<JobView>, (StatusCode, String)> {
    let store = JobStore::new(st.pool);
    let job = store.get(id).await.map_err(store_err)?.ok_or_else(|| store_err(StoreError::NotFound(id)))?;
    Ok(Json(JobView::from(job)))
}

async fn job_timeline(
    State(st): State<AdminState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<crate::attempts::AttemptRecord>>, (StatusCode, String)> {
    let attempts_log = AttemptsLog::new(st.pool);
    let rows = attempts_log.list_for_job(id).await.map_err(store_err)?;
    Ok(Json(rows))
}

async fn hold_job(State(st): State<AdminState>, Path(id): Path<i64>) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let store = JobStore::new(st.pool);
    let affected = store
        .bulk_update(BulkAction::Hold, Selector { ids: Some(vec![id]), queue: None, tag: None })
        .await
        .map_err(store_err)?;
    Ok(Json(serde_json::json!({ "affected": affected })))
}

async fn unhold_job(
    State(st): State<AdminState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let store = JobStore::new(st.pool);
    let affected = store
        .bulk_update(BulkAction::Unhold, Selector { ids: Some(vec![id]), queue: None, tag: None })
        .await
        .map_err(store_err)?;
    Ok(Json(serde_json::json!({ "affected": affected })))
}

async fn destroy_job(
    State(st): State<AdminState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let store = JobStore::new(st.pool);
    let deleted = store.delete(id).await.map_err(store_err)?;
    if !deleted {
        return Err(store_err(StoreError::NotFound(id)));
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}
