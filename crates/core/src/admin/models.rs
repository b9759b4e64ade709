//! Response payloads for the admin HTTP surface (§4.1, §6 CLI surface).

use serde::Serialize;
use sqlx::FromRow;

#[derive(Clone)]
pub struct AdminState {
    pub pool: sqlx::PgPool,
}

#[derive(Serialize)]
pub struct Metrics {
    pub now_utc: String,
    pub totals: Totals,
    pub per_queue: Vec<QueueMetrics>,
}

#[derive(Serialize)]
pub struct Totals {
    pub runnable: i64,
    pub scheduled: i64,
    pub locked: i64,
    pub on_hold: i64,
    pub failed: i64,
}

#[derive(Serialize)]
pub struct QueueMetrics {
    pub queue: String,
    pub runnable: i64,
    pub scheduled: i64,
    pub locked: i64,
}

#[derive(FromRow)]
pub(crate) struct TotalsRow {
    pub runnable: i64,
    pub scheduled: i64,
    pub locked: i64,
    pub on_hold: i64,
    pub failed: i64,
}

#[derive(FromRow)]
pub(crate) struct QueueRow {
    pub queue: String,
    pub runnable: i64,
    pub scheduled: i64,
    pub locked: i64,
}

#[derive(Serialize)]
pub struct JobView {
    pub id: i64,
    pub queue: String,
    pub strand: Option<String>,
    pub priority: i32,
    pub attempts: i32,
    pub next_in_strand: bool,
    pub locked_by: Option<String>,
    pub run_at: String,
}

impl From<crate::model::Job> for JobView {
    fn from(j: crate::model::Job) -> Self {
        Self {
            id: j.id,
            queue: j.queue,
            strand: j.strand,
            priority: j.priority,
            attempts: j.attempts,
            next_in_strand: j.next_in_strand,
            locked_by: j.locked_by,
            run_at: j.run_at.to_rfc3339(),
        }
    }
}
