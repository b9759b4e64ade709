//! Attempts log (ambient, ties into §3/§4.5/§4.6): one row per execution
//! attempt, recorded independently of the `jobs` row so a job's history
//! survives past its own deletion on success, terminal failure, or admin
//! destroy.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};

use crate::error::StoreError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Retried,
    Failed,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Succeeded => "succeeded",
            AttemptOutcome::Retried => "retried",
            AttemptOutcome::Failed => "failed",
        }
    }
}

#[derive(Clone, Debug, FromRow, Serialize)]
pub struct AttemptRecord {
    pub id: i64,
    pub job_id: i64,
    pub attempt_no: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub worker_id: String,
    pub latency_ms: Option<i64>,
    pub shutdown_reason: Option<String>,
}

#[derive(Clone)]
pub struct AttemptsLog {
    pool: PgPool,
}

impl AttemptsLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Records one completed attempt (§4.5 Reporting, §4.6 `reap_one`).
    /// `started_at` is derived by subtracting `latency_ms` from the write
    /// time when given, so the row reflects actual execution span rather
    /// than just when the record was written.
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        job_id: i64,
        attempt_no: i32,
        outcome: AttemptOutcome,
        error_code: Option<&str>,
        error_message: Option<&str>,
        worker_id: &str,
        latency_ms: Option<i64>,
        shutdown_reason: Option<&str>,
    ) -> Result<AttemptRecord, StoreError> {
        let finished_at = Utc::now();
        let started_at = latency_ms
            .map(|ms| finished_at - chrono::Duration::milliseconds(ms))
            .unwrap_or(finished_at);

        let row: AttemptRecord = sqlx::query_as(
            r#"
            INSERT INTO job_attempts
                (job_id, attempt_no, started_at, finished_at, outcome,
                 error_code, error_message, worker_id, latency_ms, shutdown_reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(attempt_no)
        .bind(started_at)
        .bind(finished_at)
        .bind(outcome.as_str())
        .bind(error_code)
        .bind(error_message)
        .bind(worker_id)
        .bind(latency_ms)
        .bind(shutdown_reason)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    /// The full attempt history for one job, oldest first — used by the
    /// `strandflowctl timeline` subcommand and the admin `/jobs/:id/timeline`
    /// route.
    pub async fn list_for_job(&self, job_id: i64) -> Result<Vec<AttemptRecord>, StoreError> {
        let rows = sqlx::query_as::<_, AttemptRecord>(
            "SELECT * FROM job_attempts WHERE job_id = $1 ORDER BY attempt_no ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_strings_match_schema_convention() {
        assert_eq!(AttemptOutcome::Succeeded.as_str(), "succeeded");
        assert_eq!(AttemptOutcome::Retried.as_str(), "retried");
        assert_eq!(AttemptOutcome::Failed.as_str(), "failed");
    }
}
