//! Lock Manager (C2, §4.2): atomic acquisition, transfer, release, and batch
//! assignment over the Job Store. Never re-checks strand constraints —
//! callers rely on `next_in_strand` having already been enforced by the
//! store's triggers (§4.2).

use std::collections::HashMap;

use rand::seq::SliceRandom;
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::StoreError;
use crate::model::Job;

#[derive(Clone)]
pub struct LockManager {
    pool: PgPool,
}

/// Result of `get_and_lock_next_available`: each worker name (or the
/// prefetch owner) maps to the jobs it was handed. A worker position maps to
/// at most one job; the prefetch owner may map to several.
pub type LockAssignment = HashMap<String, Vec<Job>>;

impl LockManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Conditioned compare-and-set: succeeds only if the row was unlocked and
    /// due. Returns `true` iff exactly one row was affected (§4.2).
    pub async fn lock_exclusively(&self, id: i64, worker: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET locked_at = now(), locked_by = $2, updated_at = now()
             WHERE id = $1 AND locked_at IS NULL AND run_at <= now()",
        )
        .bind(id)
        .bind(worker)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Atomic compare-and-set of `locked_by` from `from` to `to`. Used by the
    /// broker to hand a pre-locked job off to a newly connected worker
    /// (§4.4 check_for_work step 1).
    pub async fn transfer_lock(&self, id: i64, from: &str, to: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET locked_by = $3, updated_at = now()
             WHERE id = $1 AND locked_at IS NOT NULL AND locked_by = $2",
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Unconditionally releases the listed jobs (§4.2) — used for prefetch
    /// timeout sweeps and health-reaper recovery.
    pub async fn unlock(&self, ids: &[i64]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE jobs SET locked_at = NULL, locked_by = NULL, updated_at = now() WHERE id = ANY($1)",
        )
        .bind(ids)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Fetches up to `workers.len() + prefetch_n` ready jobs from `queue`
    /// within `[min_prio, max_prio]`, locks them all in one transactional
    /// pass, and assigns the first `workers.len()` by position; the
    /// remainder go to `prefetch_owner` (§4.2).
    ///
    /// Ordering within the batch is `(priority ASC, run_at ASC, id ASC)`;
    /// `select_random_from_batch` shuffles assignment order after the batch
    /// itself has been selected deterministically.
    pub async fn get_and_lock_next_available(
        &self,
        workers: &[String],
        queue: &str,
        min_prio: i32,
        max_prio: i32,
        prefetch_n: i64,
        prefetch_owner: &str,
        select_random_from_batch: bool,
    ) -> Result<LockAssignment, StoreError> {
        let total_wanted = workers.len() as i64 + prefetch_n.max(0);
        if total_wanted <= 0 {
            return Ok(HashMap::new());
        }

        let mut tx: Transaction<'_, Postgres> = self.pool.begin().await?;

        let mut batch: Vec<Job> = sqlx::query_as(
            r#"
            SELECT * FROM jobs
            WHERE queue = $1
              AND priority BETWEEN $2 AND $3
              AND run_at <= now()
              AND locked_at IS NULL
              AND next_in_strand = true
            ORDER BY priority ASC, run_at ASC, id ASC
            LIMIT $4
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(queue)
        .bind(min_prio)
        .bind(max_prio)
        .bind(total_wanted)
        .fetch_all(&mut *tx)
        .await?;

        if select_random_from_batch {
            batch.shuffle(&mut rand::thread_rng());
        }

        let mut assignment: LockAssignment = HashMap::new();
        let mut iter = batch.into_iter();

        for worker in workers {
            let Some(job) = iter.next() else { break };
            sqlx::query("UPDATE jobs SET locked_at = now(), locked_by = $2, updated_at = now() WHERE id = $1")
                .bind(job.id)
                .bind(worker)
                .execute(&mut *tx)
                .await?;
            assignment.entry(worker.clone()).or_default().push(job);
        }

        let remainder: Vec<Job> = iter.collect();
        if !remainder.is_empty() {
            let ids: Vec<i64> = remainder.iter().map(|j| j.id).collect();
            sqlx::query("UPDATE jobs SET locked_at = now(), locked_by = $2, updated_at = now() WHERE id = ANY($1)")
                .bind(&ids)
                .bind(prefetch_owner)
                .execute(&mut *tx)
                .await?;
            assignment.entry(prefetch_owner.to_string()).or_default().extend(remainder);
        }

        tx.commit().await?;
        Ok(assignment)
    }
}
