//! Job Store (C1, §4.1): the persistent table of jobs, its indexed
//! ready-set, and the handful of query/mutation operations every other
//! component is built on.
//!
//! Strand maintenance itself lives in the database as triggers (see
//! `migrations/`); this module is deliberately thin around them — it never
//! touches `next_in_strand` directly outside of `insert`'s advisory-lock
//! dance, which exists only to keep the trigger from deadlocking (§4.1).

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, trace};

use crate::error::StoreError;
use crate::model::{BulkAction, FailedJob, Flavor, Job, NewJob, Selector};
use crate::strand::strand_advisory_lock_key;

#[derive(Clone)]
pub struct JobStore {
    pool: PgPool,
    verbose_job_logs: bool,
}

impl JobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, verbose_job_logs: false }
    }

    /// Gates the row-level `TRACE` logging in `find_available` (§4.1: the
    /// dominant log-volume contributor under load, off unless asked for).
    pub fn with_verbose_job_logs(mut self, verbose: bool) -> Self {
        self.verbose_job_logs = verbose;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Inserts `job`. If `job.strand` is set, takes the per-strand advisory
    /// lock first (§4.1) so the insert trigger's read-then-write of sibling
    /// rows can't deadlock against a concurrent insert/delete on the same
    /// strand.
    pub async fn insert(&self, job: NewJob) -> Result<Job, StoreError> {
        if job.queue.trim().is_empty() {
            return Err(StoreError::EmptyQueue);
        }
        if job.max_concurrent < 1 {
            return Err(StoreError::InvalidMaxConcurrent(job.max_concurrent));
        }

        let mut tx = self.pool.begin().await?;

        if let Some(strand) = &job.strand {
            let key = strand_advisory_lock_key(strand);
            sqlx::query("SELECT pg_advisory_xact_lock($1)")
                .bind(key)
                .execute(&mut *tx)
                .await?;

            if let Some(existing) = sqlx::query_scalar::<_, i32>(
                "SELECT max_concurrent FROM jobs WHERE strand = $1 LIMIT 1",
            )
            .bind(strand)
            .fetch_optional(&mut *tx)
            .await?
            {
                if existing != job.max_concurrent {
                    return Err(StoreError::StrandConcurrencyMismatch {
                        strand: strand.clone(),
                        existing,
                        requested: job.max_concurrent,
                    });
                }
            }
        }

        // next_in_strand starts true for unstranded jobs; the AFTER INSERT
        // trigger overwrites it for stranded ones per the insert rule (§4.3).
        let row: Job = sqlx::query_as(
            r#"
            INSERT INTO jobs
                (priority, queue, strand, max_concurrent, next_in_strand, run_at,
                 max_attempts, tag, source, payload)
            VALUES ($1, $2, $3, $4, true, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(job.priority)
        .bind(&job.queue)
        .bind(&job.strand)
        .bind(job.max_concurrent)
        .bind(job.run_at)
        .bind(job.max_attempts)
        .bind(&job.tag)
        .bind(&job.source)
        .bind(&job.payload)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row)
    }

    /// Deletes a job by id. If it belonged to a strand, the AFTER DELETE
    /// trigger promotes the next successor per the delete rule (§4.3).
    pub async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Generic attribute patch used by admin tooling and the worker's retry
    /// path (`attempts`, `run_at`, `locked_at`/`locked_by`). Unconditional —
    /// callers needing a compare-and-set use the Lock Manager instead.
    pub async fn update_attrs(&self, id: i64, patch: UpdateAttrs) -> Result<Option<Job>, StoreError> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE jobs SET updated_at = now()");

        if let Some(v) = patch.attempts {
            builder.push(", attempts = ").push_bind(v);
        }
        if let Some(v) = patch.run_at {
            builder.push(", run_at = ").push_bind(v);
        }
        if let Some(v) = patch.priority {
            builder.push(", priority = ").push_bind(v);
        }
        if let Some(v) = patch.locked_at {
            builder.push(", locked_at = ").push_bind(v);
        }
        if let Some(v) = patch.locked_by {
            builder.push(", locked_by = ").push_bind(v);
        }

        builder.push(" WHERE id = ").push_bind(id).push(" RETURNING *");

        let row = builder.build_query_as::<Job>().fetch_optional(&self.pool).await?;
        Ok(row)
    }

    /// The ready-set per §3 invariant 1, ordered `(priority ASC, run_at ASC)`
    /// as required by §4.1. `min_prio`/`max_prio` are inclusive bounds.
    pub async fn find_available(
        &self,
        queue: &str,
        min_prio: i32,
        max_prio: i32,
        limit: i64,
    ) -> Result<Vec<Job>, StoreError> {
        debug!(queue, min_prio, max_prio, limit, "polling for available jobs");

        let rows = sqlx::query_as::<_, Job>(
            r#"
            SELECT * FROM jobs
            WHERE queue = $1
              AND priority BETWEEN $2 AND $3
              AND run_at <= now()
              AND locked_at IS NULL
              AND next_in_strand = true
            ORDER BY priority ASC, run_at ASC, id ASC
            LIMIT $4
            "#,
        )
        .bind(queue)
        .bind(min_prio)
        .bind(max_prio)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        if self.verbose_job_logs {
            for job in &rows {
                trace!(job_id = job.id, strand = ?job.strand, priority = job.priority, "candidate considered");
            }
        }

        Ok(rows)
    }

    /// Fetches a single job by id, for admin lookups and the worker/reaper
    /// paths that need the full row rather than just a rows-affected count.
    pub async fn get(&self, id: i64) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn running_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE locked_at IS NOT NULL AND locked_by <> $1 ORDER BY id ASC",
        )
        .bind(crate::model::LOCKED_BY_ON_HOLD)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Unlocks every job currently attributed to `worker_name`, regardless of
    /// state. Used both by the Worker Client's clean-exit path (§4.5) and by
    /// admin tooling.
    pub async fn clear_locks(&self, worker_name: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET locked_at = NULL, locked_by = NULL, updated_at = now() WHERE locked_by = $1",
        )
        .bind(worker_name)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// `hold`/`unhold`/`destroy` over an id list or a queue/tag selector
    /// (§6 CLI surface, §8 round-trip law: hold then unhold restores
    /// `attempts = 0` and a `run_at` no earlier than the unhold time).
    pub async fn bulk_update(&self, action: BulkAction, selector: Selector) -> Result<u64, StoreError> {
        let affected = match action {
            BulkAction::Hold => {
                let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                    "UPDATE jobs SET locked_at = now(), locked_by = ",
                );
                builder.push_bind(crate::model::LOCKED_BY_ON_HOLD);
                builder.push(", updated_at = now() WHERE locked_at IS NULL");
                push_selector(&mut builder, &selector);
                builder.build().execute(&self.pool).await?.rows_affected()
            }
            BulkAction::Unhold => {
                let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                    "UPDATE jobs SET locked_at = NULL, locked_by = NULL, attempts = 0, run_at = now(), updated_at = now() WHERE locked_by = ",
                );
                builder.push_bind(crate::model::LOCKED_BY_ON_HOLD);
                push_selector(&mut builder, &selector);
                builder.build().execute(&self.pool).await?.rows_affected()
            }
            BulkAction::Destroy => {
                let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("DELETE FROM jobs WHERE true");
                push_selector(&mut builder, &selector);
                builder.build().execute(&self.pool).await?.rows_affected()
            }
        };
        Ok(affected)
    }

    /// Lists jobs in `flavor`, newest-first, for admin/CLI consumption
    /// (§4.1, §6). `query` is an optional substring match on `tag`.
    pub async fn list_jobs(
        &self,
        flavor: Flavor,
        limit: i64,
        offset: i64,
        query: Option<&str>,
    ) -> Result<Vec<Job>, StoreError> {
        if flavor == Flavor::Failed {
            // Failed-set listing goes through list_failed_jobs; callers that
            // ask for Flavor::Failed here get an empty page rather than a
            // type mismatch.
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM jobs WHERE true");
        match flavor {
            Flavor::Runnable => {
                builder.push(" AND locked_at IS NULL AND next_in_strand = true AND run_at <= now()");
            }
            Flavor::Scheduled => {
                builder.push(" AND locked_at IS NULL AND run_at > now()");
            }
            Flavor::Locked => {
                builder.push(" AND locked_at IS NOT NULL AND locked_by <> ");
                builder.push_bind(crate::model::LOCKED_BY_ON_HOLD);
            }
            Flavor::OnHold => {
                builder.push(" AND locked_by = ");
                builder.push_bind(crate::model::LOCKED_BY_ON_HOLD);
            }
            Flavor::All | Flavor::Failed => {}
        }

        if let Some(q) = query {
            builder.push(" AND tag ILIKE ").push_bind(format!("%{q}%"));
        }

        builder
            .push(" ORDER BY id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = builder.build_query_as::<Job>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    pub async fn list_failed_jobs(&self, limit: i64, offset: i64) -> Result<Vec<FailedJob>, StoreError> {
        let rows = sqlx::query_as::<_, FailedJob>(
            "SELECT * FROM failed_jobs ORDER BY id DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Groups jobs in `flavor` by `tag`, for the admin dashboard (§6).
    pub async fn tag_counts(&self, flavor: Flavor, limit: i64, offset: i64) -> Result<Vec<(String, i64)>, StoreError> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COALESCE(tag, '') as tag, count(*) as n FROM jobs WHERE true");
        match flavor {
            Flavor::Runnable => {
                builder.push(" AND locked_at IS NULL AND next_in_strand = true AND run_at <= now()");
            }
            Flavor::Locked => {
                builder.push(" AND locked_at IS NOT NULL");
            }
            _ => {}
        }
        builder
            .push(" GROUP BY tag ORDER BY n DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = builder.build().fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>("tag"), r.get::<i64, _>("n")))
            .collect())
    }

    /// Completion path for a successful run: just delete the row.
    pub async fn complete_success(&self, id: i64) -> Result<(), StoreError> {
        self.delete(id).await?;
        Ok(())
    }

    /// Completion path for a recoverable failure: unlock, bump `attempts`,
    /// push `run_at` forward by the caller-computed backoff (§4.5 Reporting).
    pub async fn complete_retry(
        &self,
        id: i64,
        next_run_at: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET locked_at = NULL, locked_by = NULL, attempts = attempts + 1,
                run_at = $2, updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(next_run_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Recovers jobs still held by a `prefetch:*` owner whose lock predates
    /// `older_than` (§4.4 step 6, §8 invariant 7): covers a broker that died
    /// mid-prefetch, which leaves no in-memory bucket around to time out on
    /// its own. Distinct from a single broker's own
    /// `unlock_timed_out_prefetched_jobs` sweep over its in-memory state —
    /// this one is store-resident so it also catches a broker that crashed
    /// outright.
    pub async fn unlock_orphaned_prefetched_jobs(&self, older_than: std::time::Duration) -> Result<u64, StoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::seconds(0));
        let result = sqlx::query(
            "UPDATE jobs SET locked_at = NULL, locked_by = NULL, updated_at = now()
             WHERE locked_by LIKE 'prefetch:%' AND locked_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Count of jobs in `flavor` (§6 CLI surface `jobs_count`), mirroring
    /// `list_jobs`'s predicate without paging.
    pub async fn jobs_count(&self, flavor: Flavor, query: Option<&str>) -> Result<i64, StoreError> {
        if flavor == Flavor::Failed {
            let n: i64 = sqlx::query_scalar("SELECT count(*) FROM failed_jobs")
                .fetch_one(&self.pool)
                .await?;
            return Ok(n);
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT count(*) FROM jobs WHERE true");
        match flavor {
            Flavor::Runnable => {
                builder.push(" AND locked_at IS NULL AND next_in_strand = true AND run_at <= now()");
            }
            Flavor::Scheduled => {
                builder.push(" AND locked_at IS NULL AND run_at > now()");
            }
            Flavor::Locked => {
                builder.push(" AND locked_at IS NOT NULL AND locked_by <> ");
                builder.push_bind(crate::model::LOCKED_BY_ON_HOLD);
            }
            Flavor::OnHold => {
                builder.push(" AND locked_by = ");
                builder.push_bind(crate::model::LOCKED_BY_ON_HOLD);
            }
            Flavor::All | Flavor::Failed => {}
        }
        if let Some(q) = query {
            builder.push(" AND tag ILIKE ").push_bind(format!("%{q}%"));
        }

        let n: i64 = builder.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(n)
    }

    /// Completion path for a terminal failure (§3, §4.5): moves the row into
    /// `failed_jobs` and deletes it from `jobs`, in one transaction so a Job
    /// id is never visible in both sets (§3 invariant 4).
    pub async fn complete_fatal(&self, id: i64, last_error: Option<&str>) -> Result<Option<FailedJob>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(job) = job else {
            tx.commit().await?;
            return Ok(None);
        };

        let failed: FailedJob = sqlx::query_as(
            r#"
            INSERT INTO failed_jobs
                (original_job_id, priority, queue, strand, run_at, attempts,
                 max_attempts, tag, source, payload, failed_at, last_error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, now(), $11)
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(job.priority)
        .bind(&job.queue)
        .bind(&job.strand)
        .bind(job.run_at)
        .bind(job.attempts)
        .bind(job.max_attempts)
        .bind(&job.tag)
        .bind(&job.source)
        .bind(&job.payload)
        .bind(last_error)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(failed))
    }
}

fn push_selector(builder: &mut QueryBuilder<Postgres>, selector: &Selector) {
    if let Some(ids) = &selector.ids {
        builder.push(" AND id = ANY(").push_bind(ids.clone()).push(")");
    }
    if let Some(queue) = &selector.queue {
        builder.push(" AND queue = ").push_bind(queue.clone());
    }
    if let Some(tag) = &selector.tag {
        builder.push(" AND tag = ").push_bind(tag.clone());
    }
}

/// Partial patch for `update_attrs`; `None` fields are left untouched.
#[derive(Clone, Debug, Default)]
pub struct UpdateAttrs {
    pub attempts: Option<i32>,
    pub run_at: Option<DateTime<Utc>>,
    pub priority: Option<i32>,
    pub locked_at: Option<Option<DateTime<Utc>>>,
    pub locked_by: Option<Option<String>>,
}
