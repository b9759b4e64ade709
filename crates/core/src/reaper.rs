//! Health Reaper (C6, §4.6): periodic detection of dead workers and recovery
//! of the jobs they held. Serialized cluster-wide by a single named advisory
//! lock so at most one reaper sweeps at a time.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::attempts::AttemptOutcome;
use crate::error::StoreError;
use crate::model::{Job, PREFETCH_OWNER_PREFIX};
use crate::retry::RetryConfig;

/// `shutdown_reason` value recorded against the attempts log when a sweep
/// recovers a job whose owner failed the liveness check (§4.6 step 2). The
/// only reason this implementation produces today; kept as a named constant
/// since a future per-row lease-expiry path would add a second one.
const SHUTDOWN_REASON_LIVENESS_LOST: &str = "liveness_oracle_reported_dead";

/// Constant advisory-lock key the reaper sweep serializes on (§4.6 step 1).
/// An arbitrary but fixed value; any process running the reaper uses it.
const REAPER_ADVISORY_LOCK_KEY: i64 = 0x5352_4150_4552_31; // "SREAPER1" in hex-ish

/// Pluggable source of truth for "which worker identities are currently
/// alive" (§4.6 step 2). Implementations might consult a process registry, a
/// service mesh, or — in the simplest deployments — nothing at all.
#[async_trait]
pub trait LivenessOracle: Send + Sync {
    async fn live_workers(&self) -> anyhow::Result<Vec<String>>;
}

/// Default oracle when no health check is configured: reports no workers
/// alive, which would reap everything, so it is only ever wired in when the
/// reaper itself is disabled. Kept as an explicit opt-in marker rather than
/// silently no-op'ing the sweep.
pub struct NullOracle;

#[async_trait]
impl LivenessOracle for NullOracle {
    async fn live_workers(&self) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// In-memory heartbeat registry: workers call `touch` periodically (e.g.
/// from their main loop), and entries older than `ttl` are considered dead.
/// Suited to a single-host deployment where broker and workers share
/// process memory; multi-host setups should supply their own oracle.
pub struct ProcessRegistryOracle {
    heartbeats: dashmap::DashMap<String, chrono::DateTime<Utc>>,
    ttl: chrono::Duration,
}

impl ProcessRegistryOracle {
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            heartbeats: dashmap::DashMap::new(),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(30)),
        }
    }

    pub fn touch(&self, worker: &str) {
        self.heartbeats.insert(worker.to_string(), Utc::now());
    }

    pub fn forget(&self, worker: &str) {
        self.heartbeats.remove(worker);
    }
}

#[async_trait]
impl LivenessOracle for ProcessRegistryOracle {
    async fn live_workers(&self) -> anyhow::Result<Vec<String>> {
        let cutoff = Utc::now() - self.ttl;
        Ok(self
            .heartbeats
            .iter()
            .filter(|entry| *entry.value() >= cutoff)
            .map(|entry| entry.key().clone())
            .collect())
    }
}

pub struct HealthReaper {
    pool: PgPool,
    oracle: std::sync::Arc<dyn LivenessOracle>,
    retry_cfg: RetryConfig,
    attempts_log: crate::attempts::AttemptsLog,
}

impl HealthReaper {
    pub fn new(pool: PgPool, oracle: std::sync::Arc<dyn LivenessOracle>, retry_cfg: RetryConfig) -> Self {
        let attempts_log = crate::attempts::AttemptsLog::new(pool.clone());
        Self { pool, oracle, retry_cfg, attempts_log }
    }

    /// Runs one sweep. Returns the number of jobs recovered. All per-job
    /// failures are logged and do not abort the sweep (§7 propagation rule).
    pub async fn sweep(&self) -> anyhow::Result<u64> {
        let mut lock_tx = self.pool.begin().await?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_xact_lock($1)")
            .bind(REAPER_ADVISORY_LOCK_KEY)
            .fetch_one(&mut *lock_tx)
            .await?;

        if !acquired {
            return Ok(0);
        }

        let live = self.oracle.live_workers().await?;
        let running: Vec<Job> = sqlx::query_as(
            "SELECT * FROM jobs WHERE locked_at IS NOT NULL AND locked_by <> $1 FOR UPDATE SKIP LOCKED",
        )
        .bind(crate::model::LOCKED_BY_ON_HOLD)
        .fetch_all(&mut *lock_tx)
        .await?;

        let mut recovered = 0u64;
        let mut log_entries = Vec::new();

        for job in running {
            let Some(owner) = &job.locked_by else { continue };
            if owner.starts_with(PREFETCH_OWNER_PREFIX) {
                continue;
            }
            if live.iter().any(|w| w == owner) {
                continue;
            }

            match self.reap_one(&mut lock_tx, &job, owner).await {
                Ok(Some(entry)) => {
                    recovered += 1;
                    log_entries.push(entry);
                }
                Ok(None) => {}
                Err(e) => warn!(job_id = job.id, error = %e, "reaper failed to recover job"),
            }
        }

        lock_tx.commit().await?;

        for entry in log_entries {
            if let Err(e) = self
                .attempts_log
                .record(
                    entry.job_id,
                    entry.attempt_no,
                    entry.outcome,
                    None,
                    Some("worker liveness lost"),
                    &entry.old_owner,
                    None,
                    Some(SHUTDOWN_REASON_LIVENESS_LOST),
                )
                .await
            {
                warn!(job_id = entry.job_id, error = %e, "failed to record reaper attempt log entry");
            }
        }

        info!(recovered, "health reaper sweep complete");
        Ok(recovered)
    }

    async fn reap_one(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        job: &Job,
        old_owner: &str,
    ) -> Result<Option<ReapLogEntry>, StoreError> {
        let claimed = sqlx::query(
            "UPDATE jobs SET locked_by = $3 WHERE id = $1 AND locked_by = $2",
        )
        .bind(job.id)
        .bind(old_owner)
        .bind(crate::model::LOCKED_BY_ABANDONED_CLEANUP)
        .execute(&mut **tx)
        .await?
        .rows_affected()
            == 1;

        if !claimed {
            return Ok(None);
        }

        let exhausted = job
            .max_attempts
            .map(|cap| job.attempts + 1 >= cap)
            .unwrap_or(false);

        if exhausted {
            let failed: crate::model::FailedJob = sqlx::query_as(
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
            .bind(job.attempts + 1)
            .bind(job.max_attempts)
            .bind(&job.tag)
            .bind(&job.source)
            .bind(&job.payload)
            .bind("reaped: worker liveness lost")
            .fetch_one(&mut **tx)
            .await?;
            let _ = failed;
            sqlx::query("DELETE FROM jobs WHERE id = $1").bind(job.id).execute(&mut **tx).await?;

            return Ok(Some(ReapLogEntry {
                job_id: job.id,
                old_owner: old_owner.to_string(),
                attempt_no: job.attempts + 1,
                outcome: AttemptOutcome::Failed,
            }));
        } else {
            let delay = self.retry_cfg.next_delay_seconds(job.attempts + 1, &mut rand::thread_rng());
            let next_run_at = Utc::now() + chrono::Duration::seconds(delay as i64);
            sqlx::query(
                "UPDATE jobs SET locked_at = NULL, locked_by = NULL, attempts = attempts + 1, run_at = $2, updated_at = now() WHERE id = $1",
            )
            .bind(job.id)
            .bind(next_run_at)
            .execute(&mut **tx)
            .await?;
        }

        Ok(Some(ReapLogEntry {
            job_id: job.id,
            old_owner: old_owner.to_string(),
            attempt_no: job.attempts + 1,
            outcome: AttemptOutcome::Retried,
        }))
    }
}

/// What to write to the attempts log for one recovered job, deferred until
/// after the sweep's transaction commits (§7: attempt-log writes are
/// best-effort and must not risk rolling back the recovery itself).
struct ReapLogEntry {
    job_id: i64,
    old_owner: String,
    attempt_no: i32,
    outcome: AttemptOutcome,
}
