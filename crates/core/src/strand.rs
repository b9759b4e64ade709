//! Strand Coordinator (C3, §4.3): singleton coalescing and the n-strand
//! fan-out helper. The ordering invariant itself (`next_in_strand`
//! maintenance on insert/delete) lives in database triggers — see
//! `migrations/` — so that any enqueuer, not just this crate, stays
//! consistent (§9 design notes).

use chrono::{DateTime, Utc};
use rand::Rng;
use sqlx::PgPool;

use crate::error::StoreError;
use crate::model::{Job, NewJob};

/// Hashes a strand name down to a stable 63-bit signed key suitable for
/// `pg_advisory_xact_lock`. Mirrors the database-side `half_md5_as_bigint`
/// function (§6) so application code and triggers agree on the same lock
/// space without a round-trip.
pub fn strand_advisory_lock_key(strand: &str) -> i64 {
    let digest = md5::compute(strand.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.0[0..8]);
    (i64::from_be_bytes(bytes)) & 0x7fff_ffff_ffff_ffff
}

/// Enqueues on `strand`, coalescing with an existing pending (unlocked) job
/// on the same strand if one exists (§4.3 singleton enqueue, §8 invariant
/// 6). Returns the surviving row, which may be the caller's `job` or the
/// pre-existing one with its `run_at` pulled forward.
pub async fn create_singleton(pool: &PgPool, job: NewJob) -> Result<Job, StoreError> {
    let Some(strand) = job.strand.clone() else {
        return Err(StoreError::EmptyQueue);
    };

    let mut tx = pool.begin().await?;
    let key = strand_advisory_lock_key(&strand);
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(key)
        .execute(&mut *tx)
        .await?;

    let existing: Option<Job> = sqlx::query_as(
        "SELECT * FROM jobs WHERE strand = $1 AND locked_at IS NULL ORDER BY id ASC LIMIT 1",
    )
    .bind(&strand)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(existing) = existing {
        let pulled_forward = existing.run_at.min(job.run_at);
        let updated: Job = sqlx::query_as(
            "UPDATE jobs SET run_at = $2, updated_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(existing.id)
        .bind(pulled_forward)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        return Ok(updated);
    }

    let inserted: Job = sqlx::query_as(
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
    .bind(&strand)
    .bind(job.max_concurrent)
    .bind(job.run_at)
    .bind(job.max_attempts)
    .bind(&job.tag)
    .bind(&job.source)
    .bind(&job.payload)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(inserted)
}

/// Maps a (name, discriminator) pair to a concrete strand identifier and
/// fan-out count drawn from configuration (§4.3 n-strand). When
/// `num_strands` is `None` or `1`, the name passes through unchanged;
/// otherwise a uniform-random 1-indexed sub-strand suffix is appended.
pub fn strand_for(name: &str, num_strands: Option<u32>) -> String {
    match num_strands {
        None | Some(0) | Some(1) => name.to_string(),
        Some(n) => {
            let i = rand::thread_rng().gen_range(1..=n);
            format!("{name}:{i}")
        }
    }
}

/// The earliest `run_at` of two candidates, used by callers that want
/// singleton semantics without going through `create_singleton` directly.
pub fn earlier(a: DateTime<Utc>, b: DateTime<Utc>) -> DateTime<Utc> {
    a.min(b)
}
