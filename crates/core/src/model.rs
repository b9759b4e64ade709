//! Persisted entities (§3): `Job` and `FailedJob`, plus the small value types
//! clients use to build queries against them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// The reserved locker value meaning "held administratively" (§3 invariant 6).
pub const LOCKED_BY_ON_HOLD: &str = "on hold";

/// The reserved locker value a reaper writes before rescheduling an
/// abandoned job (§4.6).
pub const LOCKED_BY_ABANDONED_CLEANUP: &str = "abandoned job cleanup";

/// Prefix used for broker prefetch-owner identities (§4.4): the full value is
/// `prefetch:<hostname>`.
pub const PREFETCH_OWNER_PREFIX: &str = "prefetch:";

#[derive(Clone, Debug, FromRow, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub priority: i32,
    pub queue: String,
    pub strand: Option<String>,
    pub max_concurrent: i32,
    pub next_in_strand: bool,
    pub run_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub attempts: i32,
    pub max_attempts: Option<i32>,
    pub tag: Option<String>,
    pub source: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn is_locked(&self) -> bool {
        self.locked_at.is_some()
    }

    pub fn is_prefetched(&self) -> bool {
        self.locked_by
            .as_deref()
            .map(|l| l.starts_with(PREFETCH_OWNER_PREFIX))
            .unwrap_or(false)
    }

    pub fn is_on_hold(&self) -> bool {
        self.locked_by.as_deref() == Some(LOCKED_BY_ON_HOLD)
    }
}

/// A companion record in the Failed set (§3): identical schema minus
/// `next_in_strand`/`max_concurrent`, plus `original_job_id`/`failed_at`.
#[derive(Clone, Debug, FromRow, Serialize, Deserialize)]
pub struct FailedJob {
    pub id: i64,
    pub original_job_id: i64,
    pub priority: i32,
    pub queue: String,
    pub strand: Option<String>,
    pub run_at: DateTime<Utc>,
    pub attempts: i32,
    pub max_attempts: Option<i32>,
    pub tag: Option<String>,
    pub source: Option<String>,
    pub payload: serde_json::Value,
    pub failed_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Parameters for enqueuing a new job. `strand`/`max_concurrent` together
/// govern ordering per §4.3; `max_concurrent` is ignored when `strand` is
/// `None`.
#[derive(Clone, Debug)]
pub struct NewJob {
    pub queue: String,
    pub priority: i32,
    pub strand: Option<String>,
    pub max_concurrent: i32,
    pub run_at: DateTime<Utc>,
    pub max_attempts: Option<i32>,
    pub tag: Option<String>,
    pub source: Option<String>,
    pub payload: serde_json::Value,
}

impl NewJob {
    pub fn new(queue: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            queue: queue.into(),
            priority: 0,
            strand: None,
            max_concurrent: 1,
            run_at: Utc::now(),
            max_attempts: Some(25),
            tag: None,
            source: None,
            payload,
        }
    }

    pub fn with_strand(mut self, strand: impl Into<String>, max_concurrent: i32) -> Self {
        self.strand = Some(strand.into());
        self.max_concurrent = max_concurrent;
        self
    }

    /// n-strand fan-out (§4.3): spreads `name` across `num_strands` parallel
    /// sub-strands instead of serializing every job under one name, while
    /// still capping per-sub-strand concurrency at `max_concurrent`.
    pub fn with_n_strand(mut self, name: impl Into<String>, num_strands: Option<u32>, max_concurrent: i32) -> Self {
        self.strand = Some(crate::strand::strand_for(&name.into(), num_strands));
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = run_at;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

/// The outcome a worker reports after executing a job body (§4.5).
/// Payload decoding and invocation are external to this crate; the worker
/// only hands back one of these three outcomes.
#[derive(Clone, Debug)]
pub enum JobOutcome {
    Ok,
    Error { message: String },
    Fatal { message: String },
}

/// Which set `list_jobs`/`tag_counts`/`bulk_update` operate over (§4.1, §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flavor {
    /// Ready to run: unlocked, `next_in_strand`, `run_at` due.
    Runnable,
    /// Scheduled for the future.
    Scheduled,
    /// Currently locked by a worker or the broker.
    Locked,
    /// Held administratively (`locked_by = "on hold"`).
    OnHold,
    /// All non-failed jobs regardless of state.
    All,
    /// The Failed set.
    Failed,
}

/// Bulk admin action (§6 CLI surface, §8 round-trip laws).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BulkAction {
    Hold,
    Unhold,
    Destroy,
}

/// Selector for admin bulk operations: an explicit id list, or all jobs
/// matching a queue/tag filter.
#[derive(Clone, Debug, Default)]
pub struct Selector {
    pub ids: Option<Vec<i64>>,
    pub queue: Option<String>,
    pub tag: Option<String>,
}
