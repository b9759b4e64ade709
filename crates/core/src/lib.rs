//! Core of the strand-ordered job queue: the Job Store, Lock Manager, Strand
//! Coordinator, Health Reaper, and Lifecycle Hooks (C1, C2, C3, C6, C7). The
//! Broker and Worker Client (C4, C5) live in their own crates since they are
//! separate processes, but both depend on this crate for the store/lock/
//! protocol types they share.

pub mod admin;
pub mod attempts;
pub mod config;
pub mod db;
pub mod error;
pub mod hooks;
pub mod lock;
pub mod model;
pub mod protocol;
pub mod reaper;
pub mod retry;
pub mod store;
pub mod strand;

pub use attempts::{AttemptOutcome, AttemptRecord, AttemptsLog};
pub use config::Config;
pub use error::{HookError, ProtocolError, StoreError};
pub use lock::{LockAssignment, LockManager};
pub use model::{BulkAction, FailedJob, Flavor, Job, JobOutcome, NewJob, Selector};
pub use store::JobStore;
