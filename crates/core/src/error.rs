use thiserror::Error;

/// Error taxonomy for the Job Store / Lock Manager seam (§7).
///
/// Library call sites `match` on this instead of string-sniffing an `anyhow`
/// message; `main()` in the binaries still bubbles everything up through
/// `anyhow` at the top.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transient store error, retry at caller discretion: {0}")]
    Transient(#[source] sqlx::Error),

    #[error("strand {strand:?} already exists with max_concurrent={existing}, insert requested {requested}")]
    StrandConcurrencyMismatch {
        strand: String,
        existing: i32,
        requested: i32,
    },

    #[error("queue name must be non-empty")]
    EmptyQueue,

    #[error("max_concurrent must be >= 1, got {0}")]
    InvalidMaxConcurrent(i32),

    #[error("job {0} not found")]
    NotFound(i64),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Transient(e)
    }
}

/// Errors at the broker<->worker socket seam (§7 ProtocolError).
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("i/o error on broker socket: {0}")]
    Io(#[from] std::io::Error),

    #[error("message framing error: {0}")]
    Framing(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("write deadline exceeded after {0:?}")]
    WriteTimeout(std::time::Duration),
}

/// Programmer errors for the Lifecycle Hooks registry (§4.7, §7).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HookError {
    #[error("unknown lifecycle event: {0}")]
    UnknownEvent(String),

    #[error("arity mismatch for event {event}: expected {expected} args, got {got}")]
    ArityMismatch {
        event: String,
        expected: usize,
        got: usize,
    },
}
