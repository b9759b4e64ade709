//! Job body registry (§4.5 ambient note): executing a `Job`'s `payload` is
//! external to `strandflow-core` by design (§1 Non-goals) — this registry is
//! the worker-side seam that maps `tag` to a concrete async handler.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use sqlx::PgPool;
use strandflow_core::model::Job;
use tokio::sync::Semaphore;
use tokio::time::timeout;

pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
type HandlerFn =
    dyn for<'a> Fn(&'a Job, &'a JobContext) -> BoxFuture<'a, Result<(), JobError>> + Send + Sync;

/// A job body's outcome, in the handler's own terms. The worker's report
/// loop (§4.5 Reporting) maps this to `JobOutcome` using `job.attempts` vs
/// `job.max_attempts`.
#[derive(Debug)]
pub struct JobError {
    pub code: &'static str,
    pub message: String,
    pub fatal: bool,
}

impl JobError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), fatal: false }
    }

    pub fn fatal(code: &'static str, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), fatal: true }
    }
}

#[derive(Clone)]
pub struct JobContext {
    pub db: PgPool,
    pub worker_name: String,
}

#[derive(Clone)]
pub struct HandlerEntry {
    pub handler: Arc<HandlerFn>,
    pub semaphore: Option<Arc<Semaphore>>,
    pub timeout: Option<Duration>,
}

#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerEntry>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self { handlers: HashMap::new() }
    }

    pub fn register<F>(&mut self, tag: &str, handler: F)
    where
        F: for<'a> Fn(&'a Job, &'a JobContext) -> BoxFuture<'a, Result<(), JobError>>
            + Send
            + Sync
            + 'static,
    {
        self.register_with_options(tag, handler, HandlerOptions::new());
    }

    pub fn register_with_options<F>(&mut self, tag: &str, handler: F, opts: HandlerOptions)
    where
        F: for<'a> Fn(&'a Job, &'a JobContext) -> BoxFuture<'a, Result<(), JobError>>
            + Send
            + Sync
            + 'static,
    {
        let semaphore = opts.max_concurrency.map(|n| Arc::new(Semaphore::new(n.max(1))));
        self.handlers.insert(
            tag.to_string(),
            HandlerEntry { handler: Arc::new(handler), semaphore, timeout: opts.timeout },
        );
    }

    pub fn handler_for(&self, tag: &str) -> Option<HandlerEntry> {
        self.handlers.get(tag).cloned()
    }
}

#[derive(Clone, Debug, Default)]
pub struct HandlerOptions {
    max_concurrency: Option<usize>,
    timeout: Option<Duration>,
}

impl HandlerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = Some(n);
        self
    }

    pub fn timeout(mut self, dur: Duration) -> Self {
        self.timeout = Some(dur);
        self
    }
}

impl HandlerEntry {
    pub async fn run(&self, job: &Job, ctx: &JobContext) -> Result<(), JobError> {
        let _permit = if let Some(sem) = &self.semaphore {
            Some(
                sem.clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| JobError::new("WORKER_SHUTDOWN", "handler semaphore closed"))?,
            )
        } else {
            None
        };

        let fut = (self.handler)(job, ctx);
        let res = if let Some(dur) = self.timeout {
            match timeout(dur, fut).await {
                Ok(inner) => inner,
                Err(_) => Err(JobError::new("TIMEOUT", format!("handler timeout after {}ms", dur.as_millis()))),
            }
        } else {
            fut.await
        };

        drop(_permit);
        res
    }
}

#[derive(Deserialize)]
struct EmailSendPayload {
    #[allow(dead_code)]
    user_id: i64,
    #[allow(dead_code)]
    template: Option<String>,
}

fn parse_payload<T: for<'de> Deserialize<'de>>(job: &Job) -> Result<T, JobError> {
    serde_json::from_value(job.payload.clone()).map_err(|e| JobError::new("BAD_PAYLOAD", e.to_string()))
}

fn boxed<'a, T>(fut: impl std::future::Future<Output = T> + Send + 'a) -> BoxFuture<'a, T> {
    Box::pin(fut)
}

/// The default registry demonstrates the seam; real deployments register
/// their own tags before calling `run` (§4.5).
pub fn build_registry() -> Arc<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();

    registry.register_with_options(
        "email_send",
        |job, _ctx| {
            boxed(async move {
                let payload: EmailSendPayload = parse_payload(job)?;
                let _ = payload.user_id;
                let _ = payload.template;
                Ok(())
            })
        },
        HandlerOptions::new().max_concurrency(50).timeout(Duration::from_secs(10)),
    );

    Arc::new(registry)
}
