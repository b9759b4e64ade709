//! Worker Client (C5, §4.5): connects to the local broker, executes job
//! bodies via the handler registry, and reports outcomes back to the Job
//! Store. State machine: `Starting -> Requesting -> Waiting -> Executing ->
//! Reporting -> (Requesting | Exiting)`.

mod handlers;

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use strandflow_core::attempts::{AttemptOutcome, AttemptsLog};
use strandflow_core::config::{init_tracing, Config};
use strandflow_core::db::{make_pool, run_migrations};
use strandflow_core::hooks::{HookArg, HookRegistry};
use strandflow_core::model::{Job, JobOutcome};
use strandflow_core::protocol::{self, BrokerMessage, WorkerRequest};
use strandflow_core::retry::RetryConfig;
use strandflow_core::store::JobStore;
use tokio::net::UnixStream;
use tracing::{debug, error, info, warn};

use handlers::{build_registry, HandlerRegistry, JobContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env()?;
    init_tracing(&cfg);

    let pool = make_pool(&cfg).await?;
    if cfg.migrate_on_startup {
        run_migrations(&pool).await?;
    }

    let store = JobStore::new(pool.clone());
    let registry = build_registry();
    let ctx = JobContext { db: pool.clone(), worker_name: cfg.worker_id.clone() };
    let hooks = HookRegistry::new();
    let retry_cfg = RetryConfig::default();
    let attempts_log = AttemptsLog::new(pool.clone());

    info!(worker = %cfg.worker_id, queue = %cfg.queue, socket = %cfg.server_address, "starting worker");

    let admin_handle = spawn_admin_server(pool.clone(), cfg.admin_addr.clone());

    let worker_name = cfg.worker_id.clone();
    let worker_handle = tokio::spawn(run_worker_loop(
        cfg.clone(),
        store.clone(),
        registry,
        ctx,
        hooks,
        retry_cfg,
        attempts_log,
    ));

    tokio::select! {
        res = worker_handle => res??,
        res = admin_handle => res??,
        _ = tokio::signal::ctrl_c() => {
            info!(worker = %worker_name, "shutdown signal received");
        }
    }

    // Clean exit (§4.5): defensive, since the normal report path already
    // unlocks whatever job it touched.
    let released = store.clear_locks(&worker_name).await?;
    if released > 0 {
        info!(worker = %worker_name, released, "released locks on shutdown");
    }

    Ok(())
}

fn spawn_admin_server(pool: sqlx::PgPool, addr: Option<String>) -> tokio::task::JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move {
        let Some(addr) = addr else {
            std::future::pending::<()>().await;
            unreachable!()
        };
        let app = strandflow_core::admin::router(pool);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(%addr, "admin api listening");
        axum::serve(listener, app).await?;
        Ok(())
    })
}

/// The `Requesting -> Waiting -> Executing -> Reporting` cycle (§4.5),
/// looping until the process is killed. A dropped/reset connection sends the
/// state machine back to `Requesting` with a short backoff rather than
/// exiting, since broker restarts are expected to be transient.
async fn run_worker_loop(
    cfg: Config,
    store: JobStore,
    registry: Arc<HandlerRegistry>,
    ctx: JobContext,
    hooks: HookRegistry,
    retry_cfg: RetryConfig,
    attempts_log: AttemptsLog,
) -> anyhow::Result<()> {
    let request = WorkerRequest {
        worker_name: cfg.worker_id.clone(),
        queue: cfg.queue.clone(),
        min_priority: i32::MIN,
        max_priority: i32::MAX,
        pool_size: 1,
    };

    loop {
        match run_one_connection(&cfg, &request, &store, &registry, &ctx, &hooks, &retry_cfg, &attempts_log).await {
            Ok(()) => {}
            Err(e) => {
                warn!(error = %e, "broker connection dropped, reconnecting");
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_one_connection(
    cfg: &Config,
    request: &WorkerRequest,
    store: &JobStore,
    registry: &Arc<HandlerRegistry>,
    ctx: &JobContext,
    hooks: &HookRegistry,
    retry_cfg: &RetryConfig,
    attempts_log: &AttemptsLog,
) -> anyhow::Result<()> {
    // Requesting: connect and send fetch criteria.
    let mut stream = tokio::time::timeout(cfg.client_connect_timeout, UnixStream::connect(&cfg.server_address))
        .await
        .map_err(|_| anyhow::anyhow!("connect to broker timed out"))??;

    loop {
        protocol::write_frame(&mut stream, request, cfg.server_socket_timeout).await?;

        // Waiting: block until the broker hands back a job.
        let msg: Option<BrokerMessage> = protocol::read_frame(&mut stream).await?;
        let job = match msg {
            Some(BrokerMessage::Job(job)) => job,
            Some(BrokerMessage::Shutdown) | None => {
                info!("broker requested shutdown");
                return Ok(());
            }
        };

        let _ = hooks.fire("pop", &[HookArg::Worker(request.worker_name.clone())], || {});

        // Executing + Reporting.
        execute_and_report(job, store, registry, ctx, hooks, retry_cfg, attempts_log).await;

        let _ = hooks.fire("loop", &[HookArg::Worker(request.worker_name.clone())], || {});
    }
}

async fn execute_and_report(
    job: Job,
    store: &JobStore,
    registry: &Arc<HandlerRegistry>,
    ctx: &JobContext,
    hooks: &HookRegistry,
    retry_cfg: &RetryConfig,
    attempts_log: &AttemptsLog,
) {
    let job_id = job.id;
    let tag = job.tag.clone().unwrap_or_default();
    let attempts = job.attempts;
    let max_attempts = job.max_attempts;
    let attempt_no = attempts + 1;

    let _ = hooks.fire("invoke_job", &[HookArg::Job(job_id)], || {});

    let start = Instant::now();
    let run_result = match registry.handler_for(&tag) {
        Some(entry) => entry.run(&job, ctx).await,
        None => Err(handlers::JobError::new("UNKNOWN_TAG", format!("no handler registered for tag={tag}"))),
    };
    let latency_ms = start.elapsed().as_millis() as i64;

    let _ = hooks.fire("perform", &[HookArg::Worker(ctx.worker_name.clone()), HookArg::Job(job_id)], || {});

    // §4.5 Executing: the handler hands back one of exactly three outcomes.
    let (code, outcome) = match &run_result {
        Ok(()) => (None, JobOutcome::Ok),
        Err(err) if err.fatal => (Some(err.code), JobOutcome::Fatal { message: err.message.clone() }),
        Err(err) => (Some(err.code), JobOutcome::Error { message: err.message.clone() }),
    };

    match outcome {
        JobOutcome::Ok => {
            debug!(job_id, latency_ms, "job succeeded");
            if let Err(e) = store.complete_success(job_id).await {
                error!(job_id, error = %e, "failed to delete completed job");
            }
            log_attempt(attempts_log, job_id, attempt_no, AttemptOutcome::Succeeded, None, None, &ctx.worker_name, latency_ms)
                .await;
        }
        JobOutcome::Fatal { message } => {
            let _ = hooks.fire(
                "exceptional_exit",
                &[HookArg::Worker(ctx.worker_name.clone()), HookArg::Exception(message.clone())],
                || {},
            );
            if let Err(e) = store.complete_fatal(job_id, Some(&message)).await {
                error!(job_id, error = %e, "failed to move job to failed set");
            }
            log_attempt(attempts_log, job_id, attempt_no, AttemptOutcome::Failed, code, Some(&message), &ctx.worker_name, latency_ms)
                .await;
        }
        JobOutcome::Error { message } => {
            let exhausted = max_attempts.map(|m| attempt_no >= m).unwrap_or(false);
            if exhausted {
                let _ = hooks.fire(
                    "exceptional_exit",
                    &[HookArg::Worker(ctx.worker_name.clone()), HookArg::Exception(message.clone())],
                    || {},
                );
                if let Err(e) = store.complete_fatal(job_id, Some(&message)).await {
                    error!(job_id, error = %e, "failed to move job to failed set");
                }
                log_attempt(attempts_log, job_id, attempt_no, AttemptOutcome::Failed, code, Some(&message), &ctx.worker_name, latency_ms)
                    .await;
            } else {
                let _ = hooks.fire(
                    "error",
                    &[HookArg::Worker(ctx.worker_name.clone()), HookArg::Job(job_id), HookArg::Exception(message.clone())],
                    || {},
                );
                let delay = retry_cfg.next_delay_seconds(attempt_no, &mut rand::thread_rng());
                let next_run_at = chrono::Utc::now() + chrono::Duration::seconds(delay as i64);
                let _ = hooks.fire(
                    "retry",
                    &[HookArg::Worker(ctx.worker_name.clone()), HookArg::Job(job_id), HookArg::Exception(message.clone())],
                    || {},
                );
                if let Err(e) = store.complete_retry(job_id, next_run_at).await {
                    error!(job_id, error = %e, "failed to reschedule job");
                }
                log_attempt(attempts_log, job_id, attempt_no, AttemptOutcome::Retried, code, Some(&message), &ctx.worker_name, latency_ms)
                    .await;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn log_attempt(
    attempts_log: &AttemptsLog,
    job_id: i64,
    attempt_no: i32,
    outcome: AttemptOutcome,
    error_code: Option<&str>,
    error_message: Option<&str>,
    worker_id: &str,
    latency_ms: i64,
) {
    if let Err(e) = attempts_log
        .record(job_id, attempt_no, outcome, error_code, error_message, worker_id, Some(latency_ms), None)
        .await
    {
        warn!(job_id, error = %e, "failed to record attempt log entry");
    }
}
