//! strandflow-broker: one per host. Accepts Worker Client connections over a
//! Unix-domain socket, batches and prefetches Job Store fetches on their
//! behalf, and exits as soon as its parent supervisor process does (§4.4).

mod server;

use std::time::Duration;

use strandflow_core::config::{init_tracing, Config};
use strandflow_core::db::{make_pool, run_migrations};
use strandflow_core::lock::LockManager;
use strandflow_core::store::JobStore;
use tracing::info;

use crate::server::BrokerConfig;

const ORPHAN_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env()?;
    init_tracing(&cfg);

    let pool = make_pool(&cfg).await?;
    if cfg.migrate_on_startup {
        run_migrations(&pool).await?;
    }

    let store = JobStore::new(pool.clone()).with_verbose_job_logs(cfg.verbose_job_logs);
    let locks = LockManager::new(pool);

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    let prefetch_owner = format!("prefetch:{hostname}");

    let parent_pid = parent_pid();
    info!(%parent_pid, prefetch_owner = %prefetch_owner, "starting broker");

    let broker_cfg = BrokerConfig {
        socket_path: cfg.server_address.clone(),
        sleep_delay: cfg.sleep_delay,
        sleep_delay_stagger: cfg.sleep_delay_stagger,
        fetch_batch_size: cfg.fetch_batch_size,
        select_random_from_batch: cfg.select_random_from_batch,
        server_socket_timeout: cfg.server_socket_timeout,
        prefetched_jobs_timeout: cfg.prefetched_jobs_timeout,
        orphan_sweep_interval: ORPHAN_SWEEP_INTERVAL,
        prefetch_owner,
        parent_pid,
    };

    server::run(store, locks, broker_cfg).await
}

#[cfg(unix)]
fn parent_pid() -> u32 {
    unsafe { libc::getppid() as u32 }
}

#[cfg(not(unix))]
fn parent_pid() -> u32 {
    0
}
