//! Typed configuration surface (§6), loaded from the environment.
//!
//! Config is a central place for runtime configuration: it reads values from
//! the environment (backed by a `.env` file via `dotenvy`) and hands back a
//! typed, validated struct instead of raw strings passed around everywhere.

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,

    pub worker_id: String,
    pub queue: String,
    pub max_attempts: i32,

    pub sleep_delay: Duration,
    pub sleep_delay_stagger: Duration,
    pub fetch_batch_size: i64,
    pub select_random_from_batch: bool,

    pub kill_workers_on_exit: bool,
    pub slow_exit_timeout: Duration,

    pub server_address: String,
    pub server_socket_timeout: Duration,
    pub prefetched_jobs_timeout: Duration,
    pub client_connect_timeout: Duration,

    pub worker_health_check_enabled: bool,
    pub health_check_interval: Duration,
    pub liveness_ttl: Duration,

    pub admin_addr: Option<String>,
    pub migrate_on_startup: bool,

    pub log_format: LogFormat,
    pub log_level: String,
    pub verbose_job_logs: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let database_max_connections =
            env_or_fallback("STRANDFLOW_DATABASE_MAX_CONNECTIONS", "DATABASE_MAX_CONNECTIONS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(10);

        let worker_id = env_or_fallback("STRANDFLOW_WORKER_ID", "WORKER_ID")
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "worker-1".to_string());

        let queue =
            env_or_fallback("STRANDFLOW_QUEUE", "QUEUE").unwrap_or_else(|| "default".to_string());

        let max_attempts = env_or_fallback("STRANDFLOW_MAX_ATTEMPTS", "MAX_ATTEMPTS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(25);

        let sleep_delay = Duration::from_millis(
            env_or_fallback("STRANDFLOW_SLEEP_DELAY_MS", "SLEEP_DELAY_MS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
        );
        let sleep_delay_stagger = Duration::from_millis(
            env_or_fallback("STRANDFLOW_SLEEP_DELAY_STAGGER_MS", "SLEEP_DELAY_STAGGER_MS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(250),
        );
        let fetch_batch_size = env_or_fallback("STRANDFLOW_FETCH_BATCH_SIZE", "FETCH_BATCH_SIZE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);
        let select_random_from_batch = env_bool("STRANDFLOW_SELECT_RANDOM_FROM_BATCH").unwrap_or(false);

        let kill_workers_on_exit = env_bool("STRANDFLOW_KILL_WORKERS_ON_EXIT").unwrap_or(true);
        let slow_exit_timeout = Duration::from_secs(
            env_or_fallback("STRANDFLOW_SLOW_EXIT_TIMEOUT_SECS", "SLOW_EXIT_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
        );

        let server_address = env_or_fallback("STRANDFLOW_SERVER_ADDRESS", "SERVER_ADDRESS")
            .unwrap_or_else(|| "/tmp/strandflow.sock".to_string());
        let server_socket_timeout = Duration::from_secs(
            env_or_fallback("STRANDFLOW_SERVER_SOCKET_TIMEOUT_SECS", "SERVER_SOCKET_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
        );
        let prefetched_jobs_timeout = Duration::from_secs(
            env_or_fallback(
                "STRANDFLOW_PREFETCHED_JOBS_TIMEOUT_SECS",
                "PREFETCHED_JOBS_TIMEOUT_SECS",
            )
            .and_then(|s| s.parse().ok())
            .unwrap_or(30),
        );
        let client_connect_timeout = Duration::from_secs(
            env_or_fallback(
                "STRANDFLOW_CLIENT_CONNECT_TIMEOUT_SECS",
                "CLIENT_CONNECT_TIMEOUT_SECS",
            )
            .and_then(|s| s.parse().ok())
            .unwrap_or(2),
        );

        let worker_health_check_enabled =
            env_or_fallback("STRANDFLOW_WORKER_HEALTH_CHECK_TYPE", "WORKER_HEALTH_CHECK_TYPE")
                .map(|v| v != "none")
                .unwrap_or(false);
        let health_check_interval = Duration::from_secs(
            env_or_fallback("STRANDFLOW_HEALTH_CHECK_INTERVAL_SECS", "HEALTH_CHECK_INTERVAL_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
        );
        let liveness_ttl = Duration::from_secs(
            env_or_fallback("STRANDFLOW_LIVENESS_TTL_SECS", "LIVENESS_TTL_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
        );

        let admin_addr = env_or_fallback("STRANDFLOW_ADMIN_ADDR", "ADMIN_ADDR")
            .and_then(|s| normalize_optional_addr(&s));

        let migrate_on_startup = env_bool("STRANDFLOW_MIGRATE_ON_STARTUP").unwrap_or(false);

        let log_format = match env_or_fallback("STRANDFLOW_LOG_FORMAT", "LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };
        let log_level =
            env_or_fallback("STRANDFLOW_LOG_LEVEL", "LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        let verbose_job_logs = env_bool("STRANDFLOW_VERBOSE_JOB_LOGS").unwrap_or(false);

        Ok(Self {
            database_url,
            database_max_connections,
            worker_id,
            queue,
            max_attempts,
            sleep_delay,
            sleep_delay_stagger,
            fetch_batch_size,
            select_random_from_batch,
            kill_workers_on_exit,
            slow_exit_timeout,
            server_address,
            server_socket_timeout,
            prefetched_jobs_timeout,
            client_connect_timeout,
            worker_health_check_enabled,
            health_check_interval,
            liveness_ttl,
            admin_addr,
            migrate_on_startup,
            log_format,
            log_level,
            verbose_job_logs,
        })
    }
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn normalize_optional_addr(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if matches!(v.to_lowercase().as_str(), "0" | "off" | "false" | "none") {
        return None;
    }
    Some(v.to_string())
}

/// Initializes the `tracing` subscriber per `log_format`/`log_level`.
pub fn init_tracing(cfg: &Config) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&cfg.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match cfg.log_format {
        LogFormat::Json => {
            let _ = tracing_subscriber::fmt().with_env_filter(filter).json().try_init();
        }
        LogFormat::Pretty => {
            let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
        }
    }
}
