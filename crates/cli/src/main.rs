//! strandflowctl: inspection/admin CLI over the same store the broker and
//! workers use (§6).

use clap::{Parser, Subcommand};
use strandflow_core::config::Config;
use strandflow_core::db::make_pool;
use strandflow_core::model::{BulkAction, Flavor, NewJob, Selector};
use strandflow_core::store::JobStore;

#[derive(Parser)]
#[command(name = "strandflowctl", about = "Inspect and administer the job queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List jobs in a given flavor (default: runnable).
    List {
        #[arg(long, default_value = "runnable")]
        flavor: String,
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        #[arg(long)]
        query: Option<String>,
    },
    /// Count jobs in a given flavor.
    Count {
        #[arg(long, default_value = "runnable")]
        flavor: String,
        #[arg(long)]
        query: Option<String>,
    },
    /// Group jobs in a flavor by tag.
    TagCounts {
        #[arg(long, default_value = "all")]
        flavor: String,
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// Put jobs on hold (`locked_by = "on hold"`).
    Hold {
        ids: Vec<i64>,
        #[arg(long)]
        queue: Option<String>,
        #[arg(long)]
        tag: Option<String>,
    },
    /// Release jobs from hold, resetting their attempt count and run_at.
    Unhold {
        ids: Vec<i64>,
        #[arg(long)]
        queue: Option<String>,
        #[arg(long)]
        tag: Option<String>,
    },
    /// Permanently delete jobs.
    Destroy {
        ids: Vec<i64>,
        #[arg(long)]
        queue: Option<String>,
        #[arg(long)]
        tag: Option<String>,
    },
    /// Print the attempt history for one job.
    Timeline { job_id: i64 },
    /// Insert `n` demo jobs (half succeed, half fail) into `queue`. Dev/test only.
    Seed {
        #[arg(default_value_t = 10)]
        n: i64,
        #[arg(long, default_value = "default")]
        queue: String,
    },
    /// Truncate `jobs`, `failed_jobs`, and `job_attempts`. Dev/test only.
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = Config::from_env()?;
    let pool = make_pool(&cfg).await?;
    let store = JobStore::new(pool.clone());

    match cli.command {
        Command::List { flavor, limit, offset, query } => {
            let jobs = store.list_jobs(parse_flavor(&flavor), limit, offset, query.as_deref()).await?;
            for job in jobs {
                println!(
                    "{:>6} queue={:<12} strand={:<16} priority={:<4} attempts={:<3} locked_by={:<24} run_at={}",
                    job.id,
                    job.queue,
                    job.strand.as_deref().unwrap_or("-"),
                    job.priority,
                    job.attempts,
                    job.locked_by.as_deref().unwrap_or("-"),
                    job.run_at.to_rfc3339(),
                );
            }
        }
        Command::Count { flavor, query } => {
            let n = store.jobs_count(parse_flavor(&flavor), query.as_deref()).await?;
            println!("{n}");
        }
        Command::TagCounts { flavor, limit, offset } => {
            let rows = store.tag_counts(parse_flavor(&flavor), limit, offset).await?;
            for (tag, n) in rows {
                let tag = if tag.is_empty() { "(untagged)".to_string() } else { tag };
                println!("{tag:<24} {n}");
            }
        }
        Command::Hold { ids, queue, tag } => {
            let affected = store.bulk_update(BulkAction::Hold, selector(ids, queue, tag)).await?;
            println!("held {affected} job(s)");
        }
        Command::Unhold { ids, queue, tag } => {
            let affected = store.bulk_update(BulkAction::Unhold, selector(ids, queue, tag)).await?;
            println!("unheld {affected} job(s)");
        }
        Command::Destroy { ids, queue, tag } => {
            let affected = store.bulk_update(BulkAction::Destroy, selector(ids, queue, tag)).await?;
            println!("destroyed {affected} job(s)");
        }
        Command::Timeline { job_id } => {
            print_timeline(&pool, &store, job_id).await?;
        }
        Command::Seed { n, queue } => seed(&store, &queue, n).await?,
        Command::Reset => reset(&pool).await?,
    }

    Ok(())
}

fn selector(ids: Vec<i64>, queue: Option<String>, tag: Option<String>) -> Selector {
    Selector { ids: if ids.is_empty() { None } else { Some(ids) }, queue, tag }
}

fn parse_flavor(s: &str) -> Flavor {
    match s {
        "scheduled" => Flavor::Scheduled,
        "locked" => Flavor::Locked,
        "on_hold" | "on-hold" => Flavor::OnHold,
        "failed" => Flavor::Failed,
        "all" => Flavor::All,
        _ => Flavor::Runnable,
    }
}

async fn seed(store: &JobStore, queue: &str, n: i64) -> anyhow::Result<()> {
    for i in 0..n {
        let tag = if i % 2 == 0 { "demo_ok" } else { "fail_me" };
        let job = NewJob::new(queue, serde_json::json!({ "i": i })).with_tag(tag);
        let inserted = store.insert(job).await?;
        println!("+ inserted job id={} tag={tag}", inserted.id);
    }
    Ok(())
}

async fn reset(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::query("TRUNCATE TABLE job_attempts, failed_jobs, jobs RESTART IDENTITY CASCADE")
        .execute(pool)
        .await?;
    println!("reset OK");
    Ok(())
}

async fn print_timeline(pool: &sqlx::PgPool, store: &JobStore, job_id: i64) -> anyhow::Result<()> {
    let job = store.get(job_id).await?;
    match job {
        Some(job) => println!(
            "JOB: id={} queue={} strand={:?} priority={} attempts={} max_attempts={:?} locked_by={:?} run_at={}",
            job.id,
            job.queue,
            job.strand,
            job.priority,
            job.attempts,
            job.max_attempts,
            job.locked_by,
            job.run_at.to_rfc3339(),
        ),
        None => println!("JOB: id={job_id} not found in jobs (check failed_jobs)"),
    }

    let attempts_log = strandflow_core::attempts::AttemptsLog::new(pool.clone());
    for attempt in attempts_log.list_for_job(job_id).await? {
        println!(
            "  attempt #{} {} worker={} latency_ms={:?} error={:?} shutdown_reason={:?}",
            attempt.attempt_no,
            attempt.outcome,
            attempt.worker_id,
            attempt.latency_ms,
            attempt.error_message,
            attempt.shutdown_reason,
        );
    }

    Ok(())
}
