use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use workpool::prelude::*;

const DEFAULT_JOBS: usize = 10_000;

/// Outcome counts of one batch
#[derive(Debug, Default)]
struct Summary {
    added: usize,
    succeeded: usize,
    failed: usize,
    panicked: usize,
}

impl Summary {
    fn record(&mut self, outcome: &JobResult) {
        match outcome {
            Ok(()) => self.succeeded += 1,
            Err(e) if e.is_panic() => self.panicked += 1,
            Err(_) => self.failed += 1,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Configure via environment variables:
    // - RUST_LOG or LOG_LEVEL: Log filter (default: "info")
    // - WORKPOOL_SIZE, WORKPOOL_QUEUE_CAPACITY, WORKPOOL_ERRORS, WORKPOOL_WATCH_SIGNALS
    // - WORKPOOL_JOBS: Jobs per batch (default: 10000)
    let filter = std::env::var("RUST_LOG")
        .ok()
        .or_else(|| std::env::var("LOG_LEVEL").ok())
        .and_then(|f| EnvFilter::try_new(f).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let mut config = PoolConfig::from_env();
    if !config.errors.is_enabled() {
        config = config.with_errors(ErrorReporting::Unbounded);
    }

    let jobs = std::env::var("WORKPOOL_JOBS")
        .ok()
        .map(|v| {
            v.parse::<usize>()
                .with_context(|| format!("Invalid WORKPOOL_JOBS: {v}"))
        })
        .transpose()?
        .unwrap_or(DEFAULT_JOBS);

    info!(
        pool_size = config.pool_size,
        queue_capacity = config.queue_capacity,
        errors = %config.errors,
        jobs,
        "workpool-demo starting..."
    );

    let pool = Pool::builder(config)
        .interceptor(
            RecoveryInterceptor::new().with_handler(|message| Err(JobError::Panicked(message))),
        )
        .interceptor(LoggingInterceptor::new())
        .build();

    let shutdown = CancellationToken::new();
    pool.start(&shutdown).await;

    for batch in 1..=2 {
        let summary = run_batch(&pool, batch, jobs).await;
        info!(
            batch,
            added = summary.added,
            succeeded = summary.succeeded,
            failed = summary.failed,
            panicked = summary.panicked,
            "Batch complete"
        );

        if pool.status() == PoolStatus::Cancelled {
            warn!("Received shutdown signal, skipping remaining batches");
            break;
        }
    }

    pool.stop().await;
    info!("Demo shutdown complete");
    Ok(())
}

/// Submit one batch and collect its outcomes
async fn run_batch(pool: &Pool, batch: usize, jobs: usize) -> Summary {
    let mut summary = Summary::default();

    for i in 0..jobs {
        match pool.add(demo_job(batch, i)).await {
            Ok(()) => summary.added += 1,
            Err(e) => {
                warn!(batch, error = %e, "Stopped adding jobs");
                break;
            }
        }
    }

    let Some(mut outcomes) = pool.wait().await else {
        return summary;
    };

    loop {
        tokio::select! {
            outcome = outcomes.recv() => match outcome {
                Some(outcome) => summary.record(&outcome),
                None => break,
            },
            _ = pool.cancelled() => {
                warn!(batch, "Interrupted before all outcomes arrived");
                break;
            }
        }
    }

    summary
}

/// Sleeps briefly; every 7th job fails and every 97th panics
fn demo_job(batch: usize, i: usize) -> Job {
    Job::new(move |ctx| async move {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis((i % 10) as u64)) => {}
            _ = ctx.cancelled() => return Err(JobError::Cancelled),
        }

        if i % 97 == 96 {
            panic!("job {i} of batch {batch} hit a bug");
        }
        if i % 7 == 6 {
            return Err(anyhow::anyhow!("job {i} of batch {batch} failed").into());
        }
        Ok(())
    })
    .with_name(format!("batch-{batch}-job-{i}"))
}
