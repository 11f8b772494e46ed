//! Structured job logging

use std::time::Instant;

use async_trait::async_trait;
use tracing::{error, info};

use crate::interceptor::Interceptor;
use crate::job::{Job, JobContext, JobResult};

/// Logs the start and end of every job with its duration
///
/// Failures are logged at `ERROR`, everything else at `INFO`. The outcome is
/// returned unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingInterceptor;

impl LoggingInterceptor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    async fn intercept(&self, ctx: JobContext, next: Job) -> JobResult {
        let worker = ctx.worker();
        let job = next.name().unwrap_or("anonymous").to_owned();

        info!(worker, %job, "Job started");
        let started = Instant::now();

        let outcome = next.run(ctx).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(()) => info!(worker, %job, elapsed_ms, "Job finished"),
            Err(e) => error!(worker, %job, elapsed_ms, error = %e, "Job finished"),
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobError;

    #[tokio::test]
    async fn test_outcome_is_unchanged() {
        let logging = LoggingInterceptor::new();

        let ok = logging
            .intercept(
                JobContext::detached(),
                Job::new(|_| async { Ok(()) }).with_name("ok"),
            )
            .await;
        assert!(ok.is_ok());

        let failed = logging
            .intercept(
                JobContext::detached(),
                Job::new(|_| async { Err(JobError::msg("timeout")) }),
            )
            .await;
        assert_eq!(failed.unwrap_err().to_string(), "timeout");
    }
}
