//! Panic recovery

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::warn;

use crate::interceptor::Interceptor;
use crate::job::{panic_message, Job, JobContext, JobResult};

/// Maps the message of a recovered panic to the job's outcome
pub type PanicHandler = Arc<dyn Fn(String) -> JobResult + Send + Sync>;

/// Catches panics raised by the rest of the chain or the job
///
/// The panic is logged and, unless a handler is set, turned into a
/// successful outcome. The worker keeps running either way.
#[derive(Clone, Default)]
pub struct RecoveryInterceptor {
    handler: Option<PanicHandler>,
}

impl RecoveryInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide the outcome of a recovered job
    ///
    /// ```ignore
    /// let recovery = RecoveryInterceptor::new()
    ///     .with_handler(|message| Err(JobError::Panicked(message)));
    /// ```
    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(String) -> JobResult + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }
}

impl std::fmt::Debug for RecoveryInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryInterceptor")
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

#[async_trait]
impl Interceptor for RecoveryInterceptor {
    async fn intercept(&self, ctx: JobContext, next: Job) -> JobResult {
        let worker = ctx.worker();
        let name = next.name().map(str::to_owned);

        // the job may also panic while building its future
        let run = AssertUnwindSafe(async move { next.run(ctx).await });

        match run.catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(worker, job = ?name, panic = %message, "Recovered from panic in job");
                match &self.handler {
                    Some(handler) => handler(message),
                    None => Ok(()),
                }
            }
        }
    }
}
