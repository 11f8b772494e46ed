//! Jobs, their execution context and outcomes

use std::any::Any;
use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

/// Outcome of a single job execution
pub type JobResult = Result<(), JobError>;

/// Error reported for a job
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The job ran and returned a failure
    #[error(transparent)]
    Failed(#[from] anyhow::Error),

    /// The job panicked and the panic was recovered
    #[error("job panicked: {0}")]
    Panicked(String),

    /// The job gave up because the pool was cancelled
    #[error("job cancelled")]
    Cancelled,
}

impl JobError {
    /// Create a failure from a plain message
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self::Failed(anyhow::Error::msg(message))
    }

    /// Whether this error comes from a recovered panic
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }
}

/// Context handed to a job when a worker executes it
///
/// The context carries the pool's cancellation token. Cancellation is
/// cooperative: a job keeps running after `stop()` unless it checks
/// [`JobContext::is_cancelled`] or awaits [`JobContext::cancelled`].
///
/// ```ignore
/// let job = Job::new(|ctx| async move {
///     tokio::select! {
///         _ = do_work() => Ok(()),
///         _ = ctx.cancelled() => Err(JobError::Cancelled),
///     }
/// });
/// ```
#[derive(Debug, Clone)]
pub struct JobContext {
    worker: usize,
    cancel: CancellationToken,
}

impl JobContext {
    /// Create a context for the given worker slot
    pub fn new(worker: usize, cancel: CancellationToken) -> Self {
        Self { worker, cancel }
    }

    /// Create a context that is not attached to any pool
    pub fn detached() -> Self {
        Self::new(0, CancellationToken::new())
    }

    /// Index of the worker executing the job
    pub fn worker(&self) -> usize {
        self.worker
    }

    /// Check if the pool was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the pool is cancelled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// The underlying cancellation token
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

type JobFn = Box<dyn FnOnce(JobContext) -> BoxFuture<'static, JobResult> + Send>;

/// A unit of work submitted to the pool
///
/// A job is moved into the pool and executed exactly once by one worker.
pub struct Job {
    name: Option<String>,
    run: JobFn,
}

impl Job {
    /// Create a job from an async closure
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        Self {
            name: None,
            run: Box::new(move |ctx| f(ctx).boxed()),
        }
    }

    /// Set a name used in logs
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub(crate) fn with_name_opt(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    /// Name of the job, if one was set
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Execute the job
    pub fn run(self, ctx: JobContext) -> BoxFuture<'static, JobResult> {
        (self.run)(ctx)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("name", &self.name).finish()
    }
}

/// Extract a readable message from a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_job_runs_with_context() {
        let job = Job::new(|ctx| async move {
            assert_eq!(ctx.worker(), 3);
            Ok(())
        })
        .with_name("probe");

        assert_eq!(job.name(), Some("probe"));
        let result = job.run(JobContext::new(3, CancellationToken::new())).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_job_observes_cancellation() {
        let token = CancellationToken::new();
        let ctx = JobContext::new(0, token.clone());
        let job = Job::new(|ctx| async move {
            ctx.cancelled().await;
            Err(JobError::Cancelled)
        });

        token.cancel();
        assert!(ctx.is_cancelled());
        assert!(matches!(job.run(ctx).await, Err(JobError::Cancelled)));
    }

    #[test]
    fn test_job_error_conversions() {
        let err: JobError = anyhow::anyhow!("disk full").into();
        assert_eq!(err.to_string(), "disk full");
        assert!(!err.is_panic());

        let err = JobError::Panicked("boom".to_string());
        assert_eq!(err.to_string(), "job panicked: boom");
        assert!(err.is_panic());

        assert_eq!(JobError::msg("nope").to_string(), "nope");
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(payload.as_ref()), "static str");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");

        let payload: Box<dyn Any + Send> = Box::new(42_u32);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
