//! Interceptors and interceptor chains
//!
//! An interceptor wraps the execution of every job. It receives the job as
//! its `next` step and decides whether and how to run it. Cross-cutting
//! behavior (logging, panic recovery, metrics) attaches this way without the
//! worker knowing about it.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::job::{Job, JobContext, JobResult};

/// Middleware around job execution
///
/// Implementations must be safe to call from several workers at once.
///
/// # Example
///
/// ```ignore
/// struct Timing;
///
/// #[async_trait]
/// impl Interceptor for Timing {
///     async fn intercept(&self, ctx: JobContext, next: Job) -> JobResult {
///         let started = Instant::now();
///         let outcome = next.run(ctx).await;
///         record(started.elapsed());
///         outcome
///     }
/// }
/// ```
#[async_trait]
pub trait Interceptor: Send + Sync + 'static {
    /// Run `next` (or not) and return the outcome
    async fn intercept(&self, ctx: JobContext, next: Job) -> JobResult;
}

/// Shared, type-erased interceptor
pub type SharedInterceptor = Arc<dyn Interceptor>;

/// Adapter turning an async closure into an [`Interceptor`]
pub struct FnInterceptor<F>(F);

/// Build an interceptor from an async closure
pub fn interceptor_fn<F, Fut>(f: F) -> FnInterceptor<F>
where
    F: Fn(JobContext, Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    FnInterceptor(f)
}

#[async_trait]
impl<F, Fut> Interceptor for FnInterceptor<F>
where
    F: Fn(JobContext, Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    async fn intercept(&self, ctx: JobContext, next: Job) -> JobResult {
        (self.0)(ctx, next).await
    }
}

/// Runs the job directly
struct PassThrough;

#[async_trait]
impl Interceptor for PassThrough {
    async fn intercept(&self, ctx: JobContext, next: Job) -> JobResult {
        next.run(ctx).await
    }
}

/// Two or more interceptors nested in list order
struct Chain {
    interceptors: Vec<SharedInterceptor>,
}

#[async_trait]
impl Interceptor for Chain {
    async fn intercept(&self, ctx: JobContext, job: Job) -> JobResult {
        let name = job.name().map(str::to_owned);

        // Wrap from the innermost interceptor outwards; the first one runs last here
        // and first at execution time.
        let mut next = job;
        for interceptor in self.interceptors[1..].iter().rev() {
            let interceptor = Arc::clone(interceptor);
            let inner = next;
            next = Job::new(move |ctx| async move { interceptor.intercept(ctx, inner).await })
                .with_name_opt(name.clone());
        }

        self.interceptors[0].intercept(ctx, next).await
    }
}

/// Compose interceptors into one
///
/// `chain(vec![a, b, c])` runs `a`, then `b`, then `c`, then the job, and
/// unwinds in reverse. An interceptor that returns without calling its `next`
/// step short-circuits the rest of the chain and its outcome is returned.
///
/// An empty list composes to a pass-through, a single interceptor is returned
/// as is.
pub fn chain(interceptors: Vec<SharedInterceptor>) -> SharedInterceptor {
    let mut interceptors = interceptors;
    match interceptors.len() {
        0 => Arc::new(PassThrough),
        1 => interceptors.swap_remove(0),
        _ => Arc::new(Chain { interceptors }),
    }
}
