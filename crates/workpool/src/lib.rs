//! # Workpool
//!
//! A bounded, restartable worker pool for async jobs.
//!
//! ## Features
//!
//! - **Fixed worker count**: `pool_size` Tokio tasks consume one bounded queue
//! - **Backpressure**: `add` waits while the queue is full
//! - **Interceptors**: composable middleware around every job execution
//! - **Per-batch outcomes**: one result per job, drained with `wait`, reopened
//!   by the next `add`
//! - **Graceful shutdown**: `stop()` or SIGINT/SIGTERM cancel the workers,
//!   in-flight jobs finish first
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  add   ┌───────────────┐  recv  ┌──────────────────────────┐
//! │  caller  │───────▶│   job queue   │───────▶│ worker × pool_size       │
//! └──────────┘        │ (bounded MPMC)│        │ interceptor chain → job  │
//!      ▲              └───────────────┘        └──────────────────────────┘
//!      │ wait                                               │
//!      │              ┌───────────────┐       outcome       │
//!      └──────────────│  error sink   │◀────────────────────┘
//!                     └───────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use workpool::prelude::*;
//!
//! let pool = Pool::builder(PoolConfig::new().with_errors(ErrorReporting::Unbounded))
//!     .interceptor(RecoveryInterceptor::new())
//!     .interceptor(LoggingInterceptor::new())
//!     .build();
//!
//! pool.start(&CancellationToken::new()).await;
//! pool.add(Job::new(|_| async { Ok(()) })).await?;
//!
//! if let Some(mut outcomes) = pool.wait().await {
//!     while let Some(outcome) = outcomes.recv().await {
//!         println!("{outcome:?}");
//!     }
//! }
//! pool.stop().await;
//! ```

pub mod config;
pub mod interceptor;
pub mod job;
pub mod middleware;
pub mod pool;
pub mod signal;
pub mod sink;

mod pending;
mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{ErrorReporting, PanicPolicy, PoolConfig};
    pub use crate::interceptor::{chain, interceptor_fn, Interceptor, SharedInterceptor};
    pub use crate::job::{Job, JobContext, JobError, JobResult};
    pub use crate::middleware::{LoggingInterceptor, RecoveryInterceptor};
    pub use crate::pool::{Pool, PoolBuilder, PoolError, PoolStatus};
    pub use crate::sink::Outcomes;
    pub use tokio_util::sync::CancellationToken;
}

// Re-export key types at crate root
pub use config::{ConfigError, ErrorReporting, PanicPolicy, PoolConfig};
pub use interceptor::{chain, interceptor_fn, FnInterceptor, Interceptor, SharedInterceptor};
pub use job::{Job, JobContext, JobError, JobResult};
pub use pool::{Pool, PoolBuilder, PoolError, PoolStatus};
pub use signal::{NoSignals, OsSignals, ShutdownSignal, SignalSource};
pub use sink::Outcomes;
