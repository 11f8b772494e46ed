//! Worker pool
//!
//! Runs a fixed number of workers over a bounded job queue, with optional
//! outcome reporting, interceptors and signal-driven shutdown. A pool can be
//! started and stopped any number of times; jobs left in the queue at `stop`
//! are picked up after the next `start`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::config::PoolConfig;
use crate::interceptor::{chain, Interceptor, SharedInterceptor};
use crate::job::Job;
use crate::pending::Pending;
use crate::signal::{OsSignals, SignalSource, SignalWatcher};
use crate::sink::{ErrorSink, Outcomes};
use crate::worker::{Shared, Worker};

/// Errors returned by [`Pool::add`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("pool is not running")]
    NotRunning,

    #[error("pool was cancelled")]
    Cancelled,
}

/// Lifecycle state of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    /// Not started, or stopped
    Stopped,
    /// Workers are running
    Running,
    /// Cancelled by the caller's token or a signal; `stop()` completes the
    /// shutdown
    Cancelled,
}

/// Bounded, restartable worker pool
///
/// ```ignore
/// let pool = Pool::new(PoolConfig::new().with_errors(ErrorReporting::Unbounded));
/// pool.start(&CancellationToken::new()).await;
///
/// for i in 0..10 {
///     pool.add(Job::new(move |_| async move { process(i).await })).await?;
/// }
///
/// if let Some(mut outcomes) = pool.wait().await {
///     while let Some(outcome) = outcomes.recv().await {
///         // one outcome per job
///     }
/// }
///
/// pool.stop().await;
/// ```
pub struct Pool {
    config: PoolConfig,
    shared: Arc<Shared>,
    jobs: flume::Sender<Job>,
    signals: Option<Arc<dyn SignalSource>>,
    /// Pool token while running, `None` when stopped
    running: RwLock<Option<CancellationToken>>,
    alive: Vec<Arc<AtomicBool>>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
}

struct Lifecycle {
    workers: Vec<Worker>,
    watcher: Option<SignalWatcher>,
}

impl Pool {
    /// Create a pool without interceptors, watching process signals if
    /// enabled in `config`
    pub fn new(config: PoolConfig) -> Self {
        Self::builder(config).build()
    }

    /// Start building a pool
    pub fn builder(config: PoolConfig) -> PoolBuilder {
        PoolBuilder::new(config)
    }

    /// Launch the workers
    ///
    /// The pool is cancelled when `ctx` is. No-op while running. Workers that
    /// are still alive from an earlier run are not launched twice.
    #[instrument(skip_all, fields(pool_size = self.config.pool_size))]
    pub async fn start(&self, ctx: &CancellationToken) -> &Self {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.running.read().is_some() {
            debug!("Pool already running");
            return self;
        }

        let cancel = ctx.child_token();

        if let Some(source) = &self.signals {
            lifecycle.watcher = Some(SignalWatcher::spawn(source.as_ref(), cancel.clone()));
        }

        let mut launched = 0;
        for worker in lifecycle.workers.iter_mut() {
            if worker.launch(&self.shared, &cancel) {
                launched += 1;
            }
        }

        *self.running.write() = Some(cancel);

        info!(
            launched,
            queue_capacity = self.config.queue_capacity,
            errors = %self.config.errors,
            "Worker pool started"
        );
        self
    }

    /// Stop the workers and wait for them to finish their current job
    ///
    /// No-op when not running.
    #[instrument(skip_all, fields(pool_size = self.config.pool_size))]
    pub async fn stop(&self) -> &Self {
        let mut lifecycle = self.lifecycle.lock().await;
        let cancel = self.running.read().clone();
        let Some(cancel) = cancel else {
            debug!("Pool not running");
            return self;
        };

        info!(pending = self.shared.pending.count(), "Initiating graceful shutdown");

        if let Some(watcher) = lifecycle.watcher.take() {
            watcher.stop().await;
        }

        for worker in &lifecycle.workers {
            worker.signal_stop();
        }
        cancel.cancel();

        for worker in lifecycle.workers.iter_mut() {
            worker.join().await;
        }

        *self.running.write() = None;

        info!("Worker pool stopped");
        self
    }

    /// Submit a job
    ///
    /// Waits while the queue is full. Fails with [`PoolError::NotRunning`]
    /// unless the pool is running, and with [`PoolError::Cancelled`] if the
    /// pool is cancelled before the job was queued; the job is dropped then.
    pub async fn add(&self, job: Job) -> Result<(), PoolError> {
        let cancel = self.running.read().clone().ok_or(PoolError::NotRunning)?;
        if cancel.is_cancelled() {
            return Err(PoolError::Cancelled);
        }

        match &self.shared.sink {
            Some(sink) => sink.admit(&self.shared.pending),
            None => self.shared.pending.add(),
        }
        // restores the count if the job never makes it into the queue
        let admitted = self.shared.pending.guard();

        // a send that already completed wins over cancellation: the job is
        // in the queue then and must stay counted
        tokio::select! {
            biased;

            sent = self.jobs.send_async(job) => match sent {
                Ok(()) => {
                    admitted.disarm();
                    Ok(())
                }
                // workers share the receiver through `shared`, so this only
                // happens while the pool is being torn down
                Err(_) => Err(PoolError::Cancelled),
            },
            _ = cancel.cancelled() => {
                debug!("Pool cancelled while queueing job, job dropped");
                Err(PoolError::Cancelled)
            }
        }
    }

    /// Wait for the jobs added so far
    ///
    /// Without outcome reporting, resolves once nothing is pending and
    /// returns `None`. With outcome reporting, returns the outcomes of the
    /// current batch right away; the stream ends once every job of the batch
    /// has reported. The next `add` starts a new batch.
    pub async fn wait(&self) -> Option<Outcomes> {
        match &self.shared.sink {
            None => {
                self.shared.pending.idle().await;
                None
            }
            Some(sink) => {
                let outcomes = sink.outcomes();
                let shared = Arc::clone(&self.shared);
                tokio::spawn(async move { shared.close_sink_when_idle().await });
                Some(outcomes)
            }
        }
    }

    /// Alias for [`Pool::wait`]
    pub async fn errors(&self) -> Option<Outcomes> {
        self.wait().await
    }

    pub fn status(&self) -> PoolStatus {
        match self.running.read().as_ref() {
            None => PoolStatus::Stopped,
            Some(cancel) if cancel.is_cancelled() => PoolStatus::Cancelled,
            Some(_) => PoolStatus::Running,
        }
    }

    /// Whether the pool was started and not stopped since
    pub fn is_running(&self) -> bool {
        self.running.read().is_some()
    }

    /// Number of worker tasks currently alive
    pub fn alive_workers(&self) -> usize {
        self.alive
            .iter()
            .filter(|alive| alive.load(Ordering::Acquire))
            .count()
    }

    /// Jobs queued or running
    pub fn pending(&self) -> usize {
        self.shared.pending.count()
    }

    /// Resolves once the running pool is cancelled, e.g. by a shutdown signal
    ///
    /// Resolves immediately when the pool is not running.
    pub async fn cancelled(&self) {
        let cancel = self.running.read().clone();
        if let Some(cancel) = cancel {
            cancel.cancelled().await;
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if let Some(cancel) = self.running.get_mut().take() {
            debug!("Pool dropped while running, cancelling workers");
            cancel.cancel();
        }

        let lifecycle = self.lifecycle.get_mut();
        if let Some(watcher) = lifecycle.watcher.take() {
            watcher.detach();
        }
        for worker in lifecycle.workers.iter_mut() {
            worker.detach();
        }

        self.shared.dropped.cancel();
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.config)
            .field("status", &self.status())
            .field("pending", &self.pending())
            .field("alive_workers", &self.alive_workers())
            .finish()
    }
}

/// Builder for [`Pool`]
pub struct PoolBuilder {
    config: PoolConfig,
    interceptors: Vec<SharedInterceptor>,
    signals: Option<Arc<dyn SignalSource>>,
}

impl PoolBuilder {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            interceptors: Vec::new(),
            signals: None,
        }
    }

    /// Append an interceptor; several are chained in the order added
    pub fn interceptor<I: Interceptor>(self, interceptor: I) -> Self {
        self.shared_interceptor(Arc::new(interceptor))
    }

    /// Append an already shared interceptor
    pub fn shared_interceptor(mut self, interceptor: SharedInterceptor) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Append several interceptors
    pub fn interceptors(mut self, interceptors: impl IntoIterator<Item = SharedInterceptor>) -> Self {
        self.interceptors.extend(interceptors);
        self
    }

    /// Replace the process signal source
    ///
    /// Only used when signal watching is enabled in the config.
    pub fn signal_source<S: SignalSource>(mut self, source: S) -> Self {
        self.signals = Some(Arc::new(source));
        self
    }

    pub fn build(self) -> Pool {
        let config = self.config;
        let (jobs, queue) = flume::bounded(config.queue_capacity);

        let interceptor = if self.interceptors.is_empty() {
            None
        } else {
            Some(chain(self.interceptors))
        };

        let signals = if config.watch_signals {
            Some(
                self.signals
                    .unwrap_or_else(|| Arc::new(OsSignals) as Arc<dyn SignalSource>),
            )
        } else {
            None
        };

        let shared = Arc::new(Shared {
            jobs: queue,
            pending: Pending::new(),
            sink: config
                .errors
                .is_enabled()
                .then(|| ErrorSink::new(config.errors.capacity())),
            interceptor,
            on_panic: config.on_panic,
            dropped: CancellationToken::new(),
        });

        let workers: Vec<Worker> = (0..config.pool_size).map(Worker::new).collect();
        let alive = workers.iter().map(Worker::alive_flag).collect();

        debug!(
            pool_size = config.pool_size,
            queue_capacity = config.queue_capacity,
            "Worker pool created"
        );

        Pool {
            config,
            shared,
            jobs,
            signals,
            running: RwLock::new(None),
            alive,
            lifecycle: tokio::sync::Mutex::new(Lifecycle {
                workers,
                watcher: None,
            }),
        }
    }
}
