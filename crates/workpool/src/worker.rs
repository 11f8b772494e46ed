//! Worker tasks
//!
//! Each worker is a Tokio task that pulls jobs from the pool's queue until it
//! is told to stop, the pool is cancelled, or the queue goes away.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::PanicPolicy;
use crate::interceptor::SharedInterceptor;
use crate::job::{panic_message, Job, JobContext, JobError};
use crate::pending::Pending;
use crate::sink::ErrorSink;

/// State shared between a pool and its workers
pub(crate) struct Shared {
    pub jobs: flume::Receiver<Job>,
    pub pending: Pending,
    pub sink: Option<ErrorSink>,
    pub interceptor: Option<SharedInterceptor>,
    pub on_panic: PanicPolicy,
    /// Cancelled when the owning pool is dropped
    pub dropped: CancellationToken,
}

impl Shared {
    /// Run one job and report its outcome
    ///
    /// `pending` is decremented after the outcome was handed to the sink, so
    /// the sink cannot be closed while the outcome is still in flight.
    async fn execute(&self, worker: usize, job: Job, cancel: &CancellationToken) {
        let _pending = self.pending.guard();
        let name = job.name().map(str::to_owned);
        let ctx = JobContext::new(worker, cancel.clone());

        let run = async {
            match &self.interceptor {
                Some(interceptor) => interceptor.intercept(ctx, job).await,
                None => job.run(ctx).await,
            }
        };

        let outcome = match self.on_panic {
            PanicPolicy::TerminateWorker => run.await,
            PanicPolicy::Recover => match AssertUnwindSafe(run).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(worker, job = ?name, panic = %message, "Job panicked, worker recovered");
                    Err(JobError::Panicked(message))
                }
            },
        };

        if let Err(e) = &outcome {
            debug!(worker, job = ?name, error = %e, "Job failed");
        }

        if let Some(sink) = &self.sink {
            sink.send(outcome).await;
        }
    }

    /// Close the outcome sink once every pending job has reported
    ///
    /// Retries when a new job slips in between observing zero and closing.
    pub async fn close_sink_when_idle(&self) {
        let Some(sink) = &self.sink else {
            return;
        };

        loop {
            tokio::select! {
                _ = self.dropped.cancelled() => return,
                _ = self.pending.idle() => {}
            }
            if sink.close_if_idle(&self.pending) {
                return;
            }
        }
    }
}

/// One worker slot of a pool
pub(crate) struct Worker {
    index: usize,
    alive: Arc<AtomicBool>,
    stop: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            alive: Arc::new(AtomicBool::new(false)),
            stop: None,
            handle: None,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Flag shared with the worker task, cleared when the task ends
    pub fn alive_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.alive)
    }

    /// Spawn the worker task; returns false if the slot is still occupied
    pub fn launch(&mut self, shared: &Arc<Shared>, cancel: &CancellationToken) -> bool {
        if self.is_alive() {
            debug!(worker = self.index, "Worker still alive, not relaunching");
            return false;
        }

        let stop = CancellationToken::new();
        self.alive.store(true, Ordering::Release);
        self.handle = Some(tokio::spawn(run(
            self.index,
            Arc::clone(shared),
            AliveGuard {
                index: self.index,
                alive: Arc::clone(&self.alive),
            },
            stop.clone(),
            cancel.clone(),
        )));
        self.stop = Some(stop);
        true
    }

    /// Ask the worker to exit after its current job
    pub fn signal_stop(&self) {
        if let Some(stop) = &self.stop {
            stop.cancel();
        }
    }

    /// Wait for the worker task to end
    pub async fn join(&mut self) {
        self.stop = None;
        let Some(handle) = self.handle.take() else {
            return;
        };

        match handle.await {
            Ok(()) => {}
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic().as_ref());
                debug!(worker = self.index, panic = %message, "Joined worker that died from a panic");
            }
            Err(e) => warn!(worker = self.index, error = %e, "Worker task failed"),
        }
    }

    /// Ask the worker to exit and let the task finish on its own
    pub fn detach(&mut self) {
        self.signal_stop();
        self.handle = None;
    }
}

/// Clears the alive flag when the worker task ends, including on unwind
struct AliveGuard {
    index: usize,
    alive: Arc<AtomicBool>,
}

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
        if std::thread::panicking() {
            error!(
                worker = self.index,
                "Worker terminated by a panicking job, slot stays empty until restart"
            );
        }
    }
}

async fn run(
    index: usize,
    shared: Arc<Shared>,
    _alive: AliveGuard,
    stop: CancellationToken,
    cancel: CancellationToken,
) {
    debug!(worker = index, "Worker started");

    loop {
        let job = tokio::select! {
            biased;

            _ = stop.cancelled() => {
                debug!(worker = index, "Worker: stop requested");
                break;
            }
            _ = cancel.cancelled() => {
                debug!(worker = index, "Worker: pool cancelled");
                break;
            }
            job = shared.jobs.recv_async() => match job {
                Ok(job) => job,
                Err(_) => {
                    debug!(worker = index, "Worker: job queue closed");
                    break;
                }
            },
        };

        shared.execute(index, job, &cancel).await;
    }

    debug!(worker = index, "Worker exited");
}
