//! Shutdown signal watching
//!
//! While a pool is running, a watcher task listens for process interrupt
//! signals and cancels the pool's token when one arrives, the same way an
//! explicit `stop()` does. The signal source is injectable so several pools
//! in one process (or tests) do not depend on a process-global handler.

use std::fmt;
use std::io;

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A signal that requests shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT / Ctrl-C
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => write!(f, "SIGINT"),
            Self::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Source of shutdown signals
///
/// `listen` registers interest right away and returns a future resolving on
/// the first signal. Dropping the future deregisters.
pub trait SignalSource: Send + Sync + 'static {
    /// Register for signals
    fn listen(&self) -> io::Result<BoxFuture<'static, ShutdownSignal>>;
}

/// Process signals: SIGINT and SIGTERM on Unix, Ctrl-C elsewhere
///
/// Must be used from within a Tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSignals;

impl SignalSource for OsSignals {
    #[cfg(unix)]
    fn listen(&self) -> io::Result<BoxFuture<'static, ShutdownSignal>> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;

        Ok(async move {
            tokio::select! {
                _ = interrupt.recv() => ShutdownSignal::Interrupt,
                _ = terminate.recv() => ShutdownSignal::Terminate,
            }
        }
        .boxed())
    }

    #[cfg(not(unix))]
    fn listen(&self) -> io::Result<BoxFuture<'static, ShutdownSignal>> {
        Ok(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => ShutdownSignal::Interrupt,
                Err(e) => {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                    future::pending().await
                }
            }
        }
        .boxed())
    }
}

/// A source that never fires
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSignals;

impl SignalSource for NoSignals {
    fn listen(&self) -> io::Result<BoxFuture<'static, ShutdownSignal>> {
        Ok(future::pending().boxed())
    }
}

/// Background task bound to one running period of a pool
pub(crate) struct SignalWatcher {
    done: CancellationToken,
    handle: JoinHandle<()>,
}

impl SignalWatcher {
    /// Register with `source` and cancel `cancel` on the first signal
    pub fn spawn(source: &dyn SignalSource, cancel: CancellationToken) -> Self {
        let done = CancellationToken::new();

        let signal = match source.listen() {
            Ok(signal) => Some(signal),
            Err(e) => {
                warn!(error = %e, "Failed to register shutdown signals, continuing without");
                None
            }
        };

        let handle = tokio::spawn({
            let done = done.clone();
            async move {
                let Some(signal) = signal else {
                    done.cancelled().await;
                    return;
                };

                tokio::select! {
                    _ = done.cancelled() => {
                        debug!("Signal watcher deregistered");
                    }
                    signal = signal => {
                        info!(%signal, "Shutdown signal received, stopping workers");
                        cancel.cancel();
                    }
                }
            }
        });

        Self { done, handle }
    }

    /// Deregister and wait for the watcher task to finish
    pub async fn stop(self) {
        self.done.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Signal watcher task failed");
        }
    }

    /// Deregister and let the task finish on its own
    pub fn detach(self) {
        self.done.cancel();
    }
}
