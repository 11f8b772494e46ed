//! Reopenable delivery channel for job outcomes

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::job::JobResult;
use crate::pending::Pending;

/// Outcome channel shared by the workers of one pool
///
/// The sink is either open (outcomes are delivered) or closed (the current
/// batch has been fully reported and its receivers see the end of the
/// stream). Reopening swaps in a fresh channel, so a new batch never sees
/// outcomes of the previous one.
pub(crate) struct ErrorSink {
    capacity: Option<usize>,
    state: Mutex<SinkState>,
}

struct SinkState {
    tx: Option<flume::Sender<JobResult>>,
    rx: flume::Receiver<JobResult>,
    batch: u64,
}

impl ErrorSink {
    /// Create an open sink; `None` means unbounded
    pub fn new(capacity: Option<usize>) -> Self {
        let (tx, rx) = channel(capacity);
        Self {
            capacity,
            state: Mutex::new(SinkState {
                tx: Some(tx),
                rx,
                batch: 0,
            }),
        }
    }

    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        self.state.lock().tx.is_some()
    }

    /// Reopen the sink if it is closed
    #[cfg(test)]
    pub fn reopen(&self) {
        let mut state = self.state.lock();
        self.reopen_locked(&mut state);
    }

    /// Account for a new job: reopen if needed, then count it as pending
    ///
    /// Both happen under the sink lock so [`ErrorSink::close_if_idle`] cannot
    /// close the channel between the two.
    pub fn admit(&self, pending: &Pending) {
        let mut state = self.state.lock();
        self.reopen_locked(&mut state);
        pending.add();
    }

    /// Close the sink; no-op if already closed
    #[cfg(test)]
    pub fn close(&self) -> bool {
        let mut state = self.state.lock();
        Self::close_locked(&mut state)
    }

    /// Close the sink only if nothing is pending
    pub fn close_if_idle(&self, pending: &Pending) -> bool {
        let mut state = self.state.lock();
        if pending.count() != 0 {
            return false;
        }
        Self::close_locked(&mut state);
        true
    }

    /// Deliver an outcome for the current batch
    pub async fn send(&self, outcome: JobResult) {
        let tx = self.state.lock().tx.clone();
        match tx {
            Some(tx) => {
                if tx.send_async(outcome).await.is_err() {
                    warn!("Outcome receiver gone, dropping job outcome");
                }
            }
            None => warn!("Outcome sink closed, dropping job outcome"),
        }
    }

    /// Receiving side of the current batch
    pub fn outcomes(&self) -> Outcomes {
        Outcomes::new(self.state.lock().rx.clone())
    }

    fn reopen_locked(&self, state: &mut SinkState) {
        if state.tx.is_some() {
            return;
        }
        let (tx, rx) = channel(self.capacity);
        state.tx = Some(tx);
        state.rx = rx;
        state.batch += 1;
        debug!(batch = state.batch, "Outcome sink reopened");
    }

    fn close_locked(state: &mut SinkState) -> bool {
        if state.tx.take().is_some() {
            debug!(batch = state.batch, "Outcome sink closed");
            true
        } else {
            false
        }
    }
}

impl fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ErrorSink")
            .field("capacity", &self.capacity)
            .field("open", &state.tx.is_some())
            .field("batch", &state.batch)
            .finish()
    }
}

fn channel(capacity: Option<usize>) -> (flume::Sender<JobResult>, flume::Receiver<JobResult>) {
    match capacity {
        Some(capacity) => flume::bounded(capacity),
        None => flume::unbounded(),
    }
}

/// Stream of job outcomes for one batch
///
/// Yields one [`JobResult`] per job in completion order and ends once every
/// job of the batch has been reported.
///
/// ```ignore
/// if let Some(mut outcomes) = pool.wait().await {
///     while let Some(outcome) = outcomes.recv().await {
///         if let Err(e) = outcome {
///             tracing::warn!(error = %e, "Job failed");
///         }
///     }
/// }
/// ```
pub struct Outcomes {
    inner: BoxStream<'static, JobResult>,
}

impl Outcomes {
    fn new(rx: flume::Receiver<JobResult>) -> Self {
        Self {
            inner: rx.into_stream().boxed(),
        }
    }

    /// Receive the next outcome, `None` once the batch is complete
    pub async fn recv(&mut self) -> Option<JobResult> {
        self.inner.next().await
    }
}

impl Stream for Outcomes {
    type Item = JobResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl fmt::Debug for Outcomes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outcomes").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobError;

    #[tokio::test]
    async fn test_close_ends_stream() {
        let sink = ErrorSink::new(None);
        let mut outcomes = sink.outcomes();

        sink.send(Ok(())).await;
        sink.send(Err(JobError::msg("bad"))).await;
        assert!(sink.close());

        assert!(outcomes.recv().await.unwrap().is_ok());
        assert!(outcomes.recv().await.unwrap().is_err());
        assert!(outcomes.recv().await.is_none());
    }

    #[test]
    fn test_close_and_reopen_are_idempotent() {
        let sink = ErrorSink::new(None);
        assert!(sink.is_open());

        sink.reopen();
        assert!(sink.is_open());

        assert!(sink.close());
        assert!(!sink.close());
        assert!(!sink.is_open());

        sink.reopen();
        sink.reopen();
        assert!(sink.is_open());
    }

    #[tokio::test]
    async fn test_reopen_starts_fresh_batch() {
        let sink = ErrorSink::new(None);
        sink.send(Err(JobError::msg("first batch"))).await;
        sink.close();

        sink.reopen();
        let mut outcomes = sink.outcomes();
        sink.send(Ok(())).await;
        sink.close();

        assert!(outcomes.recv().await.unwrap().is_ok());
        assert!(outcomes.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_send_to_closed_sink_is_dropped() {
        let sink = ErrorSink::new(Some(1));
        sink.close();

        sink.send(Ok(())).await;

        let mut outcomes = sink.outcomes();
        assert!(outcomes.recv().await.is_none());
    }

    #[test]
    fn test_close_if_idle_respects_pending() {
        let sink = ErrorSink::new(None);
        let pending = Pending::new();

        sink.admit(&pending);
        assert!(!sink.close_if_idle(&pending));
        assert!(sink.is_open());

        pending.done();
        assert!(sink.close_if_idle(&pending));
        assert!(!sink.is_open());

        sink.admit(&pending);
        assert!(sink.is_open());
        assert_eq!(pending.count(), 1);
    }
}
