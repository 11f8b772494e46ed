//! Counter of queued and in-flight jobs

use tokio::sync::watch;

/// Tracks jobs that were added but have not finished yet
///
/// Incremented by `Pool::add`, decremented once per job by the worker that
/// ran it. Waiters are woken when the count drops to zero.
#[derive(Debug)]
pub(crate) struct Pending {
    count: watch::Sender<usize>,
}

impl Pending {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self { count }
    }

    pub fn add(&self) {
        self.count.send_modify(|count| *count += 1);
    }

    pub fn done(&self) {
        self.count
            .send_modify(|count| *count = count.saturating_sub(1));
    }

    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    /// Resolves once no job is pending
    pub async fn idle(&self) {
        let mut rx = self.count.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    /// Guard that marks one job done when dropped
    pub fn guard(&self) -> PendingGuard<'_> {
        PendingGuard {
            pending: self,
            armed: true,
        }
    }
}

/// Calls [`Pending::done`] on drop unless disarmed
#[derive(Debug)]
pub(crate) struct PendingGuard<'a> {
    pending: &'a Pending,
    armed: bool,
}

impl PendingGuard<'_> {
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pending.done();
        }
    }
}
