//! Join-group tracking outstanding fetches

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Shared {
    outstanding: AtomicUsize,
    done: Notify,
}

/// Counter of in-flight work with a wait-for-zero operation
///
/// `add` hands out a guard; the count drops when the guard is dropped, so a
/// fetch that errors or panics still releases its slot.
#[derive(Debug, Clone, Default)]
pub struct WaitGroup {
    shared: Arc<Shared>,
}

/// Slot in a `WaitGroup`, released on drop
#[derive(Debug)]
pub struct WaitGuard {
    shared: Arc<Shared>,
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one unit of outstanding work
    pub fn add(&self) -> WaitGuard {
        self.shared.outstanding.fetch_add(1, Ordering::SeqCst);
        WaitGuard {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Returns the number of outstanding units
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::SeqCst)
    }

    /// Waits until the outstanding count reaches zero
    ///
    /// Returns immediately when nothing is outstanding.
    pub async fn wait(&self) {
        loop {
            let notified = self.shared.done.notified();
            tokio::pin!(notified);
            // Register before checking so a release between the check and
            // the await is not lost
            notified.as_mut().enable();

            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        if self.shared.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.shared.done.notify_waiters();
        }
    }
}
