use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Coalesces bursts of calls into one execution after a quiet period.
///
/// Each [`Debouncer::call`] cancels the timer of the previous call that
/// has not fired yet. Once a timer fires, its action runs as a detached
/// task and is no longer affected by later calls.
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule `action` to run after the delay, superseding any pending one.
    ///
    /// Must be called from within a tokio runtime.
    pub fn call<F>(&self, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tokio::spawn(action);
        });

        let previous = match self.pending.lock() {
            Ok(mut pending) => pending.replace(timer),
            Err(poisoned) => poisoned.into_inner().replace(timer),
        };
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Drop the pending call, if any.
    pub fn cancel(&self) {
        let previous = match self.pending.lock() {
            Ok(mut pending) => pending.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
