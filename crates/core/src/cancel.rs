//! Cooperative cancellation
//!
//! A [`CancelSource`] is held by the caller driving a build; the engine
//! threads the matching [`CancelToken`] through every suspension point
//! (network fetch, extraction, file I/O, subprocess wait). Cancellation
//! terminates in-flight subprocesses; partially written files under the
//! build folder are left for the caller's temp-dir cleanup.

use tokio::sync::watch;

/// Caller-held handle that fires the cancellation signal
#[derive(Debug)]
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// A token observing this source
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Signal cancellation to every outstanding token
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer half of the cancellation signal
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token that never fires, for callers without a cancellation story
    pub fn none() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is signalled; pends forever on a
    /// never-cancelling token
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Source dropped without firing; nothing can cancel us now.
                futures::future::pending::<()>().await;
            }
        }
    }
}
