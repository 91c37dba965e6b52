//! Shutdown broadcast shared by a limiter and everything waiting on it.

use tokio::sync::watch;

/// Owning side of the shutdown broadcast.
#[derive(Debug)]
pub(crate) struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Flip the broadcast to closed.
    ///
    /// Returns `true` only for the call that actually closed it.
    pub(crate) fn trigger(&self) -> bool {
        self.tx.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    pub(crate) fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving side, one per waiter.
#[derive(Debug)]
pub(crate) struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolve once shutdown has been triggered.
    pub(crate) async fn wait(&mut self) {
        // A dropped trigger means the owner is gone, which is shutdown too.
        let _ = self.rx.wait_for(|closed| *closed).await;
    }
}
