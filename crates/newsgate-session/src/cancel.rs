//! Cooperative cancellation for revalidator tasks.
//!
//! A [`CancelHandle`] is held by whoever owns the live connection; the
//! task holds a [`CancelSignal`]. Cancelling is a one-way latch: once set
//! it stays set. Dropping the handle without calling
//! [`cancel`](CancelHandle::cancel) counts as cancellation too, so a task
//! can never outlive every reference to its owner.

use tokio::sync::watch;

/// Creates a linked handle/signal pair.
pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

/// The owning side. Not `Clone`: exactly one owner decides.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Another signal observing this handle.
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// The observing side, held by the task.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// Completes once cancellation is requested or the handle is dropped.
    ///
    /// Cancel-safe; meant for a `tokio::select!` branch.
    pub async fn cancelled(&mut self) {
        // Err means the handle is gone, which is cancellation as well.
        let _ = self.rx.wait_for(|cancelled| *cancelled).await;
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }
}
