//! Cooperative cancellation for in-flight dispatches.
//!
//! The server holds a [`CancelHandle`]; every request carries a cloned
//! [`Cancellation`]. Flipping the handle never interrupts handler code; it
//! only wakes handlers that are waiting on [`Cancellation::cancelled`] or that
//! poll [`Cancellation::is_cancelled`] between I/O steps.

use tokio::sync::watch;

/// Creates a connected handle / signal pair.
pub fn channel() -> (CancelHandle, Cancellation) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, Cancellation { rx: Some(rx) })
}

/// Sending side, owned by whoever decides that work should stop.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Signals cancellation to every [`Cancellation`] derived from this handle.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Returns a new signal observing this handle.
    pub fn signal(&self) -> Cancellation {
        Cancellation {
            rx: Some(self.tx.subscribe()),
        }
    }
}

/// Receiving side, handed to handlers through [`Request::cancellation`](crate::Request::cancellation).
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    // `None` never fires; used for requests built outside a running server.
    rx: Option<watch::Receiver<bool>>,
}

impl Cancellation {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once cancellation is signalled.
    ///
    /// If the handle is dropped without cancelling, this never resolves.
    pub async fn cancelled(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
