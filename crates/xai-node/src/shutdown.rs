use tokio::sync::watch;

/// Cooperative cancellation: long-running tasks hold a [`ShutdownSignal`]
/// and bail out at their next suspension point once it fires. One handle,
/// any number of listeners.
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

pub fn shutdown_pair() -> (ShutdownHandle, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, ShutdownSignal { rx })
}

impl ShutdownHandle {
    /// Fire the signal. Every listener's `wait()` resolves.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

impl ShutdownSignal {
    /// Resolves once shutdown is triggered (immediately if it already was).
    pub async fn wait(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return; // handle dropped: treat as shutdown
            }
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }
}
