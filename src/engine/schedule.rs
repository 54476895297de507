//! Cooperative shutdown and cancellable sleeps.
//!
//! Every sleep in the agent goes through [`Shutdown::sleep`], so a shutdown
//! request is observed at the next sleep point instead of after the full
//! delay.

use std::time::Duration;

use tokio::sync::watch;

/// Receiving half of the shutdown signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Sending half. Triggering is idempotent.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

/// Create a linked trigger/listener pair.
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl Shutdown {
    /// A listener that is never triggered.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // Dropping the sender leaves the value at `false` forever.
        drop(tx);
        Self { rx }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `duration`. Returns `false` if shutdown was requested first.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_triggered() {
            return false;
        }
        let mut rx = self.rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_triggered(),
            _ = wait_triggered(&mut rx) => false,
        }
    }

    /// Resolve once shutdown is requested. Pending forever if it never is.
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        wait_triggered(&mut rx).await
    }
}

async fn wait_triggered(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone without triggering
            std::future::pending::<()>().await;
        }
    }
}
