//! Cooperative shutdown.
//!
//! A [`ShutdownHandle`] is triggered once (e.g. on Ctrl-C); every
//! [`ShutdownSignal`] cloned from it observes the trigger, including ones
//! created afterwards. In-flight runs race provisioning and their workload
//! against the signal and still clear impairment and tear down before
//! returning.

use tokio::sync::watch;

/// Triggers shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: watch::Sender<bool>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    /// Create an untriggered handle.
    pub fn new() -> Self {
        Self {
            sender: watch::channel(false).0,
        }
    }

    /// Request shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.sender.send_replace(true);
    }

    /// A signal observing this handle.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.sender.subscribe(),
        }
    }
}

/// Observes a [`ShutdownHandle`].
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        ShutdownHandle::new().signal()
    }

    /// True once shutdown was requested.
    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve once shutdown is requested.
    ///
    /// Pends forever if the handle is dropped without triggering.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|triggered| *triggered).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
