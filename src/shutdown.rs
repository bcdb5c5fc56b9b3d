//! Cooperative stop signal shared by the acquisition and persistence tasks.
//!
//! Built on a `tokio::sync::watch` channel: the [`StopHandle`] flips the
//! value once, every [`StopSignal`] clone observes it. Tasks check the
//! signal between samples and race it against blocking reads.

use std::sync::Arc;
use tokio::sync::watch;

/// Sending side; calling [`StopHandle::stop`] more than once is harmless.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// Receiving side, cheap to clone.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
    // Keeps the channel open for signals that nobody can fire.
    _keep_alive: Option<Arc<watch::Sender<bool>>>,
}

/// Create a connected handle/signal pair.
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (
        StopHandle { tx: Arc::new(tx) },
        StopSignal {
            rx,
            _keep_alive: None,
        },
    )
}

impl StopHandle {
    /// Ask every task observing the paired signals to stop.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    /// Another signal observing this handle.
    pub fn signal(&self) -> StopSignal {
        StopSignal {
            rx: self.tx.subscribe(),
            _keep_alive: None,
        }
    }
}

impl StopSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _keep_alive: Some(Arc::new(tx)),
        }
    }

    /// Whether stop has been requested.
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once stop has been requested.
    ///
    /// If every handle is dropped without stopping, this never resolves.
    pub async fn stopped(&mut self) {
        if self.rx.wait_for(|stopped| *stopped).await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}
