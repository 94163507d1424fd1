// External crates
use tokio::sync::broadcast;
use tracing::instrument;

/// Process-wide stop signal, built on-top of a broadcast channel.
///
/// - Clones share the same channel.
/// - Each waiter calls `.subscribe()` to get its own receiver.
/// - Calling `.trigger()` notifies every receiver.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    /// Creates a new shutdown broadcast channel.
    /// A small buffer size is sufficient since only one message is sent.
    #[instrument(name = "shutdown_channel", target = "helpers::shutdown", level = "trace")]
    pub fn new() -> Self {
        tracing::trace!("Creating new shutdown channel");
        let (tx, _rx) = broadcast::channel(16);
        Self { tx }
    }

    /// Returns a new receiver handle.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger shutdown, notifying all receivers.
    #[instrument(name = "shutdown_trigger", target = "helpers::shutdown", level = "trace", skip_all)]
    pub fn trigger(&self) {
        tracing::trace!("Shutdown triggered");
        let _ = self.tx.send(());
    }

    /// Spawn a task that triggers shutdown on CTRL+C or SIGTERM.
    pub fn listen_for_signals(&self) {
        let shutdown = self.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            tracing::info!("Stop signal received");
            shutdown.trigger();
        });
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            tracing::warn!(error = %e, "Could not install SIGTERM handler, only CTRL+C will stop the reporter");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = term.recv() => {},
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
