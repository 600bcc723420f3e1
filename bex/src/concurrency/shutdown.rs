//! Shutdown signaling for worker coordination.
//!
//! Abstracts a tokio watch channel into a shutdown handle carrying the drain
//! budget: how long in-flight batches may run before they are cooperatively
//! cancelled. Every receiver observes the same signal; the transmitter side
//! lives with the process signal handler.

use std::time::Duration;

use tokio::sync::watch;

/// Transmitter side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<Option<Duration>>);

/// Receiver side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<Option<Duration>>);

/// Creates a new shutdown channel pair.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(None);
    (ShutdownTx(tx), ShutdownRx(rx))
}

impl ShutdownTx {
    /// Signals shutdown with the given drain budget for in-flight batches.
    ///
    /// Returns an error when every receiver is already gone, which means the
    /// worker has terminated on its own.
    pub fn shutdown(&self, drain: Duration) -> Result<(), watch::error::SendError<Option<Duration>>> {
        self.0.send(Some(drain))
    }

    /// Creates a new receiver observing this channel.
    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

impl ShutdownRx {
    /// Returns true if shutdown has been signaled.
    pub fn is_shutdown(&self) -> bool {
        self.0.borrow().is_some()
    }

    /// Waits until shutdown is signaled and returns the drain budget.
    ///
    /// If the transmitter is dropped without signaling, this resolves with a
    /// zero drain budget so callers still terminate.
    pub async fn wait_for_shutdown(&mut self) -> Duration {
        loop {
            if let Some(drain) = *self.0.borrow_and_update() {
                return drain;
            }

            if self.0.changed().await.is_err() {
                return Duration::ZERO;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_carries_drain_budget() {
        let (tx, mut rx) = create_shutdown_channel();

        assert!(!rx.is_shutdown());
        tx.shutdown(Duration::from_secs(30)).unwrap();

        assert!(rx.is_shutdown());
        assert_eq!(rx.wait_for_shutdown().await, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_dropped_transmitter_resolves_waiters() {
        let (tx, mut rx) = create_shutdown_channel();
        drop(tx);

        assert_eq!(rx.wait_for_shutdown().await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_all_subscribers_observe_the_signal() {
        let (tx, rx) = create_shutdown_channel();
        let mut second = tx.subscribe();

        tx.shutdown(Duration::from_secs(5)).unwrap();

        assert!(rx.is_shutdown());
        assert_eq!(second.wait_for_shutdown().await, Duration::from_secs(5));
    }
}
