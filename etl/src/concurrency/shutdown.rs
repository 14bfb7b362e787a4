//! Graceful shutdown broadcast.
//!
//! The orchestrator owns the [`ShutdownTx`] and every table pipeline holds a [`ShutdownRx`].
//! A pipeline that observes the signal stops reading and finishes the batch it is working on
//! before exiting.

use std::time::Duration;

use tokio::sync::watch;

use crate::concurrency::signal::{SignalRx, SignalTx, create_signal};

#[derive(Debug, Clone)]
pub struct ShutdownTx(SignalTx);

impl ShutdownTx {
    pub fn wrap(tx: SignalTx) -> Self {
        Self(tx)
    }

    pub fn shutdown(&self) -> Result<(), watch::error::SendError<()>> {
        self.0.send(())
    }

    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

pub type ShutdownRx = SignalRx;

/// Outcome of a wait that may be cut short by shutdown.
#[derive(Debug, PartialEq, Eq)]
pub enum ShutdownResult<T, I> {
    Ok(T),
    Shutdown(I),
}

impl<T, I> ShutdownResult<T, I> {
    pub fn should_shutdown(&self) -> bool {
        matches!(self, ShutdownResult::Shutdown(_))
    }
}

pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = create_signal();
    (ShutdownTx::wrap(tx), rx)
}

/// Returns `true` if shutdown was signaled and not yet observed through [`ShutdownRx::changed`].
///
/// A dropped transmitter counts as a shutdown request.
pub fn shutdown_pending(rx: &ShutdownRx) -> bool {
    rx.has_changed().unwrap_or(true)
}

/// Sleeps for `duration` unless shutdown is signaled first.
pub async fn sleep_or_shutdown(duration: Duration, rx: &mut ShutdownRx) -> ShutdownResult<(), ()> {
    tokio::select! {
        biased;

        _ = rx.changed() => ShutdownResult::Shutdown(()),
        _ = tokio::time::sleep(duration) => ShutdownResult::Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleep_is_interrupted_by_shutdown() {
        let (tx, mut rx) = create_shutdown_channel();
        tx.shutdown().unwrap();

        assert!(shutdown_pending(&rx));
        let result = sleep_or_shutdown(Duration::from_secs(3600), &mut rx).await;
        assert!(result.should_shutdown());
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_completes_without_shutdown() {
        let (_tx, mut rx) = create_shutdown_channel();

        let result = sleep_or_shutdown(Duration::from_millis(50), &mut rx).await;
        assert_eq!(result, ShutdownResult::Ok(()));
        assert!(!shutdown_pending(&rx));
    }
}
