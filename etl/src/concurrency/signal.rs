//! Payload-free notification channels built on tokio's watch channels.

use tokio::sync::watch;

/// Transmitter side of a coordination signal channel.
pub type SignalTx = watch::Sender<()>;

/// Receiver side of a coordination signal channel.
///
/// Every receiver observes the same signal, which makes it suitable for broadcasting a
/// single event to many workers.
pub type SignalRx = watch::Receiver<()>;

/// Creates a new coordination signal channel.
///
/// Receivers start with the initial value marked as seen, so only a later send wakes them.
pub fn create_signal() -> (SignalTx, SignalRx) {
    let (tx, rx) = watch::channel(());
    (tx, rx)
}
