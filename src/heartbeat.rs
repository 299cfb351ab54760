//! Heartbeat engine.
//!
//! A tiny timer task beating into a single-slot channel. Ticks coalesce: if
//! the previous tick has not been consumed yet, the new one is dropped and
//! the pending tick stands in for it. Liveness (zombie detection) is the
//! runner's job, not this module's.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::trace;

/// Consumer side of a running heartbeat.
///
/// Dropping the handle closes the tick channel, which stops the engine task
/// on its next beat.
#[derive(Debug)]
pub(crate) struct HeartbeatHandle {
    tick_tx: mpsc::Sender<()>,
    tick_rx: mpsc::Receiver<()>,
}

impl HeartbeatHandle {
    /// Install a heartbeat beating every `interval`.
    ///
    /// One tick is queued immediately so the first beacon goes out without
    /// waiting a full interval.
    pub(crate) fn start(interval: Duration) -> Self {
        let (tick_tx, tick_rx) = mpsc::channel(1);
        let _ = tick_tx.try_send(());

        let engine_tx = tick_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match engine_tx.try_send(()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(())) => trace!("tick coalesced"),
                    Err(TrySendError::Closed(())) => break,
                }
            }
            trace!("heartbeat engine stopped");
        });

        Self { tick_tx, tick_rx }
    }

    /// Wait for the next tick.
    pub(crate) async fn tick(&mut self) {
        // The handle holds a sender, so the channel can never report closed
        // here; a None recv is simply ignored.
        let _ = self.tick_rx.recv().await;
    }

    /// Queue one out-of-band tick (server-requested heartbeat).
    pub(crate) fn request(&self) {
        let _ = self.tick_tx.try_send(());
    }
}
