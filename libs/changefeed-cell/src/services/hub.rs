use tokio::sync::{broadcast, watch};
use tracing::debug;

use crate::models::ChangeEvent;

pub type ChangeSender = broadcast::Sender<ChangeEvent>;
pub type ChangeReceiver = broadcast::Receiver<ChangeEvent>;

/// In-process firehose of row-level changes. The queue store publishes every
/// successful mutation here; the bridge's transport reads from it. Holding
/// the hub behind an `Arc` and constructing it once in `main` keeps the
/// change stream injectable instead of ambient.
pub struct ChangeHub {
    sender: ChangeSender,
    connected_tx: watch::Sender<bool>,
}

impl ChangeHub {
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer);
        let (connected_tx, _) = watch::channel(true);

        Self {
            sender,
            connected_tx,
        }
    }

    /// Publish one change to every open receiver. Returns the number of
    /// receivers that observed it; zero is not an error, it just means
    /// nobody is watching that stream right now.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        match self.sender.send(event) {
            Ok(count) => count,
            Err(_) => {
                debug!("change published with no active receivers");
                0
            }
        }
    }

    pub fn subscribe_raw(&self) -> ChangeReceiver {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn connected(&self) -> watch::Receiver<bool> {
        self.connected_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.connected_tx.borrow()
    }

    /// Operational hook: flips the transport up or down. Down drops nothing
    /// already buffered, but `open` calls fail until the hub comes back.
    pub fn set_connected(&self, connected: bool) {
        let _ = self.connected_tx.send(connected);
    }
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new(256)
    }
}
