use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::ChangefeedError;
use crate::services::hub::{ChangeHub, ChangeReceiver};

/// Seam between the bridge and whatever actually carries row changes.
/// The bridge only ever sees a raw receiver plus a connectivity signal;
/// filtering and listener fan-out stay on the bridge side.
#[async_trait]
pub trait ChangefeedTransport: Send + Sync {
    /// Open a raw change stream. Fails while the transport is down; the
    /// bridge retries with backoff rather than bubbling the error up.
    async fn open(&self) -> Result<ChangeReceiver, ChangefeedError>;

    fn connected(&self) -> watch::Receiver<bool>;
}

/// Production transport: reads the in-process change hub that the queue
/// store publishes into after every successful mutation.
pub struct HubTransport {
    hub: Arc<ChangeHub>,
}

impl HubTransport {
    pub fn new(hub: Arc<ChangeHub>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl ChangefeedTransport for HubTransport {
    async fn open(&self) -> Result<ChangeReceiver, ChangefeedError> {
        if !self.hub.is_connected() {
            return Err(ChangefeedError::TransportError(
                "change hub is offline".to_string(),
            ));
        }
        Ok(self.hub.subscribe_raw())
    }

    fn connected(&self) -> watch::Receiver<bool> {
        self.hub.connected()
    }
}
