use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use shared_config::RealtimeSettings;

use crate::error::ChangefeedError;
use crate::models::{ChangeEvent, ChangeFilter, ChangeOp, FeedStatus, QueueTable};
use crate::services::transport::ChangefeedTransport;

pub type ChangeCallback = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SubKey {
    table: QueueTable,
    filter: ChangeFilter,
}

struct Listener {
    ops: Vec<ChangeOp>,
    callback: ChangeCallback,
}

impl Listener {
    fn wants(&self, op: ChangeOp) -> bool {
        self.ops.is_empty() || self.ops.contains(&op)
    }
}

/// One logical transport subscription per (table, filter) pair, shared by
/// every listener registered against it.
struct SharedSub {
    listeners: Arc<RwLock<HashMap<u64, Listener>>>,
    task: JoinHandle<()>,
}

/// Translates raw store changes into typed `ChangeEvent`s for in-process
/// listeners. Read-only over the store; its only side effect is invoking
/// registered callbacks.
pub struct ChangefeedBridge {
    transport: Arc<dyn ChangefeedTransport>,
    settings: RealtimeSettings,
    subs: Mutex<HashMap<SubKey, SharedSub>>,
    next_listener_id: AtomicU64,
    status_tx: watch::Sender<FeedStatus>,
    closed: AtomicBool,
}

impl ChangefeedBridge {
    pub fn new(transport: Arc<dyn ChangefeedTransport>, settings: RealtimeSettings) -> Arc<Self> {
        let (status_tx, _) = watch::channel(FeedStatus::Connected);

        Arc::new(Self {
            transport,
            settings,
            subs: Mutex::new(HashMap::new()),
            next_listener_id: AtomicU64::new(1),
            status_tx,
            closed: AtomicBool::new(false),
        })
    }

    /// Dependents watch this instead of receiving transport errors through
    /// normal control flow.
    pub fn status(&self) -> watch::Receiver<FeedStatus> {
        self.status_tx.subscribe()
    }

    /// Registers interest in row changes on `table` scoped by `filter`.
    /// An empty `ops` list means every operation. The filter must hit an
    /// indexed column so the subscription volume stays bounded.
    pub fn subscribe(
        self: &Arc<Self>,
        table: QueueTable,
        filter: ChangeFilter,
        ops: Vec<ChangeOp>,
        on_change: ChangeCallback,
    ) -> Result<SubscriptionHandle, ChangefeedError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChangefeedError::Closed);
        }
        if !filter.is_indexed() {
            return Err(ChangefeedError::UnindexedFilter(filter.column.clone()));
        }

        let key = SubKey { table, filter };
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        let listener = Listener {
            ops,
            callback: on_change,
        };

        let mut subs = self.subs.lock().expect("subs lock poisoned");
        match subs.get(&key) {
            Some(shared) => {
                shared
                    .listeners
                    .write()
                    .expect("listeners lock poisoned")
                    .insert(id, listener);
                debug!("added listener {} to existing subscription {:?}", id, key);
            }
            None => {
                let listeners = Arc::new(RwLock::new(HashMap::from([(id, listener)])));
                let task = tokio::spawn(pump(
                    Arc::clone(&self.transport),
                    key.clone(),
                    Arc::clone(&listeners),
                    self.settings.clone(),
                    self.status_tx.clone(),
                ));
                subs.insert(key.clone(), SharedSub { listeners, task });
                debug!("opened new subscription {:?} for listener {}", key, id);
            }
        }

        Ok(SubscriptionHandle {
            inner: Arc::new(HandleInner {
                bridge: Arc::downgrade(self),
                key,
                id,
                disposed: AtomicBool::new(false),
            }),
        })
    }

    fn remove_listener(&self, key: &SubKey, id: u64) {
        let mut subs = self.subs.lock().expect("subs lock poisoned");
        let Some(shared) = subs.get(key) else {
            return;
        };

        let remaining = {
            let mut listeners = shared.listeners.write().expect("listeners lock poisoned");
            listeners.remove(&id);
            listeners.len()
        };

        // Release the transport subscription only once nobody shares it.
        if remaining == 0 {
            if let Some(shared) = subs.remove(key) {
                shared.task.abort();
                debug!("released subscription {:?}", key);
            }
        }
    }

    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut subs = self.subs.lock().expect("subs lock poisoned");
        for (key, shared) in subs.drain() {
            shared.task.abort();
            debug!("aborted subscription {:?} on shutdown", key);
        }
        let _ = self.status_tx.send(FeedStatus::Disconnected);
        info!("changefeed bridge shut down");
    }
}

/// Disposable registration. `unsubscribe` is idempotent and also runs on
/// drop, so forgetting a handle never leaks a transport subscription.
pub struct SubscriptionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    bridge: Weak<ChangefeedBridge>,
    key: SubKey,
    id: u64,
    disposed: AtomicBool,
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("key", &self.inner.key)
            .field("id", &self.inner.id)
            .finish()
    }
}

impl SubscriptionHandle {
    pub fn unsubscribe(&self) {
        self.inner.dispose();
    }
}

impl HandleInner {
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(bridge) = self.bridge.upgrade() {
            bridge.remove_listener(&self.key, self.id);
        }
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn filter_row<'a>(event: &'a ChangeEvent) -> &'a serde_json::Value {
    match event.op {
        ChangeOp::Delete => event.old_row.as_ref().unwrap_or(&serde_json::Value::Null),
        _ => &event.new_row,
    }
}

/// Per-(table, filter) pump: reads the raw stream, filters, and invokes
/// listeners. Owns the resubscribe loop; exhausting the retry budget
/// surfaces `Disconnected` instead of retrying forever.
#[instrument(skip_all, fields(table = ?key.table, filter = %key.filter.column))]
async fn pump(
    transport: Arc<dyn ChangefeedTransport>,
    key: SubKey,
    listeners: Arc<RwLock<HashMap<u64, Listener>>>,
    settings: RealtimeSettings,
    status_tx: watch::Sender<FeedStatus>,
) {
    let mut attempt: u32 = 0;

    loop {
        let mut rx = match transport.open().await {
            Ok(rx) => rx,
            Err(e) => {
                attempt += 1;
                if attempt > settings.max_reconnect_attempts {
                    warn!("changefeed subscription gave up after {} attempts", attempt - 1);
                    let _ = status_tx.send(FeedStatus::Disconnected);
                    return;
                }
                let _ = status_tx.send(FeedStatus::Reconnecting);
                let delay = backoff_delay(&settings, attempt);
                debug!("resubscribe attempt {} in {:?}: {}", attempt, delay, e);
                tokio::time::sleep(delay).await;
                continue;
            }
        };

        attempt = 0;
        let _ = status_tx.send(FeedStatus::Connected);

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.table != key.table || !key.filter.matches(filter_row(&event)) {
                        continue;
                    }
                    let listeners = listeners.read().expect("listeners lock poisoned");
                    for listener in listeners.values() {
                        if listener.wants(event.op) {
                            (listener.callback)(event.clone());
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Dependents reconcile by refetching; a lag is loud but
                    // not fatal.
                    warn!("changefeed receiver lagged, {} changes skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    warn!("changefeed transport closed, resubscribing");
                    break;
                }
            }
        }
    }
}

fn backoff_delay(settings: &RealtimeSettings, attempt: u32) -> std::time::Duration {
    let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    std::cmp::min(
        settings.reconnect_base_delay.saturating_mul(factor),
        settings.reconnect_max_delay,
    )
}
