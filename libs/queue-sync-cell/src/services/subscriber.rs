use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use changefeed_cell::{
    ChangeFilter, ChangefeedBridge, ChangefeedError, QueueTable, SubscriptionHandle,
};
use shared_config::RealtimeSettings;
use shared_models::auth::User;

use crate::error::QueueSyncError;
use crate::models::{ConnectionStatus, QueueEvent, QueueSnapshot, RoomEnvelope, RoomId};
use crate::services::broker::QueueBroker;
use crate::services::notify::{notification_for, NotificationCenter, PlatformNotifier};
use crate::services::rooms::RoomReceiver;

/// What this client tracks; also the recipe for re-joining after a drop,
/// since room memberships do not survive the transport.
#[derive(Debug, Clone)]
pub enum JoinSpec {
    Doctor {
        doctor_id: Uuid,
        chamber_ids: Vec<Uuid>,
    },
    Patient {
        patient_id: Uuid,
        appointment_ids: Vec<Uuid>,
        chamber_ids: Vec<Uuid>,
    },
}

impl JoinSpec {
    fn chamber_ids(&self) -> &[Uuid] {
        match self {
            JoinSpec::Doctor { chamber_ids, .. } => chamber_ids,
            JoinSpec::Patient { chamber_ids, .. } => chamber_ids,
        }
    }
}

enum Inbound {
    Envelope(RoomEnvelope),
    StoreChanged(Uuid),
    Lagged,
    ConnectionLost,
}

/// One client's live view of the queue, fed by both transports: room
/// events pushed by the broker, and changefeed notifications that trigger
/// a re-fetch of the authoritative snapshot. Events are consumed serially.
/// On a drop it reconnects with bounded backoff and reconciles rather than
/// expecting replay.
pub struct QueueSubscriber {
    broker: Arc<QueueBroker>,
    user: User,
    join: JoinSpec,
    settings: RealtimeSettings,
    status_tx: watch::Sender<ConnectionStatus>,
    notifications: Arc<NotificationCenter>,
    snapshots: RwLock<HashMap<Uuid, QueueSnapshot>>,
    last_seq: Mutex<HashMap<RoomId, u64>>,
    inbound_tx: mpsc::Sender<Inbound>,
    forwarders: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    // Held for the subscriber's lifetime; dropping them unsubscribes.
    _feed_subs: Vec<SubscriptionHandle>,
}

impl QueueSubscriber {
    pub async fn connect(
        broker: Arc<QueueBroker>,
        user: User,
        join: JoinSpec,
        bridge: Option<&Arc<ChangefeedBridge>>,
        platform: Option<Arc<dyn PlatformNotifier>>,
    ) -> Result<Arc<Self>, QueueSyncError> {
        let settings = broker.settings().clone();
        let (status_tx, _) = watch::channel(ConnectionStatus::Connecting);
        let (inbound_tx, inbound_rx) = mpsc::channel(256);

        let feed_subs = match bridge {
            Some(bridge) => watch_tracked_chambers(bridge, join.chamber_ids(), &inbound_tx)
                .map_err(|e| QueueSyncError::TransportError(e.to_string()))?,
            None => Vec::new(),
        };

        let subscriber = Arc::new(Self {
            notifications: Arc::new(NotificationCenter::new(
                settings.notification_log_cap,
                platform,
            )),
            broker,
            user,
            join,
            settings,
            status_tx,
            snapshots: RwLock::new(HashMap::new()),
            last_seq: Mutex::new(HashMap::new()),
            inbound_tx,
            forwarders: tokio::sync::Mutex::new(Vec::new()),
            _feed_subs: feed_subs,
        });

        let rooms = subscriber.join_rooms().await?;
        subscriber.spawn_forwarders(rooms).await;
        subscriber.reconcile().await?;
        let _ = subscriber.status_tx.send(ConnectionStatus::Connected);

        let consumer = Arc::clone(&subscriber);
        tokio::spawn(async move {
            consumer.consume(inbound_rx).await;
        });

        Ok(subscriber)
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    pub fn notification_center(&self) -> Arc<NotificationCenter> {
        Arc::clone(&self.notifications)
    }

    pub fn notifications(&self) -> Vec<crate::models::QueueNotification> {
        self.notifications.recent()
    }

    pub async fn snapshot(&self, chamber_id: Uuid) -> Option<QueueSnapshot> {
        let snapshots = self.snapshots.read().await;
        snapshots.get(&chamber_id).cloned()
    }

    /// Test/ops hook: simulates a transport failure. The consumer task
    /// picks it up and runs the reconnect path.
    pub async fn force_disconnect(&self) {
        let mut forwarders = self.forwarders.lock().await;
        for handle in forwarders.drain(..) {
            handle.abort();
        }
        let _ = self.inbound_tx.send(Inbound::ConnectionLost).await;
    }

    async fn join_rooms(&self) -> Result<Vec<(RoomId, RoomReceiver)>, QueueSyncError> {
        match &self.join {
            JoinSpec::Doctor {
                doctor_id,
                chamber_ids,
            } => {
                self.broker
                    .join_doctor(&self.user, *doctor_id, chamber_ids)
                    .await
            }
            JoinSpec::Patient {
                patient_id,
                appointment_ids,
                chamber_ids,
            } => {
                self.broker
                    .join_patient(&self.user, *patient_id, appointment_ids, chamber_ids)
                    .await
            }
        }
    }

    async fn spawn_forwarders(self: &Arc<Self>, rooms: Vec<(RoomId, RoomReceiver)>) {
        let mut forwarders = self.forwarders.lock().await;
        for (room, receiver) in rooms {
            let tx = self.inbound_tx.clone();
            forwarders.push(tokio::spawn(forward_room(room, receiver, tx)));
        }
    }

    async fn consume(self: Arc<Self>, mut inbound_rx: mpsc::Receiver<Inbound>) {
        while let Some(inbound) = inbound_rx.recv().await {
            match inbound {
                Inbound::Envelope(envelope) => {
                    if self.detect_gap(&envelope) {
                        warn!("sequence gap in {}, reconciling", envelope.room);
                        if self.reconcile().await.is_err() {
                            warn!("reconcile after gap failed; waiting for next event");
                        }
                    }
                    self.apply_event(envelope.event).await;
                }
                Inbound::StoreChanged(chamber_id) => {
                    if let Err(e) = self.reconcile_chamber(chamber_id).await {
                        debug!("refetch for chamber {} failed: {}", chamber_id, e);
                    }
                }
                Inbound::Lagged => {
                    // There is no replay log to recover from; re-fetch.
                    if self.reconcile().await.is_err() {
                        warn!("reconcile after lag failed; waiting for next event");
                    }
                }
                Inbound::ConnectionLost => {
                    if !self.reconnect().await {
                        // Budget exhausted; terminal for this subscriber.
                        return;
                    }
                }
            }
        }
    }

    fn detect_gap(&self, envelope: &RoomEnvelope) -> bool {
        let mut last_seq = self.last_seq.lock().expect("seq lock poisoned");
        let last = last_seq.insert(envelope.room, envelope.seq).unwrap_or(0);
        last != 0 && envelope.seq != last + 1
    }

    async fn apply_event(&self, event: QueueEvent) {
        if let QueueEvent::Status {
            chamber_id,
            current_serial,
            estimated_wait_minutes,
            delay_minutes,
            ref doctor_message,
            total_in_queue,
            last_updated,
            ..
        } = event
        {
            let mut snapshots = self.snapshots.write().await;
            if let Some(snapshot) = snapshots.get_mut(&chamber_id) {
                snapshot.chamber.current_serial = current_serial;
                snapshot.chamber.estimated_wait_minutes = estimated_wait_minutes;
                snapshot.chamber.delay_minutes = delay_minutes;
                snapshot.chamber.doctor_message = doctor_message.clone();
                snapshot.chamber.total_in_queue = total_in_queue;
                snapshot.chamber.last_updated = last_updated;
            }
        }

        if let Some(notification) = notification_for(&event) {
            self.notifications.push(notification).await;
        }
    }

    async fn reconcile_chamber(&self, chamber_id: Uuid) -> Result<(), QueueSyncError> {
        let snapshot = self.broker.store().snapshot(chamber_id).await?;
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(chamber_id, snapshot);
        Ok(())
    }

    /// Authoritative re-fetch for every tracked chamber. This, not event
    /// replay, is how a client converges after missing anything.
    pub async fn reconcile(&self) -> Result<(), QueueSyncError> {
        let store = self.broker.store();
        let mut fetched = HashMap::new();
        for chamber_id in self.join.chamber_ids() {
            fetched.insert(*chamber_id, store.snapshot(*chamber_id).await?);
        }

        let mut snapshots = self.snapshots.write().await;
        *snapshots = fetched;
        debug!("reconciled {} chamber snapshots", snapshots.len());
        Ok(())
    }

    /// Bounded reconnect: increasing delay up to the cap, at most
    /// `max_reconnect_attempts` tries, then a persistent disconnected
    /// status for the UI. Memberships are re-established from the join
    /// spec; state converges via reconciliation.
    async fn reconnect(self: &Arc<Self>) -> bool {
        for attempt in 1..=self.settings.max_reconnect_attempts {
            let _ = self.status_tx.send(ConnectionStatus::Reconnecting { attempt });
            let delay = std::cmp::min(
                self.settings.reconnect_base_delay * attempt,
                self.settings.reconnect_max_delay,
            );
            tokio::time::sleep(delay).await;

            match self.join_rooms().await {
                Ok(rooms) => {
                    self.last_seq.lock().expect("seq lock poisoned").clear();
                    self.spawn_forwarders(rooms).await;
                    if let Err(e) = self.reconcile().await {
                        warn!("reconcile on reconnect failed: {}", e);
                    }
                    let _ = self.status_tx.send(ConnectionStatus::Connected);
                    info!("reconnected after {} attempt(s)", attempt);
                    return true;
                }
                Err(e) => {
                    debug!("reconnect attempt {} failed: {}", attempt, e);
                }
            }
        }

        warn!(
            "reconnect budget ({}) exhausted, going dark",
            self.settings.max_reconnect_attempts
        );
        let _ = self.status_tx.send(ConnectionStatus::Disconnected);
        false
    }
}

/// Second transport: row-change subscriptions on the tracked chambers.
/// Any persisted mutation triggers a snapshot re-fetch, which is how a
/// quietly-connected patient converges without being in the doctor room.
fn watch_tracked_chambers(
    bridge: &Arc<ChangefeedBridge>,
    chamber_ids: &[Uuid],
    inbound_tx: &mpsc::Sender<Inbound>,
) -> Result<Vec<SubscriptionHandle>, ChangefeedError> {
    let mut handles = Vec::with_capacity(chamber_ids.len() * 2);
    for chamber_id in chamber_ids {
        for table in [QueueTable::ChamberState, QueueTable::QueueEntries] {
            let tx = inbound_tx.clone();
            let chamber_id = *chamber_id;
            handles.push(bridge.subscribe(
                table,
                ChangeFilter::new("chamber_id", chamber_id.to_string()),
                vec![],
                Arc::new(move |_change| {
                    let _ = tx.try_send(Inbound::StoreChanged(chamber_id));
                }),
            )?);
        }
    }
    Ok(handles)
}

async fn forward_room(room: RoomId, mut receiver: RoomReceiver, tx: mpsc::Sender<Inbound>) {
    loop {
        match receiver.recv().await {
            Ok(envelope) => {
                if tx.send(Inbound::Envelope(envelope)).await.is_err() {
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("{} receiver lagged by {}", room, skipped);
                if tx.send(Inbound::Lagged).await.is_err() {
                    return;
                }
            }
            Err(broadcast::error::RecvError::Closed) => {
                let _ = tx.send(Inbound::ConnectionLost).await;
                return;
            }
        }
    }
}
