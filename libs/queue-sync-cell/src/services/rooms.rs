use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::models::{QueueEvent, RoomEnvelope, RoomId};

pub type RoomSender = broadcast::Sender<RoomEnvelope>;
pub type RoomReceiver = broadcast::Receiver<RoomEnvelope>;

struct RoomChannel {
    sender: RoomSender,
    // Guards sequence assignment and send together so seq order always
    // matches emission order within the room.
    seq: Mutex<u64>,
}

/// Room membership and fan-out. One broadcast channel per room gives
/// per-room delivery order for free; there is deliberately no ordering or
/// locking across rooms.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<RoomId, RoomChannel>>,
    buffer: usize,
}

impl RoomRegistry {
    pub fn new(buffer: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            buffer,
        }
    }

    /// Joining an unknown room creates it. The returned receiver is the
    /// membership: dropping it leaves the room.
    pub async fn join(&self, room: RoomId) -> RoomReceiver {
        {
            let rooms = self.rooms.read().await;
            if let Some(channel) = rooms.get(&room) {
                return channel.sender.subscribe();
            }
        }

        let mut rooms = self.rooms.write().await;
        let channel = rooms.entry(room).or_insert_with(|| {
            debug!("created room {}", room);
            let (sender, _) = broadcast::channel(self.buffer);
            RoomChannel {
                sender,
                seq: Mutex::new(0),
            }
        });
        channel.sender.subscribe()
    }

    /// Fan one event out to every current member. Returns how many
    /// receivers observed it; an empty or unknown room delivers to nobody,
    /// which is not an error.
    pub async fn broadcast(&self, room: RoomId, event: QueueEvent) -> usize {
        let rooms = self.rooms.read().await;
        let Some(channel) = rooms.get(&room) else {
            debug!("broadcast to empty room {} dropped", room);
            return 0;
        };

        let mut seq = channel.seq.lock().expect("room seq lock poisoned");
        *seq += 1;
        let envelope = RoomEnvelope {
            room,
            seq: *seq,
            event,
        };

        match channel.sender.send(envelope) {
            Ok(count) => count,
            Err(_) => 0,
        }
    }

    pub async fn member_count(&self, room: RoomId) -> usize {
        let rooms = self.rooms.read().await;
        rooms
            .get(&room)
            .map(|channel| channel.sender.receiver_count())
            .unwrap_or(0)
    }

    pub async fn active_rooms(&self) -> Vec<RoomId> {
        let rooms = self.rooms.read().await;
        rooms.keys().copied().collect()
    }

    /// Drops rooms nobody is joined to. Sequence numbers reset with the
    /// room; clients reconcile on rejoin anyway.
    pub async fn prune(&self) -> usize {
        let mut rooms = self.rooms.write().await;
        let before = rooms.len();
        rooms.retain(|_, channel| channel.sender.receiver_count() > 0);
        let removed = before - rooms.len();
        if removed > 0 {
            debug!("pruned {} empty rooms", removed);
        }
        removed
    }
}
