use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use changefeed_cell::ChangeHub;
use queue_sync_cell::*;
use shared_config::RealtimeSettings;
use shared_models::auth::User;

/// Test harness around the in-memory store: a seeded chamber with its
/// doctor, the room registry, and a broker wired through the change hub.
pub struct QueueTestUtils {
    pub hub: Arc<ChangeHub>,
    pub store: Arc<MemoryQueueStore>,
    pub rooms: Arc<RoomRegistry>,
    pub broker: Arc<QueueBroker>,
    pub doctor_id: Uuid,
    pub chamber_id: Uuid,
}

impl QueueTestUtils {
    pub async fn new() -> Self {
        let hub = Arc::new(ChangeHub::default());
        let store = Arc::new(MemoryQueueStore::new(Arc::clone(&hub)));
        let rooms = Arc::new(RoomRegistry::new(100));
        let broker = Arc::new(QueueBroker::new(
            Arc::clone(&store) as Arc<dyn QueueStore>,
            Arc::clone(&rooms),
            Self::fast_settings(),
        ));

        let doctor_id = Uuid::new_v4();
        let chamber_id = Uuid::new_v4();

        store
            .seed_chamber(ChamberState {
                chamber_id,
                doctor_id,
                current_serial: 1,
                total_in_queue: 0,
                estimated_wait_minutes: None,
                delay_minutes: 0,
                doctor_message: None,
                average_consult_minutes: 10,
                last_updated: Utc::now(),
            })
            .await;

        Self {
            hub,
            store,
            rooms,
            broker,
            doctor_id,
            chamber_id,
        }
    }

    /// Millisecond-scale backoff so reconnect paths run fast under test.
    pub fn fast_settings() -> RealtimeSettings {
        RealtimeSettings {
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_millis(10),
            reconnect_max_delay: Duration::from_millis(20),
            room_buffer_size: 100,
            notification_log_cap: 50,
            default_consult_minutes: 10,
        }
    }

    /// Seeds `count` waiting entries with serials 1..=count and returns
    /// them in serial order.
    pub async fn seed_queue(&self, count: u32) -> Vec<QueueEntry> {
        let mut entries = Vec::with_capacity(count as usize);
        for serial in 1..=count {
            let entry = QueueEntry {
                appointment_id: Uuid::new_v4(),
                patient_id: Uuid::new_v4(),
                doctor_id: self.doctor_id,
                chamber_id: self.chamber_id,
                serial_number: serial,
                status: QueueEntryStatus::Waiting,
                delay_minutes: 0,
                last_updated: Utc::now(),
            };
            self.store.seed_entry(entry.clone()).await;
            entries.push(entry);
        }
        entries
    }

    pub fn doctor_user(&self) -> User {
        user_with_role(self.doctor_id, "doctor")
    }

    pub fn patient_user(&self, patient_id: Uuid) -> User {
        user_with_role(patient_id, "patient")
    }

    /// A doctor who owns nothing in this harness.
    pub fn other_doctor_user(&self) -> User {
        user_with_role(Uuid::new_v4(), "doctor")
    }
}

pub fn user_with_role(id: Uuid, role: &str) -> User {
    User {
        id: id.to_string(),
        email: Some(format!("{}@clinic.example", role)),
        role: Some(role.to_string()),
        metadata: None,
        created_at: Some(Utc::now()),
    }
}

mod domain_test;
mod notify_test;
mod rooms_test;
mod store_test;
