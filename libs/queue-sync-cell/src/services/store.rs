use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use changefeed_cell::{ChangeEvent, ChangeHub, QueueTable};
use shared_database::SupabaseClient;

use crate::error::QueueSyncError;
use crate::models::{ChamberState, QueueEntry, QueueEntryStatus, QueueSnapshot};
use crate::services::domain::StatusDerivation;

/// The primary store is authoritative; the broker is a cache+router over
/// it. Every successful mutation is published into the change hub so the
/// changefeed bridge observes exactly what was persisted.
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn chamber_state(&self, chamber_id: Uuid) -> Result<ChamberState, QueueSyncError>;

    async fn active_entries(&self, chamber_id: Uuid) -> Result<Vec<QueueEntry>, QueueSyncError>;

    async fn entry(&self, appointment_id: Uuid) -> Result<QueueEntry, QueueSyncError>;

    async fn chambers_owned_by(&self, doctor_id: Uuid) -> Result<Vec<Uuid>, QueueSyncError>;

    async fn apply_queue_update(
        &self,
        chamber_id: Uuid,
        current_serial: u32,
        estimated_wait_minutes: Option<u32>,
        derivation: &StatusDerivation,
    ) -> Result<ChamberState, QueueSyncError>;

    async fn apply_delay(
        &self,
        chamber_id: Uuid,
        delay_minutes: u32,
        message: Option<&str>,
    ) -> Result<ChamberState, QueueSyncError>;

    async fn mark_current(&self, appointment_id: Uuid) -> Result<QueueEntry, QueueSyncError>;

    async fn mark_completed(&self, appointment_id: Uuid) -> Result<QueueEntry, QueueSyncError>;

    async fn snapshot(&self, chamber_id: Uuid) -> Result<QueueSnapshot, QueueSyncError>;
}

fn store_err(e: anyhow::Error) -> QueueSyncError {
    QueueSyncError::StoreError(e.to_string())
}

fn active_count(entries: &[QueueEntry]) -> u32 {
    entries
        .iter()
        .filter(|e| e.status != QueueEntryStatus::Completed)
        .count() as u32
}

/// Production store over the Supabase REST surface.
pub struct SupabaseQueueStore {
    client: Arc<SupabaseClient>,
    hub: Arc<ChangeHub>,
}

impl SupabaseQueueStore {
    pub fn new(client: Arc<SupabaseClient>, hub: Arc<ChangeHub>) -> Self {
        Self { client, hub }
    }

    fn publish_update<T: serde::Serialize>(&self, table: QueueTable, new: &T, old: &T) {
        let (Ok(new_row), Ok(old_row)) = (serde_json::to_value(new), serde_json::to_value(old))
        else {
            return;
        };
        self.hub.publish(ChangeEvent::update(table, new_row, old_row));
    }
}

#[async_trait]
impl QueueStore for SupabaseQueueStore {
    async fn chamber_state(&self, chamber_id: Uuid) -> Result<ChamberState, QueueSyncError> {
        let rows: Vec<ChamberState> = self
            .client
            .select_eq("chamber_state", "chamber_id", &chamber_id.to_string(), None)
            .await
            .map_err(store_err)?;

        rows.into_iter()
            .next()
            .ok_or_else(|| QueueSyncError::NotFound(format!("chamber {}", chamber_id)))
    }

    async fn active_entries(&self, chamber_id: Uuid) -> Result<Vec<QueueEntry>, QueueSyncError> {
        let mut entries: Vec<QueueEntry> = self
            .client
            .select_eq("queue_entries", "chamber_id", &chamber_id.to_string(), None)
            .await
            .map_err(store_err)?;

        entries.sort_by_key(|e| e.serial_number);
        Ok(entries)
    }

    async fn entry(&self, appointment_id: Uuid) -> Result<QueueEntry, QueueSyncError> {
        let rows: Vec<QueueEntry> = self
            .client
            .select_eq(
                "queue_entries",
                "appointment_id",
                &appointment_id.to_string(),
                None,
            )
            .await
            .map_err(store_err)?;

        rows.into_iter()
            .next()
            .ok_or_else(|| QueueSyncError::NotFound(format!("appointment {}", appointment_id)))
    }

    async fn chambers_owned_by(&self, doctor_id: Uuid) -> Result<Vec<Uuid>, QueueSyncError> {
        let rows: Vec<ChamberState> = self
            .client
            .select_eq("chamber_state", "doctor_id", &doctor_id.to_string(), None)
            .await
            .map_err(store_err)?;

        Ok(rows.into_iter().map(|c| c.chamber_id).collect())
    }

    async fn apply_queue_update(
        &self,
        chamber_id: Uuid,
        current_serial: u32,
        estimated_wait_minutes: Option<u32>,
        derivation: &StatusDerivation,
    ) -> Result<ChamberState, QueueSyncError> {
        let old_chamber = self.chamber_state(chamber_id).await?;

        for entry in &derivation.entries {
            if !derivation.changed.contains(&entry.appointment_id) {
                continue;
            }
            let updated: Vec<QueueEntry> = self
                .client
                .update_eq(
                    "queue_entries",
                    "appointment_id",
                    &entry.appointment_id.to_string(),
                    json!({
                        "status": entry.status,
                        "last_updated": entry.last_updated,
                    }),
                    None,
                )
                .await
                .map_err(store_err)?;
            if let Some(new_row) = updated.into_iter().next() {
                self.publish_update(QueueTable::QueueEntries, &new_row, entry);
            }
        }

        let patch = json!({
            "current_serial": current_serial,
            "estimated_wait_minutes": estimated_wait_minutes,
            "total_in_queue": active_count(&derivation.entries),
            "last_updated": Utc::now(),
        });
        let rows: Vec<ChamberState> = self
            .client
            .update_eq("chamber_state", "chamber_id", &chamber_id.to_string(), patch, None)
            .await
            .map_err(store_err)?;

        let new_chamber = rows
            .into_iter()
            .next()
            .ok_or_else(|| QueueSyncError::NotFound(format!("chamber {}", chamber_id)))?;

        self.publish_update(QueueTable::ChamberState, &new_chamber, &old_chamber);
        Ok(new_chamber)
    }

    async fn apply_delay(
        &self,
        chamber_id: Uuid,
        delay_minutes: u32,
        message: Option<&str>,
    ) -> Result<ChamberState, QueueSyncError> {
        let old_chamber = self.chamber_state(chamber_id).await?;

        let _: Vec<QueueEntry> = self
            .client
            .update_eq(
                "queue_entries",
                "chamber_id",
                &chamber_id.to_string(),
                json!({ "delay_minutes": delay_minutes, "last_updated": Utc::now() }),
                None,
            )
            .await
            .map_err(store_err)?;

        let mut patch = json!({
            "delay_minutes": delay_minutes,
            "last_updated": Utc::now(),
        });
        if let Some(message) = message {
            patch["doctor_message"] = json!(message);
        }

        let rows: Vec<ChamberState> = self
            .client
            .update_eq("chamber_state", "chamber_id", &chamber_id.to_string(), patch, None)
            .await
            .map_err(store_err)?;

        let new_chamber = rows
            .into_iter()
            .next()
            .ok_or_else(|| QueueSyncError::NotFound(format!("chamber {}", chamber_id)))?;

        self.publish_update(QueueTable::ChamberState, &new_chamber, &old_chamber);
        Ok(new_chamber)
    }

    async fn mark_current(&self, appointment_id: Uuid) -> Result<QueueEntry, QueueSyncError> {
        let old = self.entry(appointment_id).await?;

        let rows: Vec<QueueEntry> = self
            .client
            .update_eq(
                "queue_entries",
                "appointment_id",
                &appointment_id.to_string(),
                json!({ "status": QueueEntryStatus::Current, "last_updated": Utc::now() }),
                None,
            )
            .await
            .map_err(store_err)?;

        let new = rows
            .into_iter()
            .next()
            .ok_or_else(|| QueueSyncError::NotFound(format!("appointment {}", appointment_id)))?;

        self.publish_update(QueueTable::QueueEntries, &new, &old);
        Ok(new)
    }

    async fn mark_completed(&self, appointment_id: Uuid) -> Result<QueueEntry, QueueSyncError> {
        let old = self.entry(appointment_id).await?;

        let rows: Vec<QueueEntry> = self
            .client
            .update_eq(
                "queue_entries",
                "appointment_id",
                &appointment_id.to_string(),
                json!({ "status": QueueEntryStatus::Completed, "last_updated": Utc::now() }),
                None,
            )
            .await
            .map_err(store_err)?;

        let new = rows
            .into_iter()
            .next()
            .ok_or_else(|| QueueSyncError::NotFound(format!("appointment {}", appointment_id)))?;

        self.publish_update(QueueTable::QueueEntries, &new, &old);
        Ok(new)
    }

    async fn snapshot(&self, chamber_id: Uuid) -> Result<QueueSnapshot, QueueSyncError> {
        let chamber = self.chamber_state(chamber_id).await?;
        let entries = self.active_entries(chamber_id).await?;
        Ok(QueueSnapshot { chamber, entries })
    }
}

/// In-memory store with identical semantics, used by tests and local
/// development. Publishes into the hub exactly like the Supabase store so
/// the bridge sees the same feed either way.
pub struct MemoryQueueStore {
    chambers: RwLock<HashMap<Uuid, ChamberState>>,
    entries: RwLock<HashMap<Uuid, QueueEntry>>,
    hub: Arc<ChangeHub>,
}

impl MemoryQueueStore {
    pub fn new(hub: Arc<ChangeHub>) -> Self {
        Self {
            chambers: RwLock::new(HashMap::new()),
            entries: RwLock::new(HashMap::new()),
            hub,
        }
    }

    pub async fn seed_chamber(&self, chamber: ChamberState) {
        let mut chambers = self.chambers.write().await;
        chambers.insert(chamber.chamber_id, chamber);
    }

    pub async fn seed_entry(&self, entry: QueueEntry) {
        let row = serde_json::to_value(&entry).unwrap_or_default();
        {
            let mut entries = self.entries.write().await;
            entries.insert(entry.appointment_id, entry);
        }
        self.hub
            .publish(ChangeEvent::insert(QueueTable::QueueEntries, row));
    }

    fn publish_update<T: serde::Serialize>(&self, table: QueueTable, new: &T, old: &T) {
        let (Ok(new_row), Ok(old_row)) = (serde_json::to_value(new), serde_json::to_value(old))
        else {
            return;
        };
        self.hub.publish(ChangeEvent::update(table, new_row, old_row));
        debug!("memory store published {:?} update", table);
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn chamber_state(&self, chamber_id: Uuid) -> Result<ChamberState, QueueSyncError> {
        let chambers = self.chambers.read().await;
        chambers
            .get(&chamber_id)
            .cloned()
            .ok_or_else(|| QueueSyncError::NotFound(format!("chamber {}", chamber_id)))
    }

    async fn active_entries(&self, chamber_id: Uuid) -> Result<Vec<QueueEntry>, QueueSyncError> {
        let entries = self.entries.read().await;
        let mut matching: Vec<QueueEntry> = entries
            .values()
            .filter(|e| e.chamber_id == chamber_id)
            .cloned()
            .collect();
        matching.sort_by_key(|e| e.serial_number);
        Ok(matching)
    }

    async fn entry(&self, appointment_id: Uuid) -> Result<QueueEntry, QueueSyncError> {
        let entries = self.entries.read().await;
        entries
            .get(&appointment_id)
            .cloned()
            .ok_or_else(|| QueueSyncError::NotFound(format!("appointment {}", appointment_id)))
    }

    async fn chambers_owned_by(&self, doctor_id: Uuid) -> Result<Vec<Uuid>, QueueSyncError> {
        let chambers = self.chambers.read().await;
        Ok(chambers
            .values()
            .filter(|c| c.doctor_id == doctor_id)
            .map(|c| c.chamber_id)
            .collect())
    }

    async fn apply_queue_update(
        &self,
        chamber_id: Uuid,
        current_serial: u32,
        estimated_wait_minutes: Option<u32>,
        derivation: &StatusDerivation,
    ) -> Result<ChamberState, QueueSyncError> {
        {
            let mut entries = self.entries.write().await;
            for entry in &derivation.entries {
                if !derivation.changed.contains(&entry.appointment_id) {
                    continue;
                }
                if let Some(stored) = entries.get_mut(&entry.appointment_id) {
                    let old = stored.clone();
                    *stored = entry.clone();
                    self.publish_update(QueueTable::QueueEntries, entry, &old);
                }
            }
        }

        let mut chambers = self.chambers.write().await;
        let chamber = chambers
            .get_mut(&chamber_id)
            .ok_or_else(|| QueueSyncError::NotFound(format!("chamber {}", chamber_id)))?;

        let old = chamber.clone();
        chamber.current_serial = current_serial;
        if estimated_wait_minutes.is_some() {
            chamber.estimated_wait_minutes = estimated_wait_minutes;
        }
        chamber.total_in_queue = active_count(&derivation.entries);
        chamber.last_updated = Utc::now();

        let new = chamber.clone();
        drop(chambers);
        self.publish_update(QueueTable::ChamberState, &new, &old);
        Ok(new)
    }

    async fn apply_delay(
        &self,
        chamber_id: Uuid,
        delay_minutes: u32,
        message: Option<&str>,
    ) -> Result<ChamberState, QueueSyncError> {
        {
            let mut entries = self.entries.write().await;
            for entry in entries.values_mut() {
                if entry.chamber_id == chamber_id && !entry.status.is_terminal() {
                    entry.delay_minutes = delay_minutes;
                    entry.last_updated = Utc::now();
                }
            }
        }

        let mut chambers = self.chambers.write().await;
        let chamber = chambers
            .get_mut(&chamber_id)
            .ok_or_else(|| QueueSyncError::NotFound(format!("chamber {}", chamber_id)))?;

        let old = chamber.clone();
        chamber.delay_minutes = delay_minutes;
        if let Some(message) = message {
            chamber.doctor_message = Some(message.to_string());
        }
        chamber.last_updated = Utc::now();

        let new = chamber.clone();
        drop(chambers);
        self.publish_update(QueueTable::ChamberState, &new, &old);
        Ok(new)
    }

    async fn mark_current(&self, appointment_id: Uuid) -> Result<QueueEntry, QueueSyncError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(&appointment_id)
            .ok_or_else(|| QueueSyncError::NotFound(format!("appointment {}", appointment_id)))?;

        let old = entry.clone();
        entry.status = QueueEntryStatus::Current;
        entry.last_updated = Utc::now();

        let new = entry.clone();
        drop(entries);
        self.publish_update(QueueTable::QueueEntries, &new, &old);
        Ok(new)
    }

    async fn mark_completed(&self, appointment_id: Uuid) -> Result<QueueEntry, QueueSyncError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(&appointment_id)
            .ok_or_else(|| QueueSyncError::NotFound(format!("appointment {}", appointment_id)))?;

        let old = entry.clone();
        entry.status = QueueEntryStatus::Completed;
        entry.last_updated = Utc::now();

        let new = entry.clone();
        drop(entries);
        self.publish_update(QueueTable::QueueEntries, &new, &old);
        Ok(new)
    }

    async fn snapshot(&self, chamber_id: Uuid) -> Result<QueueSnapshot, QueueSyncError> {
        let chamber = self.chamber_state(chamber_id).await?;
        let entries = self.active_entries(chamber_id).await?;
        Ok(QueueSnapshot { chamber, entries })
    }
}
