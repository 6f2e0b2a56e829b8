use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use shared_config::RealtimeSettings;
use shared_models::auth::User;

use crate::error::QueueSyncError;
use crate::models::{ChamberState, QueueEntry, QueueEntryStatus, RoomId};
use crate::services::domain;
use crate::services::notify;
use crate::services::rooms::{RoomReceiver, RoomRegistry};
use crate::services::store::QueueStore;

/// Connection-oriented pub/sub over the room registry. Every doctor write
/// is validated, applied through the store (which feeds the changefeed),
/// then fanned out; patients only ever join and receive. Rejected
/// operations are never broadcast.
pub struct QueueBroker {
    store: Arc<dyn QueueStore>,
    rooms: Arc<RoomRegistry>,
    settings: RealtimeSettings,
}

impl QueueBroker {
    pub fn new(
        store: Arc<dyn QueueStore>,
        rooms: Arc<RoomRegistry>,
        settings: RealtimeSettings,
    ) -> Self {
        Self {
            store,
            rooms,
            settings,
        }
    }

    pub fn rooms(&self) -> &Arc<RoomRegistry> {
        &self.rooms
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    /// Doctor handshake: validates identity and chamber ownership, then
    /// joins the doctor's own queue room.
    pub async fn join_doctor(
        &self,
        user: &User,
        doctor_id: Uuid,
        chamber_ids: &[Uuid],
    ) -> Result<Vec<(RoomId, RoomReceiver)>, QueueSyncError> {
        let caller_id = self.doctor_caller_id(user)?;
        if caller_id != doctor_id {
            return Err(QueueSyncError::AuthorizationError(
                "cannot join another doctor's queue room".to_string(),
            ));
        }

        let owned = self.store.chambers_owned_by(doctor_id).await?;
        for chamber_id in chamber_ids {
            if !owned.contains(chamber_id) {
                return Err(QueueSyncError::AuthorizationError(format!(
                    "chamber {} is not owned by doctor {}",
                    chamber_id, doctor_id
                )));
            }
        }

        let room = RoomId::DoctorQueue(doctor_id);
        let receiver = self.rooms.join(room).await;
        info!("doctor {} joined {}", doctor_id, room);
        Ok(vec![(room, receiver)])
    }

    /// Patient handshake: joins one room per tracked appointment and
    /// chamber. Patients have no write operations.
    pub async fn join_patient(
        &self,
        user: &User,
        patient_id: Uuid,
        appointment_ids: &[Uuid],
        chamber_ids: &[Uuid],
    ) -> Result<Vec<(RoomId, RoomReceiver)>, QueueSyncError> {
        if user.id != patient_id.to_string() {
            return Err(QueueSyncError::AuthorizationError(
                "cannot track another patient's appointments".to_string(),
            ));
        }

        let mut joined = Vec::with_capacity(appointment_ids.len() + chamber_ids.len());
        for appointment_id in appointment_ids {
            let room = RoomId::Appointment(*appointment_id);
            joined.push((room, self.rooms.join(room).await));
        }
        for chamber_id in chamber_ids {
            let room = RoomId::Chamber(*chamber_id);
            joined.push((room, self.rooms.join(room).await));
        }

        info!("patient {} joined {} rooms", patient_id, joined.len());
        Ok(joined)
    }

    /// Recomputes every entry's status against the new current serial,
    /// persists, then broadcasts `queue:status` to the doctor room and
    /// derived `turn_soon`/`your_turn` to the affected patient rooms.
    #[instrument(skip(self, user), fields(chamber = %chamber_id, serial = current_serial))]
    pub async fn update_queue(
        &self,
        user: &User,
        chamber_id: Uuid,
        current_serial: u32,
        estimated_wait_minutes: Option<u32>,
    ) -> Result<ChamberState, QueueSyncError> {
        domain::validate_estimated_wait(estimated_wait_minutes)?;
        let chamber = self.ensure_chamber_owner(user, chamber_id).await?;
        domain::validate_serial_advance(current_serial, chamber.current_serial)?;

        let entries = self.store.active_entries(chamber_id).await?;
        let derivation = domain::derive_statuses(&entries, current_serial);
        for entry in &derivation.inconsistencies {
            warn!(
                appointment = %entry.appointment_id,
                serial = entry.serial_number,
                "entry behind current serial without explicit completion"
            );
        }

        let chamber = self
            .store
            .apply_queue_update(chamber_id, current_serial, estimated_wait_minutes, &derivation)
            .await?;

        self.rooms
            .broadcast(
                RoomId::DoctorQueue(chamber.doctor_id),
                notify::status_event(&chamber),
            )
            .await;

        self.emit_turn_events(&derivation.entries, current_serial)
            .await;

        Ok(chamber)
    }

    /// Sets the delay on the chamber and every active entry, then
    /// broadcasts `queue:delay` to the doctor room and all patient rooms
    /// tied to the chamber's active appointments. Announcing the same
    /// delay twice converges on the same state.
    #[instrument(skip(self, user, message), fields(chamber = %chamber_id, delay = delay_minutes))]
    pub async fn announce_delay(
        &self,
        user: &User,
        chamber_id: Uuid,
        delay_minutes: u32,
        message: Option<String>,
    ) -> Result<ChamberState, QueueSyncError> {
        domain::validate_delay(delay_minutes)?;
        if let Some(message) = &message {
            domain::validate_message(message)?;
        }
        self.ensure_chamber_owner(user, chamber_id).await?;

        let entries = self.store.active_entries(chamber_id).await?;
        let chamber = self
            .store
            .apply_delay(chamber_id, delay_minutes, message.as_deref())
            .await?;

        let event = notify::delay_event(chamber_id, delay_minutes, message.as_deref());
        self.rooms
            .broadcast(RoomId::DoctorQueue(chamber.doctor_id), event.clone())
            .await;
        self.rooms
            .broadcast(RoomId::Chamber(chamber_id), event.clone())
            .await;
        for entry in entries.iter().filter(|e| !e.status.is_terminal()) {
            self.rooms
                .broadcast(RoomId::Appointment(entry.appointment_id), event.clone())
                .await;
        }

        Ok(chamber)
    }

    /// Marks the entry current and pushes `queue:your_turn` to that one
    /// patient room only.
    #[instrument(skip(self, user), fields(appointment = %appointment_id, serial = serial_number))]
    pub async fn call_patient(
        &self,
        user: &User,
        appointment_id: Uuid,
        patient_id: Uuid,
        serial_number: u32,
    ) -> Result<QueueEntry, QueueSyncError> {
        if serial_number < 1 {
            return Err(QueueSyncError::ValidationError(
                "serial number must be at least 1".to_string(),
            ));
        }

        let entry = self.store.entry(appointment_id).await?;
        self.ensure_entry_owner(user, &entry)?;
        if entry.patient_id != patient_id {
            return Err(QueueSyncError::ValidationError(
                "patient does not match appointment".to_string(),
            ));
        }
        if entry.serial_number != serial_number {
            return Err(QueueSyncError::ValidationError(format!(
                "appointment holds serial {}, not {}",
                entry.serial_number, serial_number
            )));
        }
        if !entry.status.can_transition_to(&QueueEntryStatus::Current) {
            return Err(QueueSyncError::ValidationError(format!(
                "cannot call patient in status {:?}",
                entry.status
            )));
        }

        let entry = self.store.mark_current(appointment_id).await?;
        self.rooms
            .broadcast(
                RoomId::Appointment(appointment_id),
                notify::your_turn_event(appointment_id),
            )
            .await;

        Ok(entry)
    }

    /// Completes the entry, notifies that patient, then advances the queue
    /// with `update_queue` semantics.
    #[instrument(skip(self, user), fields(appointment = %appointment_id, next = next_serial))]
    pub async fn complete_patient(
        &self,
        user: &User,
        appointment_id: Uuid,
        chamber_id: Uuid,
        next_serial: u32,
    ) -> Result<ChamberState, QueueSyncError> {
        let entry = self.store.entry(appointment_id).await?;
        self.ensure_entry_owner(user, &entry)?;
        if entry.chamber_id != chamber_id {
            return Err(QueueSyncError::ValidationError(
                "appointment does not belong to that chamber".to_string(),
            ));
        }

        self.store.mark_completed(appointment_id).await?;
        self.rooms
            .broadcast(
                RoomId::Appointment(appointment_id),
                notify::completed_event(appointment_id),
            )
            .await;

        self.update_queue(user, chamber_id, next_serial, None).await
    }

    /// Pure broadcast, no state mutation: `queue:message` to the doctor
    /// room and every patient room under the chamber.
    #[instrument(skip(self, user, message, message_bn), fields(chamber = %chamber_id))]
    pub async fn send_message(
        &self,
        user: &User,
        chamber_id: Uuid,
        message: String,
        message_bn: Option<String>,
    ) -> Result<(), QueueSyncError> {
        domain::validate_message(&message)?;
        let chamber = self.ensure_chamber_owner(user, chamber_id).await?;

        let entries = self.store.active_entries(chamber_id).await?;
        let event = notify::message_event(chamber_id, message, message_bn);

        self.rooms
            .broadcast(RoomId::DoctorQueue(chamber.doctor_id), event.clone())
            .await;
        self.rooms
            .broadcast(RoomId::Chamber(chamber_id), event.clone())
            .await;
        for entry in entries.iter().filter(|e| !e.status.is_terminal()) {
            self.rooms
                .broadcast(RoomId::Appointment(entry.appointment_id), event.clone())
                .await;
        }

        Ok(())
    }

    /// Routes an `appointment:reminder` push to one patient room.
    pub async fn send_reminder(
        &self,
        appointment_id: Uuid,
        message: String,
    ) -> Result<(), QueueSyncError> {
        domain::validate_message(&message)?;
        self.rooms
            .broadcast(
                RoomId::Appointment(appointment_id),
                notify::reminder_event(appointment_id, message),
            )
            .await;
        Ok(())
    }

    pub fn settings(&self) -> &RealtimeSettings {
        &self.settings
    }

    // Validation helpers. Rejections happen before any fan-out.

    fn doctor_caller_id(&self, user: &User) -> Result<Uuid, QueueSyncError> {
        if !user.is_doctor() {
            return Err(QueueSyncError::AuthorizationError(
                "doctor role required".to_string(),
            ));
        }
        Uuid::parse_str(&user.id)
            .map_err(|_| QueueSyncError::AuthorizationError("malformed caller id".to_string()))
    }

    async fn ensure_chamber_owner(
        &self,
        user: &User,
        chamber_id: Uuid,
    ) -> Result<ChamberState, QueueSyncError> {
        let caller_id = self.doctor_caller_id(user)?;
        let chamber = self.store.chamber_state(chamber_id).await?;
        if chamber.doctor_id != caller_id {
            return Err(QueueSyncError::AuthorizationError(format!(
                "chamber {} is not owned by caller",
                chamber_id
            )));
        }
        Ok(chamber)
    }

    fn ensure_entry_owner(&self, user: &User, entry: &QueueEntry) -> Result<(), QueueSyncError> {
        let caller_id = self.doctor_caller_id(user)?;
        if entry.doctor_id != caller_id {
            return Err(QueueSyncError::AuthorizationError(
                "appointment is not owned by caller".to_string(),
            ));
        }
        Ok(())
    }

    async fn emit_turn_events(&self, entries: &[QueueEntry], current_serial: u32) {
        for entry in entries {
            match entry.status {
                QueueEntryStatus::Current => {
                    self.rooms
                        .broadcast(
                            RoomId::Appointment(entry.appointment_id),
                            notify::your_turn_event(entry.appointment_id),
                        )
                        .await;
                }
                QueueEntryStatus::Next => {
                    let ahead = domain::patients_ahead(entry.serial_number, current_serial);
                    self.rooms
                        .broadcast(
                            RoomId::Appointment(entry.appointment_id),
                            notify::turn_soon_event(entry.appointment_id, ahead),
                        )
                        .await;
                }
                _ => {}
            }
        }
    }
}
