use chrono::Utc;
use tracing::warn;

use crate::error::QueueSyncError;
use crate::models::{QueueEntry, QueueEntryStatus};

const MAX_ESTIMATED_WAIT_MINUTES: u32 = 480;
const MAX_DELAY_MINUTES: u32 = 720;
const MAX_MESSAGE_CHARS: usize = 500;

/// Result of recomputing statuses for a chamber's active set.
#[derive(Debug, Clone)]
pub struct StatusDerivation {
    pub entries: Vec<QueueEntry>,
    /// Appointment ids whose status actually changed this pass.
    pub changed: Vec<uuid::Uuid>,
    /// Entries whose serial fell behind the current serial without an
    /// explicit completion. Logged, never silently reclassified.
    pub inconsistencies: Vec<QueueEntry>,
}

/// Pure recomputation: current iff serial == current_serial, next iff
/// serial == current_serial + 1, waiting otherwise. Touches every active
/// entry per call, which stays cheap at tens of patients per chamber.
pub fn derive_statuses(entries: &[QueueEntry], current_serial: u32) -> StatusDerivation {
    let now = Utc::now();
    let mut derived = Vec::with_capacity(entries.len());
    let mut changed = Vec::new();
    let mut inconsistencies = Vec::new();

    for entry in entries {
        if entry.status == QueueEntryStatus::Completed {
            derived.push(entry.clone());
            continue;
        }

        if entry.serial_number < current_serial {
            // Fell behind without callPatient/completePatient.
            inconsistencies.push(entry.clone());
            derived.push(entry.clone());
            continue;
        }

        let status = if entry.serial_number == current_serial {
            QueueEntryStatus::Current
        } else if entry.serial_number == current_serial + 1 {
            QueueEntryStatus::Next
        } else {
            QueueEntryStatus::Waiting
        };

        let mut next = entry.clone();
        if next.status != status {
            next.status = status;
            next.last_updated = now;
            changed.push(next.appointment_id);
        }
        derived.push(next);
    }

    if !inconsistencies.is_empty() {
        warn!(
            count = inconsistencies.len(),
            current_serial, "queue entries behind current serial without explicit completion"
        );
    }

    StatusDerivation {
        entries: derived,
        changed,
        inconsistencies,
    }
}

/// Serial advancement policy: forward jumps are allowed (clinics skip
/// absent patients); regression is rejected.
pub fn validate_serial_advance(new_serial: u32, stored_serial: u32) -> Result<(), QueueSyncError> {
    if new_serial < 1 {
        return Err(QueueSyncError::ValidationError(
            "current serial must be at least 1".to_string(),
        ));
    }
    if new_serial < stored_serial {
        return Err(QueueSyncError::ValidationError(format!(
            "serial cannot regress from {} to {}",
            stored_serial, new_serial
        )));
    }
    Ok(())
}

pub fn validate_estimated_wait(minutes: Option<u32>) -> Result<(), QueueSyncError> {
    match minutes {
        Some(m) if m > MAX_ESTIMATED_WAIT_MINUTES => Err(QueueSyncError::ValidationError(format!(
            "estimated wait {} exceeds {} minutes",
            m, MAX_ESTIMATED_WAIT_MINUTES
        ))),
        _ => Ok(()),
    }
}

pub fn validate_delay(minutes: u32) -> Result<(), QueueSyncError> {
    if minutes > MAX_DELAY_MINUTES {
        return Err(QueueSyncError::ValidationError(format!(
            "delay {} exceeds {} minutes",
            minutes, MAX_DELAY_MINUTES
        )));
    }
    Ok(())
}

pub fn validate_message(message: &str) -> Result<(), QueueSyncError> {
    if message.trim().is_empty() {
        return Err(QueueSyncError::ValidationError(
            "message must not be empty".to_string(),
        ));
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(QueueSyncError::ValidationError(format!(
            "message exceeds {} characters",
            MAX_MESSAGE_CHARS
        )));
    }
    Ok(())
}

pub fn patients_ahead(serial_number: u32, current_serial: u32) -> u32 {
    serial_number.saturating_sub(current_serial)
}

/// Naive wait estimate: queue position times average consult length plus
/// the announced delay.
pub fn estimate_wait_minutes(
    serial_number: u32,
    current_serial: u32,
    average_consult_minutes: u32,
    delay_minutes: u32,
) -> u32 {
    patients_ahead(serial_number, current_serial) * average_consult_minutes + delay_minutes
}
