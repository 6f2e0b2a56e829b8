use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status advances monotonically waiting → next → current → completed and
/// never regresses. Completion always happens through an explicit doctor
/// action, never through status derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEntryStatus {
    Waiting,
    Next,
    Current,
    Completed,
}

impl QueueEntryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueEntryStatus::Completed)
    }

    pub fn can_transition_to(&self, target: &QueueEntryStatus) -> bool {
        use QueueEntryStatus::*;
        match (self, target) {
            (a, b) if a == b => true,
            (Waiting, Next) | (Waiting, Current) | (Waiting, Completed) => true,
            (Next, Current) | (Next, Completed) => true,
            (Next, Waiting) => true, // serial moved past without call; still active
            (Current, Completed) => true,
            _ => false,
        }
    }
}

/// One active slot in a doctor's queue for the clinic day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub chamber_id: Uuid,
    pub serial_number: u32,
    pub status: QueueEntryStatus,
    pub delay_minutes: u32,
    pub last_updated: DateTime<Utc>,
}

/// Per-chamber aggregate the `queue:status` event is built from. The store
/// row is authoritative; the broker only caches and routes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChamberState {
    pub chamber_id: Uuid,
    pub doctor_id: Uuid,
    pub current_serial: u32,
    pub total_in_queue: u32,
    pub estimated_wait_minutes: Option<u32>,
    pub delay_minutes: u32,
    pub doctor_message: Option<String>,
    pub average_consult_minutes: u32,
    pub last_updated: DateTime<Utc>,
}

/// Authoritative view a client re-fetches after reconnect instead of
/// replaying missed events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub chamber: ChamberState,
    pub entries: Vec<QueueEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TurnSoon,
    YourTurn,
    Delay,
    Message,
    Completed,
    Reminder,
}

/// Transient, fire-once push. Owned by the broker during delivery; after
/// receipt it lives only in the client's bounded notification log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueNotification {
    pub kind: NotificationKind,
    pub appointment_id: Option<Uuid>,
    pub chamber_id: Option<Uuid>,
    pub message: String,
    pub message_bn: Option<String>,
    pub patients_ahead: Option<u32>,
    pub delay_minutes: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

/// Closed set of rooms. Rendered to the namespaced channel string on the
/// wire; in-process code only ever sees the typed variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomId {
    DoctorQueue(Uuid),
    Appointment(Uuid),
    Chamber(Uuid),
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomId::DoctorQueue(id) => write!(f, "doctor-queue:{}", id),
            RoomId::Appointment(id) => write!(f, "appointment:{}", id),
            RoomId::Chamber(id) => write!(f, "chamber:{}", id),
        }
    }
}

impl Serialize for RoomId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Broker → client event vocabulary. A closed tagged enum so new kinds are
/// type-checked instead of string-matched; payload fields are camelCase on
/// the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum QueueEvent {
    #[serde(rename = "queue:status", rename_all = "camelCase")]
    Status {
        chamber_id: Uuid,
        current_serial: u32,
        estimated_wait_minutes: Option<u32>,
        delay_minutes: u32,
        doctor_message: Option<String>,
        total_in_queue: u32,
        average_consult_time: u32,
        last_updated: DateTime<Utc>,
    },
    #[serde(rename = "queue:turn_soon", rename_all = "camelCase")]
    TurnSoon {
        appointment_id: Uuid,
        message: String,
        message_bn: String,
        patients_ahead: u32,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "queue:your_turn", rename_all = "camelCase")]
    YourTurn {
        appointment_id: Uuid,
        message: String,
        message_bn: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "queue:delay", rename_all = "camelCase")]
    Delay {
        chamber_id: Uuid,
        message: String,
        message_bn: String,
        delay_minutes: u32,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "queue:message", rename_all = "camelCase")]
    Message {
        chamber_id: Uuid,
        message: String,
        message_bn: Option<String>,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "queue:completed", rename_all = "camelCase")]
    Completed {
        appointment_id: Uuid,
        message: String,
        message_bn: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "appointment:reminder", rename_all = "camelCase")]
    Reminder {
        appointment_id: Uuid,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl QueueEvent {
    pub fn name(&self) -> &'static str {
        match self {
            QueueEvent::Status { .. } => "queue:status",
            QueueEvent::TurnSoon { .. } => "queue:turn_soon",
            QueueEvent::YourTurn { .. } => "queue:your_turn",
            QueueEvent::Delay { .. } => "queue:delay",
            QueueEvent::Message { .. } => "queue:message",
            QueueEvent::Completed { .. } => "queue:completed",
            QueueEvent::Reminder { .. } => "appointment:reminder",
        }
    }
}

/// What actually travels through a room: the event plus the room's
/// monotonic sequence number, so clients can detect gaps deterministically
/// and fall back to reconciliation.
#[derive(Debug, Clone, Serialize)]
pub struct RoomEnvelope {
    pub room: RoomId,
    pub seq: u64,
    #[serde(flatten)]
    pub event: QueueEvent,
}

/// Client → broker commands. Validated at the boundary; an unknown op or a
/// missing field fails deserialization before it reaches the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data")]
pub enum ClientCommand {
    #[serde(rename = "doctor:join", rename_all = "camelCase")]
    DoctorJoin {
        doctor_id: Uuid,
        chamber_ids: Vec<Uuid>,
    },
    #[serde(rename = "doctor:update_queue", rename_all = "camelCase")]
    UpdateQueue {
        chamber_id: Uuid,
        current_serial: u32,
        #[serde(default)]
        estimated_wait_minutes: Option<u32>,
    },
    #[serde(rename = "doctor:announce_delay", rename_all = "camelCase")]
    AnnounceDelay {
        chamber_id: Uuid,
        delay_minutes: u32,
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(rename = "doctor:call_patient", rename_all = "camelCase")]
    CallPatient {
        appointment_id: Uuid,
        patient_id: Uuid,
        serial_number: u32,
    },
    #[serde(rename = "doctor:complete_patient", rename_all = "camelCase")]
    CompletePatient {
        appointment_id: Uuid,
        chamber_id: Uuid,
        next_serial: u32,
    },
    #[serde(rename = "doctor:send_message", rename_all = "camelCase")]
    SendMessage {
        chamber_id: Uuid,
        message: String,
        #[serde(default)]
        message_bn: Option<String>,
    },
    #[serde(rename = "patient:join", rename_all = "camelCase")]
    PatientJoin {
        patient_id: Uuid,
        appointment_ids: Vec<Uuid>,
        chamber_ids: Vec<Uuid>,
    },
}

/// Connection lifecycle as surfaced to the UI layer. Transport errors never
/// propagate past this; the UI reads the hint and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Disconnected,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    pub fn user_hint(&self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "live",
            ConnectionStatus::Reconnecting { .. } => "reconnecting",
            ConnectionStatus::Disconnected => "live updates unavailable, please refresh",
        }
    }
}
