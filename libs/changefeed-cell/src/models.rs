use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tables the bridge is allowed to watch. A closed set keeps subscriptions
/// from drifting onto tables with no row-level change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueTable {
    QueueEntries,
    ChamberState,
    Appointments,
    QueueNotifications,
}

impl QueueTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueTable::QueueEntries => "queue_entries",
            QueueTable::ChamberState => "chamber_state",
            QueueTable::Appointments => "appointments",
            QueueTable::QueueNotifications => "queue_notifications",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// Equality filter on an indexed foreign-key column. Filters on anything
/// else would make the underlying subscription scan-shaped and are rejected
/// at subscribe time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeFilter {
    pub column: String,
    pub value: String,
}

impl ChangeFilter {
    pub const INDEXED_COLUMNS: [&'static str; 5] =
        ["id", "doctor_id", "patient_id", "appointment_id", "chamber_id"];

    pub fn new(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn is_indexed(&self) -> bool {
        Self::INDEXED_COLUMNS.contains(&self.column.as_str())
    }

    /// Whether a raw row satisfies this filter. Values are compared as
    /// strings since PostgREST filters are textual.
    pub fn matches(&self, row: &Value) -> bool {
        match row.get(&self.column) {
            Some(Value::String(s)) => s == &self.value,
            Some(Value::Number(n)) => n.to_string() == self.value,
            _ => false,
        }
    }
}

/// A typed row-level diff, translated from the raw store payload. Consumed
/// exactly once per registered listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: QueueTable,
    pub op: ChangeOp,
    pub new_row: Value,
    pub old_row: Option<Value>,
    pub observed_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn insert(table: QueueTable, new_row: Value) -> Self {
        Self {
            table,
            op: ChangeOp::Insert,
            new_row,
            old_row: None,
            observed_at: Utc::now(),
        }
    }

    pub fn update(table: QueueTable, new_row: Value, old_row: Value) -> Self {
        Self {
            table,
            op: ChangeOp::Update,
            new_row,
            old_row: Some(old_row),
            observed_at: Utc::now(),
        }
    }

    pub fn delete(table: QueueTable, old_row: Value) -> Self {
        Self {
            table,
            op: ChangeOp::Delete,
            new_row: Value::Null,
            old_row: Some(old_row),
            observed_at: Utc::now(),
        }
    }
}

/// Health of the feed as seen by dependents. Degradation is surfaced, never
/// thrown through normal control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedStatus {
    Connected,
    Reconnecting,
    Disconnected,
}

impl FeedStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, FeedStatus::Connected)
    }
}
