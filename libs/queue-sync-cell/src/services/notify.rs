use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::models::{ChamberState, NotificationKind, QueueEvent, QueueNotification};

// Event builders own the user-facing copy, English plus Bangla, so the
// broker never assembles message strings inline.

pub fn status_event(chamber: &ChamberState) -> QueueEvent {
    QueueEvent::Status {
        chamber_id: chamber.chamber_id,
        current_serial: chamber.current_serial,
        estimated_wait_minutes: chamber.estimated_wait_minutes,
        delay_minutes: chamber.delay_minutes,
        doctor_message: chamber.doctor_message.clone(),
        total_in_queue: chamber.total_in_queue,
        average_consult_time: chamber.average_consult_minutes,
        last_updated: chamber.last_updated,
    }
}

pub fn turn_soon_event(appointment_id: Uuid, patients_ahead: u32) -> QueueEvent {
    QueueEvent::TurnSoon {
        appointment_id,
        message: format!(
            "Your turn is coming up. {} patient(s) ahead of you.",
            patients_ahead
        ),
        message_bn: format!(
            "আপনার সিরিয়াল প্রায় এসে গেছে। আপনার আগে {} জন রোগী আছেন।",
            patients_ahead
        ),
        patients_ahead,
        timestamp: Utc::now(),
    }
}

pub fn your_turn_event(appointment_id: Uuid) -> QueueEvent {
    QueueEvent::YourTurn {
        appointment_id,
        message: "It's your turn now. Please proceed to the chamber.".to_string(),
        message_bn: "এখন আপনার পালা। অনুগ্রহ করে চেম্বারে আসুন।".to_string(),
        timestamp: Utc::now(),
    }
}

pub fn delay_event(chamber_id: Uuid, delay_minutes: u32, message: Option<&str>) -> QueueEvent {
    QueueEvent::Delay {
        chamber_id,
        message: message
            .map(str::to_string)
            .unwrap_or_else(|| format!("The doctor is running {} minutes late.", delay_minutes)),
        message_bn: format!("ডাক্তার {} মিনিট দেরিতে আসবেন।", delay_minutes),
        delay_minutes,
        timestamp: Utc::now(),
    }
}

pub fn message_event(chamber_id: Uuid, message: String, message_bn: Option<String>) -> QueueEvent {
    QueueEvent::Message {
        chamber_id,
        message,
        message_bn,
        timestamp: Utc::now(),
    }
}

pub fn completed_event(appointment_id: Uuid) -> QueueEvent {
    QueueEvent::Completed {
        appointment_id,
        message: "Your consultation is complete. Take care!".to_string(),
        message_bn: "আপনার দেখানো শেষ হয়েছে। ভালো থাকবেন!".to_string(),
        timestamp: Utc::now(),
    }
}

pub fn reminder_event(appointment_id: Uuid, message: String) -> QueueEvent {
    QueueEvent::Reminder {
        appointment_id,
        message,
        timestamp: Utc::now(),
    }
}

/// Maps a delivered event to the notification the client logs. Status is
/// state, not a notification; everything else surfaces to the patient.
pub fn notification_for(event: &QueueEvent) -> Option<QueueNotification> {
    let notification = match event {
        QueueEvent::Status { .. } => return None,
        QueueEvent::TurnSoon {
            appointment_id,
            message,
            message_bn,
            patients_ahead,
            timestamp,
        } => QueueNotification {
            kind: NotificationKind::TurnSoon,
            appointment_id: Some(*appointment_id),
            chamber_id: None,
            message: message.clone(),
            message_bn: Some(message_bn.clone()),
            patients_ahead: Some(*patients_ahead),
            delay_minutes: None,
            timestamp: *timestamp,
        },
        QueueEvent::YourTurn {
            appointment_id,
            message,
            message_bn,
            timestamp,
        } => QueueNotification {
            kind: NotificationKind::YourTurn,
            appointment_id: Some(*appointment_id),
            chamber_id: None,
            message: message.clone(),
            message_bn: Some(message_bn.clone()),
            patients_ahead: None,
            delay_minutes: None,
            timestamp: *timestamp,
        },
        QueueEvent::Delay {
            chamber_id,
            message,
            message_bn,
            delay_minutes,
            timestamp,
        } => QueueNotification {
            kind: NotificationKind::Delay,
            appointment_id: None,
            chamber_id: Some(*chamber_id),
            message: message.clone(),
            message_bn: Some(message_bn.clone()),
            patients_ahead: None,
            delay_minutes: Some(*delay_minutes),
            timestamp: *timestamp,
        },
        QueueEvent::Message {
            chamber_id,
            message,
            message_bn,
            timestamp,
        } => QueueNotification {
            kind: NotificationKind::Message,
            appointment_id: None,
            chamber_id: Some(*chamber_id),
            message: message.clone(),
            message_bn: message_bn.clone(),
            patients_ahead: None,
            delay_minutes: None,
            timestamp: *timestamp,
        },
        QueueEvent::Completed {
            appointment_id,
            message,
            message_bn,
            timestamp,
        } => QueueNotification {
            kind: NotificationKind::Completed,
            appointment_id: Some(*appointment_id),
            chamber_id: None,
            message: message.clone(),
            message_bn: Some(message_bn.clone()),
            patients_ahead: None,
            delay_minutes: None,
            timestamp: *timestamp,
        },
        QueueEvent::Reminder {
            appointment_id,
            message,
            timestamp,
        } => QueueNotification {
            kind: NotificationKind::Reminder,
            appointment_id: Some(*appointment_id),
            chamber_id: None,
            message: message.clone(),
            message_bn: None,
            patients_ahead: None,
            delay_minutes: None,
            timestamp: *timestamp,
        },
    };

    Some(notification)
}

/// Platform-level notification surface (OS alert). The real implementation
/// lives with the client shell; tests and headless runs plug in stubs.
#[async_trait]
pub trait PlatformNotifier: Send + Sync {
    /// Ask the user for notification permission. Only ever called lazily,
    /// on first `your_turn` delivery.
    async fn request_permission(&self) -> bool;

    async fn notify(&self, notification: &QueueNotification);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PermissionState {
    NotRequested,
    Granted,
    Denied,
}

/// Client-side notification log: bounded FIFO of the most recent entries,
/// plus the lazy platform-permission dance for `your_turn`.
pub struct NotificationCenter {
    cap: usize,
    recent: Mutex<VecDeque<QueueNotification>>,
    platform: Option<Arc<dyn PlatformNotifier>>,
    permission: tokio::sync::Mutex<PermissionState>,
}

impl NotificationCenter {
    pub fn new(cap: usize, platform: Option<Arc<dyn PlatformNotifier>>) -> Self {
        Self {
            cap,
            recent: Mutex::new(VecDeque::with_capacity(cap)),
            platform,
            permission: tokio::sync::Mutex::new(PermissionState::NotRequested),
        }
    }

    pub async fn push(&self, notification: QueueNotification) {
        {
            let mut recent = self.recent.lock().expect("notification lock poisoned");
            if recent.len() == self.cap {
                recent.pop_front();
            }
            recent.push_back(notification.clone());
        }

        if notification.kind == NotificationKind::YourTurn {
            self.surface_on_platform(&notification).await;
        }
    }

    pub fn recent(&self) -> Vec<QueueNotification> {
        let recent = self.recent.lock().expect("notification lock poisoned");
        recent.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.recent.lock().expect("notification lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn surface_on_platform(&self, notification: &QueueNotification) {
        let Some(platform) = &self.platform else {
            return;
        };

        let mut permission = self.permission.lock().await;
        if *permission == PermissionState::NotRequested {
            *permission = if platform.request_permission().await {
                PermissionState::Granted
            } else {
                PermissionState::Denied
            };
            debug!("platform notification permission: {:?}", *permission);
        }

        if *permission == PermissionState::Granted {
            platform.notify(notification).await;
        }
    }
}
