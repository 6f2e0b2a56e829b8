use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use queue_sync_cell::*;

fn sample_notification(kind: NotificationKind, message: &str) -> QueueNotification {
    QueueNotification {
        kind,
        appointment_id: Some(Uuid::new_v4()),
        chamber_id: None,
        message: message.to_string(),
        message_bn: None,
        patients_ahead: None,
        delay_minutes: None,
        timestamp: Utc::now(),
    }
}

#[test]
fn test_event_builders_carry_both_languages() {
    let appointment_id = Uuid::new_v4();
    let chamber_id = Uuid::new_v4();

    match turn_soon_event(appointment_id, 1) {
        QueueEvent::TurnSoon {
            message,
            message_bn,
            patients_ahead,
            ..
        } => {
            assert!(message.contains('1'));
            assert!(message_bn.contains('১') || message_bn.contains('1'));
            assert_eq!(patients_ahead, 1);
        }
        other => panic!("unexpected event {:?}", other),
    }

    match your_turn_event(appointment_id) {
        QueueEvent::YourTurn {
            message, message_bn, ..
        } => {
            assert!(!message.is_empty());
            assert!(!message_bn.is_empty());
        }
        other => panic!("unexpected event {:?}", other),
    }

    // A custom delay note overrides the canned English copy.
    match delay_event(chamber_id, 25, Some("Surgery ran long")) {
        QueueEvent::Delay {
            message,
            delay_minutes,
            ..
        } => {
            assert_eq!(message, "Surgery ran long");
            assert_eq!(delay_minutes, 25);
        }
        other => panic!("unexpected event {:?}", other),
    }

    match delay_event(chamber_id, 25, None) {
        QueueEvent::Delay { message, .. } => assert!(message.contains("25")),
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn test_event_wire_names() {
    let appointment_id = Uuid::new_v4();
    let event = your_turn_event(appointment_id);
    assert_eq!(event.name(), "queue:your_turn");

    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["event"], "queue:your_turn");
    assert_eq!(json["payload"]["appointmentId"], appointment_id.to_string());
    assert!(json["payload"]["messageBn"].is_string());
}

#[test]
fn test_notification_mapping() {
    let appointment_id = Uuid::new_v4();

    let notification = notification_for(&turn_soon_event(appointment_id, 2)).unwrap();
    assert_eq!(notification.kind, NotificationKind::TurnSoon);
    assert_eq!(notification.patients_ahead, Some(2));
    assert_eq!(notification.appointment_id, Some(appointment_id));

    let notification = notification_for(&delay_event(Uuid::new_v4(), 15, None)).unwrap();
    assert_eq!(notification.kind, NotificationKind::Delay);
    assert_eq!(notification.delay_minutes, Some(15));

    // Status is state, not a notification.
    let chamber = ChamberState {
        chamber_id: Uuid::new_v4(),
        doctor_id: Uuid::new_v4(),
        current_serial: 1,
        total_in_queue: 0,
        estimated_wait_minutes: None,
        delay_minutes: 0,
        doctor_message: None,
        average_consult_minutes: 10,
        last_updated: Utc::now(),
    };
    assert!(notification_for(&status_event(&chamber)).is_none());
}

#[tokio::test]
async fn test_notification_center_evicts_oldest_first() {
    let center = NotificationCenter::new(50, None);

    for n in 1..=60 {
        center
            .push(sample_notification(
                NotificationKind::Message,
                &format!("note {}", n),
            ))
            .await;
    }

    let recent = center.recent();
    assert_eq!(recent.len(), 50);
    assert_eq!(recent[0].message, "note 11");
    assert_eq!(recent[49].message, "note 60");
}

struct CountingPlatform {
    requests: AtomicU32,
    delivered: AtomicU32,
    grant: bool,
}

#[async_trait]
impl PlatformNotifier for CountingPlatform {
    async fn request_permission(&self) -> bool {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.grant
    }

    async fn notify(&self, _notification: &QueueNotification) {
        self.delivered.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_permission_requested_once_and_only_for_your_turn() {
    let platform = Arc::new(CountingPlatform {
        requests: AtomicU32::new(0),
        delivered: AtomicU32::new(0),
        grant: true,
    });
    let center = NotificationCenter::new(10, Some(platform.clone() as Arc<dyn PlatformNotifier>));

    center
        .push(sample_notification(NotificationKind::Delay, "late"))
        .await;
    center
        .push(sample_notification(NotificationKind::Message, "hello"))
        .await;
    assert_eq!(platform.requests.load(Ordering::SeqCst), 0, "never pre-emptive");

    center
        .push(sample_notification(NotificationKind::YourTurn, "go"))
        .await;
    center
        .push(sample_notification(NotificationKind::YourTurn, "go again"))
        .await;

    assert_eq!(platform.requests.load(Ordering::SeqCst), 1, "asked exactly once");
    assert_eq!(platform.delivered.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_denied_permission_suppresses_platform_delivery() {
    let platform = Arc::new(CountingPlatform {
        requests: AtomicU32::new(0),
        delivered: AtomicU32::new(0),
        grant: false,
    });
    let center = NotificationCenter::new(10, Some(platform.clone() as Arc<dyn PlatformNotifier>));

    center
        .push(sample_notification(NotificationKind::YourTurn, "go"))
        .await;
    center
        .push(sample_notification(NotificationKind::YourTurn, "go again"))
        .await;

    assert_eq!(platform.requests.load(Ordering::SeqCst), 1, "no re-prompting");
    assert_eq!(platform.delivered.load(Ordering::SeqCst), 0);
    // The in-app log still keeps them.
    assert_eq!(center.len(), 2);
}

#[test]
fn test_connection_status_hints() {
    assert_eq!(ConnectionStatus::Connected.user_hint(), "live");
    assert_eq!(
        ConnectionStatus::Reconnecting { attempt: 3 }.user_hint(),
        "reconnecting"
    );
    assert_eq!(
        ConnectionStatus::Disconnected.user_hint(),
        "live updates unavailable, please refresh"
    );
}
