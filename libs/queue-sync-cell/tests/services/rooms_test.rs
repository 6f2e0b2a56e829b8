use std::time::Duration;

use tokio::time::timeout;
use uuid::Uuid;

use queue_sync_cell::*;

fn message(n: u32) -> QueueEvent {
    message_event(Uuid::new_v4(), format!("note {}", n), None)
}

#[tokio::test]
async fn test_join_creates_room_and_delivers() {
    let registry = RoomRegistry::new(16);
    let room = RoomId::DoctorQueue(Uuid::new_v4());

    let mut receiver = registry.join(room).await;
    assert_eq!(registry.member_count(room).await, 1);

    let delivered = registry.broadcast(room, message(1)).await;
    assert_eq!(delivered, 1);

    let envelope = timeout(Duration::from_secs(1), receiver.recv())
        .await
        .expect("should receive within timeout")
        .expect("channel should be open");
    assert_eq!(envelope.room, room);
    assert_eq!(envelope.seq, 1);
}

#[tokio::test]
async fn test_broadcast_to_unknown_room_is_dropped() {
    let registry = RoomRegistry::new(16);
    let delivered = registry
        .broadcast(RoomId::Chamber(Uuid::new_v4()), message(1))
        .await;
    assert_eq!(delivered, 0);
    assert!(registry.active_rooms().await.is_empty());
}

#[tokio::test]
async fn test_room_isolation() {
    let registry = RoomRegistry::new(16);
    let room_a = RoomId::DoctorQueue(Uuid::new_v4());
    let room_b = RoomId::DoctorQueue(Uuid::new_v4());

    let mut receiver_a = registry.join(room_a).await;
    let mut receiver_b = registry.join(room_b).await;

    registry.broadcast(room_a, message(1)).await;

    let envelope = timeout(Duration::from_secs(1), receiver_a.recv())
        .await
        .expect("room A member should receive")
        .expect("channel should be open");
    assert_eq!(envelope.room, room_a);

    // Room B must see nothing from room A.
    let leaked = timeout(Duration::from_millis(100), receiver_b.recv()).await;
    assert!(leaked.is_err(), "event leaked across rooms");
}

#[tokio::test]
async fn test_per_room_order_and_sequence() {
    let registry = RoomRegistry::new(16);
    let room = RoomId::Chamber(Uuid::new_v4());
    let mut receiver = registry.join(room).await;

    for n in 1..=5 {
        registry.broadcast(room, message(n)).await;
    }

    for expected_seq in 1..=5u64 {
        let envelope = timeout(Duration::from_secs(1), receiver.recv())
            .await
            .expect("should receive within timeout")
            .expect("channel should be open");
        assert_eq!(envelope.seq, expected_seq, "per-room order is emission order");
        match envelope.event {
            QueueEvent::Message { ref message, .. } => {
                assert_eq!(message, &format!("note {}", expected_seq));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_every_member_receives_fan_out() {
    let registry = RoomRegistry::new(16);
    let room = RoomId::Appointment(Uuid::new_v4());

    let mut receivers = Vec::new();
    for _ in 0..4 {
        receivers.push(registry.join(room).await);
    }

    let delivered = registry.broadcast(room, message(1)).await;
    assert_eq!(delivered, 4);

    for receiver in &mut receivers {
        let envelope = timeout(Duration::from_secs(1), receiver.recv())
            .await
            .expect("every member should receive")
            .expect("channel should be open");
        assert_eq!(envelope.seq, 1);
    }
}

#[tokio::test]
async fn test_leave_by_drop_and_prune() {
    let registry = RoomRegistry::new(16);
    let room = RoomId::Chamber(Uuid::new_v4());

    let receiver = registry.join(room).await;
    assert_eq!(registry.member_count(room).await, 1);

    drop(receiver);
    assert_eq!(registry.member_count(room).await, 0);

    // Disconnecting is idempotent from the registry's point of view:
    // pruning an already-empty room is a no-op the second time.
    assert_eq!(registry.prune().await, 1);
    assert_eq!(registry.prune().await, 0);
    assert!(registry.active_rooms().await.is_empty());
}
