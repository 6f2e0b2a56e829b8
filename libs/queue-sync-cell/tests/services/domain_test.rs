use assert_matches::assert_matches;

use queue_sync_cell::*;

use super::QueueTestUtils;

async fn seeded_entries(count: u32) -> Vec<QueueEntry> {
    let utils = QueueTestUtils::new().await;
    utils.seed_queue(count).await
}

#[tokio::test]
async fn test_derive_statuses_exactly_one_current() {
    let entries = seeded_entries(8).await;

    let derivation = derive_statuses(&entries, 5);

    let current: Vec<_> = derivation
        .entries
        .iter()
        .filter(|e| e.status == QueueEntryStatus::Current)
        .collect();
    assert_eq!(current.len(), 1, "exactly one entry is current");
    assert_eq!(current[0].serial_number, 5);

    let next: Vec<_> = derivation
        .entries
        .iter()
        .filter(|e| e.status == QueueEntryStatus::Next)
        .collect();
    assert_eq!(next.len(), 1, "exactly one entry is next");
    assert_eq!(next[0].serial_number, 6);

    for entry in &derivation.entries {
        if entry.serial_number > 6 {
            assert_eq!(entry.status, QueueEntryStatus::Waiting);
        }
    }
}

#[tokio::test]
async fn test_derive_statuses_reports_left_behind_entries() {
    let entries = seeded_entries(6).await;

    // Jump straight to 4: serials 1-3 were never explicitly completed.
    let derivation = derive_statuses(&entries, 4);

    assert_eq!(derivation.inconsistencies.len(), 3);
    for entry in &derivation.inconsistencies {
        assert!(entry.serial_number < 4);
        // Logged, not silently reclassified.
        assert_eq!(entry.status, QueueEntryStatus::Waiting);
    }
}

#[tokio::test]
async fn test_derive_statuses_leaves_completed_alone() {
    let mut entries = seeded_entries(4).await;
    entries[0].status = QueueEntryStatus::Completed;
    entries[1].status = QueueEntryStatus::Completed;

    let derivation = derive_statuses(&entries, 3);

    assert_eq!(derivation.entries[0].status, QueueEntryStatus::Completed);
    assert_eq!(derivation.entries[1].status, QueueEntryStatus::Completed);
    assert!(derivation.inconsistencies.is_empty());
    assert_eq!(derivation.entries[2].status, QueueEntryStatus::Current);
    assert_eq!(derivation.entries[3].status, QueueEntryStatus::Next);
}

#[tokio::test]
async fn test_derive_statuses_changed_only_lists_transitions() {
    let entries = seeded_entries(3).await;

    let first = derive_statuses(&entries, 1);
    // Serial 1 -> current, serial 2 -> next; serial 3 stays waiting.
    assert_eq!(first.changed.len(), 2);

    let second = derive_statuses(&first.entries, 1);
    assert!(second.changed.is_empty(), "no-op derivation changes nothing");
}

#[test]
fn test_serial_advance_policy() {
    assert!(validate_serial_advance(5, 5).is_ok(), "re-announce is fine");
    assert!(validate_serial_advance(9, 5).is_ok(), "forward jump allowed");

    assert_matches!(
        validate_serial_advance(0, 1).unwrap_err(),
        QueueSyncError::ValidationError(_)
    );
    assert_matches!(
        validate_serial_advance(3, 5).unwrap_err(),
        QueueSyncError::ValidationError(_)
    );
}

#[test]
fn test_payload_validation_bounds() {
    assert!(validate_estimated_wait(None).is_ok());
    assert!(validate_estimated_wait(Some(480)).is_ok());
    assert_matches!(
        validate_estimated_wait(Some(481)).unwrap_err(),
        QueueSyncError::ValidationError(_)
    );

    assert!(validate_delay(0).is_ok());
    assert_matches!(
        validate_delay(10_000).unwrap_err(),
        QueueSyncError::ValidationError(_)
    );

    assert!(validate_message("running late, sorry").is_ok());
    assert_matches!(
        validate_message("   ").unwrap_err(),
        QueueSyncError::ValidationError(_)
    );
    assert_matches!(
        validate_message(&"x".repeat(501)).unwrap_err(),
        QueueSyncError::ValidationError(_)
    );
}

#[test]
fn test_wait_estimation() {
    assert_eq!(patients_ahead(6, 5), 1);
    assert_eq!(patients_ahead(5, 5), 0);
    assert_eq!(patients_ahead(3, 5), 0, "behind entries never go negative");

    assert_eq!(estimate_wait_minutes(8, 5, 10, 0), 30);
    assert_eq!(estimate_wait_minutes(8, 5, 10, 15), 45);
}

#[test]
fn test_status_never_regresses() {
    use QueueEntryStatus::*;

    assert!(Waiting.can_transition_to(&Next));
    assert!(Next.can_transition_to(&Current));
    assert!(Current.can_transition_to(&Completed));

    assert!(!Current.can_transition_to(&Waiting));
    assert!(!Current.can_transition_to(&Next));
    assert!(!Completed.can_transition_to(&Current));
    assert!(!Completed.can_transition_to(&Waiting));
}
