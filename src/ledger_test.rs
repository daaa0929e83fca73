use super::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn sum_of_entries(ledger: &UnreadLedger) -> u64 {
    ledger.conversations().iter().map(|(_, count)| count).sum()
}

fn snapshot(entries: &[(UserId, u64)]) -> UnreadSnapshot {
    UnreadSnapshot {
        conversations: entries
            .iter()
            .map(|&(user_id, unread_count)| ConversationUnread { user_id, unread_count })
            .collect(),
        total_unread: None,
    }
}

#[test]
fn empty_ledger_reads_zero() {
    let ledger = UnreadLedger::new();
    assert_eq!(ledger.total(), 0);
    assert_eq!(ledger.get(42), 0);
    assert!(ledger.conversations().is_empty());
    assert_eq!(ledger.last_message_at(), None);
}

#[test]
fn snapshot_replaces_previous_state() {
    let ledger = UnreadLedger::new();
    ledger.increment(1);
    ledger.increment(1);

    let total = ledger.apply_snapshot(&snapshot(&[(7, 3), (9, 2)]));

    assert_eq!(total, 5);
    assert_eq!(ledger.get(1), 0);
    assert_eq!(ledger.conversations(), vec![(7, 3), (9, 2)]);
}

#[test]
fn snapshot_decodes_string_ids_and_camel_case() {
    let raw = r#"{"conversations":[{"userId":"7","unreadCount":3},{"userId":"9","unreadCount":2}],"totalUnread":5}"#;
    let parsed: UnreadSnapshot = serde_json::from_str(raw).expect("snapshot json");

    let ledger = UnreadLedger::new();
    assert_eq!(ledger.apply_snapshot(&parsed), 5);
    assert_eq!(ledger.get(7), 3);
    assert_eq!(ledger.get(9), 2);
}

#[test]
fn snapshot_ignores_disagreeing_server_total() {
    let mut snap = snapshot(&[(7, 3)]);
    snap.total_unread = Some(10);

    let ledger = UnreadLedger::new();
    assert_eq!(ledger.apply_snapshot(&snap), 3);
    assert_eq!(ledger.total(), 3);
}

#[test]
fn snapshot_merges_duplicate_and_drops_zero_entries() {
    let ledger = UnreadLedger::new();
    ledger.apply_snapshot(&snapshot(&[(7, 1), (7, 2), (8, 0)]));
    assert_eq!(ledger.conversations(), vec![(7, 3)]);
    assert_eq!(ledger.total(), 3);
}

#[test]
fn increment_updates_conversation_total_and_timestamp() {
    let ledger = UnreadLedger::new();
    assert_eq!(ledger.increment(7), 1);
    assert_eq!(ledger.increment(7), 2);
    assert_eq!(ledger.increment(9), 1);
    assert_eq!(ledger.total(), 3);
    assert!(ledger.last_message_at().is_some());
}

#[test]
fn reset_one_subtracts_exactly_its_count() {
    let ledger = UnreadLedger::new();
    ledger.apply_snapshot(&snapshot(&[(7, 4), (9, 2)]));

    assert_eq!(ledger.reset(Some(7)), 4);
    assert_eq!(ledger.get(7), 0);
    assert_eq!(ledger.total(), 2);

    assert_eq!(ledger.reset(Some(7)), 0);
    assert_eq!(ledger.total(), 2);
}

#[test]
fn reset_all_zeroes_everything() {
    let ledger = UnreadLedger::new();
    ledger.apply_snapshot(&snapshot(&[(7, 4), (9, 2)]));

    assert_eq!(ledger.reset(None), 6);
    assert_eq!(ledger.total(), 0);
    assert!(ledger.conversations().is_empty());
}

#[test]
fn clones_share_state() {
    let ledger = UnreadLedger::new();
    let handle = ledger.clone();
    handle.increment(3);
    assert_eq!(ledger.get(3), 1);
}

#[test]
fn total_matches_entries_after_every_random_operation() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let ledger = UnreadLedger::new();

    for _ in 0..2_000 {
        match rng.random_range(0..10) {
            0..=5 => {
                ledger.increment(rng.random_range(1..8));
            }
            6..=7 => {
                ledger.reset(Some(rng.random_range(1..8)));
            }
            8 => {
                ledger.reset(None);
            }
            _ => {
                let entries: Vec<_> = (1..4).map(|id| (id, rng.random_range(0..5))).collect();
                ledger.apply_snapshot(&snapshot(&entries));
            }
        }
        assert_eq!(ledger.total(), sum_of_entries(&ledger));
    }
}

#[test]
fn concurrent_increments_and_resets_keep_invariant() {
    let ledger = UnreadLedger::new();
    let threads: Vec<_> = (0..4)
        .map(|t| {
            let ledger = ledger.clone();
            std::thread::spawn(move || {
                for i in 0..500 {
                    ledger.increment(i % 5);
                    if (i + t) % 7 == 0 {
                        ledger.reset(Some(t));
                    }
                }
            })
        })
        .collect();
    for handle in threads {
        handle.join().expect("thread");
    }
    assert_eq!(ledger.total(), sum_of_entries(&ledger));
}
