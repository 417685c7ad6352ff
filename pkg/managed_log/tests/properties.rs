//! Randomized-sequence checks for the universal properties. Uses a small
//! seeded xorshift generator rather than a property-testing crate, matching
//! the hand-written example sequences in the donor's own range-set tests.

use std::collections::HashSet;
use std::sync::Arc;

use managed_log::{
    Bytes, InMemoryMetadataStore, InMemorySegmentStore, ManagedLog, ManagedLogConfig, Position,
};

struct Xorshift(u64);

impl Xorshift {
    fn new(seed: u64) -> Self {
        Xorshift(seed | 1)
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn next_range(&mut self, bound: u64) -> u64 {
        self.next_u64() % bound
    }
}

fn seed_from_name(name: &str) -> u64 {
    let mut h: u64 = 1469598103934665603;
    for b in name.bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(1099511628211);
    }
    h
}

fn payload(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
}

async fn open_log(config: ManagedLogConfig, first_id: u64, stride: u64) -> ManagedLog {
    let segment_store = Arc::new(InMemorySegmentStore::with_first_id_and_stride(first_id, stride));
    let metadata_store = Arc::new(InMemoryMetadataStore::new());
    ManagedLog::open("L", config, segment_store, metadata_store)
        .await
        .unwrap()
}

#[async_std::test]
async fn p1_monotonic_mark_delete() {
    let mut rng = Xorshift::new(seed_from_name("p1_monotonic_mark_delete"));
    let log = open_log(ManagedLogConfig::default(), 1, 1).await;
    let cursor = log
        .new_non_durable_cursor(Position::earliest())
        .await
        .unwrap();

    let mut positions = Vec::new();
    for i in 0..20 {
        positions.push(log.add_entry(payload(&format!("e{}", i))).await.unwrap());
    }

    let mut last_accepted = Position::earliest();
    for _ in 0..50 {
        let idx = rng.next_range(positions.len() as u64) as usize;
        let candidate = positions[idx];
        match cursor.mark_delete(candidate).await {
            Ok(()) => {
                assert!(candidate >= last_accepted);
                last_accepted = candidate;
            }
            Err(_) => {
                assert!(candidate < last_accepted);
            }
        }
    }
}

#[async_std::test]
async fn p2_idempotent_individual_delete() {
    let log = open_log(ManagedLogConfig::default(), 1, 1).await;
    let cursor = log
        .new_non_durable_cursor(Position::earliest())
        .await
        .unwrap();

    let mut positions = Vec::new();
    for i in 0..10 {
        positions.push(log.add_entry(payload(&format!("e{}", i))).await.unwrap());
    }

    let p = positions[5];
    cursor.delete(p).await.unwrap();
    let mark_delete_once = cursor.get_mark_deleted_position().await;
    let backlog_once = cursor.get_number_of_entries_in_backlog().await.unwrap();

    cursor.delete(p).await.unwrap();
    assert_eq!(cursor.get_mark_deleted_position().await, mark_delete_once);
    assert_eq!(
        cursor.get_number_of_entries_in_backlog().await.unwrap(),
        backlog_once
    );
}

#[async_std::test]
async fn p3_backlog_conservation() {
    let mut rng = Xorshift::new(seed_from_name("p3_backlog_conservation"));
    let log = open_log(ManagedLogConfig::default(), 1, 1).await;
    let cursor = log
        .new_non_durable_cursor(Position::earliest())
        .await
        .unwrap();

    let n: usize = 12;
    let mut positions = Vec::new();
    for i in 0..n {
        positions.push(log.add_entry(payload(&format!("e{}", i))).await.unwrap());
    }

    let mut acknowledged: HashSet<i64> = HashSet::new();
    let mut mark_delete_idx: i64 = -1;

    for _ in 0..40 {
        if rng.next_range(2) == 0 && (mark_delete_idx + 1) < n as i64 {
            let upper = n as i64 - 1;
            let target_idx = mark_delete_idx + 1 + rng.next_range((upper - mark_delete_idx) as u64) as i64;
            let target = positions[target_idx as usize];
            if cursor.mark_delete(target).await.is_ok() {
                for i in 0..=target_idx {
                    acknowledged.insert(i);
                }
                mark_delete_idx = target_idx;
            }
        } else {
            let idx = rng.next_range(n as u64) as i64;
            cursor.delete(positions[idx as usize]).await.unwrap();
            acknowledged.insert(idx);
        }

        let expected_backlog = n as u64 - acknowledged.len() as u64;
        assert_eq!(
            cursor.get_number_of_entries_in_backlog().await.unwrap(),
            expected_backlog
        );
    }
}

#[async_std::test]
async fn p4_rewind_resets_reads_only() {
    let log = open_log(ManagedLogConfig::default(), 1, 1).await;
    let cursor = log
        .new_non_durable_cursor(Position::earliest())
        .await
        .unwrap();

    let mut positions = Vec::new();
    for i in 0..6 {
        positions.push(log.add_entry(payload(&format!("e{}", i))).await.unwrap());
    }

    cursor.mark_delete(positions[1]).await.unwrap();
    cursor.delete(positions[3]).await.unwrap();
    let mark_delete_before = cursor.get_mark_deleted_position().await;

    cursor.read_entries(3).await.unwrap();
    assert_ne!(
        cursor.get_read_position().await,
        Position::new(mark_delete_before.segment_id, mark_delete_before.entry_id + 1)
    );

    cursor.rewind().await.unwrap();
    assert_eq!(
        cursor.get_read_position().await,
        Position::new(mark_delete_before.segment_id, mark_delete_before.entry_id + 1)
    );
    assert_eq!(cursor.get_mark_deleted_position().await, mark_delete_before);
}

#[async_std::test]
async fn p5_reset_is_orthogonal() {
    let log = open_log(ManagedLogConfig::default(), 1, 1).await;
    let cursor = log
        .new_non_durable_cursor(Position::earliest())
        .await
        .unwrap();

    let mut positions = Vec::new();
    for i in 0..6 {
        positions.push(log.add_entry(payload(&format!("e{}", i))).await.unwrap());
    }

    cursor.mark_delete(positions[4]).await.unwrap();

    let target = positions[1];
    cursor.reset_cursor(target).await.unwrap();
    assert_eq!(cursor.get_read_position().await, target);
    assert_eq!(cursor.get_mark_deleted_position().await, positions[4]);
}

#[async_std::test]
async fn p6_non_durable_cursor_does_not_pin_retention() {
    let mut config = ManagedLogConfig::default();
    config.max_entries_per_ledger = 1;
    let log = open_log(config, 1, 1).await;

    let pinned = log
        .new_non_durable_cursor(Position::earliest())
        .await
        .unwrap();

    log.add_entry(payload("e1")).await.unwrap();
    log.add_entry(payload("e2")).await.unwrap();
    let e3 = log.add_entry(payload("e3")).await.unwrap();

    // Segments before e3 are gone despite `pinned` never advancing past
    // the very start: non-durable cursors never pin retention.
    let fresh = log
        .new_non_durable_cursor(Position::earliest())
        .await
        .unwrap();
    assert_eq!(fresh.get_read_position().await, e3);

    // `pinned` itself keeps working; it just didn't stop the trim.
    assert_eq!(pinned.get_mark_deleted_position().await, Position::earliest());
}

#[async_std::test]
async fn p7_retention_safety_for_durable_cursors() {
    let mut config = ManagedLogConfig::default();
    config.max_entries_per_ledger = 1;
    let log = open_log(config, 1, 1).await;

    log.add_entry(payload("e1")).await.unwrap();
    let durable = log.open_cursor("sub").await.unwrap();

    log.add_entry(payload("e2")).await.unwrap();
    log.add_entry(payload("e3")).await.unwrap();
    log.add_entry(payload("e4")).await.unwrap();

    // `durable`'s mark-delete sits before e1; every segment is still
    // retained and reachable.
    assert_eq!(
        durable.get_number_of_entries_in_backlog().await.unwrap(),
        4
    );
}

#[async_std::test]
async fn p8_prefix_absorption() {
    let mut rng = Xorshift::new(seed_from_name("p8_prefix_absorption"));
    let log = open_log(ManagedLogConfig::default(), 1, 1).await;
    let cursor = log
        .new_non_durable_cursor(Position::earliest())
        .await
        .unwrap();

    let mut positions = Vec::new();
    for i in 0..6 {
        positions.push(log.add_entry(payload(&format!("e{}", i))).await.unwrap());
    }

    let q = positions[4];
    let mut prefix: Vec<Position> = positions[0..=4].to_vec();
    // Fisher-Yates shuffle so absorption is exercised out of order.
    for i in (1..prefix.len()).rev() {
        let j = rng.next_range((i + 1) as u64) as usize;
        prefix.swap(i, j);
    }

    for p in prefix {
        cursor.delete(p).await.unwrap();
    }

    assert_eq!(cursor.get_mark_deleted_position().await, q);
    assert_eq!(cursor.get_number_of_entries_in_backlog().await.unwrap(), 1);
}
