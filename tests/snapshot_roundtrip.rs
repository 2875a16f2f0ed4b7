//! Snapshot round trips: byte-for-byte recovery, the metadata commit marker,
//! invalidation, and phase-coded failures.

#![cfg(feature = "snapshot")]

use nacre::config::NUMBER_OF_COMPUTORS;
use nacre::prelude::*;
use nacre::storage::{LoadError, SaveError};

const EPOCH: u32 = 42;

fn tx_bytes(tick: u32, input: &[u8]) -> Vec<u8> {
    let header = TxHeader {
        source_public_key: [0x10; 32],
        destination_public_key: [0x20; 32],
        amount: I64::new(9),
        tick: U32::new(tick),
        input_type: U16::new(0),
        input_size: U16::new(input.len() as u16),
    };
    encode_transaction(&header, input, &[0x30; 64])
}

fn populated_store() -> TickStore {
    let mut store = TickStore::new();
    store.begin_epoch(1000);

    for tick in 1000..1020 {
        store.set_tick_data(&TickData {
            epoch: EPOCH,
            tick,
            timestamp: u64::from(tick),
            prev_state_digest: [0xA1; 32],
            tx_digest_root: [0xB2; 32],
            signature: [0xC3; 64],
        });
        for computor in 0..4u16 {
            store.store_vote(&TickVote {
                computor_index: computor,
                epoch: EPOCH as u16,
                tick,
                timestamp: u64::from(tick) * 2,
                prev_state_digest: [0xD4; 32],
                tx_digest: [0xE5; 32],
                signature: [0xF6; 64],
            });
        }
        for slot in 0..3 {
            let bytes = tx_bytes(tick, &[slot as u8; 16]);
            store.add_transaction(slot, &bytes).unwrap();
        }
    }
    store
}

#[test]
fn save_then_load_restores_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let store = populated_store();
    let end_tick = 1019;
    store.try_save_to_file(EPOCH, end_tick, dir.path()).unwrap();

    let saved_next = store.transactions().next_offset();

    let mut restored = TickStore::new();
    restored.begin_epoch(1000);
    restored.try_load_from_file(EPOCH, dir.path()).unwrap();
    assert_eq!(restored.preload_tick(), end_tick);

    for tick in 1000..=end_tick {
        assert_eq!(restored.tick_data(tick), store.tick_data(tick), "tick {tick}");
        for computor in 0..NUMBER_OF_COMPUTORS {
            assert_eq!(
                restored.vote(tick, computor),
                store.vote(tick, computor),
                "tick {tick} computor {computor}"
            );
        }
    }

    let original = store.transactions();
    let recovered = restored.transactions();
    assert_eq!(recovered.next_offset(), saved_next);
    for tick in 1000..=end_tick {
        let row = store.window().index_current(tick);
        for slot in 0..3 {
            let offset = original.slot(row, slot);
            assert_eq!(recovered.slot(row, slot), offset);
            assert_eq!(
                recovered.tx_at(offset).unwrap().as_bytes(),
                original.tx_at(offset).unwrap().as_bytes()
            );
        }
    }
    drop((original, recovered));

    // Digest lookups work again after the load.
    let probe = tx_bytes(1010, &[1u8; 16]);
    let digest = TxView::parse(&probe).unwrap().digest();
    assert_eq!(restored.find_by_digest(&digest), store.find_by_digest(&digest));
    assert!(restored.find_by_digest(&digest).is_some());

    restored.check_state_consistency();
}

#[test]
fn invalidate_makes_next_load_fail_clean() {
    let dir = tempfile::tempdir().unwrap();
    let store = populated_store();
    store.try_save_to_file(EPOCH, 1019, dir.path()).unwrap();
    store.save_invalidate_data(EPOCH, dir.path()).unwrap();

    let mut fresh = TickStore::new();
    fresh.begin_epoch(1000);
    let error = fresh.try_load_from_file(EPOCH, dir.path()).unwrap_err();
    assert_eq!(error, LoadError::MetadataInvalid);
    assert_eq!(error.code(), 2);

    // In-memory state stays at cold-start defaults.
    assert_eq!(fresh.preload_tick(), 1000);
    assert_eq!(
        fresh.transactions().next_offset(),
        nacre::config::FIRST_TICK_TRANSACTION_OFFSET
    );
    assert!(fresh.tick_data(1005).is_none());
    fresh.check_state_consistency();
}

#[test]
fn save_requires_tick_past_window_start() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = TickStore::new();
    store.begin_epoch(1000);
    assert_eq!(
        store.try_save_to_file(EPOCH, 1000, dir.path()),
        Err(SaveError::EndTickOutOfRange)
    );
    assert_eq!(SaveError::EndTickOutOfRange.code(), 6);
}

#[test]
fn load_rejects_missing_or_mismatched_metadata() {
    let dir = tempfile::tempdir().unwrap();

    let mut store = TickStore::new();
    store.begin_epoch(1000);
    assert_eq!(
        store.try_load_from_file(EPOCH, dir.path()),
        Err(LoadError::MetadataRead)
    );

    // A snapshot saved for another epoch fails the epoch check.
    let saved = populated_store();
    saved.try_save_to_file(EPOCH, 1019, dir.path()).unwrap();
    assert_eq!(
        store.try_load_from_file(EPOCH + 1, dir.path()),
        Err(LoadError::MetadataRead)
    );

    // A window that moved after the save fails the begin check.
    let mut moved = TickStore::new();
    moved.begin_epoch(1500);
    assert_eq!(
        moved.try_load_from_file(EPOCH, dir.path()),
        Err(LoadError::MetadataInvalid)
    );
}

#[test]
fn metadata_is_the_commit_marker() {
    let dir = tempfile::tempdir().unwrap();
    let store = populated_store();
    store.try_save_to_file(EPOCH, 1019, dir.path()).unwrap();

    // Lose one data file: the metadata still validates, the load then fails
    // at that phase and resets cleanly.
    std::fs::remove_file(dir.path().join(format!("snapshotTicks.{EPOCH:03}"))).unwrap();

    let mut restored = TickStore::new();
    restored.begin_epoch(1000);
    let error = restored.try_load_from_file(EPOCH, dir.path()).unwrap_err();
    assert_eq!(error, LoadError::Ticks);
    assert_eq!(restored.preload_tick(), 1000);
}

#[test]
fn repeated_saves_reuse_the_scan_floor() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = TickStore::new();
    store.begin_epoch(1000);

    for tick in 1000..1005 {
        store.add_transaction(0, &tx_bytes(tick, b"first")).unwrap();
    }
    store.try_save_to_file(EPOCH, 1004, dir.path()).unwrap();
    let first_next = store.transactions().next_offset();

    for tick in 1005..1010 {
        store.add_transaction(0, &tx_bytes(tick, b"second")).unwrap();
    }
    store.try_save_to_file(EPOCH, 1009, dir.path()).unwrap();

    let mut restored = TickStore::new();
    restored.begin_epoch(1000);
    restored.try_load_from_file(EPOCH, dir.path()).unwrap();
    let recovered_next = restored.transactions().next_offset();
    assert!(recovered_next > first_next);
    assert_eq!(recovered_next, store.transactions().next_offset());
    restored.check_state_consistency();
}
