//! Mempool admission and read paths: acceptance, rejection, pending counts
//! in temporal order, and the count/arena/digest agreement.

use nacre::config::{FIRST_TICK_TRANSACTION_OFFSET, TRANSACTIONS_PER_TICK};
use nacre::prelude::*;
use nacre::tx::{MAX_AMOUNT, TX_HEADER_SIZE};

fn header(tick: u32, amount: i64, input_len: usize) -> TxHeader {
    TxHeader {
        source_public_key: [0x44; 32],
        destination_public_key: [0x55; 32],
        amount: I64::new(amount),
        tick: U32::new(tick),
        input_type: U16::new(0),
        input_size: U16::new(input_len as u16),
    }
}

fn tx_bytes(tick: u32, input: &[u8]) -> Vec<u8> {
    encode_transaction(&header(tick, 500, input.len()), input, &[0x66; 64])
}

/// A transaction whose serialized size is exactly `total` bytes.
fn tx_with_total_size(tick: u32, total: usize) -> Vec<u8> {
    let input = vec![0x77u8; total - TX_HEADER_SIZE - 64];
    tx_bytes(tick, &input)
}

#[test]
fn admit_and_read_back() {
    let mut pool = TxsPool::new();
    pool.begin_epoch(1000);

    let bytes = tx_with_total_size(1005, 200);
    let expected_digest = TxView::parse(&bytes).unwrap().digest();
    assert!(pool.update(&bytes));

    assert_eq!(pool.tick_tx_count(1005), 1);

    let read = pool.read();
    // First admission lands at the first usable arena byte.
    assert_eq!(
        read.arena().slot(pool.window().index_current(1005), 0),
        FIRST_TICK_TRANSACTION_OFFSET
    );
    assert_eq!(
        read.arena().next_offset(),
        FIRST_TICK_TRANSACTION_OFFSET + 200
    );

    let tx = read.get(1005, 0).unwrap();
    assert_eq!(tx.as_bytes(), &bytes[..]);
    assert_eq!(read.get_digest(1005, 0).unwrap(), expected_digest);
    assert!(read.get(1005, 1).is_none());
    assert!(read.get_digest(1005, 1).is_none());
}

#[test]
fn rejects_invalid_and_foreign_ticks() {
    let mut pool = TxsPool::new();
    pool.begin_epoch(1000);

    // Negative amount.
    let bad = encode_transaction(&header(1005, -1, 0), &[], &[0u8; 64]);
    assert!(!pool.update(&bad));

    // Amount above bound.
    let bad = encode_transaction(&header(1005, MAX_AMOUNT + 1, 0), &[], &[0u8; 64]);
    assert!(!pool.update(&bad));

    // Tick before and after the window.
    assert!(!pool.update(&tx_bytes(999, b"")));
    assert!(!pool.update(&tx_bytes(pool.window().tick_end, b"")));

    // Truncated bytes.
    let good = tx_bytes(1005, b"abc");
    assert!(!pool.update(&good[..good.len() - 1]));

    assert_eq!(pool.tick_tx_count(1005), 0);
    let read = pool.read();
    assert_eq!(read.arena().next_offset(), FIRST_TICK_TRANSACTION_OFFSET);
}

#[test]
fn capacity_reject_leaves_arena_untouched() {
    let mut pool = TxsPool::new();
    pool.begin_epoch(1000);

    for i in 0..TRANSACTIONS_PER_TICK {
        assert!(pool.update(&tx_bytes(1005, &(i as u32).to_le_bytes())));
    }
    assert_eq!(pool.tick_tx_count(1005), TRANSACTIONS_PER_TICK as u32);

    let before = {
        let read = pool.read();
        read.arena().next_offset()
    };
    assert!(!pool.update(&tx_bytes(1005, b"one too many")));
    let read = pool.read();
    assert_eq!(read.arena().next_offset(), before);
    assert_eq!(pool.tick_tx_count(1005), TRANSACTIONS_PER_TICK as u32);
}

#[test]
fn admission_is_additive_per_success() {
    let mut pool = TxsPool::new();
    pool.begin_epoch(1000);

    for expected in 1..=5u32 {
        assert!(pool.update(&tx_bytes(1010, &expected.to_le_bytes())));
        assert_eq!(pool.tick_tx_count(1010), expected);
        assert_eq!(pool.pending_after(1009), expected);
    }
    // A failed update changes nothing.
    assert!(!pool.update(&tx_bytes(999, b"")));
    assert_eq!(pool.tick_tx_count(1010), 5);
}

#[test]
fn pending_counts_follow_temporal_order() {
    let mut pool = TxsPool::new();
    pool.begin_epoch(1000);

    for tick in [1150u32, 1151, 1180] {
        assert!(pool.update(&tx_bytes(tick, b"old-epoch")));
    }
    pool.begin_epoch(1200);
    for tick in [1200u32, 1201, 1250] {
        assert!(pool.update(&tx_bytes(tick, b"new-epoch")));
    }

    // Before both ranges: everything (old range is [1100, 1200)).
    assert_eq!(pool.pending_after(1099), 6);
    // Inside the previous range: the rest of it plus the current epoch.
    assert_eq!(pool.pending_after(1150), 5);
    assert_eq!(pool.pending_after(1180), 3);
    // Inside the current range.
    assert_eq!(pool.pending_after(1200), 2);
    assert_eq!(pool.pending_after(1201), 1);
    assert_eq!(pool.pending_after(1250), 0);
    // Past everything.
    assert_eq!(pool.pending_after(2199), 0);

    pool.check_state_consistency();
}

#[test]
fn arena_exhaustion_rejects_admission() {
    let mut pool = TxsPool::new();
    pool.begin_epoch(1000);

    // Largest admissible transaction, repeated across many ticks until the
    // current-epoch region cannot take another one.
    let big = tx_with_total_size(1000, nacre::config::MAX_TRANSACTION_SIZE);
    let per_tx = big.len() as u64;
    let capacity =
        nacre::config::ARENA_SIZE_CURRENT_EPOCH - FIRST_TICK_TRANSACTION_OFFSET;
    let fitting = (capacity / per_tx) as usize;

    let mut admitted = 0usize;
    'outer: for tick in 1000..pool.window().tick_end {
        for _ in 0..TRANSACTIONS_PER_TICK {
            if admitted == fitting {
                break 'outer;
            }
            assert!(
                pool.update(&tx_with_total_size(tick, nacre::config::MAX_TRANSACTION_SIZE)),
                "admission {admitted} should fit"
            );
            admitted += 1;
        }
    }

    // The next full-size transaction no longer fits anywhere.
    let tick = pool.window().tick_begin + 900;
    assert!(!pool.update(&tx_with_total_size(tick, nacre::config::MAX_TRANSACTION_SIZE)));
    assert_eq!(pool.tick_tx_count(tick), 0);
}
