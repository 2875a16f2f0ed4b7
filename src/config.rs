//! Deployment-pinned geometry. These constants are the storage ABI:
//! changing any of them invalidates existing snapshot files.

/// Upper bound on the number of ticks governed by one epoch.
pub const MAX_TICKS_PER_EPOCH: u32 = 1_000;

/// Ticks preserved from the prior epoch across a seamless transition.
pub const TICKS_TO_KEEP: u32 = 100;

/// Vote committee width: one [`TickVote`](crate::storage::TickVote) row slot
/// per computor per tick.
pub const NUMBER_OF_COMPUTORS: usize = 128;

/// Slot-table width: transactions a single tick can carry.
pub const TRANSACTIONS_PER_TICK: usize = 128;

/// Hard upper bound on a serialized transaction (header + input + signature).
pub const MAX_TRANSACTION_SIZE: usize = 1_024;

/// Arena sizing divisor. Not every slot is expected to carry a maximum-size
/// transaction; the arena is provisioned for `1/TRANSACTION_SPARSENESS` of
/// the worst case.
pub const TRANSACTION_SPARSENESS: usize = 4;

/// First usable byte of the transaction arena. Offsets below this value are
/// never handed out, so offset 0 doubles as the "empty slot" sentinel.
pub const FIRST_TICK_TRANSACTION_OFFSET: u64 = 8;

/// Number of contract state images hosted by the execution core.
pub const CONTRACT_COUNT: usize = 8;

/// Width of the stack-allocator pool. Must be at least 2 so one slot can be
/// held back for state writers while readers run.
pub const CONTRACT_EXECUTION_SLOTS: usize = 4;

/// Per-slot bump capacity for contract locals, inputs, and outputs.
pub const CONTRACT_STACK_CAPACITY: usize = 32 * 1024 * 1024;

const _: () = {
    assert!(CONTRACT_EXECUTION_SLOTS >= 2);
    assert!(TICKS_TO_KEEP <= MAX_TICKS_PER_EPOCH);
    assert!(FIRST_TICK_TRANSACTION_OFFSET > 0);
};

// ---- Derived geometry ------------------------------------------------------

/// Tick rows held in memory: one epoch plus the kept tail of the prior one.
pub const TICK_CAPACITY: usize = (MAX_TICKS_PER_EPOCH + TICKS_TO_KEEP) as usize;

/// Slot-table entries covering the current epoch.
pub const SLOT_TABLE_LEN_CURRENT: usize =
    MAX_TICKS_PER_EPOCH as usize * TRANSACTIONS_PER_TICK;

/// Slot-table entries covering both epochs.
pub const SLOT_TABLE_LEN: usize = TICK_CAPACITY * TRANSACTIONS_PER_TICK;

/// Bytes of the current-epoch arena region, including the reserved prefix.
pub const ARENA_SIZE_CURRENT_EPOCH: u64 = FIRST_TICK_TRANSACTION_OFFSET
    + (MAX_TICKS_PER_EPOCH as u64
        * TRANSACTIONS_PER_TICK as u64
        * MAX_TRANSACTION_SIZE as u64
        / TRANSACTION_SPARSENESS as u64);

/// Bytes of the previous-epoch arena region.
pub const ARENA_SIZE_PREVIOUS_EPOCH: u64 = TICKS_TO_KEEP as u64
    * TRANSACTIONS_PER_TICK as u64
    * MAX_TRANSACTION_SIZE as u64
    / TRANSACTION_SPARSENESS as u64;

/// Total arena bytes.
pub const ARENA_SIZE: u64 = ARENA_SIZE_CURRENT_EPOCH + ARENA_SIZE_PREVIOUS_EPOCH;

/// Capacity of the digest index. Equals the maximum number of transactions a
/// single epoch can commit, so the table can never be over-inserted.
pub const DIGEST_INDEX_CAPACITY: usize =
    MAX_TICKS_PER_EPOCH as usize * TRANSACTIONS_PER_TICK;

/// Words of the contract state-change bitmap.
pub const STATE_CHANGE_FLAG_WORDS: usize = CONTRACT_COUNT.div_ceil(64);

const _: () = {
    assert!(ARENA_SIZE_PREVIOUS_EPOCH < ARENA_SIZE_CURRENT_EPOCH);
    assert!(SLOT_TABLE_LEN == SLOT_TABLE_LEN_CURRENT + TICKS_TO_KEEP as usize * TRANSACTIONS_PER_TICK);
    assert!(STATE_CHANGE_FLAG_WORDS >= 1);
};
