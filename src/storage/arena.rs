//! Transaction arena: one contiguous byte buffer filled by bump append, plus
//! the (tick, slot) → offset table pointing into it. Nothing is ever freed
//! in place; space comes back wholesale at epoch rollover.

use parking_lot::{Mutex, MutexGuard};

use crate::config::{
    ARENA_SIZE, ARENA_SIZE_CURRENT_EPOCH, ARENA_SIZE_PREVIOUS_EPOCH,
    FIRST_TICK_TRANSACTION_OFFSET, MAX_TICKS_PER_EPOCH, SLOT_TABLE_LEN, SLOT_TABLE_LEN_CURRENT,
    TICK_CAPACITY, TRANSACTIONS_PER_TICK,
};
use crate::storage::epoch::{EpochWindow, Transition};
use crate::tx::TxView;

/// Why an append was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AppendError {
    /// Tick index or slot index outside the table.
    SlotOutOfRange = 1,
    /// The slot already points at a transaction.
    SlotOccupied = 2,
    /// Bump pointer would cross the current-epoch boundary.
    ArenaFull = 3,
    /// Bytes do not parse as a transaction.
    MalformedTransaction = 4,
    /// Transaction tick outside the window of the owning store (set by the
    /// stores that map ticks to rows, not by the arena itself).
    TickOutOfRange = 5,
}

/// The lockable arena state. Obtain it through [`TxArena::lock`]; holding the
/// guard is the read discipline every returned [`TxView`] relies on.
pub struct ArenaState {
    bytes: Box<[u8]>,
    slots: Box<[u64]>,
    next_offset: u64,
}

/// Coarse-locked arena + slot table covering both epoch regions.
pub struct TxArena {
    inner: Mutex<ArenaState>,
}

impl TxArena {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ArenaState {
                bytes: vec![0u8; ARENA_SIZE as usize].into_boxed_slice(),
                slots: vec![0u64; SLOT_TABLE_LEN].into_boxed_slice(),
                next_offset: FIRST_TICK_TRANSACTION_OFFSET,
            }),
        }
    }

    /// Take the coarse arena lock. Appends and transaction reads both go
    /// through the guard.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, ArenaState> {
        self.inner.lock()
    }

    /// Lock-free access for exclusive phases (rollover, snapshot load).
    #[inline]
    pub(crate) fn state_mut(&mut self) -> &mut ArenaState {
        self.inner.get_mut()
    }

    /// Shift the window: carry the tail of the current region into the
    /// previous-epoch region (rebasing every surviving slot offset), then
    /// clear the current region and reset the bump pointer.
    pub fn begin_epoch(&mut self, transition: Transition) {
        let state = self.inner.get_mut();
        match transition {
            Transition::Seamless {
                keep_first_index,
                keep_count,
            } => state.roll_over(keep_first_index, keep_count),
            Transition::ColdStart => {
                state.bytes.fill(0);
                state.slots.fill(0);
                state.next_offset = FIRST_TICK_TRANSACTION_OFFSET;
            }
        }
    }

    /// Expensive sanity sweep over both regions. Panics on violation.
    pub fn check_consistency(&self, window: &EpochWindow) {
        let state = self.inner.lock();
        assert!(state.next_offset >= FIRST_TICK_TRANSACTION_OFFSET);
        assert!(state.next_offset <= ARENA_SIZE_CURRENT_EPOCH);

        for tick in window.old_tick_begin..window.old_tick_end {
            let row = state.slot_row(window.index_previous(tick));
            for &offset in row {
                if offset != 0 {
                    assert!(offset >= ARENA_SIZE_CURRENT_EPOCH && offset < ARENA_SIZE);
                    let tx = state.tx_at(offset).expect("previous-epoch slot points at garbage");
                    assert!(tx.check_validity());
                    assert_eq!(tx.tick(), tick);
                }
            }
        }

        let mut last_end = FIRST_TICK_TRANSACTION_OFFSET;
        for tick in window.tick_begin..window.tick_end {
            let row = state.slot_row(window.index_current(tick));
            for &offset in row {
                if offset != 0 {
                    assert!(offset >= FIRST_TICK_TRANSACTION_OFFSET);
                    assert!(offset < ARENA_SIZE_CURRENT_EPOCH);
                    let tx = state.tx_at(offset).expect("current-epoch slot points at garbage");
                    assert!(tx.check_validity());
                    assert_eq!(tx.tick(), tick);
                    last_end = last_end.max(offset + tx.total_size() as u64);
                }
            }
        }
        assert_eq!(last_end, state.next_offset);
    }
}

impl Default for TxArena {
    fn default() -> Self {
        Self::new()
    }
}

impl ArenaState {
    /// Bump pointer: everything in
    /// `[FIRST_TICK_TRANSACTION_OFFSET, next_offset)` is live current-epoch
    /// transaction bytes.
    #[inline(always)]
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// Bytes available to the current epoch, bump pointer included.
    #[inline(always)]
    pub fn storage_space_current_epoch(&self) -> u64 {
        ARENA_SIZE_CURRENT_EPOCH
    }

    /// Whether a transaction of `size` bytes still fits the current region.
    #[inline(always)]
    pub fn fits(&self, size: usize) -> bool {
        self.next_offset + size as u64 <= ARENA_SIZE_CURRENT_EPOCH
    }

    /// Offset stored for (tick row, slot), 0 meaning empty.
    #[inline]
    pub fn slot(&self, tick_index: usize, slot_index: usize) -> u64 {
        debug_assert!(tick_index < TICK_CAPACITY);
        debug_assert!(slot_index < TRANSACTIONS_PER_TICK);
        self.slots[tick_index * TRANSACTIONS_PER_TICK + slot_index]
    }

    /// Full offset row of one tick.
    #[inline]
    pub fn slot_row(&self, tick_index: usize) -> &[u64] {
        debug_assert!(tick_index < TICK_CAPACITY);
        let base = tick_index * TRANSACTIONS_PER_TICK;
        &self.slots[base..base + TRANSACTIONS_PER_TICK]
    }

    /// Transaction at an arena offset, bounded by the region the offset falls
    /// in (transactions never straddle the region boundary).
    #[inline]
    pub fn tx_at(&self, offset: u64) -> Option<TxView<'_>> {
        if offset < FIRST_TICK_TRANSACTION_OFFSET || offset >= ARENA_SIZE {
            return None;
        }
        let region_end = if offset < ARENA_SIZE_CURRENT_EPOCH {
            ARENA_SIZE_CURRENT_EPOCH
        } else {
            ARENA_SIZE
        };
        TxView::parse(&self.bytes[offset as usize..region_end as usize])
    }

    /// Transaction behind a slot entry, if any.
    #[inline]
    pub fn tx_in_slot(&self, tick_index: usize, slot_index: usize) -> Option<TxView<'_>> {
        match self.slot(tick_index, slot_index) {
            0 => None,
            offset => self.tx_at(offset),
        }
    }

    /// Append protocol: bump-fit check, copy at `next_offset`, advance, and
    /// record the prior bump value in the chosen slot. Returns the offset the
    /// transaction now lives at.
    pub fn append(
        &mut self,
        tick_index: usize,
        slot_index: usize,
        tx_bytes: &[u8],
    ) -> Result<u64, AppendError> {
        if tick_index >= TICK_CAPACITY || slot_index >= TRANSACTIONS_PER_TICK {
            return Err(AppendError::SlotOutOfRange);
        }
        let tx = TxView::parse(tx_bytes).ok_or(AppendError::MalformedTransaction)?;
        let size = tx.total_size();
        if tx_bytes.len() != size {
            return Err(AppendError::MalformedTransaction);
        }
        if !self.fits(size) {
            return Err(AppendError::ArenaFull);
        }

        let entry = tick_index * TRANSACTIONS_PER_TICK + slot_index;
        if self.slots[entry] != 0 {
            return Err(AppendError::SlotOccupied);
        }

        let offset = self.next_offset;
        self.bytes[offset as usize..offset as usize + size].copy_from_slice(tx_bytes);
        self.next_offset += size as u64;
        self.slots[entry] = offset;
        Ok(offset)
    }

    /// Shift a slot row so its non-zero entries start at slot 0, preserving
    /// order. Returns how many leading empty slots were removed
    /// ([`TRANSACTIONS_PER_TICK`] when the row holds nothing at all).
    pub(crate) fn compact_slot_row_front(&mut self, tick_index: usize) -> usize {
        let base = tick_index * TRANSACTIONS_PER_TICK;
        let row = &mut self.slots[base..base + TRANSACTIONS_PER_TICK];
        let shift = match row.iter().position(|&offset| offset != 0) {
            Some(first) => first,
            None => return TRANSACTIONS_PER_TICK,
        };
        if shift > 0 {
            row.copy_within(shift.., 0);
            row[TRANSACTIONS_PER_TICK - shift..].fill(0);
        }
        shift
    }

    fn roll_over(&mut self, keep_first_index: u32, keep_count: u32) {
        let used = self.next_offset - FIRST_TICK_TRANSACTION_OFFSET;
        let keep = used.min(ARENA_SIZE_PREVIOUS_EPOCH);
        let first_to_keep_offset = self.next_offset - keep;
        let offset_delta = (ARENA_SIZE_CURRENT_EPOCH + keep) - self.next_offset;

        // Stale previous-epoch data first, so short keeps leave no residue.
        self.bytes[ARENA_SIZE_CURRENT_EPOCH as usize..].fill(0);
        self.slots[SLOT_TABLE_LEN_CURRENT..].fill(0);

        self.bytes.copy_within(
            first_to_keep_offset as usize..self.next_offset as usize,
            ARENA_SIZE_CURRENT_EPOCH as usize,
        );

        for t in 0..keep_count as usize {
            let cur_base = (keep_first_index as usize + t) * TRANSACTIONS_PER_TICK;
            let prev_base = (MAX_TICKS_PER_EPOCH as usize + t) * TRANSACTIONS_PER_TICK;
            for s in 0..TRANSACTIONS_PER_TICK {
                let offset = self.slots[cur_base + s];
                self.slots[prev_base + s] = if offset == 0 || offset < first_to_keep_offset {
                    // Dropped: not stored, or does not fit the previous-epoch
                    // region.
                    0
                } else {
                    offset + offset_delta
                };
            }
        }

        self.bytes[..ARENA_SIZE_CURRENT_EPOCH as usize].fill(0);
        self.slots[..SLOT_TABLE_LEN_CURRENT].fill(0);
        self.next_offset = FIRST_TICK_TRANSACTION_OFFSET;
    }

    // ---- Snapshot plumbing (bytes in, bytes out; layout = memory) ----------

    #[cfg(feature = "snapshot")]
    pub(crate) fn arena_bytes(&self, len: usize) -> &[u8] {
        &self.bytes[..len]
    }

    #[cfg(feature = "snapshot")]
    pub(crate) fn arena_bytes_mut(&mut self, len: usize) -> &mut [u8] {
        &mut self.bytes[..len]
    }

    #[cfg(feature = "snapshot")]
    pub(crate) fn slot_table_bytes(&self, tick_rows: usize) -> &[u8] {
        zerocopy::IntoBytes::as_bytes(&self.slots[..tick_rows * TRANSACTIONS_PER_TICK])
    }

    #[cfg(feature = "snapshot")]
    pub(crate) fn slot_table_bytes_mut(&mut self, tick_rows: usize) -> &mut [u8] {
        zerocopy::IntoBytes::as_mut_bytes(&mut self.slots[..tick_rows * TRANSACTIONS_PER_TICK])
    }

    #[cfg(feature = "snapshot")]
    pub(crate) fn set_next_offset(&mut self, offset: u64) {
        self.next_offset = offset;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::{encode_transaction, TxHeader, SIGNATURE_SIZE};
    use zerocopy::little_endian::{I64, U16, U32};

    fn tx_bytes(tick: u32, input: &[u8]) -> Vec<u8> {
        let header = TxHeader {
            source_public_key: [3u8; 32],
            destination_public_key: [4u8; 32],
            amount: I64::new(7),
            tick: U32::new(tick),
            input_type: U16::new(0),
            input_size: U16::new(input.len() as u16),
        };
        encode_transaction(&header, input, &[9u8; SIGNATURE_SIZE])
    }

    #[test]
    fn test_append_records_prior_bump_value() {
        let arena = TxArena::new();
        let mut state = arena.lock();
        let bytes = tx_bytes(10, b"abc");

        let offset = state.append(10, 0, &bytes).unwrap();
        assert_eq!(offset, FIRST_TICK_TRANSACTION_OFFSET);
        assert_eq!(state.slot(10, 0), FIRST_TICK_TRANSACTION_OFFSET);
        assert_eq!(
            state.next_offset(),
            FIRST_TICK_TRANSACTION_OFFSET + bytes.len() as u64
        );

        let tx = state.tx_in_slot(10, 0).unwrap();
        assert_eq!(tx.tick(), 10);
        assert_eq!(tx.input(), b"abc");
    }

    #[test]
    fn test_append_rejects_occupied_slot() {
        let arena = TxArena::new();
        let mut state = arena.lock();
        let bytes = tx_bytes(0, b"");
        state.append(0, 0, &bytes).unwrap();
        assert_eq!(state.append(0, 0, &bytes), Err(AppendError::SlotOccupied));
    }

    #[test]
    fn test_append_rejects_out_of_range() {
        let arena = TxArena::new();
        let mut state = arena.lock();
        let bytes = tx_bytes(0, b"");
        assert_eq!(
            state.append(TICK_CAPACITY, 0, &bytes),
            Err(AppendError::SlotOutOfRange)
        );
        assert_eq!(
            state.append(0, TRANSACTIONS_PER_TICK, &bytes),
            Err(AppendError::SlotOutOfRange)
        );
    }

    #[test]
    fn test_rollover_rebases_surviving_offsets() {
        let mut arena = TxArena::new();
        let tick = 150u32; // current-epoch index 150 with tick_begin = 1000
        let bytes = tx_bytes(1000 + tick, b"keepme");
        let (old_offset, size) = {
            let mut state = arena.lock();
            let offset = state.append(tick as usize, 0, &bytes).unwrap();
            (offset, bytes.len() as u64)
        };

        // Keep ticks [100, 200): row 150 survives at previous-epoch row 50.
        arena.begin_epoch(Transition::Seamless {
            keep_first_index: 100,
            keep_count: 100,
        });

        let state = arena.lock();
        assert_eq!(state.next_offset(), FIRST_TICK_TRANSACTION_OFFSET);
        let prev_row = MAX_TICKS_PER_EPOCH as usize + 50;
        let new_offset = state.slot(prev_row, 0);
        assert_ne!(new_offset, 0);

        // used == size, keep == size: delta = current size + keep - next.
        let expected =
            old_offset + (ARENA_SIZE_CURRENT_EPOCH + size) - (FIRST_TICK_TRANSACTION_OFFSET + size);
        assert_eq!(new_offset, expected);
        assert!(new_offset >= ARENA_SIZE_CURRENT_EPOCH);

        let tx = state.tx_at(new_offset).unwrap();
        assert_eq!(tx.input(), b"keepme");
        assert_eq!(tx.tick(), 1000 + tick);

        // Current region fully cleared.
        assert_eq!(state.slot(tick as usize, 0), 0);
    }

    #[test]
    fn test_cold_start_clears_everything() {
        let mut arena = TxArena::new();
        {
            let mut state = arena.lock();
            let bytes = tx_bytes(3, b"gone");
            state.append(3, 0, &bytes).unwrap();
        }
        arena.begin_epoch(Transition::ColdStart);
        let state = arena.lock();
        assert_eq!(state.next_offset(), FIRST_TICK_TRANSACTION_OFFSET);
        assert_eq!(state.slot(3, 0), 0);
    }
}
