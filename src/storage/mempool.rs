//! Pending-transaction pool: an arena + slot table overlay with per-tick
//! admission counts and a per-(tick, slot) digest array, covering the same
//! two epoch regions as the committed store.

use parking_lot::{Mutex, MutexGuard};

use crate::config::{
    MAX_TICKS_PER_EPOCH, SLOT_TABLE_LEN, SLOT_TABLE_LEN_CURRENT, TICK_CAPACITY,
    TRANSACTIONS_PER_TICK,
};
use crate::storage::arena::{ArenaState, TxArena};
use crate::storage::epoch::{EpochWindow, Transition};
use crate::tx::{Digest, TxView};

/// Pending pool. Admission is guarded by the count lock first, then the
/// digest and arena locks; taking them in any other order deadlocks.
pub struct TxsPool {
    window: EpochWindow,
    counts: Mutex<Box<[u32]>>,
    digests: Mutex<Box<[Digest]>>,
    arena: TxArena,
}

/// Read access to pending transactions and digests. Holding this guard is
/// the discipline that keeps returned views alive; it releases the arena
/// lock first and the digest lock second, mirroring acquisition in reverse.
pub struct PoolRead<'a> {
    window: &'a EpochWindow,
    arena: MutexGuard<'a, ArenaState>,
    digests: MutexGuard<'a, Box<[Digest]>>,
}

impl TxsPool {
    pub fn new() -> Self {
        Self {
            window: EpochWindow::new(),
            counts: Mutex::new(vec![0u32; TICK_CAPACITY].into_boxed_slice()),
            digests: Mutex::new(vec![[0u8; 32]; SLOT_TABLE_LEN].into_boxed_slice()),
            arena: TxArena::new(),
        }
    }

    #[inline(always)]
    pub fn window(&self) -> &EpochWindow {
        &self.window
    }

    /// Validate and admit one serialized transaction. Returns `true` iff the
    /// transaction was stored: structurally valid, scheduled for a
    /// current-epoch tick, tick not at slot capacity, and arena space left.
    pub fn update(&self, tx_bytes: &[u8]) -> bool {
        let Some(tx) = TxView::parse(tx_bytes) else {
            return false;
        };
        if !tx.check_validity() || !self.window.in_current_epoch(tx.tick()) {
            return false;
        }
        let tick_index = self.window.index_current(tx.tick());

        // Pure function of the bytes; hash before touching any lock.
        let digest = tx.digest();

        let mut counts = self.counts.lock();
        let count = counts[tick_index] as usize;
        if count >= TRANSACTIONS_PER_TICK {
            return false;
        }

        let mut digests = self.digests.lock();
        let mut arena = self.arena.lock();
        if arena.append(tick_index, count, tx_bytes).is_err() {
            return false;
        }
        digests[tick_index * TRANSACTIONS_PER_TICK + count] = digest;
        counts[tick_index] += 1;
        true
    }

    /// Take the read locks (digest, then arena) for pointer-stable access.
    pub fn read(&self) -> PoolRead<'_> {
        let digests = self.digests.lock();
        let arena = self.arena.lock();
        PoolRead {
            window: &self.window,
            arena,
            digests,
        }
    }

    /// Number of pending transactions stored for one tick.
    pub fn tick_tx_count(&self, tick: u32) -> u32 {
        match self.window.index_of(tick) {
            Some(index) => self.counts.lock()[index],
            None => 0,
        }
    }

    /// Number of transactions scheduled strictly after `tick`, in temporal
    /// order across both epoch regions.
    pub fn pending_after(&self, tick: u32) -> u32 {
        let window = &self.window;
        let mut start_current = window.tick_end;
        let mut start_old = window.old_tick_end;

        if tick < window.old_tick_begin {
            start_current = window.tick_begin;
            start_old = window.old_tick_begin;
        } else if window.in_previous_epoch(tick) {
            start_current = window.tick_begin;
            start_old = tick + 1;
        } else if window.in_current_epoch(tick) {
            start_current = tick + 1;
        }

        let counts = self.counts.lock();
        let mut total = 0u32;
        for t in start_current..window.tick_end {
            total += counts[window.index_current(t)];
        }
        for t in start_old..window.old_tick_end {
            total += counts[window.index_previous(t)];
        }
        total
    }

    /// Begin a new epoch. On a seamless transition the kept ticks' digests
    /// and counts follow the arena into the previous-epoch region; dropped
    /// transactions (rebased out of the previous-epoch arena) are compacted
    /// away so each kept tick's entries stay contiguous from slot 0.
    pub fn begin_epoch(&mut self, new_initial_tick: u32) {
        let transition = self.window.advance(new_initial_tick);
        log::debug!("mempool epoch rollover: initial tick {new_initial_tick}, {transition:?}");

        let counts = self.counts.get_mut();
        let digests = self.digests.get_mut();
        match transition {
            Transition::Seamless {
                keep_first_index,
                keep_count,
            } => {
                let first = keep_first_index as usize;
                let count = keep_count as usize;
                let prev = MAX_TICKS_PER_EPOCH as usize;
                let width = TRANSACTIONS_PER_TICK;

                digests[prev * width..].fill([0u8; 32]);
                digests.copy_within(first * width..(first + count) * width, prev * width);
                counts[prev..].fill(0);
                counts.copy_within(first..first + count, prev);

                digests[..SLOT_TABLE_LEN_CURRENT].fill([0u8; 32]);
                counts[..prev].fill(0);

                self.arena.begin_epoch(transition);
                self.compact_previous_epoch();
            }
            Transition::ColdStart => {
                digests.fill([0u8; 32]);
                counts.fill(0);
                self.arena.begin_epoch(transition);
            }
        }
    }

    /// Align counts, digests, and slot rows with the rebasing the arena just
    /// did: rollover zeroes offsets that no longer fit, and those form a
    /// prefix of each row (slots fill in admission order, oldest first).
    fn compact_previous_epoch(&mut self) {
        let counts = self.counts.get_mut();
        let digests = self.digests.get_mut();
        let mut arena = self.arena.lock();

        for row in MAX_TICKS_PER_EPOCH as usize..TICK_CAPACITY {
            let count = counts[row] as usize;
            let dropped = arena.compact_slot_row_front(row);
            if count == 0 {
                continue;
            }
            let shift = dropped.min(count);
            if shift == 0 {
                continue;
            }

            let base = row * TRANSACTIONS_PER_TICK;
            digests.copy_within(base + shift..base + count, base);
            digests[base + count - shift..base + count].fill([0u8; 32]);
            counts[row] = (count - shift) as u32;
        }
    }

    /// Expensive: verify counts, digests, and arena agree. Panics on
    /// violation.
    pub fn check_state_consistency(&self) {
        self.window.check_consistency();

        {
            let counts = self.counts.lock();
            let read = self.read();
            let ticks = (self.window.old_tick_begin..self.window.old_tick_end)
                .chain(self.window.tick_begin..self.window.tick_end);
            for tick in ticks {
                let index = match self.window.index_of(tick) {
                    Some(index) => index,
                    None => continue,
                };
                let count = counts[index] as usize;
                assert!(count <= TRANSACTIONS_PER_TICK);
                for slot in 0..TRANSACTIONS_PER_TICK {
                    let stored = read.arena.slot(index, slot);
                    if slot < count {
                        assert_ne!(stored, 0);
                        assert_ne!(
                            read.digests[index * TRANSACTIONS_PER_TICK + slot],
                            [0u8; 32]
                        );
                    } else {
                        assert_eq!(stored, 0);
                    }
                }
            }
        }

        self.arena.check_consistency(&self.window);
    }
}

impl Default for TxsPool {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> PoolRead<'a> {
    /// The locked arena state, for offset-level inspection.
    #[inline(always)]
    pub fn arena(&self) -> &ArenaState {
        &self.arena
    }

    /// Pending transaction for (tick, index), or `None` past the stored
    /// count or outside both regions.
    pub fn get(&self, tick: u32, index: usize) -> Option<TxView<'_>> {
        if index >= TRANSACTIONS_PER_TICK {
            return None;
        }
        let tick_index = self.window.index_of(tick)?;
        self.arena.tx_in_slot(tick_index, index)
    }

    /// Digest recorded at admission for (tick, index), or `None`.
    pub fn get_digest(&self, tick: u32, index: usize) -> Option<Digest> {
        if index >= TRANSACTIONS_PER_TICK {
            return None;
        }
        let tick_index = self.window.index_of(tick)?;
        let digest = self.digests[tick_index * TRANSACTIONS_PER_TICK + index];
        (digest != [0u8; 32]).then_some(digest)
    }
}
