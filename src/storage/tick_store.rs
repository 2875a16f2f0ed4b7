//! Committed per-tick storage: tick headers, per-computor vote rows, the
//! transaction arena, and a digest index over current-epoch transactions.

use core::cell::UnsafeCell;

use parking_lot::{Mutex, MutexGuard};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::{MAX_TICKS_PER_EPOCH, NUMBER_OF_COMPUTORS, TICK_CAPACITY};
use crate::storage::arena::{AppendError, ArenaState, TxArena};
use crate::storage::digest_index::DigestIndex;
use crate::storage::epoch::{EpochWindow, Transition};
use crate::tx::{Digest, TxView};

/// Per-tick header. `epoch == 0` marks an empty row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct TickData {
    pub epoch: u32,
    pub tick: u32,
    pub timestamp: u64,
    pub prev_state_digest: [u8; 32],
    pub tx_digest_root: [u8; 32],
    pub signature: [u8; 64],
}

/// Per-(tick, computor) vote record. `epoch == 0` marks an empty cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct TickVote {
    pub computor_index: u16,
    pub epoch: u16,
    pub tick: u32,
    pub timestamp: u64,
    pub prev_state_digest: [u8; 32],
    pub tx_digest: [u8; 32],
    pub signature: [u8; 64],
}

const _: () = {
    assert!(core::mem::size_of::<TickData>() == 144);
    assert!(core::mem::size_of::<TickVote>() == 144);
};

impl TickData {
    #[inline(always)]
    pub const fn empty() -> Self {
        Self {
            epoch: 0,
            tick: 0,
            timestamp: 0,
            prev_state_digest: [0u8; 32],
            tx_digest_root: [0u8; 32],
            signature: [0u8; 64],
        }
    }
}

impl TickVote {
    #[inline(always)]
    pub const fn empty() -> Self {
        Self {
            computor_index: 0,
            epoch: 0,
            tick: 0,
            timestamp: 0,
            prev_state_digest: [0u8; 32],
            tx_digest: [0u8; 32],
            signature: [0u8; 64],
        }
    }
}

/// Committed tick store. Holds both epoch regions of tick data, vote rows,
/// and transactions; rolls the kept tail over on [`TickStore::begin_epoch`].
///
/// Lock map:
/// - one mutex over all tick headers,
/// - one mutex per computor column of the vote matrix,
/// - one mutex over the digest index,
/// - the arena's own coarse lock.
pub struct TickStore {
    window: EpochWindow,
    tick_data: Mutex<Box<[TickData]>>,
    votes: UnsafeCell<Box<[TickVote]>>,
    vote_locks: Box<[Mutex<()>]>,
    digest_index: Mutex<DigestIndex>,
    arena: TxArena,
    #[cfg(feature = "snapshot")]
    pub(crate) snapshot_meta: Mutex<crate::storage::snapshot::SnapshotMeta>,
    #[cfg(feature = "snapshot")]
    pub(crate) save_scan_floor: core::sync::atomic::AtomicU32,
}

// The vote matrix is behind UnsafeCell: every write goes through the
// owning computor's mutex, reads take the same mutex, and whole-matrix
// access (rollover, snapshot load) requires &mut self.
unsafe impl Sync for TickStore {}
unsafe impl Send for TickStore {}

impl TickStore {
    pub fn new() -> Self {
        let mut vote_locks = Vec::with_capacity(NUMBER_OF_COMPUTORS);
        vote_locks.resize_with(NUMBER_OF_COMPUTORS, || Mutex::new(()));
        Self {
            window: EpochWindow::new(),
            tick_data: Mutex::new(
                vec![TickData::empty(); TICK_CAPACITY].into_boxed_slice(),
            ),
            votes: UnsafeCell::new(
                vec![TickVote::empty(); TICK_CAPACITY * NUMBER_OF_COMPUTORS].into_boxed_slice(),
            ),
            vote_locks: vote_locks.into_boxed_slice(),
            digest_index: Mutex::new(DigestIndex::new()),
            arena: TxArena::new(),
            #[cfg(feature = "snapshot")]
            snapshot_meta: Mutex::new(crate::storage::snapshot::SnapshotMeta::zeroed()),
            #[cfg(feature = "snapshot")]
            save_scan_floor: core::sync::atomic::AtomicU32::new(0),
        }
    }

    #[inline(always)]
    pub fn window(&self) -> &EpochWindow {
        &self.window
    }

    /// The arena lock; transaction reads and raw appends go through it.
    #[inline]
    pub fn transactions(&self) -> MutexGuard<'_, ArenaState> {
        self.arena.lock()
    }

    // ---- Tick data ---------------------------------------------------------

    /// Store a tick header for a current-epoch tick.
    pub fn set_tick_data(&self, data: &TickData) -> bool {
        if !self.window.in_current_epoch(data.tick) {
            return false;
        }
        let index = self.window.index_current(data.tick);
        self.tick_data.lock()[index] = *data;
        true
    }

    /// Tick header for any stored tick, or `None` when outside both regions
    /// or still empty.
    pub fn tick_data(&self, tick: u32) -> Option<TickData> {
        let index = self.window.index_of(tick)?;
        let data = self.tick_data.lock()[index];
        (data.epoch != 0).then_some(data)
    }

    // ---- Votes -------------------------------------------------------------

    /// Store a computor's vote for a current-epoch tick. The cell is guarded
    /// by that computor's lock.
    pub fn store_vote(&self, vote: &TickVote) -> bool {
        let computor = vote.computor_index as usize;
        if computor >= NUMBER_OF_COMPUTORS || vote.epoch == 0 {
            return false;
        }
        if !self.window.in_current_epoch(vote.tick) {
            return false;
        }
        let row = self.window.index_current(vote.tick);
        let _guard = self.vote_locks[computor].lock();
        unsafe {
            self.vote_cell_ptr(row, computor).write(*vote);
        }
        true
    }

    /// Copy of the vote cell for any stored tick, or `None` when the cell is
    /// empty or the tick is not stored.
    pub fn vote(&self, tick: u32, computor: usize) -> Option<TickVote> {
        if computor >= NUMBER_OF_COMPUTORS {
            return None;
        }
        let row = self.window.index_of(tick)?;
        let vote = {
            let _guard = self.vote_locks[computor].lock();
            unsafe { self.vote_cell_ptr(row, computor).read() }
        };
        (vote.epoch != 0).then_some(vote)
    }

    #[inline(always)]
    fn vote_cell_ptr(&self, row: usize, computor: usize) -> *mut TickVote {
        debug_assert!(row < TICK_CAPACITY && computor < NUMBER_OF_COMPUTORS);
        unsafe { (*self.votes.get()).as_mut_ptr().add(row * NUMBER_OF_COMPUTORS + computor) }
    }

    // ---- Transactions ------------------------------------------------------

    /// Record a committed transaction in the chosen slot of its tick: append
    /// to the arena under the arena lock, then index its digest.
    pub fn add_transaction(&self, slot_index: usize, tx_bytes: &[u8]) -> Result<u64, AppendError> {
        let tx = TxView::parse(tx_bytes).ok_or(AppendError::MalformedTransaction)?;
        if !tx.check_validity() {
            return Err(AppendError::MalformedTransaction);
        }
        if !self.window.in_current_epoch(tx.tick()) {
            return Err(AppendError::TickOutOfRange);
        }
        let tick_index = self.window.index_current(tx.tick());

        // Hash outside any lock; insertion order does not matter to probing.
        let digest = tx.digest();

        let offset = self.arena.lock().append(tick_index, slot_index, tx_bytes)?;
        self.digest_index.lock().insert(&digest, offset);
        Ok(offset)
    }

    /// Arena offset of a current-epoch transaction by digest. Dereference
    /// through [`TickStore::transactions`].
    pub fn find_by_digest(&self, digest: &Digest) -> Option<u64> {
        self.digest_index.lock().find(digest)
    }

    // ---- Epoch rollover ----------------------------------------------------

    /// Begin a new epoch at `new_initial_tick`. On a seamless transition the
    /// last [`crate::config::TICKS_TO_KEEP`] ticks of headers, votes, and
    /// transactions move into the previous-epoch region; the current region
    /// and the digest index start empty either way.
    pub fn begin_epoch(&mut self, new_initial_tick: u32) {
        let transition = self.window.advance(new_initial_tick);
        log::debug!(
            "tick store epoch rollover: initial tick {new_initial_tick}, {transition:?}"
        );

        let tick_data = self.tick_data.get_mut();
        let votes = self.votes.get_mut();
        match transition {
            Transition::Seamless {
                keep_first_index,
                keep_count,
            } => {
                let first = keep_first_index as usize;
                let count = keep_count as usize;
                let prev = MAX_TICKS_PER_EPOCH as usize;

                tick_data[prev..].fill(TickData::empty());
                tick_data.copy_within(first..first + count, prev);
                tick_data[..prev].fill(TickData::empty());

                let width = NUMBER_OF_COMPUTORS;
                votes[prev * width..].fill(TickVote::empty());
                votes.copy_within(first * width..(first + count) * width, prev * width);
                votes[..prev * width].fill(TickVote::empty());
            }
            Transition::ColdStart => {
                tick_data.fill(TickData::empty());
                votes.fill(TickVote::empty());
            }
        }

        self.arena.begin_epoch(transition);
        self.digest_index.get_mut().clear();

        #[cfg(feature = "snapshot")]
        self.save_scan_floor.store(
            self.window.tick_begin,
            core::sync::atomic::Ordering::Relaxed,
        );
    }

    // ---- Consistency -------------------------------------------------------

    /// Expensive: verify every stored row against the window invariants.
    /// Panics on violation.
    pub fn check_state_consistency(&self) {
        self.window.check_consistency();

        let tick_data = self.tick_data.lock();
        for tick in self.window.old_tick_begin..self.window.old_tick_end {
            self.check_tick_row(&tick_data, self.window.index_previous(tick), tick);
        }
        for tick in self.window.tick_begin..self.window.tick_end {
            self.check_tick_row(&tick_data, self.window.index_current(tick), tick);
        }
        drop(tick_data);

        self.arena.check_consistency(&self.window);
    }

    fn check_tick_row(&self, tick_data: &[TickData], row: usize, tick: u32) {
        let data = &tick_data[row];
        assert!(data.epoch == 0 || data.tick == tick);

        for computor in 0..NUMBER_OF_COMPUTORS {
            let _guard = self.vote_locks[computor].lock();
            let vote = unsafe { self.vote_cell_ptr(row, computor).read() };
            assert!(
                vote.epoch == 0
                    || (vote.tick == tick && vote.computor_index as usize == computor)
            );
        }
    }

    // ---- Snapshot plumbing -------------------------------------------------

    #[cfg(feature = "snapshot")]
    pub(crate) fn tick_data_guard(&self) -> MutexGuard<'_, Box<[TickData]>> {
        self.tick_data.lock()
    }

    #[cfg(feature = "snapshot")]
    pub(crate) fn tick_data_mut(&mut self) -> &mut [TickData] {
        self.tick_data.get_mut()
    }

    /// Run `f` over the first `n_rows` vote rows as raw bytes while holding
    /// every computor lock, the way a consistent on-disk image requires.
    #[cfg(feature = "snapshot")]
    pub(crate) fn with_vote_rows_locked<R>(&self, n_rows: usize, f: impl FnOnce(&[u8]) -> R) -> R {
        let guards: Vec<_> = self.vote_locks.iter().map(|lock| lock.lock()).collect();
        let rows = unsafe {
            core::slice::from_raw_parts(
                (*self.votes.get()).as_ptr(),
                n_rows * NUMBER_OF_COMPUTORS,
            )
        };
        let result = f(rows.as_bytes());
        drop(guards);
        result
    }

    #[cfg(feature = "snapshot")]
    pub(crate) fn vote_rows_mut(&mut self, n_rows: usize) -> &mut [u8] {
        let rows = &mut self.votes.get_mut()[..n_rows * NUMBER_OF_COMPUTORS];
        rows.as_mut_bytes()
    }

    #[cfg(feature = "snapshot")]
    pub(crate) fn arena_mut(&mut self) -> &mut TxArena {
        &mut self.arena
    }

    #[cfg(feature = "snapshot")]
    pub(crate) fn arena_ref(&self) -> &TxArena {
        &self.arena
    }

    #[cfg(feature = "snapshot")]
    pub(crate) fn digest_index_mut(&mut self) -> &mut DigestIndex {
        self.digest_index.get_mut()
    }
}

impl Default for TickStore {
    fn default() -> Self {
        Self::new()
    }
}
