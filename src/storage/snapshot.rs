//! Five-file on-disk snapshot of the committed tick store. Layout on disk is
//! the in-memory layout, little-endian, no transform; the metadata file is
//! written last and acts as the commit marker.

use core::fmt::Write as _;
use core::sync::atomic::Ordering;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use arrayvec::ArrayString;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::{
    ARENA_SIZE_CURRENT_EPOCH, FIRST_TICK_TRANSACTION_OFFSET, MAX_TICKS_PER_EPOCH,
    TRANSACTIONS_PER_TICK,
};
use crate::storage::arena::ArenaState;
use crate::storage::tick_store::TickStore;

const METADATA_FILE: &str = "snapshotMetadata";
const TICK_DATA_FILE: &str = "snapshotTickdata";
const TICKS_FILE: &str = "snapshotTicks";
const OFFSETS_FILE: &str = "snapshotTickTransactionOffsets";
const TRANSACTIONS_FILE: &str = "snapshotTickTransaction";

/// Commit record. A load is only attempted when this file parses and passes
/// the range checks; anything else is a cold start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct SnapshotMeta {
    pub epoch: u32,
    pub tick_begin: u32,
    pub tick_end: u32,
    _pad: [u8; 4],
    pub total_transaction_size: i64,
    pub next_tick_transaction_offset: u64,
}

const _: () = {
    assert!(core::mem::size_of::<SnapshotMeta>() == 32);
};

impl SnapshotMeta {
    #[inline(always)]
    pub const fn zeroed() -> Self {
        Self {
            epoch: 0,
            tick_begin: 0,
            tick_end: 0,
            _pad: [0u8; 4],
            total_transaction_size: 0,
            next_tick_transaction_offset: 0,
        }
    }
}

/// Save failure, by phase. `code()` yields the small positive return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SaveError {
    /// Metadata file (the commit marker) did not land.
    Metadata = 1,
    /// Arena bytes did not land.
    Transactions = 2,
    /// Slot-table file did not land.
    Offsets = 3,
    /// Vote rows did not land.
    Ticks = 4,
    /// Tick headers did not land.
    TickData = 5,
    /// `tick` does not lie after the window's first tick.
    EndTickOutOfRange = 6,
}

/// Load failure, by phase. Any failure reinitializes the metadata so the
/// node proceeds from a cold in-memory state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoadError {
    /// Metadata file missing or short.
    MetadataRead = 1,
    /// Metadata failed the range or epoch checks.
    MetadataInvalid = 2,
    /// Slot-table file missing or short.
    Offsets = 3,
    /// Vote rows missing or short.
    Ticks = 4,
    /// Tick headers missing or short.
    TickData = 5,
    /// Arena bytes missing or short.
    Transactions = 6,
}

impl SaveError {
    #[inline(always)]
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl LoadError {
    #[inline(always)]
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// `<stem>.<EEE>` — three decimal digits of the epoch, fixed width.
fn snapshot_filename(stem: &str, epoch: u32) -> ArrayString<48> {
    let mut name = ArrayString::new();
    // Stems are compile-time constants that fit with room to spare.
    let _ = write!(name, "{stem}.{:03}", epoch % 1000);
    name
}

fn write_snapshot_file(dir: &Path, stem: &str, epoch: u32, bytes: &[u8]) -> bool {
    let path = dir.join(snapshot_filename(stem, epoch).as_str());
    let result = File::create(&path).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    match result {
        Ok(()) => true,
        Err(error) => {
            log::warn!("failed to write {}: {error}", path.display());
            false
        }
    }
}

fn read_snapshot_file(dir: &Path, stem: &str, epoch: u32, bytes: &mut [u8]) -> bool {
    let path = dir.join(snapshot_filename(stem, epoch).as_str());
    let result = File::open(&path).and_then(|mut file| file.read_exact(bytes));
    match result {
        Ok(()) => true,
        Err(error) => {
            log::warn!("failed to read {}: {error}", path.display());
            false
        }
    }
}

impl TickStore {
    /// Tick the last valid snapshot reaches up to; where a restarted node
    /// resumes syncing from.
    pub fn preload_tick(&self) -> u32 {
        self.snapshot_meta.lock().tick_end
    }

    /// Save a snapshot covering `[tick_begin, tick]` inclusive. Each phase
    /// runs under the locks of the region it copies; the metadata record is
    /// written last so a torn save can never pass validation.
    pub fn try_save_to_file(&self, epoch: u32, tick: u32, dir: &Path) -> Result<(), SaveError> {
        let window = *self.window();
        if tick <= window.tick_begin {
            return Err(SaveError::EndTickOutOfRange);
        }
        let n_tick = (tick - window.tick_begin + 1) as usize;

        log::info!("saving tick data");
        {
            let tick_data = self.tick_data_guard();
            if !write_snapshot_file(dir, TICK_DATA_FILE, epoch, tick_data[..n_tick].as_bytes()) {
                return Err(SaveError::TickData);
            }
        }

        log::info!("saving quorum ticks");
        let saved = self.with_vote_rows_locked(n_tick, |bytes| {
            write_snapshot_file(dir, TICKS_FILE, epoch, bytes)
        });
        if !saved {
            return Err(SaveError::Ticks);
        }

        let (total_transaction_size, next_tick_transaction_offset) = {
            let arena = self.arena_ref().lock();

            log::info!("saving tick transaction offsets");
            if !write_snapshot_file(dir, OFFSETS_FILE, epoch, arena.slot_table_bytes(n_tick)) {
                return Err(SaveError::Offsets);
            }

            log::info!("saving transactions");
            let arena_len = self.scan_saved_arena_length(&arena, tick);
            if !write_snapshot_file(
                dir,
                TRANSACTIONS_FILE,
                epoch,
                arena.arena_bytes(arena_len as usize),
            ) {
                return Err(SaveError::Transactions);
            }
            (arena_len as i64, arena_len)
        };

        log::info!("saving snapshot metadata");
        let meta = SnapshotMeta {
            epoch,
            tick_begin: window.tick_begin,
            tick_end: tick,
            _pad: [0u8; 4],
            total_transaction_size,
            next_tick_transaction_offset,
        };
        if !write_snapshot_file(dir, METADATA_FILE, epoch, meta.as_bytes()) {
            return Err(SaveError::Metadata);
        }
        *self.snapshot_meta.lock() = meta;
        Ok(())
    }

    /// Re-derive the live arena length by scanning slot rows from `tick`
    /// downward until the running maximum of `offset + total_size` stops
    /// growing; the floor remembers where the last maximum was found so later
    /// saves skip settled ticks.
    fn scan_saved_arena_length(&self, arena: &ArenaState, tick: u32) -> u64 {
        let window = self.window();
        let floor = self
            .save_scan_floor
            .load(Ordering::Relaxed)
            .max(window.tick_begin);

        let mut max_end = FIRST_TICK_TRANSACTION_OFFSET;
        let mut max_tick = floor;
        for t in (floor..=tick).rev() {
            let row = window.index_current(t);
            for slot in (0..TRANSACTIONS_PER_TICK).rev() {
                let offset = arena.slot(row, slot);
                if offset == 0 {
                    continue;
                }
                if let Some(tx) = arena.tx_at(offset) {
                    let end = offset + tx.total_size() as u64;
                    if end > max_end {
                        max_end = end;
                        max_tick = t;
                    }
                }
            }
        }
        self.save_scan_floor.store(max_tick, Ordering::Relaxed);
        max_end
    }

    /// Load the snapshot saved for `epoch`. Runs once at startup, after
    /// `begin_epoch` has set the window; any failure reinitializes the
    /// metadata and reports which phase broke. Partial loads are not
    /// recoverable.
    pub fn try_load_from_file(&mut self, epoch: u32, dir: &Path) -> Result<(), LoadError> {
        log::info!("loading snapshot metadata");
        let mut meta = SnapshotMeta::zeroed();
        if !read_snapshot_file(dir, METADATA_FILE, epoch, meta.as_mut_bytes()) {
            self.reset_snapshot_meta(epoch);
            return Err(LoadError::MetadataRead);
        }
        if !self.check_snapshot_meta(&meta, epoch) {
            log::warn!("invalid snapshot metadata for epoch {epoch}");
            self.reset_snapshot_meta(epoch);
            return Err(LoadError::MetadataInvalid);
        }
        let n_tick = (meta.tick_end - meta.tick_begin + 1) as usize;

        log::info!("loading tick data");
        if !read_snapshot_file(
            dir,
            TICK_DATA_FILE,
            epoch,
            self.tick_data_mut()[..n_tick].as_mut_bytes(),
        ) {
            self.reset_snapshot_meta(epoch);
            return Err(LoadError::TickData);
        }

        log::info!("loading quorum ticks");
        if !read_snapshot_file(dir, TICKS_FILE, epoch, self.vote_rows_mut(n_tick)) {
            self.reset_snapshot_meta(epoch);
            return Err(LoadError::Ticks);
        }

        log::info!("loading tick transaction offsets");
        let arena = self.arena_mut().state_mut();
        if !read_snapshot_file(dir, OFFSETS_FILE, epoch, arena.slot_table_bytes_mut(n_tick)) {
            self.reset_snapshot_meta(epoch);
            return Err(LoadError::Offsets);
        }

        log::info!("loading transactions");
        if !read_snapshot_file(
            dir,
            TRANSACTIONS_FILE,
            epoch,
            arena.arena_bytes_mut(meta.total_transaction_size as usize),
        ) {
            self.reset_snapshot_meta(epoch);
            return Err(LoadError::Transactions);
        }
        arena.set_next_offset(meta.next_tick_transaction_offset);

        self.rebuild_digest_index(n_tick);

        *self.snapshot_meta.get_mut() = meta;
        self.save_scan_floor
            .store(meta.tick_begin, Ordering::Relaxed);
        Ok(())
    }

    /// Overwrite the metadata file with an all-zero record so the snapshot
    /// set for `epoch` fails validation on the next load.
    pub fn save_invalidate_data(&self, epoch: u32, dir: &Path) -> Result<(), SaveError> {
        let meta = SnapshotMeta::zeroed();
        if !write_snapshot_file(dir, METADATA_FILE, epoch, meta.as_bytes()) {
            return Err(SaveError::Metadata);
        }
        Ok(())
    }

    fn check_snapshot_meta(&self, meta: &SnapshotMeta, epoch: u32) -> bool {
        if meta.tick_begin > meta.tick_end {
            return false;
        }
        if meta.tick_begin != self.window().tick_begin {
            return false;
        }
        if meta.tick_end - meta.tick_begin > MAX_TICKS_PER_EPOCH {
            return false;
        }
        if meta.epoch != epoch {
            return false;
        }
        if meta.total_transaction_size < 0
            || meta.total_transaction_size as u64 > ARENA_SIZE_CURRENT_EPOCH
            || meta.next_tick_transaction_offset > ARENA_SIZE_CURRENT_EPOCH
        {
            return false;
        }
        true
    }

    fn reset_snapshot_meta(&mut self, epoch: u32) {
        let window = *self.window();
        *self.snapshot_meta.get_mut() = SnapshotMeta {
            epoch,
            tick_begin: window.tick_begin,
            tick_end: window.tick_begin,
            _pad: [0u8; 4],
            total_transaction_size: 0,
            next_tick_transaction_offset: 0,
        };
        self.save_scan_floor
            .store(window.tick_begin, Ordering::Relaxed);
    }

    /// The digest index is current-epoch in-memory state; after a load it is
    /// rebuilt from the recovered slot rows.
    fn rebuild_digest_index(&mut self, n_tick: usize) {
        let mut digests = Vec::new();
        {
            let arena = self.arena_mut().state_mut();
            for row in 0..n_tick {
                for slot in 0..TRANSACTIONS_PER_TICK {
                    let offset = arena.slot(row, slot);
                    if offset == 0 {
                        continue;
                    }
                    if let Some(tx) = arena.tx_at(offset) {
                        digests.push((tx.digest(), offset));
                    }
                }
            }
        }
        let index = self.digest_index_mut();
        index.clear();
        for (digest, offset) in digests {
            index.insert(&digest, offset);
        }
    }
}
