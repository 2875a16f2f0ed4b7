//! Digest → arena-offset index for the current epoch. Open addressing with
//! linear probing; capacity equals the maximum number of insertions an epoch
//! can produce, so "table full" can only mean "every slot really is taken".

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::DIGEST_INDEX_CAPACITY;
use crate::tx::Digest;

/// One probe slot. A zero digest means unoccupied.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
struct IndexEntry {
    digest: Digest,
    offset: u64,
}

const _: () = {
    assert!(core::mem::size_of::<IndexEntry>() == 40);
};

/// Open-addressed digest index. Stores arena offsets, never pointers.
pub struct DigestIndex {
    entries: Box<[IndexEntry]>,
}

#[inline(always)]
fn is_zero(digest: &Digest) -> bool {
    digest.iter().all(|&b| b == 0)
}

impl DigestIndex {
    pub fn new() -> Self {
        Self::with_capacity(DIGEST_INDEX_CAPACITY)
    }

    /// Fixed probe table of `capacity` slots. Sized once, never grown.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: vec![
                IndexEntry {
                    digest: [0u8; 32],
                    offset: 0,
                };
                capacity
            ]
            .into_boxed_slice(),
        }
    }

    /// Seed position: the upper 32 bits of the digest, modulo capacity.
    #[inline(always)]
    fn home_slot(&self, digest: &Digest) -> usize {
        let upper = u32::from_le_bytes([digest[28], digest[29], digest[30], digest[31]]);
        upper as usize % self.entries.len()
    }

    /// Insert a digest → offset mapping. A zero digest is a no-op, and so is
    /// wrapping all the way around a full table.
    pub fn insert(&mut self, digest: &Digest, offset: u64) {
        if is_zero(digest) {
            return;
        }

        let home = self.home_slot(digest);
        let mut index = home;
        while !is_zero(&self.entries[index].digest) {
            index = (index + 1) % self.entries.len();
            if index == home {
                return;
            }
        }
        self.entries[index] = IndexEntry {
            digest: *digest,
            offset,
        };
    }

    /// Arena offset recorded for a digest, or `None`.
    pub fn find(&self, digest: &Digest) -> Option<u64> {
        if is_zero(digest) {
            return None;
        }

        let home = self.home_slot(digest);
        let mut index = home;
        while !is_zero(&self.entries[index].digest) {
            if self.entries[index].digest == *digest {
                return Some(self.entries[index].offset);
            }
            index = (index + 1) % self.entries.len();
            if index == home {
                break;
            }
        }
        None
    }

    /// Wipe every slot. Runs at epoch rollover.
    pub fn clear(&mut self) {
        for entry in self.entries.iter_mut() {
            entry.digest = [0u8; 32];
            entry.offset = 0;
        }
    }
}

impl Default for DigestIndex {
    fn default() -> Self {
        Self::new()
    }
}
