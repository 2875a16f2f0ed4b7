//! Execution stacks: fixed-capacity bump allocators, one per execution slot,
//! claimed by spinning with a pause hint. Allocation is LIFO — `free()` pops
//! the most recent block, and releasing a slot resets it wholesale.

use core::cell::{Cell, UnsafeCell};
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};

/// Every block is preceded by one frame header recording where the previous
/// block's header sits, so `free()` can walk back.
const FRAME_HEADER: u32 = 8;

const ALIGN: u32 = 8;

/// `last` value when no block is live.
const NO_FRAME: u32 = u32::MAX;

/// One bump allocator. Exclusively owned by whoever holds its pool slot; the
/// interior mutability below is never raced. Backed by `u64` words so every
/// handed-out block is 8-aligned.
pub struct StackBuffer {
    buf: UnsafeCell<Box<[u64]>>,
    top: Cell<u32>,
    last: Cell<u32>,
}

// Exclusivity is enforced by StackPool's per-slot flag: a buffer is only
// touched between acquire() and the guard's release.
unsafe impl Send for StackBuffer {}
unsafe impl Sync for StackBuffer {}

impl StackBuffer {
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity <= u32::MAX as usize);
        Self {
            buf: UnsafeCell::new(vec![0u64; capacity.div_ceil(8)].into_boxed_slice()),
            top: Cell::new(0),
            last: Cell::new(NO_FRAME),
        }
    }

    /// Bump-allocate `size` bytes (8-aligned). Returns `None` on overflow;
    /// the caller decides whether that is fatal.
    pub fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        let rounded = (size as u64 + (ALIGN as u64 - 1)) & !(ALIGN as u64 - 1);
        let top = self.top.get();
        let capacity = self.capacity() as u64;
        if top as u64 + FRAME_HEADER as u64 + rounded > capacity {
            return None;
        }

        let header = top;
        let block = top + FRAME_HEADER;
        unsafe {
            let base = (*self.buf.get()).as_mut_ptr().cast::<u8>();
            // Frame header: where the previous block's header lives.
            base.add(header as usize)
                .cast::<u32>()
                .write_unaligned(self.last.get());
            self.last.set(header);
            self.top.set(block + rounded as u32);
            NonNull::new(base.add(block as usize))
        }
    }

    /// Pop the most recent allocation. No-op when nothing is live.
    pub fn free(&self) {
        let last = self.last.get();
        debug_assert_ne!(last, NO_FRAME);
        if last == NO_FRAME {
            return;
        }
        let previous = unsafe {
            (*self.buf.get())
                .as_ptr()
                .cast::<u8>()
                .add(last as usize)
                .cast::<u32>()
                .read_unaligned()
        };
        self.top.set(last);
        self.last.set(previous);
    }

    /// Bytes currently allocated, frame headers included.
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.top.get() as usize
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        unsafe { (&*self.buf.get()).len() * 8 }
    }

    /// Drop every live block at once. Runs when a slot is released.
    #[inline]
    pub fn reset(&self) {
        self.top.set(0);
        self.last.set(NO_FRAME);
    }
}

/// Pool of execution stacks with one-flag locks. Readers pass
/// `stacks_to_ignore = 1` to leave slot 0 free for state writers.
pub struct StackPool {
    stacks: Box<[StackBuffer]>,
    claimed: Box<[AtomicBool]>,
}

impl StackPool {
    pub fn new(slots: usize, capacity: usize) -> Self {
        assert!(slots >= 2, "the pool needs a reader slot and a writer slot");
        let mut stacks = Vec::with_capacity(slots);
        stacks.resize_with(slots, || StackBuffer::new(capacity));
        let mut claimed = Vec::with_capacity(slots);
        claimed.resize_with(slots, || AtomicBool::new(false));
        Self {
            stacks: stacks.into_boxed_slice(),
            claimed: claimed.into_boxed_slice(),
        }
    }

    #[inline(always)]
    pub fn slot_count(&self) -> usize {
        self.stacks.len()
    }

    /// Claim a free slot, spinning with a pause hint over indices
    /// `[stacks_to_ignore, slot_count)` until one yields. May spin
    /// indefinitely when every eligible slot stays held.
    pub fn acquire(&self, stacks_to_ignore: usize) -> StackGuard<'_> {
        debug_assert!(stacks_to_ignore < self.stacks.len());
        let mut index = stacks_to_ignore;
        loop {
            if self.claimed[index]
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return StackGuard { pool: self, index };
            }
            core::hint::spin_loop();
            index += 1;
            if index == self.stacks.len() {
                index = stacks_to_ignore;
            }
        }
    }
}

/// Exclusive hold on one pool slot. Dropping it resets the stack and returns
/// the slot.
pub struct StackGuard<'a> {
    pool: &'a StackPool,
    index: usize,
}

impl<'a> StackGuard<'a> {
    #[inline(always)]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline(always)]
    pub fn stack(&self) -> &'a StackBuffer {
        &self.pool.stacks[self.index]
    }
}

impl Drop for StackGuard<'_> {
    fn drop(&mut self) {
        self.pool.stacks[self.index].reset();
        self.pool.claimed[self.index].store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_balanced_alloc_free_returns_to_zero() {
        let stack = StackBuffer::new(4096);
        assert_eq!(stack.size(), 0);

        let _a = stack.allocate(100).unwrap();
        let _b = stack.allocate(50).unwrap();
        let _c = stack.allocate(8).unwrap();
        assert!(stack.size() > 0);

        stack.free();
        stack.free();
        stack.free();
        assert_eq!(stack.size(), 0);
    }

    #[test]
    fn test_free_pops_lifo() {
        let stack = StackBuffer::new(4096);
        stack.allocate(64).unwrap();
        let mid = stack.size();
        stack.allocate(128).unwrap();
        stack.free();
        assert_eq!(stack.size(), mid);
    }

    #[test]
    fn test_allocation_is_aligned() {
        let stack = StackBuffer::new(4096);
        let a = stack.allocate(3).unwrap();
        let b = stack.allocate(5).unwrap();
        assert_eq!(a.as_ptr() as usize % 8, 0);
        assert_eq!(b.as_ptr() as usize % 8, 0);
    }

    #[test]
    fn test_overflow_returns_none() {
        let stack = StackBuffer::new(64);
        assert!(stack.allocate(1024).is_none());
        let fits = stack.allocate(32);
        assert!(fits.is_some());
    }

    #[test]
    fn test_guard_resets_on_release() {
        let pool = StackPool::new(2, 1024);
        let index = {
            let guard = pool.acquire(0);
            guard.stack().allocate(100).unwrap();
            assert!(guard.stack().size() > 0);
            guard.index()
        };
        let guard = pool.acquire(0);
        assert_eq!(guard.index(), index);
        assert_eq!(guard.stack().size(), 0);
    }

    #[test]
    fn test_acquire_skips_ignored_slots() {
        let pool = StackPool::new(3, 256);
        let guard = pool.acquire(1);
        assert!(guard.index() >= 1);
    }

    #[test]
    fn test_contended_acquire_round_robin() {
        let pool = std::sync::Arc::new(StackPool::new(2, 256));
        let acquired = std::sync::Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = pool.clone();
            let acquired = acquired.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    let guard = pool.acquire(0);
                    guard.stack().allocate(16).unwrap();
                    acquired.fetch_add(1, Ordering::Relaxed);
                    drop(guard);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(acquired.load(Ordering::Relaxed), 400);
    }
}
