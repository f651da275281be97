//! Monotonic numeric id allocation.
//!
//! Ids start at 1 and are never reused. With a batch size above one, each
//! thread draws a private range of `batch` ids from the shared counter and
//! hands them out locally, so contended creators touch the shared atomic
//! once per batch. Ids are therefore unique but only monotonic per thread.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Ids drawn from the shared counter per refill.
pub const DEFAULT_ID_BATCH: u64 = 1024;

static NEXT_ALLOCATOR: AtomicU64 = AtomicU64::new(0);

/// A thread's unused range of one allocator's ids.
#[derive(Debug)]
struct Batch {
    next: u64,
    end: u64,
    owner: Weak<()>,
}

thread_local! {
    /// Per-thread ranges, keyed by allocator serial.
    static BATCHES: RefCell<HashMap<u64, Batch>> = RefCell::new(HashMap::new());
}

/// Shared source of numeric object ids.
#[derive(Debug)]
pub struct IdAllocator {
    serial: u64,
    next: AtomicU64,
    batch: u64,
    /// Dropped with the allocator; ranges whose owner is gone are pruned on refill.
    alive: Arc<()>,
}

impl IdAllocator {
    /// Create an allocator handing out per-thread batches of `batch` ids.
    /// A batch of 0 or 1 uses a plain shared increment.
    pub fn new(batch: u64) -> Self {
        Self {
            serial: NEXT_ALLOCATOR.fetch_add(1, Ordering::Relaxed),
            next: AtomicU64::new(1),
            batch,
            alive: Arc::new(()),
        }
    }

    pub fn batch(&self) -> u64 {
        self.batch
    }

    /// Allocate the next id.
    pub fn next_id(&self) -> u64 {
        if self.batch <= 1 {
            return self.next.fetch_add(1, Ordering::Relaxed);
        }
        BATCHES.with(|batches| {
            let mut batches = batches.borrow_mut();
            let exhausted = batches
                .get(&self.serial)
                .map_or(true, |range| range.next == range.end);
            if exhausted {
                // Allocators dropped on other threads leave their ranges here.
                batches.retain(|_, range| range.owner.strong_count() > 0);
            }
            let range = batches.entry(self.serial).or_insert_with(|| Batch {
                next: 0,
                end: 0,
                owner: Arc::downgrade(&self.alive),
            });
            if range.next == range.end {
                range.next = self.next.fetch_add(self.batch, Ordering::Relaxed);
                range.end = range.next + self.batch;
            }
            let id = range.next;
            range.next += 1;
            id
        })
    }

    /// Upper bound (exclusive) of every id handed out so far.
    pub fn high_water(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_ID_BATCH)
    }
}

impl Drop for IdAllocator {
    fn drop(&mut self) {
        // Other threads drop their ranges for this serial on their next refill.
        let _ = BATCHES.try_with(|batches| batches.borrow_mut().remove(&self.serial));
    }
}
