//! The sharded index.
//!
//! # Invariants
//!
//! - A numeric id appears at most once across all shards.
//! - An entry never owns its object: objects are reclaimed by whoever holds
//!   the last strong reference, and are expected to call
//!   [`ObjectIndex::remove`] from their own teardown.
//! - No strong reference obtained from a shard is dropped while that shard's
//!   lock is held, because dropping the last one re-enters `remove`.

use std::fmt;
use std::sync::{Arc, RwLock, Weak};

use tracing::{debug, error};

use oidns_rbtree::RbTree;
use oidns_types::ObjectId;

use crate::config::IndexConfig;
use crate::error::{IndexError, IndexResult};

/// Multiplier of the shard hash (64-bit golden ratio).
const GOLDEN_RATIO_64: u64 = 0x61C8_8646_80B5_83EB;

/// Anything the index can hold.
pub trait Indexed: Send + Sync {
    fn object_id(&self) -> ObjectId;
}

type Shard<T> = RwLock<RbTree<u64, Weak<T>>>;

/// Concurrent map from [`ObjectId`] to live objects.
pub struct ObjectIndex<T> {
    shards: Box<[Shard<T>]>,
    bits: u32,
}

impl<T> fmt::Debug for ObjectIndex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectIndex")
            .field("shards", &self.shards.len())
            .finish_non_exhaustive()
    }
}

impl<T: Indexed> ObjectIndex<T> {
    /// Build an index with `2^bits` empty shards.
    pub fn new(config: &IndexConfig) -> Self {
        let bits = config.effective_bits();
        let shards = (0..1usize << bits)
            .map(|_| RwLock::new(RbTree::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        debug!(shards = shards.len(), "object index created");
        Self { shards, bits }
    }

    pub fn shard_bits(&self) -> u32 {
        self.bits
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shard owning `id`.
    pub fn shard_for(&self, id: &ObjectId) -> usize {
        let key = id.namespace.shard_seed().wrapping_add(id.ino);
        (key.wrapping_mul(GOLDEN_RATIO_64) >> (64 - self.bits)) as usize
    }

    fn shard(&self, id: &ObjectId) -> &Shard<T> {
        &self.shards[self.shard_for(id)]
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    /// Look up a live object.
    ///
    /// An object whose last strong reference is being dropped is reported
    /// absent even if its entry has not been removed yet.
    pub fn lookup(&self, id: &ObjectId) -> Option<Arc<T>> {
        let tree = self.shard(id).read().expect("index shard lock poisoned");
        tree.get(&id.ino).and_then(Weak::upgrade)
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        let tree = self.shard(id).read().expect("index shard lock poisoned");
        tree.get(&id.ino).is_some_and(|w| w.strong_count() > 0)
    }

    /// Number of entries across all shards.
    pub fn len(&self) -> usize {
        self.shard_loads().iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entry count of every shard, in shard order.
    pub fn shard_loads(&self) -> Vec<usize> {
        self.shards
            .iter()
            .map(|s| s.read().expect("index shard lock poisoned").len())
            .collect()
    }

    // ---------------------------------------------------------------
    // Mutation
    // ---------------------------------------------------------------

    /// Index `object` under its id.
    pub fn insert(&self, object: &Arc<T>) -> IndexResult<()> {
        let id = object.object_id();
        let mut tree = self.shard(&id).write().expect("index shard lock poisoned");
        match tree.insert(id.ino, Arc::downgrade(object)) {
            Ok(_) => {
                debug!(id = %id, "indexed object");
                Ok(())
            }
            Err(dup) => {
                error!(id = %id, existing = ?dup.existing, "duplicate object id");
                Err(IndexError::Duplicate(id))
            }
        }
    }

    /// Detach the entry for `object`.
    ///
    /// Only an entry pointing at this very object is removed; returns whether
    /// one was.
    pub fn remove(&self, object: &T) -> bool {
        let id = object.object_id();
        let mut tree = self.shard(&id).write().expect("index shard lock poisoned");
        let Some(handle) = tree.find(&id.ino) else {
            return false;
        };
        let same = tree
            .value_at(handle)
            .is_some_and(|w| std::ptr::eq(w.as_ptr(), object));
        if same {
            tree.remove_at(handle);
            debug!(id = %id, "unindexed object");
        }
        same
    }
}
