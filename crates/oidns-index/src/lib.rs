//! Concurrent object index for oidns.
//!
//! Maps [`ObjectId`](oidns_types::ObjectId)s to live namespace nodes. The
//! index is an array of independently locked red-black tree shards; the shard
//! for an id is chosen by a multiplicative hash of the namespace seed and the
//! numeric id. Entries are non-owning, so the index never keeps a node alive.

pub mod config;
pub mod error;
pub mod index;

pub use config::{IndexConfig, MAX_SHARD_BITS, MIN_SHARD_BITS};
pub use error::{IndexError, IndexResult};
pub use index::{Indexed, ObjectIndex};
