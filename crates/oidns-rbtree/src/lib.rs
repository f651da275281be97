//! Red-black tree for the oidns object index.
//!
//! Nodes live in a [`slab::Slab`] arena and refer to each other by integer
//! handle. Each node carries an explicit [`Link`] (parent handle, which side
//! of the parent it hangs on, and its color) so that rotation and fixup code
//! can be written once, generic over [`Side`].
//!
//! The tree performs no internal synchronization; callers serialize access.

pub mod error;
pub mod link;
pub mod tree;
mod validate;

pub use error::{DuplicateKey, TreeError};
pub use link::{Color, Link, Side};
pub use tree::{Iter, NodeHandle, RbTree};
