//! Error types for the red-black tree.

use std::fmt;

use crate::tree::NodeHandle;

/// A structural invariant found broken by [`RbTree::validate`].
///
/// [`RbTree::validate`]: crate::RbTree::validate
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("root node {0:?} is red")]
    RedRoot(NodeHandle),

    #[error("red node {parent:?} has red child {child:?}")]
    RedRed { parent: NodeHandle, child: NodeHandle },

    #[error("unequal black height under {node:?}: left {left}, right {right}")]
    BlackHeight {
        node: NodeHandle,
        left: usize,
        right: usize,
    },

    /// A child's recorded parent or side disagrees with where it hangs.
    #[error("broken parent link at {0:?}")]
    BrokenLink(NodeHandle),

    #[error("keys out of order at {0:?}")]
    OutOfOrder(NodeHandle),

    #[error("reachable node count {reachable} differs from arena size {stored}")]
    CountMismatch { reachable: usize, stored: usize },
}

/// Returned by [`RbTree::insert`] when the key is already present.
///
/// The rejected key and value are handed back to the caller.
///
/// [`RbTree::insert`]: crate::RbTree::insert
pub struct DuplicateKey<K, V> {
    pub key: K,
    pub value: V,
    /// Handle of the node already holding the key.
    pub existing: NodeHandle,
}

impl<K: fmt::Debug, V> fmt::Debug for DuplicateKey<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuplicateKey")
            .field("key", &self.key)
            .field("existing", &self.existing)
            .finish_non_exhaustive()
    }
}

impl<K: fmt::Debug, V> fmt::Display for DuplicateKey<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "duplicate key {:?}", self.key)
    }
}

impl<K: fmt::Debug, V> std::error::Error for DuplicateKey<K, V> {}
