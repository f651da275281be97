use std::fmt;
use std::sync::Arc;

use crate::node::Node;

/// Errors from backing store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("entry already exists: {0}")]
    AlreadyExists(String),

    #[error("entry not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The operation is reserved for the object-id API.
    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("name too long: {len} bytes (max {max})")]
    NameTooLong { len: usize, max: usize },

    #[error("path too long: {len} bytes (max {max})")]
    PathTooLong { len: usize, max: usize },

    #[error("mount is read-only")]
    ReadOnly,

    #[error("resource busy: {0}")]
    Busy(String),

    /// The mount's node budget is exhausted.
    #[error("no space: node limit {0} reached")]
    NoSpace(usize),

    #[error("out of memory")]
    OutOfMemory,

    /// A lease holder must let go before the change can proceed. The break
    /// has already been started.
    #[error("lease conflict on {0}")]
    LeaseConflict(LeaseBreak),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// The node whose lease is being broken.
pub struct LeaseBreak {
    node: Arc<Node>,
}

impl LeaseBreak {
    pub(crate) fn new(node: Arc<Node>) -> Self {
        Self { node }
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn into_node(self) -> Arc<Node> {
        self.node
    }
}

impl fmt::Debug for LeaseBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LeaseBreak").field(&self.node.id()).finish()
    }
}

impl fmt::Display for LeaseBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.node.id())
    }
}
