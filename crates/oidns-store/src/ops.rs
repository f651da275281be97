//! Node operations capability.
//!
//! The host glue installs a [`NodeOps`] on an indexed node to give it
//! content behavior. Only kinds that carry content (files and singularities)
//! dispatch to it; see [`Node::read`].

use std::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::node::Node;

pub trait NodeOps: Send + Sync {
    /// Short name for logs.
    fn label(&self) -> &str;

    fn read(&self, node: &Node, offset: u64, buf: &mut [u8]) -> StoreResult<usize> {
        let _ = (offset, buf);
        Err(StoreError::NotSupported(format!("{}: read", node.id())))
    }

    fn write(&self, node: &Node, offset: u64, data: &[u8]) -> StoreResult<usize> {
        let _ = (offset, data);
        Err(StoreError::NotSupported(format!("{}: write", node.id())))
    }

    fn size(&self, _node: &Node) -> u64 {
        0
    }
}

/// Content held in a growable in-memory buffer.
#[derive(Debug, Default)]
pub struct BufferOps {
    data: RwLock<Vec<u8>>,
}

impl BufferOps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: RwLock::new(data.into()),
        }
    }
}

impl NodeOps for BufferOps {
    fn label(&self) -> &str {
        "buffer"
    }

    fn read(&self, _node: &Node, offset: u64, buf: &mut [u8]) -> StoreResult<usize> {
        let data = self.data.read().expect("buffer lock poisoned");
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write(&self, _node: &Node, offset: u64, bytes: &[u8]) -> StoreResult<usize> {
        let start = usize::try_from(offset)
            .map_err(|_| StoreError::InvalidArgument(format!("offset {offset}")))?;
        let end = start
            .checked_add(bytes.len())
            .ok_or_else(|| StoreError::InvalidArgument(format!("offset {offset}")))?;
        let mut data = self.data.write().expect("buffer lock poisoned");
        if data.len() < end {
            let extra = end - data.len();
            data.try_reserve(extra).map_err(|_| StoreError::OutOfMemory)?;
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(bytes);
        Ok(bytes.len())
    }

    fn size(&self, _node: &Node) -> u64 {
        self.data.read().expect("buffer lock poisoned").len() as u64
    }
}
