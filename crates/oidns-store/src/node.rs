//! Namespace nodes.
//!
//! A [`Node`] is owned by the aliases that name it and by whoever holds an
//! [`ObjectRef`](crate::ObjectRef) to it. An indexed node additionally owns
//! its canonical alias; that handle and the node's index entry both go away
//! exactly when the node is reclaimed.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use tracing::debug;

use oidns_index::Indexed;
use oidns_types::{NodeKind, ObjectId, StateFlags};

use crate::alias::Alias;
use crate::error::{StoreError, StoreResult};
use crate::lease::LeaseSlot;
use crate::mount::Mount;
use crate::ops::NodeOps;

/// State guarded by a node's exclusive lock.
#[derive(Debug, Default)]
pub struct NodeState {
    pub(crate) flags: StateFlags,
}

impl NodeState {
    pub fn flags(&self) -> StateFlags {
        self.flags
    }
}

pub struct Node {
    id: ObjectId,
    kind: NodeKind,
    mount: Arc<Mount>,
    nlink: AtomicU32,
    pub(crate) state: Mutex<NodeState>,
    canonical: OnceLock<Arc<Alias>>,
    link_text: Option<String>,
    symlink_target: RwLock<Option<ObjectId>>,
    ops: RwLock<Option<Arc<dyn NodeOps>>>,
    pub(crate) lease: LeaseSlot,
    pub(crate) dead: AtomicBool,
}

impl Node {
    pub(crate) fn new(
        mount: &Arc<Mount>,
        kind: NodeKind,
        link_text: Option<String>,
    ) -> StoreResult<Arc<Self>> {
        mount.charge_node()?;
        let id = ObjectId::new(mount.namespace(), mount.ids().next_id());
        let mut flags = StateFlags::empty();
        if kind == NodeKind::Singularity {
            flags |= StateFlags::SINGULARITY;
        }
        debug!(node = %id, %kind, "node created");
        Ok(Arc::new(Self {
            id,
            kind,
            mount: Arc::clone(mount),
            nlink: AtomicU32::new(kind.initial_nlink()),
            state: Mutex::new(NodeState { flags }),
            canonical: OnceLock::new(),
            link_text,
            symlink_target: RwLock::new(None),
            ops: RwLock::new(None),
            lease: LeaseSlot::default(),
            dead: AtomicBool::new(false),
        }))
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn mount(&self) -> &Arc<Mount> {
        &self.mount
    }

    /// Serial of the mount instance that created this node.
    pub fn instance(&self) -> u64 {
        self.mount.instance()
    }

    /// Removed from the namespace; only outstanding references keep it.
    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    pub fn is_indexed(&self) -> bool {
        self.canonical.get().is_some()
    }

    // ---------------------------------------------------------------
    // Link count
    // ---------------------------------------------------------------

    pub fn nlink(&self) -> u32 {
        self.nlink.load(Ordering::Acquire)
    }

    pub(crate) fn inc_nlink(&self) {
        self.nlink.fetch_add(1, Ordering::AcqRel);
    }

    /// Saturates at zero.
    pub fn dec_nlink(&self) {
        let _ = self
            .nlink
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub(crate) fn clear_nlink(&self) {
        self.nlink.store(0, Ordering::Release);
    }

    // ---------------------------------------------------------------
    // Canonical alias
    // ---------------------------------------------------------------

    /// The alias through which this indexed node is reachable, if it is
    /// still live.
    pub fn canonical_alias(&self) -> Option<Arc<Alias>> {
        let alias = self.canonical.get()?;
        alias.names(self).then(|| Arc::clone(alias))
    }

    /// Whether `alias` is this node's canonical alias (live or not).
    pub fn is_canonical_alias(&self, alias: &Arc<Alias>) -> bool {
        self.canonical.get().is_some_and(|a| Arc::ptr_eq(a, alias))
    }

    pub(crate) fn set_canonical(&self, alias: Arc<Alias>) -> bool {
        self.canonical.set(alias).is_ok()
    }

    // ---------------------------------------------------------------
    // Symlinks
    // ---------------------------------------------------------------

    /// Stored link text of a symlink.
    pub fn link_text(&self) -> Option<&str> {
        self.link_text.as_deref()
    }

    /// Object a symlink created through the object-id API points at.
    pub fn symlink_target(&self) -> Option<ObjectId> {
        *self.symlink_target.read().expect("symlink target lock poisoned")
    }

    /// Record or replace the symlink target. Returns `false` if the node is
    /// not a symlink.
    pub fn set_symlink_target(&self, target: ObjectId) -> bool {
        if self.kind != NodeKind::Symlink {
            return false;
        }
        *self.symlink_target.write().expect("symlink target lock poisoned") = Some(target);
        true
    }

    // ---------------------------------------------------------------
    // Operations capability
    // ---------------------------------------------------------------

    pub fn ops(&self) -> Option<Arc<dyn NodeOps>> {
        self.ops.read().expect("node ops lock poisoned").clone()
    }

    pub fn set_ops(&self, ops: Arc<dyn NodeOps>) {
        debug!(node = %self.id, ops = ops.label(), "operations installed");
        *self.ops.write().expect("node ops lock poisoned") = Some(ops);
    }

    fn content_ops(&self) -> StoreResult<Arc<dyn NodeOps>> {
        match self.kind {
            NodeKind::Directory => Err(StoreError::IsADirectory(self.id.to_string())),
            NodeKind::Symlink => Err(StoreError::InvalidArgument(format!(
                "{} is a symlink",
                self.id
            ))),
            NodeKind::File | NodeKind::Singularity => self
                .ops()
                .ok_or_else(|| StoreError::NotSupported(format!("{} has no operations", self.id))),
        }
    }

    pub fn read(&self, offset: u64, buf: &mut [u8]) -> StoreResult<usize> {
        self.content_ops()?.read(self, offset, buf)
    }

    pub fn write(&self, offset: u64, data: &[u8]) -> StoreResult<usize> {
        self.content_ops()?.write(self, offset, data)
    }

    pub fn size(&self) -> u64 {
        self.content_ops().map_or(0, |ops| ops.size(self))
    }
}

impl Indexed for Node {
    fn object_id(&self) -> ObjectId {
        self.id
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("nlink", &self.nlink())
            .field("indexed", &self.is_indexed())
            .field("dead", &self.is_dead())
            .finish()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if self.is_indexed() {
            self.mount.index().remove(self);
        }
        self.mount.release_node();
        debug!(node = %self.id, "node reclaimed");
    }
}
