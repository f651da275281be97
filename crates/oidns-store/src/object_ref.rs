use std::fmt;
use std::sync::{Arc, MutexGuard};

use oidns_types::{NodeKind, ObjectId, StateFlags};

use crate::alias::Alias;
use crate::node::{Node, NodeState};

/// A live `(alias, node)` pair with references held on both.
///
/// Dropping it releases both references.
#[derive(Clone)]
pub struct ObjectRef {
    alias: Arc<Alias>,
    node: Arc<Node>,
}

impl ObjectRef {
    pub fn new(alias: Arc<Alias>, node: Arc<Node>) -> Self {
        Self { alias, node }
    }

    /// Pair an entry with the node it currently names.
    pub fn from_alias(alias: &Arc<Alias>) -> Option<Self> {
        let node = alias.node()?;
        Some(Self::new(Arc::clone(alias), node))
    }

    pub fn alias(&self) -> &Arc<Alias> {
        &self.alias
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn id(&self) -> ObjectId {
        self.node.id()
    }

    pub fn kind(&self) -> NodeKind {
        self.node.kind()
    }

    pub fn name(&self) -> String {
        self.alias.name()
    }

    /// The alias still names the node.
    pub fn is_live(&self) -> bool {
        self.alias.names(&self.node)
    }

    /// The alias is the node's canonical alias.
    pub fn is_canonical(&self) -> bool {
        self.node.is_canonical_alias(&self.alias)
    }

    /// Take the node's exclusive lock.
    pub fn lock(&self) -> NodeGuard<'_> {
        NodeGuard {
            entry: self,
            state: self.node.state.lock().expect("node lock poisoned"),
        }
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("name", &self.alias.name())
            .field("id", &self.node.id())
            .field("kind", &self.node.kind())
            .finish()
    }
}

/// Proof of holding a node's exclusive lock, along with the entry it was
/// reached through.
pub struct NodeGuard<'a> {
    entry: &'a ObjectRef,
    state: MutexGuard<'a, NodeState>,
}

impl<'a> NodeGuard<'a> {
    pub fn entry(&self) -> &'a ObjectRef {
        self.entry
    }

    pub fn alias(&self) -> &'a Arc<Alias> {
        self.entry.alias()
    }

    pub fn node(&self) -> &'a Arc<Node> {
        self.entry.node()
    }

    pub fn flags(&self) -> StateFlags {
        self.state.flags
    }

    pub fn set_flags(&mut self, flags: StateFlags) {
        self.state.flags.insert(flags);
    }

    pub fn clear_flags(&mut self, flags: StateFlags) {
        self.state.flags.remove(flags);
    }

    /// Run `f` with `flags` set, clearing them afterwards.
    pub fn with_flags<R>(&mut self, flags: StateFlags, f: impl FnOnce(&Self) -> R) -> R {
        self.set_flags(flags);
        let result = f(self);
        self.clear_flags(flags);
        result
    }

    /// Make the entry this guard was reached through the node's canonical
    /// alias. Returns `false` if the node already has one.
    pub fn mark_indexed(&mut self) -> bool {
        if !self.node().set_canonical(Arc::clone(self.alias())) {
            return false;
        }
        self.state.flags.insert(StateFlags::INDEXED);
        true
    }
}

impl fmt::Debug for NodeGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeGuard")
            .field("entry", self.entry)
            .field("flags", &self.state.flags)
            .finish()
    }
}
