//! Directory entries.
//!
//! An [`Alias`] names a node inside its parent folder. Removing the entry
//! makes the alias *negative*: it stays valid for anyone holding it but no
//! longer points at a node and is gone from its parent's children.
//!
//! The children map of a folder alias and the alias's name and parent fields
//! are only changed by holders of the folder node's lock; the inner locks
//! just keep concurrent readers safe.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use crate::node::Node;

pub struct Alias {
    name: RwLock<String>,
    parent: RwLock<Weak<Alias>>,
    node: RwLock<Option<Arc<Node>>>,
    children: Mutex<BTreeMap<String, Arc<Alias>>>,
    dir_type: AtomicBool,
    root: bool,
}

impl Alias {
    pub(crate) fn new_root(node: Arc<Node>) -> Arc<Self> {
        Arc::new(Self {
            name: RwLock::new(String::new()),
            parent: RwLock::new(Weak::new()),
            node: RwLock::new(Some(node)),
            children: Mutex::new(BTreeMap::new()),
            dir_type: AtomicBool::new(true),
            root: true,
        })
    }

    pub(crate) fn new_child(
        parent: &Arc<Alias>,
        name: &str,
        node: Arc<Node>,
        dir_type: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: RwLock::new(name.to_string()),
            parent: RwLock::new(Arc::downgrade(parent)),
            node: RwLock::new(Some(node)),
            children: Mutex::new(BTreeMap::new()),
            dir_type: AtomicBool::new(dir_type),
            root: false,
        })
    }

    pub fn name(&self) -> String {
        self.name.read().expect("alias name lock poisoned").clone()
    }

    pub fn is_root(&self) -> bool {
        self.root
    }

    /// Parent folder entry; `None` for the root and for detached entries.
    pub fn parent(&self) -> Option<Arc<Alias>> {
        self.parent.read().expect("alias parent lock poisoned").upgrade()
    }

    pub fn is_child_of(&self, parent: &Arc<Alias>) -> bool {
        let current = self.parent.read().expect("alias parent lock poisoned");
        std::ptr::eq(current.as_ptr(), Arc::as_ptr(parent))
    }

    /// The named node, or `None` once the entry was removed.
    pub fn node(&self) -> Option<Arc<Node>> {
        self.node.read().expect("alias node lock poisoned").clone()
    }

    pub fn is_negative(&self) -> bool {
        self.node.read().expect("alias node lock poisoned").is_none()
    }

    /// Whether this entry currently names `node`.
    pub fn names(&self, node: &Node) -> bool {
        self.node
            .read()
            .expect("alias node lock poisoned")
            .as_deref()
            .is_some_and(|n| std::ptr::eq(n, node))
    }

    /// Typed as a directory, and so able to hold children.
    pub fn is_dir_type(&self) -> bool {
        self.dir_type.load(Ordering::Acquire)
    }

    // ---------------------------------------------------------------
    // Children
    // ---------------------------------------------------------------

    pub(crate) fn children(&self) -> MutexGuard<'_, BTreeMap<String, Arc<Alias>>> {
        self.children.lock().expect("alias children lock poisoned")
    }

    pub fn child(&self, name: &str) -> Option<Arc<Alias>> {
        self.children().get(name).cloned()
    }

    pub fn has_children(&self) -> bool {
        !self.children().is_empty()
    }

    pub fn child_count(&self) -> usize {
        self.children().len()
    }

    pub fn child_names(&self) -> Vec<String> {
        self.children().keys().cloned().collect()
    }

    /// First child whose name sorts after `after` (or the first child).
    ///
    /// Used as a cursor: entries removed between calls are skipped and the
    /// walk still makes progress.
    pub fn next_child_after(&self, after: Option<&str>) -> Option<Arc<Alias>> {
        let children = self.children();
        let lower = match after {
            Some(name) => Bound::Excluded(name),
            None => Bound::Unbounded,
        };
        children
            .range::<str, _>((lower, Bound::Unbounded))
            .next()
            .map(|(_, alias)| Arc::clone(alias))
    }

    // ---------------------------------------------------------------
    // Paths
    // ---------------------------------------------------------------

    /// Number of folders between the root and this entry.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut cur = self.parent();
        while let Some(p) = cur {
            depth += 1;
            cur = p.parent();
        }
        depth
    }

    /// Slash-separated path from the root, without a leading slash.
    pub fn path_from_root(&self) -> String {
        let mut names = Vec::new();
        if !self.root {
            names.push(self.name());
        }
        let mut cur = self.parent();
        while let Some(p) = cur {
            if !p.root {
                names.push(p.name());
            }
            cur = p.parent();
        }
        names.reverse();
        names.join("/")
    }

    /// If `ancestor` is a proper ancestor of `self`, the child of `ancestor`
    /// on the path down to `self`.
    pub fn child_toward(self: &Arc<Self>, ancestor: &Arc<Alias>) -> Option<Arc<Alias>> {
        let mut cur = Arc::clone(self);
        loop {
            let parent = cur.parent()?;
            if Arc::ptr_eq(&parent, ancestor) {
                return Some(cur);
            }
            cur = parent;
        }
    }

    // ---------------------------------------------------------------
    // Mutation (folder lock held by caller)
    // ---------------------------------------------------------------

    pub(crate) fn set_dir_type(&self, dir_type: bool) {
        self.dir_type.store(dir_type, Ordering::Release);
    }

    /// Make the entry negative, handing back the node it named.
    pub(crate) fn clear_node(&self) -> Option<Arc<Node>> {
        self.node.write().expect("alias node lock poisoned").take()
    }

    pub(crate) fn relink(&self, parent: &Arc<Alias>, name: &str) {
        *self.parent.write().expect("alias parent lock poisoned") = Arc::downgrade(parent);
        *self.name.write().expect("alias name lock poisoned") = name.to_string();
    }

    pub(crate) fn take_children(&self) -> BTreeMap<String, Arc<Alias>> {
        std::mem::take(&mut *self.children())
    }
}

impl fmt::Debug for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Alias")
            .field("name", &self.name())
            .field("node", &self.node().map(|n| n.id()))
            .field("dir_type", &self.is_dir_type())
            .finish()
    }
}
