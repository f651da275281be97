//! Host namespace primitives.
//!
//! [`HostFs`] owns one mounted tree and implements the structural changes
//! the rest of the system builds on. Every primitive takes the parent
//! folder's [`NodeGuard`] as proof that the caller holds its lock.
//!
//! Canonical aliases of indexed nodes are protected: removing or renaming
//! one is refused with `NotSupported` unless the parent carries the matching
//! in-progress flag, which only the object-id layer sets.
//!
//! Link counts follow directory conventions: a folder starts at 2 and adds
//! one to its parent, other nodes start at 1, and every extra name adds one.

use std::fmt;
use std::sync::{Arc, MutexGuard};

use tracing::{debug, error};

use oidns_types::{NodeKind, RenameFlags, StateFlags};

use crate::alias::Alias;
use crate::error::{StoreError, StoreResult};
use crate::mount::Mount;
use crate::node::{Node, NodeState};
use crate::object_ref::{NodeGuard, ObjectRef};

/// Locks held for a rename: both parent folders, plus the mount's rename
/// serial when they differ.
pub struct RenameLocks<'a> {
    old: NodeGuard<'a>,
    new: Option<NodeGuard<'a>>,
    trap: Option<Arc<Alias>>,
    _serial: Option<MutexGuard<'a, ()>>,
}

impl<'a> RenameLocks<'a> {
    pub fn old_dir(&self) -> &NodeGuard<'a> {
        &self.old
    }

    pub fn new_dir(&self) -> &NodeGuard<'a> {
        self.new.as_ref().unwrap_or(&self.old)
    }

    pub fn old_dir_mut(&mut self) -> &mut NodeGuard<'a> {
        &mut self.old
    }

    pub fn same_dir(&self) -> bool {
        self.new.is_none()
    }

    /// When one parent is an ancestor of the other, the ancestor's child on
    /// the path between them. Neither rename endpoint may be this entry.
    pub fn trap(&self) -> Option<&Arc<Alias>> {
        self.trap.as_ref()
    }

    fn holds(&self, node: &Arc<Node>) -> bool {
        Arc::ptr_eq(self.old.node(), node)
            || self.new.as_ref().is_some_and(|g| Arc::ptr_eq(g.node(), node))
    }
}

impl fmt::Debug for RenameLocks<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenameLocks")
            .field("old", &self.old.node().id())
            .field("new", &self.new_dir().node().id())
            .field("trap", &self.trap.as_ref().map(|t| t.name()))
            .finish()
    }
}

/// One mounted namespace tree.
pub struct HostFs {
    mount: Arc<Mount>,
    root: Arc<Alias>,
}

impl HostFs {
    /// Create the tree with an empty root directory.
    pub fn new(mount: Arc<Mount>) -> StoreResult<Self> {
        let node = Node::new(&mount, NodeKind::Directory, None)?;
        let root = Alias::new_root(node);
        Ok(Self { mount, root })
    }

    pub fn mount(&self) -> &Arc<Mount> {
        &self.mount
    }

    pub fn root(&self) -> &Arc<Alias> {
        &self.root
    }

    pub fn root_ref(&self) -> Option<ObjectRef> {
        ObjectRef::from_alias(&self.root)
    }

    /// Walk `a/b/c` from the root by entry names. Symlinks are not followed.
    pub fn lookup_path(&self, path: &str) -> Option<ObjectRef> {
        let mut cur = Arc::clone(&self.root);
        for name in path.split('/').filter(|s| !s.is_empty()) {
            cur = cur.child(name)?;
        }
        ObjectRef::from_alias(&cur)
    }

    // ---------------------------------------------------------------
    // Validation
    // ---------------------------------------------------------------

    pub fn check_name(&self, name: &str) -> StoreResult<()> {
        let max = self.mount.config().name_max;
        if name.len() > max {
            return Err(StoreError::NameTooLong {
                len: name.len(),
                max,
            });
        }
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
            return Err(StoreError::InvalidArgument(format!("bad entry name {name:?}")));
        }
        Ok(())
    }

    fn check_dir(dir: &NodeGuard<'_>) -> StoreResult<()> {
        let entry = dir.entry();
        if !entry.is_live() || entry.node().is_dead() {
            return Err(StoreError::NotFound(format!("{} was removed", entry.name())));
        }
        if !entry.kind().is_folder() || !entry.alias().is_dir_type() {
            return Err(StoreError::NotADirectory(entry.name()));
        }
        Ok(())
    }

    fn check_child(dir: &NodeGuard<'_>, victim: &Arc<Alias>) -> StoreResult<Arc<Node>> {
        if !victim.is_child_of(dir.alias()) {
            return Err(StoreError::NotFound(format!(
                "{} is not in {}",
                victim.name(),
                dir.alias().name()
            )));
        }
        victim
            .node()
            .ok_or_else(|| StoreError::NotFound(victim.name()))
    }

    // ---------------------------------------------------------------
    // Creation
    // ---------------------------------------------------------------

    fn add_entry(
        &self,
        dir: &NodeGuard<'_>,
        name: &str,
        kind: NodeKind,
        link_text: Option<String>,
    ) -> StoreResult<ObjectRef> {
        self.check_name(name)?;
        Self::check_dir(dir)?;
        let mut children = dir.alias().children();
        if children.contains_key(name) {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }
        let node = Node::new(&self.mount, kind, link_text)?;
        let alias = Alias::new_child(dir.alias(), name, Arc::clone(&node), kind.is_folder());
        children.insert(name.to_string(), Arc::clone(&alias));
        drop(children);
        if kind.is_folder() {
            dir.node().inc_nlink();
        }
        debug!(parent = %dir.node().id(), name, %kind, node = %node.id(), "entry created");
        Ok(ObjectRef::new(alias, node))
    }

    pub fn mkdir(&self, dir: &NodeGuard<'_>, name: &str) -> StoreResult<ObjectRef> {
        self.add_entry(dir, name, NodeKind::Directory, None)
    }

    /// Create a regular file, or a singularity when the parent carries
    /// `CREATING_SINGULARITY`.
    pub fn create(&self, dir: &NodeGuard<'_>, name: &str, singularity: bool) -> StoreResult<ObjectRef> {
        let kind = if singularity {
            if !dir.flags().contains(StateFlags::CREATING_SINGULARITY) {
                return Err(StoreError::PermissionDenied(
                    "singularities are created through the object-id API".into(),
                ));
            }
            NodeKind::Singularity
        } else {
            NodeKind::File
        };
        self.add_entry(dir, name, kind, None)
    }

    pub fn symlink(&self, dir: &NodeGuard<'_>, name: &str, text: &str) -> StoreResult<ObjectRef> {
        if text.is_empty() {
            return Err(StoreError::InvalidArgument("empty link text".into()));
        }
        let max = self.mount.config().path_max;
        if text.len() > max {
            return Err(StoreError::PathTooLong {
                len: text.len(),
                max,
            });
        }
        self.add_entry(dir, name, NodeKind::Symlink, Some(text.to_string()))
    }

    /// Add another name for `source` under `dir`. Indexed nodes are only
    /// linked with `LINKING_CHILD` set on `dir`.
    pub fn link(&self, dir: &NodeGuard<'_>, name: &str, source: &ObjectRef) -> StoreResult<ObjectRef> {
        if source.kind() == NodeKind::Directory {
            return Err(StoreError::PermissionDenied(format!(
                "{} is a directory",
                source.name()
            )));
        }
        if source.node().is_indexed() && !dir.flags().contains(StateFlags::LINKING_CHILD) {
            return Err(StoreError::NotSupported(format!(
                "{} is indexed",
                source.name()
            )));
        }
        if !source.is_live() || source.node().is_dead() {
            return Err(StoreError::NotFound(source.name()));
        }
        self.check_name(name)?;
        Self::check_dir(dir)?;
        let mut children = dir.alias().children();
        if children.contains_key(name) {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }
        let alias = Alias::new_child(dir.alias(), name, Arc::clone(source.node()), false);
        children.insert(name.to_string(), Arc::clone(&alias));
        drop(children);
        source.node().inc_nlink();
        debug!(parent = %dir.node().id(), name, node = %source.id(), "hard link created");
        Ok(ObjectRef::new(alias, Arc::clone(source.node())))
    }

    // ---------------------------------------------------------------
    // Removal
    // ---------------------------------------------------------------

    pub fn rmdir(&self, dir: &NodeGuard<'_>, victim: &Arc<Alias>) -> StoreResult<()> {
        let node = Self::check_child(dir, victim)?;
        if node.kind() != NodeKind::Directory {
            return Err(StoreError::NotADirectory(victim.name()));
        }
        let victim_lock = node.state.lock().expect("node lock poisoned");
        if victim.has_children() {
            return Err(StoreError::DirectoryNotEmpty(victim.name()));
        }
        if node.is_canonical_alias(victim) && !dir.flags().contains(StateFlags::REMOVING_CHILD) {
            return Err(StoreError::NotSupported(format!(
                "{} is indexed",
                victim.name()
            )));
        }
        node.fence_lease(true)?;

        dir.alias().children().remove(&victim.name());
        let detached = victim.clear_node();
        node.clear_nlink();
        dir.node().dec_nlink();
        drop(victim_lock);
        drop(detached);
        debug!(parent = %dir.node().id(), node = %node.id(), "directory removed");
        Ok(())
    }

    /// Remove a non-directory name. The canonical alias of a singularity
    /// additionally needs `REMOVING_SINGULARITY` on the parent.
    pub fn unlink(&self, dir: &NodeGuard<'_>, victim: &Arc<Alias>) -> StoreResult<()> {
        let node = Self::check_child(dir, victim)?;
        if node.kind() == NodeKind::Directory {
            return Err(StoreError::IsADirectory(victim.name()));
        }
        let canonical = node.is_canonical_alias(victim);
        if canonical && !dir.flags().contains(StateFlags::REMOVING_CHILD) {
            return Err(StoreError::NotSupported(format!(
                "{} is indexed",
                victim.name()
            )));
        }
        let singularity = canonical && node.kind() == NodeKind::Singularity;
        if singularity && !dir.flags().contains(StateFlags::REMOVING_SINGULARITY) {
            return Err(StoreError::PermissionDenied(format!(
                "{} is a singularity",
                victim.name()
            )));
        }
        if victim.is_dir_type() && victim.has_children() {
            return Err(StoreError::DirectoryNotEmpty(victim.name()));
        }
        node.fence_lease(node.nlink() <= 1)?;

        dir.alias().children().remove(&victim.name());
        let detached = victim.clear_node();
        node.dec_nlink();
        if singularity {
            dir.node().dec_nlink();
        }
        drop(detached);
        debug!(parent = %dir.node().id(), node = %node.id(), nlink = node.nlink(), "entry unlinked");
        Ok(())
    }

    /// Remove the canonical alias of a singularity.
    ///
    /// The singularity must hold only its two implicit links and no
    /// children. Its entry is demoted to a plain name and the self link is
    /// dropped before the final unlink; that unlink failing past the checks
    /// is an invariant violation and panics.
    pub fn unlink_singularity(&self, dir: &NodeGuard<'_>, victim: &Arc<Alias>) -> StoreResult<()> {
        let node = Self::check_child(dir, victim)?;
        if node.kind() != NodeKind::Singularity {
            return Err(StoreError::InvalidArgument(format!(
                "{} is not a singularity",
                victim.name()
            )));
        }
        let victim_lock = node.state.lock().expect("node lock poisoned");
        // Child directories count toward nlink.
        if victim.has_children() {
            return Err(StoreError::DirectoryNotEmpty(victim.name()));
        }
        if node.nlink() > 2 {
            return Err(StoreError::Busy(format!(
                "{} has {} links",
                victim.name(),
                node.nlink()
            )));
        }
        if !dir.flags().contains(StateFlags::REMOVING_CHILD | StateFlags::REMOVING_SINGULARITY) {
            return Err(StoreError::PermissionDenied(format!(
                "{} is a singularity",
                victim.name()
            )));
        }
        node.fence_lease(true)?;

        victim.set_dir_type(false);
        node.dec_nlink();
        if let Err(err) = self.unlink(dir, victim) {
            error!(node = %node.id(), %err, "validated singularity removal failed");
            panic!("singularity {} left half removed: {err}", node.id());
        }
        drop(victim_lock);
        Ok(())
    }

    // ---------------------------------------------------------------
    // Rename
    // ---------------------------------------------------------------

    /// Lock both rename parents.
    ///
    /// Ancestor before descendant; unrelated parents in id order. Ancestry
    /// is stable while the rename serial is held.
    pub fn lock_rename<'a>(&'a self, old_dir: &'a ObjectRef, new_dir: &'a ObjectRef) -> RenameLocks<'a> {
        if Arc::ptr_eq(old_dir.alias(), new_dir.alias()) {
            return RenameLocks {
                old: old_dir.lock(),
                new: None,
                trap: None,
                _serial: None,
            };
        }

        let serial = self.mount.rename_serial();
        let old;
        let new;
        let trap;
        if let Some(t) = new_dir.alias().child_toward(old_dir.alias()) {
            old = old_dir.lock();
            new = new_dir.lock();
            trap = Some(t);
        } else if let Some(t) = old_dir.alias().child_toward(new_dir.alias()) {
            new = new_dir.lock();
            old = old_dir.lock();
            trap = Some(t);
        } else if old_dir.id() < new_dir.id() {
            old = old_dir.lock();
            new = new_dir.lock();
            trap = None;
        } else {
            new = new_dir.lock();
            old = old_dir.lock();
            trap = None;
        }
        RenameLocks {
            old,
            new: Some(new),
            trap,
            _serial: Some(serial),
        }
    }

    /// Move `source` (a child of the old parent) to `new_name` under the new
    /// parent.
    pub fn rename(
        &self,
        locks: &RenameLocks<'_>,
        source: &Arc<Alias>,
        new_name: &str,
        flags: RenameFlags,
    ) -> StoreResult<()> {
        self.check_name(new_name)?;
        if !flags.is_supported() {
            return Err(StoreError::InvalidArgument(format!("rename flags {flags:?}")));
        }
        let old_dir = locks.old_dir();
        let new_dir = locks.new_dir();
        let src_node = Self::check_child(old_dir, source)?;
        Self::check_dir(new_dir)?;
        if locks.trap().is_some_and(|t| Arc::ptr_eq(t, source)) {
            return Err(StoreError::InvalidArgument(format!(
                "cannot move {} into its own subtree",
                source.name()
            )));
        }
        if src_node.is_canonical_alias(source) {
            if !old_dir.flags().contains(StateFlags::RENAMING_CHILD) {
                return Err(StoreError::NotSupported(format!(
                    "{} is indexed",
                    source.name()
                )));
            }
            if !new_dir.node().is_indexed() {
                return Err(StoreError::NotFound(format!(
                    "{} is not indexed",
                    new_dir.alias().name()
                )));
            }
        }

        let target = new_dir.alias().child(new_name);
        if let Some(t) = &target {
            if Arc::ptr_eq(t, source) {
                return Ok(());
            }
            if locks.trap().is_some_and(|trap| Arc::ptr_eq(trap, t)) {
                return Err(StoreError::InvalidArgument(format!(
                    "{new_name} is an ancestor of the source"
                )));
            }
        }
        if flags.contains(RenameFlags::NOREPLACE) && target.is_some() {
            return Err(StoreError::AlreadyExists(new_name.to_string()));
        }

        match target {
            None if flags.contains(RenameFlags::EXCHANGE) => {
                Err(StoreError::NotFound(new_name.to_string()))
            }
            None => self.move_entry(locks, source, &src_node, new_name),
            Some(t) if flags.contains(RenameFlags::EXCHANGE) => {
                self.exchange(locks, source, &src_node, &t)
            }
            Some(t) => self.replace(locks, source, &src_node, &t, new_name),
        }
    }

    fn reparent(old_dir: &Alias, new_dir: &Arc<Alias>, entry: &Arc<Alias>, new_name: &str) {
        old_dir.children().remove(&entry.name());
        entry.relink(new_dir, new_name);
        new_dir
            .children()
            .insert(new_name.to_string(), Arc::clone(entry));
    }

    fn move_folder_link(locks: &RenameLocks<'_>, from_old: bool) {
        if locks.same_dir() {
            return;
        }
        let (from, to) = if from_old {
            (locks.old_dir(), locks.new_dir())
        } else {
            (locks.new_dir(), locks.old_dir())
        };
        from.node().dec_nlink();
        to.node().inc_nlink();
    }

    fn move_entry(
        &self,
        locks: &RenameLocks<'_>,
        source: &Arc<Alias>,
        src_node: &Arc<Node>,
        new_name: &str,
    ) -> StoreResult<()> {
        src_node.fence_lease(false)?;
        Self::reparent(locks.old_dir().alias(), locks.new_dir().alias(), source, new_name);
        if source.is_dir_type() {
            Self::move_folder_link(locks, true);
        }
        debug!(node = %src_node.id(), new_name, "entry moved");
        Ok(())
    }

    fn replace(
        &self,
        locks: &RenameLocks<'_>,
        source: &Arc<Alias>,
        src_node: &Arc<Node>,
        target: &Arc<Alias>,
        new_name: &str,
    ) -> StoreResult<()> {
        let t_node = target
            .node()
            .ok_or_else(|| StoreError::NotFound(new_name.to_string()))?;
        if Arc::ptr_eq(&t_node, src_node) {
            return Ok(());
        }
        if t_node.is_canonical_alias(target) {
            return Err(StoreError::PermissionDenied(format!(
                "{new_name} is indexed and cannot be replaced"
            )));
        }
        let src_is_dir = source.is_dir_type();
        let t_is_dir = target.is_dir_type();
        if src_is_dir && !t_is_dir {
            return Err(StoreError::NotADirectory(new_name.to_string()));
        }
        if !src_is_dir && t_is_dir {
            return Err(StoreError::IsADirectory(new_name.to_string()));
        }
        let target_lock: Option<MutexGuard<'_, NodeState>> = (!locks.holds(&t_node))
            .then(|| t_node.state.lock().expect("node lock poisoned"));
        if t_is_dir && target.has_children() {
            return Err(StoreError::DirectoryNotEmpty(new_name.to_string()));
        }
        src_node.fence_lease(false)?;
        t_node.fence_lease(t_is_dir || t_node.nlink() <= 1)?;

        let new_dir = locks.new_dir();
        new_dir.alias().children().remove(new_name);
        let displaced = target.clear_node();
        if t_is_dir {
            t_node.clear_nlink();
            new_dir.node().dec_nlink();
        } else {
            t_node.dec_nlink();
        }
        Self::reparent(locks.old_dir().alias(), new_dir.alias(), source, new_name);
        if src_is_dir {
            Self::move_folder_link(locks, true);
        }
        drop(target_lock);
        drop(displaced);
        debug!(node = %src_node.id(), replaced = %t_node.id(), new_name, "entry moved over existing");
        Ok(())
    }

    fn exchange(
        &self,
        locks: &RenameLocks<'_>,
        source: &Arc<Alias>,
        src_node: &Arc<Node>,
        target: &Arc<Alias>,
    ) -> StoreResult<()> {
        let t_node = target
            .node()
            .ok_or_else(|| StoreError::NotFound(target.name()))?;
        if t_node.is_canonical_alias(target) && !locks.old_dir().node().is_indexed() {
            return Err(StoreError::NotFound(format!(
                "{} is not indexed",
                locks.old_dir().alias().name()
            )));
        }
        src_node.fence_lease(false)?;
        t_node.fence_lease(false)?;

        let old_dir = locks.old_dir().alias();
        let new_dir = locks.new_dir().alias();
        let src_name = source.name();
        let t_name = target.name();
        old_dir.children().remove(&src_name);
        new_dir.children().remove(&t_name);
        source.relink(new_dir, &t_name);
        target.relink(old_dir, &src_name);
        old_dir.children().insert(src_name, Arc::clone(target));
        new_dir.children().insert(t_name, Arc::clone(source));

        if source.is_dir_type() {
            Self::move_folder_link(locks, true);
        }
        if target.is_dir_type() {
            Self::move_folder_link(locks, false);
        }
        debug!(a = %src_node.id(), b = %t_node.id(), "entries exchanged");
        Ok(())
    }

    // ---------------------------------------------------------------
    // Paths and teardown
    // ---------------------------------------------------------------

    /// Text of a symlink in `folder` that reaches `target`: one `../` per
    /// level of `folder` below the root, then the target's path.
    pub fn relative_link_text(&self, folder: &Alias, target: &Alias) -> StoreResult<String> {
        let depth = folder.depth();
        let path = target.path_from_root();
        let len = depth * 3 + path.len();
        let max = self.mount.config().path_max;
        if len > max {
            return Err(StoreError::PathTooLong { len, max });
        }
        let mut text = String::new();
        text.try_reserve_exact(len.max(1))
            .map_err(|_| StoreError::OutOfMemory)?;
        for _ in 0..depth {
            text.push_str("../");
        }
        text.push_str(&path);
        if text.is_empty() {
            text.push('.');
        }
        Ok(text)
    }

    /// Detach every entry of the tree, breaking alias/node cycles so
    /// unreferenced nodes are reclaimed. Iterative, so depth is unbounded.
    pub fn teardown(&self) {
        let mut pending = vec![Arc::clone(&self.root)];
        let mut detached = 0usize;
        while let Some(alias) = pending.pop() {
            pending.extend(alias.take_children().into_values());
            if alias.clear_node().is_some() {
                detached += 1;
            }
        }
        debug!(namespace = %self.mount.namespace(), detached, "tree torn down");
    }
}

impl fmt::Debug for HostFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFs")
            .field("mount", &self.mount)
            .finish_non_exhaustive()
    }
}

impl Drop for HostFs {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use oidns_index::{IndexConfig, ObjectIndex};
    use oidns_types::{IdAllocator, NamespaceId};

    use crate::config::StoreConfig;
    use crate::ops::BufferOps;

    use super::*;

    fn fixture_with(config: StoreConfig) -> (Arc<ObjectIndex<Node>>, HostFs) {
        let index = Arc::new(ObjectIndex::new(&IndexConfig::default()));
        let mount = Mount::new(
            NamespaceId::derive("host-test"),
            config,
            Arc::new(IdAllocator::new(1)),
            Arc::clone(&index),
        );
        (index, HostFs::new(mount).unwrap())
    }

    fn fixture() -> (Arc<ObjectIndex<Node>>, HostFs) {
        fixture_with(StoreConfig::default())
    }

    fn mkdir(fs: &HostFs, dir: &ObjectRef, name: &str) -> ObjectRef {
        fs.mkdir(&dir.lock(), name).unwrap()
    }

    fn index_it(index: &ObjectIndex<Node>, entry: &ObjectRef) {
        assert!(entry.lock().mark_indexed());
        index.insert(entry.node()).unwrap();
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    #[test]
    fn mkdir_counts_links() {
        let (_index, fs) = fixture();
        let root = fs.root_ref().unwrap();
        assert_eq!(root.node().nlink(), 2);
        let a = mkdir(&fs, &root, "a");
        assert_eq!(a.node().nlink(), 2);
        assert_eq!(root.node().nlink(), 3);
        assert_eq!(a.alias().parent().map(|p| Arc::ptr_eq(&p, fs.root())), Some(true));
        assert_eq!(fs.mount().node_count(), 2);
    }

    #[test]
    fn duplicate_and_bad_names_are_rejected() {
        let (_index, fs) = fixture();
        let root = fs.root_ref().unwrap();
        mkdir(&fs, &root, "a");
        let guard = root.lock();
        assert!(matches!(fs.create(&guard, "a", false), Err(StoreError::AlreadyExists(_))));
        assert!(matches!(fs.create(&guard, "", false), Err(StoreError::InvalidArgument(_))));
        assert!(matches!(fs.create(&guard, "x/y", false), Err(StoreError::InvalidArgument(_))));
        assert!(matches!(fs.create(&guard, "..", false), Err(StoreError::InvalidArgument(_))));
        let long = "n".repeat(256);
        assert!(matches!(
            fs.create(&guard, &long, false),
            Err(StoreError::NameTooLong { len: 256, max: 255 })
        ));
    }

    #[test]
    fn singularity_needs_creation_flag() {
        let (_index, fs) = fixture();
        let root = fs.root_ref().unwrap();
        let mut guard = root.lock();
        assert!(matches!(fs.create(&guard, "s", true), Err(StoreError::PermissionDenied(_))));
        let s = guard
            .with_flags(StateFlags::CREATING_CHILD | StateFlags::CREATING_SINGULARITY, |g| {
                fs.create(g, "s", true)
            })
            .unwrap();
        assert_eq!(s.kind(), NodeKind::Singularity);
        assert_eq!(s.node().nlink(), 2);
        assert!(s.alias().is_dir_type());
        assert_eq!(root.node().nlink(), 3);
        assert!(guard.flags().is_empty());
    }

    #[test]
    fn cannot_create_under_file_or_removed_dir() {
        let (_index, fs) = fixture();
        let root = fs.root_ref().unwrap();
        let file = fs.create(&root.lock(), "f", false).unwrap();
        assert!(matches!(fs.mkdir(&file.lock(), "x"), Err(StoreError::NotADirectory(_))));

        let a = mkdir(&fs, &root, "a");
        fs.rmdir(&root.lock(), a.alias()).unwrap();
        assert!(matches!(fs.mkdir(&a.lock(), "x"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn node_budget_is_enforced() {
        let (_index, fs) = fixture_with(StoreConfig {
            max_nodes: Some(2),
            ..StoreConfig::default()
        });
        let root = fs.root_ref().unwrap();
        mkdir(&fs, &root, "a");
        assert!(matches!(fs.mkdir(&root.lock(), "b"), Err(StoreError::NoSpace(2))));
    }

    // -----------------------------------------------------------------------
    // Links and removal
    // -----------------------------------------------------------------------

    #[test]
    fn hard_links_share_node() {
        let (_index, fs) = fixture();
        let root = fs.root_ref().unwrap();
        let f = fs.create(&root.lock(), "f", false).unwrap();
        let g = fs.link(&root.lock(), "g", &f).unwrap();
        assert!(Arc::ptr_eq(f.node(), g.node()));
        assert_eq!(f.node().nlink(), 2);

        fs.unlink(&root.lock(), f.alias()).unwrap();
        assert!(!f.node().is_dead());
        assert_eq!(g.node().nlink(), 1);
        fs.unlink(&root.lock(), g.alias()).unwrap();
        assert!(g.node().is_dead());

        let d = mkdir(&fs, &root, "d");
        assert!(matches!(fs.link(&root.lock(), "d2", &d), Err(StoreError::PermissionDenied(_))));
    }

    #[test]
    fn rmdir_requires_empty_directory() {
        let (_index, fs) = fixture();
        let root = fs.root_ref().unwrap();
        let a = mkdir(&fs, &root, "a");
        let b = mkdir(&fs, &a, "b");
        assert!(matches!(fs.rmdir(&root.lock(), a.alias()), Err(StoreError::DirectoryNotEmpty(_))));
        fs.rmdir(&a.lock(), b.alias()).unwrap();
        assert_eq!(a.node().nlink(), 2);
        assert_eq!(b.node().nlink(), 0);
        assert!(b.alias().is_negative());
        fs.rmdir(&root.lock(), a.alias()).unwrap();
        assert_eq!(root.node().nlink(), 2);
    }

    #[test]
    fn removal_checks_kind_and_parent() {
        let (_index, fs) = fixture();
        let root = fs.root_ref().unwrap();
        let a = mkdir(&fs, &root, "a");
        let f = fs.create(&a.lock(), "f", false).unwrap();
        assert!(matches!(fs.unlink(&root.lock(), a.alias()), Err(StoreError::IsADirectory(_))));
        assert!(matches!(fs.rmdir(&a.lock(), f.alias()), Err(StoreError::NotADirectory(_))));
        assert!(matches!(fs.unlink(&root.lock(), f.alias()), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn canonical_alias_needs_in_progress_flag() {
        let (index, fs) = fixture();
        let root = fs.root_ref().unwrap();
        let a = mkdir(&fs, &root, "a");
        index_it(&index, &a);

        let mut guard = root.lock();
        assert!(matches!(fs.rmdir(&guard, a.alias()), Err(StoreError::NotSupported(_))));
        guard
            .with_flags(StateFlags::REMOVING_CHILD, |g| fs.rmdir(g, a.alias()))
            .unwrap();
        drop(guard);

        let id = a.id();
        assert!(index.lookup(&id).is_some());
        drop(a);
        assert!(index.lookup(&id).is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn canonical_singularity_unlink_needs_singularity_flag() {
        let (index, fs) = fixture();
        let root = fs.root_ref().unwrap();
        let s = root
            .lock()
            .with_flags(StateFlags::CREATING_SINGULARITY, |g| fs.create(g, "s", true))
            .unwrap();
        index_it(&index, &s);

        let removing = StateFlags::REMOVING_CHILD | StateFlags::REMOVING_SINGULARITY;
        let mut guard = root.lock();
        let err = guard.with_flags(StateFlags::REMOVING_CHILD, |g| fs.unlink(g, s.alias()));
        assert!(matches!(err, Err(StoreError::PermissionDenied(_))));

        let child = fs.create(&s.lock(), "c", false).unwrap();
        let err = guard.with_flags(removing, |g| fs.unlink_singularity(g, s.alias()));
        assert!(matches!(err, Err(StoreError::DirectoryNotEmpty(_))));
        fs.unlink(&s.lock(), child.alias()).unwrap();

        guard
            .with_flags(removing, |g| fs.unlink_singularity(g, s.alias()))
            .unwrap();
        assert!(!s.alias().is_dir_type());
        assert!(s.node().is_dead());
        assert_eq!(s.node().nlink(), 0);
        assert_eq!(root.node().nlink(), 2);
    }

    #[test]
    fn linked_singularity_is_busy() {
        let (index, fs) = fixture();
        let root = fs.root_ref().unwrap();
        let s = root
            .lock()
            .with_flags(StateFlags::CREATING_SINGULARITY, |g| fs.create(g, "s", true))
            .unwrap();
        index_it(&index, &s);
        assert!(matches!(fs.link(&root.lock(), "s2", &s), Err(StoreError::NotSupported(_))));
        let extra = root
            .lock()
            .with_flags(StateFlags::LINKING_CHILD, |g| fs.link(g, "s2", &s))
            .unwrap();
        assert_eq!(s.node().nlink(), 3);

        let removing = StateFlags::REMOVING_CHILD | StateFlags::REMOVING_SINGULARITY;
        let err = root
            .lock()
            .with_flags(removing, |g| fs.unlink_singularity(g, s.alias()));
        assert!(matches!(err, Err(StoreError::Busy(_))));

        fs.unlink(&root.lock(), extra.alias()).unwrap();
        root.lock()
            .with_flags(removing, |g| fs.unlink_singularity(g, s.alias()))
            .unwrap();
    }

    #[test]
    fn singularity_with_child_directory_is_not_empty() {
        let (index, fs) = fixture();
        let root = fs.root_ref().unwrap();
        let s = root
            .lock()
            .with_flags(StateFlags::CREATING_SINGULARITY, |g| fs.create(g, "s", true))
            .unwrap();
        index_it(&index, &s);
        let child = mkdir(&fs, &s, "child");
        assert_eq!(s.node().nlink(), 3);

        let removing = StateFlags::REMOVING_CHILD | StateFlags::REMOVING_SINGULARITY;
        let err = root
            .lock()
            .with_flags(removing, |g| fs.unlink_singularity(g, s.alias()));
        assert!(matches!(err, Err(StoreError::DirectoryNotEmpty(_))));

        fs.rmdir(&s.lock(), child.alias()).unwrap();
        assert_eq!(s.node().nlink(), 2);
        root.lock()
            .with_flags(removing, |g| fs.unlink_singularity(g, s.alias()))
            .unwrap();
    }

    // -----------------------------------------------------------------------
    // Rename
    // -----------------------------------------------------------------------

    #[test]
    fn rename_moves_directory_and_adjusts_links() {
        let (_index, fs) = fixture();
        let root = fs.root_ref().unwrap();
        let a = mkdir(&fs, &root, "a");
        let b = mkdir(&fs, &root, "b");
        let c = mkdir(&fs, &a, "c");

        let locks = fs.lock_rename(&a, &b);
        fs.rename(&locks, c.alias(), "c2", RenameFlags::empty()).unwrap();
        drop(locks);

        assert_eq!(c.name(), "c2");
        assert!(c.alias().is_child_of(b.alias()));
        assert!(a.alias().child("c").is_none());
        assert_eq!(a.node().nlink(), 2);
        assert_eq!(b.node().nlink(), 3);
        assert_eq!(fs.lookup_path("b/c2").unwrap().id(), c.id());
    }

    #[test]
    fn rename_within_one_dir_keeps_links() {
        let (_index, fs) = fixture();
        let root = fs.root_ref().unwrap();
        let a = mkdir(&fs, &root, "a");
        let locks = fs.lock_rename(&root, &root);
        assert!(locks.same_dir());
        fs.rename(&locks, a.alias(), "z", RenameFlags::empty()).unwrap();
        drop(locks);
        assert_eq!(root.node().nlink(), 3);
        assert_eq!(root.alias().child_names(), vec!["z".to_string()]);
    }

    #[test]
    fn same_dir_rename_proceeds_during_cross_dir_rename() {
        let (_index, fs) = fixture();
        let root = fs.root_ref().unwrap();
        let left = mkdir(&fs, &root, "left");
        let right = mkdir(&fs, &root, "right");
        let a = mkdir(&fs, &left, "a");
        let b = mkdir(&fs, &right, "b");

        let cross = fs.lock_rename(&left, &root);
        assert!(!cross.same_dir());
        let (tx, rx) = mpsc::channel();
        thread::scope(|s| {
            s.spawn(|| {
                let locks = fs.lock_rename(&right, &right);
                fs.rename(&locks, b.alias(), "b2", RenameFlags::empty()).unwrap();
                tx.send(()).unwrap();
            });
            assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        });
        fs.rename(&cross, a.alias(), "a2", RenameFlags::empty()).unwrap();
        drop(cross);

        assert_eq!(fs.lookup_path("right/b2").unwrap().id(), b.id());
        assert_eq!(fs.lookup_path("a2").unwrap().id(), a.id());
    }

    #[test]
    fn rename_into_own_subtree_is_trapped() {
        let (_index, fs) = fixture();
        let root = fs.root_ref().unwrap();
        let a = mkdir(&fs, &root, "a");
        let b = mkdir(&fs, &a, "b");
        let locks = fs.lock_rename(&root, &b);
        assert!(Arc::ptr_eq(locks.trap().unwrap(), a.alias()));
        let err = fs.rename(&locks, a.alias(), "a", RenameFlags::empty());
        assert!(matches!(err, Err(StoreError::InvalidArgument(_))));
    }

    #[test]
    fn rename_onto_ancestor_is_trapped() {
        let (_index, fs) = fixture();
        let root = fs.root_ref().unwrap();
        let a = mkdir(&fs, &root, "a");
        let b = mkdir(&fs, &a, "b");
        let f = fs.create(&b.lock(), "f", false).unwrap();
        let locks = fs.lock_rename(&b, &root);
        let err = fs.rename(&locks, f.alias(), "a", RenameFlags::empty());
        assert!(matches!(err, Err(StoreError::InvalidArgument(_))));
    }

    #[test]
    fn rename_flag_rules() {
        let (_index, fs) = fixture();
        let root = fs.root_ref().unwrap();
        let f = fs.create(&root.lock(), "f", false).unwrap();
        fs.create(&root.lock(), "g", false).unwrap();
        let d = mkdir(&fs, &root, "d");
        mkdir(&fs, &d, "inner");
        let e = mkdir(&fs, &root, "e");

        let locks = fs.lock_rename(&root, &root);
        assert!(matches!(
            fs.rename(&locks, f.alias(), "g", RenameFlags::NOREPLACE),
            Err(StoreError::AlreadyExists(_))
        ));
        assert!(matches!(
            fs.rename(&locks, f.alias(), "missing", RenameFlags::EXCHANGE),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            fs.rename(&locks, f.alias(), "g", RenameFlags::WHITEOUT),
            Err(StoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            fs.rename(&locks, f.alias(), "d", RenameFlags::empty()),
            Err(StoreError::IsADirectory(_))
        ));
        assert!(matches!(
            fs.rename(&locks, e.alias(), "g", RenameFlags::empty()),
            Err(StoreError::NotADirectory(_))
        ));
        assert!(matches!(
            fs.rename(&locks, e.alias(), "d", RenameFlags::empty()),
            Err(StoreError::DirectoryNotEmpty(_))
        ));
    }

    #[test]
    fn rename_replaces_file() {
        let (_index, fs) = fixture();
        let root = fs.root_ref().unwrap();
        let f = fs.create(&root.lock(), "f", false).unwrap();
        let g = fs.create(&root.lock(), "g", false).unwrap();
        let locks = fs.lock_rename(&root, &root);
        fs.rename(&locks, f.alias(), "g", RenameFlags::empty()).unwrap();
        drop(locks);
        assert!(g.alias().is_negative());
        assert!(g.node().is_dead());
        assert_eq!(fs.lookup_path("g").unwrap().id(), f.id());
    }

    #[test]
    fn exchange_swaps_entries_across_dirs() {
        let (_index, fs) = fixture();
        let root = fs.root_ref().unwrap();
        let a = mkdir(&fs, &root, "a");
        let b = mkdir(&fs, &root, "b");
        let sub = mkdir(&fs, &a, "sub");
        let file = fs.create(&b.lock(), "file", false).unwrap();

        let locks = fs.lock_rename(&a, &b);
        fs.rename(&locks, sub.alias(), "file", RenameFlags::EXCHANGE).unwrap();
        drop(locks);

        assert_eq!(fs.lookup_path("b/file").unwrap().id(), sub.id());
        assert_eq!(fs.lookup_path("a/sub").unwrap().id(), file.id());
        assert_eq!(a.node().nlink(), 2);
        assert_eq!(b.node().nlink(), 3);
    }

    // -----------------------------------------------------------------------
    // Leases
    // -----------------------------------------------------------------------

    #[test]
    fn leased_node_blocks_removal_until_released() {
        let (_index, fs) = fixture();
        let root = fs.root_ref().unwrap();
        let f = fs.create(&root.lock(), "f", false).unwrap();
        let lease = f.node().acquire_lease().unwrap();
        assert!(matches!(f.node().acquire_lease(), Err(StoreError::Busy(_))));

        let err = fs.unlink(&root.lock(), f.alias()).unwrap_err();
        let StoreError::LeaseConflict(brk) = err else {
            panic!("expected lease conflict");
        };
        assert!(Arc::ptr_eq(brk.node(), f.node()));
        assert!(lease.is_breaking());
        assert!(!f.node().is_dead());

        drop(lease);
        assert!(f.node().wait_for_lease_break(Duration::from_millis(10)));
        fs.unlink(&root.lock(), f.alias()).unwrap();
        assert!(matches!(f.node().acquire_lease(), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn lease_break_times_out_and_revokes() {
        let (_index, fs) = fixture();
        let root = fs.root_ref().unwrap();
        let f = fs.create(&root.lock(), "f", false).unwrap();
        let stale = f.node().acquire_lease().unwrap();
        assert!(!f.node().wait_for_lease_break(Duration::from_millis(5)));
        assert!(!f.node().is_leased());

        let fresh = f.node().acquire_lease().unwrap();
        drop(stale);
        assert!(f.node().is_leased());
        drop(fresh);
        assert!(!f.node().is_leased());
    }

    // -----------------------------------------------------------------------
    // Content, paths, teardown
    // -----------------------------------------------------------------------

    #[test]
    fn content_dispatches_by_kind() {
        let (_index, fs) = fixture();
        let root = fs.root_ref().unwrap();
        let f = fs.create(&root.lock(), "f", false).unwrap();
        assert!(matches!(f.node().read(0, &mut [0; 4]), Err(StoreError::NotSupported(_))));
        f.node().set_ops(Arc::new(BufferOps::new()));
        assert_eq!(f.node().write(2, b"hi").unwrap(), 2);
        let mut buf = [9u8; 8];
        assert_eq!(f.node().read(0, &mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"\0\0hi");
        assert_eq!(f.node().size(), 4);

        assert!(matches!(root.node().read(0, &mut buf), Err(StoreError::IsADirectory(_))));
    }

    #[test]
    fn relative_link_text_climbs_to_root() {
        let (_index, fs) = fixture();
        let root = fs.root_ref().unwrap();
        let a = mkdir(&fs, &root, "a");
        let b = mkdir(&fs, &a, "b");
        let c = mkdir(&fs, &root, "c");
        assert_eq!(fs.relative_link_text(b.alias(), c.alias()).unwrap(), "../../c");
        assert_eq!(fs.relative_link_text(root.alias(), b.alias()).unwrap(), "a/b");
        assert_eq!(fs.relative_link_text(root.alias(), root.alias()).unwrap(), ".");
    }

    #[test]
    fn link_text_respects_path_max() {
        let (_index, fs) = fixture_with(StoreConfig {
            path_max: 4,
            ..StoreConfig::default()
        });
        let root = fs.root_ref().unwrap();
        let a = mkdir(&fs, &root, "abcde");
        assert!(matches!(
            fs.relative_link_text(root.alias(), a.alias()),
            Err(StoreError::PathTooLong { len: 5, max: 4 })
        ));
        assert!(matches!(
            fs.symlink(&root.lock(), "s", "abcde"),
            Err(StoreError::PathTooLong { .. })
        ));
    }

    #[test]
    fn teardown_reclaims_everything() {
        let (index, fs) = fixture();
        let root = fs.root_ref().unwrap();
        index_it(&index, &root);
        let mut dir = root.clone();
        for depth in 0..50 {
            let next = mkdir(&fs, &dir, &format!("d{depth}"));
            index_it(&index, &next);
            fs.create(&next.lock(), "f", false).unwrap();
            dir = next;
        }
        drop(dir);
        drop(root);
        assert_eq!(index.len(), 51);
        let mount = Arc::clone(fs.mount());
        drop(fs);
        assert!(index.is_empty());
        assert_eq!(mount.node_count(), 0);
    }
}
