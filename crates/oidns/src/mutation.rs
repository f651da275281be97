//! Structural changes through the object-id API.
//!
//! Every mutation follows one template: enter the namespace gate, resolve
//! the entries involved, take a write token from the mount, lock the parent
//! (both parents for a rename), re-check what was resolved, consult the
//! authorizer chain, then run the host primitive with the matching
//! in-progress flag set on the parent and bring the index up to date.
//!
//! A lease conflict reported by the host drops every lock, waits for the
//! break and retries from the locking step once. Any other race surfaces to
//! the caller.

use std::sync::Arc;

use tracing::{debug, error, warn};

use oidns_store::{MutationRequest, Node, NodeGuard, NodeOps, ObjectRef, StoreError};
use oidns_types::{NodeKind, ObjectId, RenameFlags, StateFlags};

use crate::error::{NsError, NsResult};
use crate::registry::Namespace;

/// Why one locked attempt failed.
enum Failure {
    Error(NsError),
    Lease(Arc<Node>),
}

impl From<NsError> for Failure {
    fn from(err: NsError) -> Self {
        Self::Error(err)
    }
}

impl From<StoreError> for Failure {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LeaseConflict(brk) => Self::Lease(brk.into_node()),
            other => Self::Error(other.into()),
        }
    }
}

type Attempt<T> = Result<T, Failure>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Removal {
    Directory,
    Entry,
    Singularity,
}

impl Removal {
    /// The removal an entry's kind calls for.
    fn for_entry(entry: &ObjectRef) -> Self {
        match entry.kind() {
            NodeKind::Directory => Self::Directory,
            NodeKind::Singularity if entry.is_canonical() => Self::Singularity,
            _ => Self::Entry,
        }
    }

    fn verb(self) -> &'static str {
        match self {
            Self::Directory => "rmdir",
            Self::Entry => "unlink",
            Self::Singularity => "remove_singularity",
        }
    }

    fn flags(self) -> StateFlags {
        match self {
            Self::Singularity => StateFlags::REMOVING_CHILD | StateFlags::REMOVING_SINGULARITY,
            _ => StateFlags::REMOVING_CHILD,
        }
    }
}

impl Namespace {
    // ---------------------------------------------------------------
    // Creation
    // ---------------------------------------------------------------

    pub fn mkdir(&self, folder: Option<ObjectId>, name: &str) -> NsResult<ObjectRef> {
        self.create_entry(folder, name, NodeKind::Directory, None)
    }

    /// Create a symlink to `target`. The link text is relative to the
    /// folder it lands in.
    pub fn symlink(&self, folder: Option<ObjectId>, name: &str, target: ObjectId) -> NsResult<ObjectRef> {
        self.create_entry(folder, name, NodeKind::Symlink, Some(target))
    }

    pub fn create(&self, folder: Option<ObjectId>, name: &str, singularity: bool) -> NsResult<ObjectRef> {
        let kind = if singularity {
            NodeKind::Singularity
        } else {
            NodeKind::File
        };
        self.create_entry(folder, name, kind, None)
    }

    pub fn create_file(&self, folder: Option<ObjectId>, name: &str) -> NsResult<ObjectRef> {
        self.create(folder, name, false)
    }

    pub fn create_singularity(&self, folder: Option<ObjectId>, name: &str) -> NsResult<ObjectRef> {
        self.create(folder, name, true)
    }

    fn create_entry(
        &self,
        folder: Option<ObjectId>,
        name: &str,
        kind: NodeKind,
        target: Option<ObjectId>,
    ) -> NsResult<ObjectRef> {
        let _gate = self.enter()?;
        let dir = self.resolve_folder(folder)?;
        let target = target.map(|id| self.resolve(Some(id))).transpose()?;
        let _token = self.host.mount().want_write()?;

        let mut guard = dir.lock();
        Self::check_owner(&guard)?;
        self.ctx.auth.check(&MutationRequest::Create {
            parent: dir.id(),
            name,
            kind,
        })?;
        let flags = match kind {
            NodeKind::Singularity => StateFlags::CREATING_CHILD | StateFlags::CREATING_SINGULARITY,
            _ => StateFlags::CREATING_CHILD,
        };
        let entry = guard.with_flags(flags, |g| -> NsResult<ObjectRef> {
            let entry = match kind {
                NodeKind::Directory => self.host.mkdir(g, name)?,
                NodeKind::File => self.host.create(g, name, false)?,
                NodeKind::Singularity => self.host.create(g, name, true)?,
                NodeKind::Symlink => {
                    let target = target
                        .as_ref()
                        .ok_or_else(|| NsError::InvalidArgument("symlink without a target".into()))?;
                    let text = self.host.relative_link_text(g.alias(), target.alias())?;
                    let entry = self.host.symlink(g, name, &text)?;
                    entry.node().set_symlink_target(target.id());
                    entry
                }
            };
            self.publish(&entry);
            Ok(entry)
        })?;
        debug!(id = %entry.id(), parent = %dir.id(), name, %kind, "object created");
        Ok(entry)
    }

    /// Add another name for `source` inside `folder`. The new entry is not
    /// indexed; `source` keeps its canonical alias.
    pub fn link(&self, source: ObjectId, folder: Option<ObjectId>, name: &str) -> NsResult<ObjectRef> {
        let _gate = self.enter()?;
        let source = self.resolve(Some(source))?;
        let dir = self.resolve_folder(folder)?;
        let _token = self.host.mount().want_write()?;

        let mut guard = dir.lock();
        Self::check_owner(&guard)?;
        self.ctx.auth.check(&MutationRequest::Create {
            parent: dir.id(),
            name,
            kind: source.kind(),
        })?;
        let entry = guard.with_flags(StateFlags::LINKING_CHILD, |g| self.host.link(g, name, &source))?;
        debug!(id = %source.id(), parent = %dir.id(), name, "object linked");
        Ok(entry)
    }

    /// Make a freshly created entry the canonical alias of its node and
    /// index it. Runs under the parent lock.
    fn publish(&self, entry: &ObjectRef) {
        if !entry.lock().mark_indexed() {
            error!(id = %entry.id(), "fresh node already has a canonical alias");
            panic!("node {} indexed twice", entry.id());
        }
        if let Err(err) = self.ctx.index.insert(entry.node()) {
            error!(id = %entry.id(), %err, "index diverged from namespace");
            panic!("index diverged from namespace: {err}");
        }
    }

    // ---------------------------------------------------------------
    // Removal
    // ---------------------------------------------------------------

    pub fn rmdir(&self, id: Option<ObjectId>) -> NsResult<()> {
        self.remove_checked(id, Removal::Directory)
    }

    pub fn unlink(&self, id: Option<ObjectId>) -> NsResult<()> {
        self.remove_checked(id, Removal::Entry)
    }

    /// Remove a singularity. It must hold no children and no names beyond
    /// its own.
    pub fn remove_singularity(&self, id: Option<ObjectId>) -> NsResult<()> {
        self.remove_checked(id, Removal::Singularity)
    }

    /// Remove `id`, choosing the removal by kind, or the whole subtree when
    /// `recursive` is set.
    pub fn remove(&self, id: Option<ObjectId>, recursive: bool) -> NsResult<()> {
        if recursive {
            return self.remove_recursive(id);
        }
        let _gate = self.enter()?;
        let victim = self.resolve(id)?;
        if victim.alias().is_root() {
            return Err(NsError::IsADirectory("namespace root".into()));
        }
        self.remove_resolved(&victim, Removal::for_entry(&victim))
    }

    /// Remove `id` and everything below it.
    ///
    /// Best effort: children removed concurrently are skipped, and entries
    /// created under the subtree during the walk make the final removal
    /// fail `DirectoryNotEmpty`.
    pub fn remove_recursive(&self, id: Option<ObjectId>) -> NsResult<()> {
        let _gate = self.enter()?;
        let target = self.resolve(id)?;
        if target.alias().is_root() {
            return Err(NsError::IsADirectory("namespace root".into()));
        }
        self.remove_tree(&target)
    }

    /// Post-order walk with an explicit stack; each frame keeps the name of
    /// the last child it descended into.
    fn remove_tree(&self, top: &ObjectRef) -> NsResult<()> {
        let mut stack: Vec<(ObjectRef, Option<String>)> = vec![(top.clone(), None)];
        while let Some((entry, cursor)) = stack.last_mut() {
            if entry.alias().is_dir_type() {
                if let Some(child) = entry.alias().next_child_after(cursor.as_deref()) {
                    *cursor = Some(child.name());
                    if let Some(child) = ObjectRef::from_alias(&child) {
                        stack.push((child, None));
                    }
                    continue;
                }
            }
            let Some((entry, _)) = stack.pop() else {
                break;
            };
            match self.remove_resolved(&entry, Removal::for_entry(&entry)) {
                Ok(()) => {}
                Err(NsError::NotFound(_) | NsError::OwnerDead(_)) if !stack.is_empty() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn remove_checked(&self, id: Option<ObjectId>, how: Removal) -> NsResult<()> {
        let _gate = self.enter()?;
        let victim = self.resolve(id)?;
        if victim.alias().is_root() {
            return Err(match how {
                Removal::Directory => NsError::Busy("namespace root".into()),
                _ => NsError::IsADirectory("namespace root".into()),
            });
        }
        let kind = victim.kind();
        match (how, kind) {
            (Removal::Directory, NodeKind::Directory)
            | (Removal::Singularity, NodeKind::Singularity)
            | (Removal::Entry, NodeKind::File | NodeKind::Symlink) => {}
            (Removal::Directory, _) => {
                return Err(NsError::PermissionDenied(format!("{} is a {kind}", victim.id())));
            }
            (Removal::Entry, NodeKind::Directory) => {
                return Err(NsError::IsADirectory(victim.id().to_string()));
            }
            (Removal::Entry, _) => {
                return Err(NsError::PermissionDenied(format!(
                    "{} is a singularity",
                    victim.id()
                )));
            }
            (Removal::Singularity, _) => {
                return Err(NsError::InvalidArgument(format!(
                    "{} is not a singularity",
                    victim.id()
                )));
            }
        }
        self.remove_resolved(&victim, how)
    }

    /// Remove a resolved entry from its parent. Gate held by the caller.
    fn remove_resolved(&self, victim: &ObjectRef, how: Removal) -> NsResult<()> {
        let parent = self.parent_of(victim)?;
        let _token = self.host.mount().want_write()?;
        self.retry_lease(how.verb(), || {
            let mut guard = parent.lock();
            Self::check_child(&guard, victim)?;
            self.ctx.auth.check(&MutationRequest::Remove {
                parent: parent.id(),
                target: victim.id(),
                name: &victim.name(),
                kind: victim.kind(),
            })?;
            guard.with_flags(how.flags(), |g| match how {
                Removal::Directory => self.host.rmdir(g, victim.alias()),
                Removal::Entry => self.host.unlink(g, victim.alias()),
                Removal::Singularity => self.host.unlink_singularity(g, victim.alias()),
            })?;
            Ok(())
        })?;
        debug!(id = %victim.id(), parent = %parent.id(), verb = how.verb(), "object removed");
        Ok(())
    }

    // ---------------------------------------------------------------
    // Rename
    // ---------------------------------------------------------------

    /// Move `source` to `new_name` inside `new_folder`.
    pub fn rename(
        &self,
        source: Option<ObjectId>,
        new_folder: Option<ObjectId>,
        new_name: &str,
        flags: RenameFlags,
    ) -> NsResult<()> {
        let _gate = self.enter()?;
        if !flags.is_supported() {
            return Err(NsError::InvalidArgument(format!("rename flags {flags:?}")));
        }
        self.host.check_name(new_name)?;
        let source = self.resolve(source)?;
        if source.alias().is_root() {
            return Err(NsError::IsADirectory("namespace root".into()));
        }
        let old_dir = self.parent_of(&source)?;
        let new_dir = self.resolve_folder(new_folder)?;
        let _token = self.host.mount().want_write()?;

        self.retry_lease("rename", || {
            let mut locks = self.host.lock_rename(&old_dir, &new_dir);
            Self::check_child(locks.old_dir(), &source)?;
            Self::check_owner(locks.new_dir())?;
            self.ctx.auth.check(&MutationRequest::Rename {
                source: source.id(),
                old_parent: old_dir.id(),
                new_parent: new_dir.id(),
                new_name,
                flags,
            })?;
            locks.old_dir_mut().set_flags(StateFlags::RENAMING_CHILD);
            let result = self.host.rename(&locks, source.alias(), new_name, flags);
            locks.old_dir_mut().clear_flags(StateFlags::RENAMING_CHILD);
            result?;
            Ok(())
        })?;
        debug!(id = %source.id(), from = %old_dir.id(), to = %new_dir.id(), new_name, "object renamed");
        Ok(())
    }

    // ---------------------------------------------------------------
    // Node behavior
    // ---------------------------------------------------------------

    /// Install content operations on an indexed node of this namespace.
    pub fn set_operations(&self, entry: &ObjectRef, ops: Arc<dyn NodeOps>) -> NsResult<()> {
        let _gate = self.enter()?;
        if entry.node().instance() != self.host.mount().instance() {
            return Err(NsError::PermissionDenied(format!(
                "{} belongs to another mount",
                entry.id()
            )));
        }
        if !entry.node().is_indexed() || !entry.is_canonical() {
            return Err(NsError::PermissionDenied(format!("{} is not indexed", entry.id())));
        }
        entry.node().set_ops(ops);
        Ok(())
    }

    // ---------------------------------------------------------------
    // Re-validation and retry
    // ---------------------------------------------------------------

    /// The locked folder is still in the tree.
    fn check_owner(guard: &NodeGuard<'_>) -> NsResult<()> {
        let entry = guard.entry();
        if entry.is_live() && !entry.node().is_dead() {
            Ok(())
        } else {
            Err(NsError::OwnerDead(entry.name()))
        }
    }

    /// The locked folder still holds `victim` under the alias resolved
    /// before locking.
    fn check_child(guard: &NodeGuard<'_>, victim: &ObjectRef) -> NsResult<()> {
        Self::check_owner(guard)?;
        if !victim.is_live() {
            return Err(NsError::NotFound(victim.id().to_string()));
        }
        if !victim.alias().is_child_of(guard.alias()) {
            return Err(NsError::ChildChanged(format!(
                "{} left {}",
                victim.id(),
                guard.entry().id()
            )));
        }
        Ok(())
    }

    fn retry_lease<T>(&self, verb: &'static str, mut attempt: impl FnMut() -> Attempt<T>) -> NsResult<T> {
        let node = match attempt() {
            Ok(value) => return Ok(value),
            Err(Failure::Error(err)) => return Err(err),
            Err(Failure::Lease(node)) => node,
        };
        let timeout = self.ctx.config.store.lease_break_timeout();
        warn!(verb, node = %node.id(), ?timeout, "lease conflict, waiting for break");
        node.wait_for_lease_break(timeout);
        drop(node);

        match attempt() {
            Ok(value) => Ok(value),
            Err(Failure::Error(err)) => Err(err),
            Err(Failure::Lease(node)) => {
                warn!(verb, node = %node.id(), "lease conflict after retry");
                Err(NsError::Busy(format!("{} is leased", node.id())))
            }
        }
    }
}
