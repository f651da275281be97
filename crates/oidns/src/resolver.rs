//! Object id to live entry resolution.
//!
//! Resolution runs under the namespace gate and returns an [`ObjectRef`]
//! holding references on both the node and its canonical alias. `None` as
//! an id names the namespace root.

use std::sync::RwLockReadGuard;

use tracing::debug;

use oidns_store::ObjectRef;
use oidns_types::{NodeKind, ObjectId};

use crate::error::{NsError, NsResult};
use crate::registry::{Namespace, RegistrationState};

pub(crate) type Gate<'a> = RwLockReadGuard<'a, RegistrationState>;

impl Namespace {
    /// Enter the namespace gate. Refused unless registered.
    pub(crate) fn enter(&self) -> NsResult<Gate<'_>> {
        let gate = self.gate.read().expect("namespace gate poisoned");
        if *gate != RegistrationState::Registered {
            debug!(namespace = %self.id(), state = ?*gate, "namespace not open");
            return Err(NsError::PermissionDenied(format!(
                "namespace {} is not registered",
                self.identity()
            )));
        }
        Ok(gate)
    }

    /// Resolve `id` with the gate held.
    pub(crate) fn resolve(&self, id: Option<ObjectId>) -> NsResult<ObjectRef> {
        let Some(id) = id else {
            return self
                .host
                .root_ref()
                .ok_or_else(|| NsError::OwnerDead(format!("root of {}", self.identity())));
        };
        if id.namespace != self.id() {
            debug!(%id, namespace = %self.id(), "foreign object id");
            return Err(NsError::PermissionDenied(format!("{id} belongs to another namespace")));
        }
        let node = self
            .ctx
            .index
            .lookup(&id)
            .ok_or_else(|| NsError::NotFound(id.to_string()))?;
        if node.instance() != self.host.mount().instance() {
            debug!(%id, "object from an earlier registration");
            return Err(NsError::PermissionDenied(format!(
                "{id} belongs to an earlier registration"
            )));
        }
        let alias = node
            .canonical_alias()
            .ok_or_else(|| NsError::OwnerDead(id.to_string()))?;
        Ok(ObjectRef::new(alias, node))
    }

    /// Resolve `id` as a folder, following symlinks made through the
    /// object-id API.
    pub(crate) fn resolve_folder(&self, id: Option<ObjectId>) -> NsResult<ObjectRef> {
        let max = self.ctx.config.max_nested_links;
        let mut entry = self.resolve(id)?;
        let mut depth = 0;
        loop {
            match entry.kind() {
                kind if kind.is_folder() => return Ok(entry),
                NodeKind::Symlink => {
                    depth += 1;
                    if depth > max {
                        debug!(id = %entry.id(), max, "symlink chain too deep");
                        return Err(NsError::TooManyLinks(max));
                    }
                    let target = entry
                        .node()
                        .symlink_target()
                        .ok_or_else(|| NsError::NotADirectory(entry.name()))?;
                    entry = self.resolve(Some(target))?;
                }
                _ => return Err(NsError::NotADirectory(entry.name())),
            }
        }
    }

    /// Parent folder entry of a resolved entry.
    pub(crate) fn parent_of(&self, entry: &ObjectRef) -> NsResult<ObjectRef> {
        if entry.alias().is_root() {
            return Err(NsError::NotFound(format!("root of {} has no parent", self.identity())));
        }
        let parent = entry
            .alias()
            .parent()
            .ok_or_else(|| NsError::OwnerDead(entry.name()))?;
        ObjectRef::from_alias(&parent).ok_or_else(|| NsError::OwnerDead(parent.name()))
    }

    // ---------------------------------------------------------------
    // Public lookups
    // ---------------------------------------------------------------

    /// The live entry for `id`.
    pub fn get_object(&self, id: Option<ObjectId>) -> NsResult<ObjectRef> {
        let _gate = self.enter()?;
        self.resolve(id)
    }

    /// The folder `id` names, following symlinks.
    pub fn get_folder(&self, id: Option<ObjectId>) -> NsResult<ObjectRef> {
        let _gate = self.enter()?;
        self.resolve_folder(id)
    }

    /// The folder holding `id`. The root has none.
    pub fn get_parent(&self, id: Option<ObjectId>) -> NsResult<ObjectRef> {
        let _gate = self.enter()?;
        let entry = self.resolve(id)?;
        self.parent_of(&entry)
    }

    /// Stored text of a symlink.
    pub fn readlink(&self, id: ObjectId) -> NsResult<String> {
        let _gate = self.enter()?;
        let entry = self.resolve(Some(id))?;
        entry
            .node()
            .link_text()
            .map(str::to_string)
            .ok_or_else(|| NsError::InvalidArgument(format!("{id} is not a symlink")))
    }
}
