//! Namespace registration.
//!
//! A [`Namespace`] moves through `Unregistered -> Registering -> Registered
//! -> Unregistered`. Its gate is read-held by every resolution and mutation
//! and write-held only while the registration state flips, so once
//! [`NamespaceRegistry::unregister`] returns no further gated call can
//! start. Holders keep a namespace alive through its `Arc`; the tree is
//! torn down at unregistration and the rest is reclaimed when the last
//! holder lets go.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, error, info};

use oidns_index::ObjectIndex;
use oidns_store::{AuthChain, HostFs, Mount, Node};
use oidns_types::{IdAllocator, NamespaceId, ObjectId};

use crate::config::RuntimeConfig;
use crate::error::{NsError, NsResult};

/// Registration state of a namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registering,
    Registered,
}

/// Runtime-wide state shared by every namespace.
pub(crate) struct Context {
    pub(crate) config: RuntimeConfig,
    pub(crate) index: Arc<ObjectIndex<Node>>,
    pub(crate) ids: Arc<IdAllocator>,
    pub(crate) auth: AuthChain,
}

impl Context {
    pub(crate) fn new(config: RuntimeConfig, auth: AuthChain) -> Self {
        let index = Arc::new(ObjectIndex::new(&config.index));
        let ids = Arc::new(IdAllocator::new(config.id_batch));
        Self {
            config,
            index,
            ids,
            auth,
        }
    }
}

/// One registered tree of id-addressed objects.
pub struct Namespace {
    id: NamespaceId,
    identity: String,
    root_id: ObjectId,
    pub(crate) gate: RwLock<RegistrationState>,
    pub(crate) host: HostFs,
    pub(crate) ctx: Arc<Context>,
}

impl Namespace {
    fn build(identity: &str, ctx: Arc<Context>) -> NsResult<Self> {
        let id = NamespaceId::derive(identity);
        let mount = Mount::new(
            id,
            ctx.config.store.clone(),
            Arc::clone(&ctx.ids),
            Arc::clone(&ctx.index),
        );
        let host = HostFs::new(mount)?;
        let root = host
            .root_ref()
            .ok_or_else(|| NsError::OwnerDead(identity.to_string()))?;
        if !root.lock().mark_indexed() {
            error!(namespace = %id, "fresh root already indexed");
            panic!("root of {identity} indexed twice");
        }
        if let Err(err) = ctx.index.insert(root.node()) {
            error!(namespace = %id, %err, "root id collides with a live object");
            panic!("index diverged while registering {identity}: {err}");
        }
        Ok(Self {
            id,
            identity: identity.to_string(),
            root_id: root.id(),
            gate: RwLock::new(RegistrationState::Registering),
            host,
            ctx,
        })
    }

    pub fn id(&self) -> NamespaceId {
        self.id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Object id of the root directory.
    pub fn root_id(&self) -> ObjectId {
        self.root_id
    }

    pub fn state(&self) -> RegistrationState {
        *self.gate.read().expect("namespace gate poisoned")
    }

    pub fn is_registered(&self) -> bool {
        self.state() == RegistrationState::Registered
    }

    /// Plain host operations on this namespace's tree. Entries made here
    /// are not indexed.
    pub fn host(&self) -> &HostFs {
        &self.host
    }

    pub fn set_read_only(&self, read_only: bool) -> NsResult<()> {
        Ok(self.host.mount().set_read_only(read_only)?)
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("identity", &self.identity)
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for Namespace {
    fn drop(&mut self) {
        debug!(namespace = %self.id, identity = %self.identity, "namespace released");
    }
}

/// Table of registered namespaces, keyed by identity.
pub struct NamespaceRegistry {
    ctx: Arc<Context>,
    table: Mutex<HashMap<String, Arc<Namespace>>>,
}

impl NamespaceRegistry {
    pub(crate) fn new(ctx: Arc<Context>) -> Self {
        Self {
            ctx,
            table: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    /// Register a namespace under `identity`.
    pub fn register(&self, identity: &str) -> NsResult<Arc<Namespace>> {
        if identity.is_empty() {
            return Err(NsError::InvalidArgument("empty namespace identity".into()));
        }
        let mut table = self.table.lock().expect("registry lock poisoned");
        if table.contains_key(identity) {
            return Err(NsError::AlreadyExists(identity.to_string()));
        }
        let ns = Arc::new(Namespace::build(identity, Arc::clone(&self.ctx))?);
        *ns.gate.write().expect("namespace gate poisoned") = RegistrationState::Registered;
        table.insert(identity.to_string(), Arc::clone(&ns));
        info!(namespace = %ns.id, identity, root = %ns.root_id, "namespace registered");
        Ok(ns)
    }

    /// Unregister `ns` and tear down its tree.
    ///
    /// Waits for in-flight gated calls to drain; none start afterwards.
    pub fn unregister(&self, ns: &Namespace) -> NsResult<()> {
        {
            let mut gate = ns.gate.write().expect("namespace gate poisoned");
            if *gate != RegistrationState::Registered {
                return Err(NsError::NotRegistered(ns.identity.clone()));
            }
            *gate = RegistrationState::Unregistered;
        }
        let removed = {
            let mut table = self.table.lock().expect("registry lock poisoned");
            match table.get(&ns.identity) {
                Some(entry) if std::ptr::eq(Arc::as_ptr(entry), ns) => table.remove(&ns.identity),
                _ => None,
            }
        };
        drop(removed);
        ns.host.teardown();
        info!(namespace = %ns.id, identity = %ns.identity, "namespace unregistered");
        Ok(())
    }

    /// Find a registered namespace. The returned handle keeps it alive and
    /// is handed back through [`release`](Self::release).
    pub fn lookup(&self, identity: &str) -> NsResult<Arc<Namespace>> {
        self.table
            .lock()
            .expect("registry lock poisoned")
            .get(identity)
            .cloned()
            .ok_or_else(|| NsError::NotFound(format!("namespace {identity}")))
    }

    pub fn release(&self, ns: Arc<Namespace>) {
        debug!(namespace = %ns.id, holders = Arc::strong_count(&ns) - 1, "namespace handle released");
        drop(ns);
    }

    pub fn len(&self) -> usize {
        self.table.lock().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn identities(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .table
            .lock()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl fmt::Debug for NamespaceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamespaceRegistry")
            .field("namespaces", &self.identities())
            .finish()
    }
}
