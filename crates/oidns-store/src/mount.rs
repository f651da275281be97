//! Per-namespace mount state: write access, node budget, rename serial.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use oidns_index::ObjectIndex;
use oidns_types::{IdAllocator, NamespaceId};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::node::Node;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default)]
struct WriteState {
    read_only: bool,
    writers: usize,
}

/// One mounted instance of a namespace.
pub struct Mount {
    instance: u64,
    namespace: NamespaceId,
    config: StoreConfig,
    ids: Arc<IdAllocator>,
    index: Arc<ObjectIndex<Node>>,
    write: Mutex<WriteState>,
    nodes: AtomicUsize,
    rename: Mutex<()>,
}

impl Mount {
    pub fn new(
        namespace: NamespaceId,
        config: StoreConfig,
        ids: Arc<IdAllocator>,
        index: Arc<ObjectIndex<Node>>,
    ) -> Arc<Self> {
        let instance = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);
        debug!(%namespace, instance, "mount created");
        Arc::new(Self {
            instance,
            namespace,
            config,
            ids,
            index,
            write: Mutex::new(WriteState::default()),
            nodes: AtomicUsize::new(0),
            rename: Mutex::new(()),
        })
    }

    /// Process-unique serial of this mount.
    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn namespace(&self) -> NamespaceId {
        self.namespace
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    pub fn index(&self) -> &ObjectIndex<Node> {
        &self.index
    }

    // ---------------------------------------------------------------
    // Write access
    // ---------------------------------------------------------------

    /// Acquire permission to mutate. Held for the duration of one change.
    pub fn want_write(&self) -> StoreResult<WriteToken<'_>> {
        let mut state = self.write.lock().expect("mount lock poisoned");
        if state.read_only {
            return Err(StoreError::ReadOnly);
        }
        state.writers += 1;
        Ok(WriteToken { mount: self })
    }

    /// Switch the mount between read-only and read-write. Going read-only
    /// fails `Busy` while changes are in flight.
    pub fn set_read_only(&self, read_only: bool) -> StoreResult<()> {
        let mut state = self.write.lock().expect("mount lock poisoned");
        if read_only && state.writers > 0 {
            return Err(StoreError::Busy(format!(
                "{} writers active",
                state.writers
            )));
        }
        state.read_only = read_only;
        info!(namespace = %self.namespace, read_only, "mount mode changed");
        Ok(())
    }

    pub fn is_read_only(&self) -> bool {
        self.write.lock().expect("mount lock poisoned").read_only
    }

    pub fn writers(&self) -> usize {
        self.write.lock().expect("mount lock poisoned").writers
    }

    // ---------------------------------------------------------------
    // Node budget
    // ---------------------------------------------------------------

    pub fn node_count(&self) -> usize {
        self.nodes.load(Ordering::Acquire)
    }

    pub(crate) fn charge_node(&self) -> StoreResult<()> {
        let limit = self.config.max_nodes;
        self.nodes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| match limit {
                Some(max) if n >= max => None,
                _ => Some(n + 1),
            })
            .map(|_| ())
            .map_err(|_| StoreError::NoSpace(limit.unwrap_or_default()))
    }

    pub(crate) fn release_node(&self) {
        self.nodes.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn rename_serial(&self) -> MutexGuard<'_, ()> {
        self.rename.lock().expect("rename lock poisoned")
    }
}

impl fmt::Debug for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mount")
            .field("instance", &self.instance)
            .field("namespace", &self.namespace)
            .field("nodes", &self.node_count())
            .finish_non_exhaustive()
    }
}

/// Permission to mutate a mount. Released on drop.
#[derive(Debug)]
pub struct WriteToken<'a> {
    mount: &'a Mount,
}

impl Drop for WriteToken<'_> {
    fn drop(&mut self) {
        let mut state = self.mount.write.lock().expect("mount lock poisoned");
        state.writers -= 1;
    }
}
