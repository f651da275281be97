//! Host-side leases on nodes.
//!
//! A lease is a cooperative hold: structural changes that would remove or
//! move a leased node start a break and fail with
//! [`StoreError::LeaseConflict`]. The mutating side then waits for the holder
//! to drop its [`LeaseGuard`], revoking the lease once the break timeout
//! expires.

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{LeaseBreak, StoreError, StoreResult};
use crate::node::Node;

#[derive(Debug, Default)]
struct LeaseState {
    held: bool,
    breaking: bool,
    /// Bumped on every grant so a revoked guard cannot release a newer lease.
    generation: u64,
}

#[derive(Debug, Default)]
pub(crate) struct LeaseSlot {
    state: Mutex<LeaseState>,
    released: Condvar,
}

impl LeaseSlot {
    fn lock(&self) -> std::sync::MutexGuard<'_, LeaseState> {
        self.state.lock().expect("lease lock poisoned")
    }

    pub(crate) fn is_held(&self) -> bool {
        self.lock().held
    }

    pub(crate) fn is_breaking(&self, generation: u64) -> bool {
        let state = self.lock();
        state.held && state.generation == generation && state.breaking
    }

    fn release(&self, generation: u64) {
        let mut state = self.lock();
        if state.held && state.generation == generation {
            state.held = false;
            state.breaking = false;
            self.released.notify_all();
        }
    }
}

/// An acquired lease. Dropping it releases the lease.
pub struct LeaseGuard {
    node: Arc<Node>,
    generation: u64,
}

impl LeaseGuard {
    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// A structural change is waiting for this lease.
    pub fn is_breaking(&self) -> bool {
        self.node.lease.is_breaking(self.generation)
    }
}

impl fmt::Debug for LeaseGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseGuard")
            .field("node", &self.node.id())
            .field("generation", &self.generation)
            .finish()
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.node.lease.release(self.generation);
    }
}

impl Node {
    /// Take a lease on this node.
    ///
    /// Serialized against structural changes holding the node lock; fails
    /// `Busy` if a lease is already held and `NotFound` once the node has
    /// been removed.
    pub fn acquire_lease(self: &Arc<Self>) -> StoreResult<LeaseGuard> {
        let _node = self.state.lock().expect("node lock poisoned");
        let mut state = self.lease.lock();
        if self.dead.load(Ordering::Acquire) {
            return Err(StoreError::NotFound(self.id().to_string()));
        }
        if state.held {
            return Err(StoreError::Busy(format!("{} is already leased", self.id())));
        }
        state.held = true;
        state.breaking = false;
        state.generation += 1;
        debug!(node = %self.id(), generation = state.generation, "lease granted");
        Ok(LeaseGuard {
            node: Arc::clone(self),
            generation: state.generation,
        })
    }

    pub fn is_leased(&self) -> bool {
        self.lease.is_held()
    }

    /// Clear the way for removing or moving this node.
    ///
    /// With a lease outstanding, starts a break and reports the conflict.
    /// Otherwise, when `final_link` is set, marks the node dead so that no
    /// lease can be granted afterwards. A node already marked dead passes.
    pub(crate) fn fence_lease(self: &Arc<Self>, final_link: bool) -> StoreResult<()> {
        let mut state = self.lease.lock();
        if self.dead.load(Ordering::Acquire) {
            return Ok(());
        }
        if state.held {
            state.breaking = true;
            return Err(StoreError::LeaseConflict(LeaseBreak::new(Arc::clone(self))));
        }
        if final_link {
            self.dead.store(true, Ordering::Release);
        }
        Ok(())
    }

    /// Block until the current lease is released, revoking it after
    /// `timeout`. Returns `true` if the holder let go in time.
    pub fn wait_for_lease_break(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lease.lock();
        while state.held {
            let now = Instant::now();
            if now >= deadline {
                warn!(node = %self.id(), "lease break timed out, revoking");
                state.held = false;
                state.breaking = false;
                self.lease.released.notify_all();
                return false;
            }
            state = self
                .lease
                .released
                .wait_timeout(state, deadline - now)
                .expect("lease lock poisoned")
                .0;
        }
        true
    }
}
