//! Runtime that owns the shared index and the namespace registry.

use std::fmt;
use std::sync::Arc;

use tracing::info;

use oidns_store::{AuthChain, Authorizer};

use crate::config::RuntimeConfig;
use crate::error::{NsError, NsResult};
use crate::registry::{Context, Namespace, NamespaceRegistry};

/// Entry point: one object index and id space shared by every namespace
/// registered through it.
pub struct Runtime {
    registry: NamespaceRegistry,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_authorizers(config, Vec::new())
    }

    /// Build a runtime whose mutations pass through `authorizers` in order.
    pub fn with_authorizers(
        config: RuntimeConfig,
        authorizers: impl IntoIterator<Item = Arc<dyn Authorizer>>,
    ) -> Self {
        let mut auth = AuthChain::new();
        for stage in authorizers {
            auth.push(stage);
        }
        let ctx = Arc::new(Context::new(config, auth));
        info!(
            shards = ctx.index.shard_count(),
            id_batch = ctx.config.id_batch,
            authorizers = ctx.auth.len(),
            "namespace runtime started"
        );
        Self {
            registry: NamespaceRegistry::new(ctx),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.registry.context().config
    }

    pub fn registry(&self) -> &NamespaceRegistry {
        &self.registry
    }

    pub fn register(&self, identity: &str) -> NsResult<Arc<Namespace>> {
        self.registry.register(identity)
    }

    pub fn unregister(&self, ns: &Namespace) -> NsResult<()> {
        self.registry.unregister(ns)
    }

    pub fn lookup(&self, identity: &str) -> NsResult<Arc<Namespace>> {
        self.registry.lookup(identity)
    }

    pub fn release(&self, ns: Arc<Namespace>) {
        self.registry.release(ns)
    }

    /// Objects currently reachable by id, across all namespaces.
    pub fn indexed_count(&self) -> usize {
        self.registry.context().index.len()
    }

    pub fn registered_count(&self) -> usize {
        self.registry.len()
    }

    /// Stop the runtime. Every namespace must be unregistered first.
    pub fn shutdown(self) -> NsResult<()> {
        let live = self.registry.identities();
        if !live.is_empty() {
            return Err(NsError::Busy(format!(
                "namespaces still registered: {}",
                live.join(", ")
            )));
        }
        info!(indexed = self.indexed_count(), "namespace runtime stopped");
        Ok(())
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("registry", &self.registry)
            .field("indexed", &self.indexed_count())
            .finish()
    }
}
