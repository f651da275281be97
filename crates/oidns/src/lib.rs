//! Object-identified virtual namespace.
//!
//! A [`Runtime`] owns one sharded object index and registers any number of
//! [`Namespace`]s. Each namespace is an in-memory tree whose objects are
//! addressed by stable [`ObjectId`]s instead of paths: callers create,
//! remove and rename entries by naming the folder or object id, and the
//! engine keeps the index consistent with the tree under concurrent use.
//!
//! # Key Types
//!
//! - [`Runtime`]: Shared index, id allocator and authorizer chain
//! - [`NamespaceRegistry`]: Identity-keyed table of registered namespaces
//! - [`Namespace`]: Resolution (`get_object`, `get_folder`, `get_parent`)
//!   and mutation (`mkdir`, `symlink`, `create`, `link`, `rmdir`, `unlink`,
//!   `remove_singularity`, `remove`, `rename`)
//! - [`ObjectRef`]: A resolved entry holding its alias and node
//! - [`NsError`]: Every failure the public API reports
//!
//! ```
//! use oidns::{Runtime, RuntimeConfig};
//!
//! let rt = Runtime::new(RuntimeConfig::default());
//! let ns = rt.register("docs").unwrap();
//! let dir = ns.mkdir(None, "guides").unwrap().id();
//! let file = ns.create_file(Some(dir), "intro").unwrap().id();
//! assert_eq!(ns.get_parent(Some(file)).unwrap().id(), dir);
//!
//! ns.remove_recursive(Some(dir)).unwrap();
//! rt.unregister(&ns).unwrap();
//! ```

pub mod config;
pub mod error;
mod mutation;
pub mod registry;
mod resolver;
pub mod runtime;

pub use config::RuntimeConfig;
pub use error::{NsError, NsResult};
pub use registry::{Namespace, NamespaceRegistry, RegistrationState};
pub use runtime::Runtime;

pub use oidns_index::IndexConfig;
pub use oidns_store::{
    AllowAll, AuthDecision, Authorizer, BufferOps, DenyNames, LeaseGuard, MutationRequest, NodeOps,
    ObjectRef, StoreConfig,
};
pub use oidns_types::{NamespaceId, NodeKind, ObjectId, RenameFlags};
