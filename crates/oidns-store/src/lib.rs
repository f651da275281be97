//! In-memory backing namespace for oidns.
//!
//! Holds the tree the object-id layer sits on: [`Node`]s named by
//! [`Alias`]es, per-node exclusive locks handed out as [`NodeGuard`]s,
//! mount-level write tokens, leases, and the authorization hook consulted
//! before structural changes. [`HostFs`] implements the structural
//! primitives themselves.

pub mod alias;
pub mod auth;
pub mod config;
pub mod error;
pub mod host;
pub mod lease;
pub mod mount;
pub mod node;
pub mod object_ref;
pub mod ops;

pub use alias::Alias;
pub use auth::{AllowAll, AuthChain, AuthDecision, Authorizer, DenyNames, MutationRequest};
pub use config::StoreConfig;
pub use error::{LeaseBreak, StoreError, StoreResult};
pub use host::{HostFs, RenameLocks};
pub use lease::LeaseGuard;
pub use mount::{Mount, WriteToken};
pub use node::{Node, NodeState};
pub use object_ref::{NodeGuard, ObjectRef};
pub use ops::{BufferOps, NodeOps};
