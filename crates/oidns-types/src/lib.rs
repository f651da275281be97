//! Foundation types for the oidns object-identified namespace.
//!
//! Every other oidns crate depends on `oidns-types`.
//!
//! # Key Types
//!
//! - [`NamespaceId`]: Stable identity of a registered namespace (BLAKE3 of its name)
//! - [`ObjectId`]: `(namespace, numeric id)` pair naming one live node
//! - [`NodeKind`]: Directory, file, symlink or singularity
//! - [`StateFlags`]: Transient in-progress and classification bits on a node
//! - [`RenameFlags`]: Modifiers accepted by rename
//! - [`IdAllocator`]: Monotonic numeric id source with per-thread batching

pub mod alloc;
pub mod error;
pub mod flags;
pub mod id;
pub mod kind;

pub use alloc::{IdAllocator, DEFAULT_ID_BATCH};
pub use error::TypeError;
pub use flags::{RenameFlags, StateFlags};
pub use id::{NamespaceId, ObjectId};
pub use kind::NodeKind;
