//! Pre-mutation authorization hook.
//!
//! Every structural change made through the object-id API is described as
//! a [`MutationRequest`] and run past an [`AuthChain`] of [`Authorizer`]s
//! before anything is touched. The first denial wins.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use oidns_types::{NodeKind, ObjectId, RenameFlags};

use crate::error::{StoreError, StoreResult};

/// A structural change about to be made.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MutationRequest<'a> {
    Create {
        parent: ObjectId,
        name: &'a str,
        kind: NodeKind,
    },
    Remove {
        parent: ObjectId,
        target: ObjectId,
        name: &'a str,
        kind: NodeKind,
    },
    Rename {
        source: ObjectId,
        old_parent: ObjectId,
        new_parent: ObjectId,
        new_name: &'a str,
        flags: RenameFlags,
    },
}

impl MutationRequest<'_> {
    /// The entry name the change creates, removes or renames to.
    pub fn name(&self) -> &str {
        match self {
            Self::Create { name, .. } | Self::Remove { name, .. } => name,
            Self::Rename { new_name, .. } => new_name,
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Remove { .. } => "remove",
            Self::Rename { .. } => "rename",
        }
    }
}

/// Outcome of one authorizer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthDecision {
    Allow,
    Deny { reason: String },
}

impl AuthDecision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

pub trait Authorizer: Send + Sync {
    fn name(&self) -> &str;

    fn authorize(&self, request: &MutationRequest<'_>) -> AuthDecision;
}

/// Permits everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn name(&self) -> &str {
        "allow-all"
    }

    fn authorize(&self, _request: &MutationRequest<'_>) -> AuthDecision {
        AuthDecision::Allow
    }
}

/// Refuses any change whose entry name is on a deny list.
#[derive(Clone, Debug, Default)]
pub struct DenyNames {
    names: HashSet<String>,
}

impl DenyNames {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl Authorizer for DenyNames {
    fn name(&self) -> &str {
        "deny-names"
    }

    fn authorize(&self, request: &MutationRequest<'_>) -> AuthDecision {
        if self.names.contains(request.name()) {
            AuthDecision::Deny {
                reason: format!("name {:?} is reserved", request.name()),
            }
        } else {
            AuthDecision::Allow
        }
    }
}

/// Ordered list of authorizers.
#[derive(Clone, Default)]
pub struct AuthChain {
    stages: Vec<Arc<dyn Authorizer>>,
}

impl AuthChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stage: Arc<dyn Authorizer>) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage in order; the first denial becomes `PermissionDenied`.
    pub fn check(&self, request: &MutationRequest<'_>) -> StoreResult<()> {
        for stage in &self.stages {
            if let AuthDecision::Deny { reason } = stage.authorize(request) {
                warn!(stage = stage.name(), verb = request.verb(), %reason, "mutation denied");
                return Err(StoreError::PermissionDenied(format!(
                    "{}: {reason}",
                    stage.name()
                )));
            }
        }
        debug!(verb = request.verb(), name = request.name(), "mutation authorized");
        Ok(())
    }
}

impl fmt::Debug for AuthChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|s| s.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use oidns_types::NamespaceId;

    use super::*;

    fn oid(ino: u64) -> ObjectId {
        ObjectId::new(NamespaceId::derive("auth"), ino)
    }

    struct DenyRenames;

    impl Authorizer for DenyRenames {
        fn name(&self) -> &str {
            "deny-renames"
        }

        fn authorize(&self, request: &MutationRequest<'_>) -> AuthDecision {
            match request {
                MutationRequest::Rename { .. } => AuthDecision::Deny {
                    reason: "renames frozen".into(),
                },
                _ => AuthDecision::Allow,
            }
        }
    }

    #[test]
    fn empty_chain_allows() {
        let chain = AuthChain::new();
        let req = MutationRequest::Create {
            parent: oid(1),
            name: "a",
            kind: NodeKind::File,
        };
        assert!(chain.check(&req).is_ok());
    }

    #[test]
    fn first_denial_wins() {
        let mut chain = AuthChain::new();
        chain.push(Arc::new(AllowAll));
        chain.push(Arc::new(DenyRenames));
        chain.push(Arc::new(DenyNames::new(["secret"])));

        let rename = MutationRequest::Rename {
            source: oid(2),
            old_parent: oid(1),
            new_parent: oid(1),
            new_name: "secret",
            flags: RenameFlags::empty(),
        };
        let err = chain.check(&rename).unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied(msg) if msg.starts_with("deny-renames")));

        let create = MutationRequest::Create {
            parent: oid(1),
            name: "secret",
            kind: NodeKind::Directory,
        };
        assert!(chain.check(&create).is_err());

        let remove = MutationRequest::Remove {
            parent: oid(1),
            target: oid(3),
            name: "public",
            kind: NodeKind::File,
        };
        assert!(chain.check(&remove).is_ok());
        assert_eq!(chain.len(), 3);
    }
}
