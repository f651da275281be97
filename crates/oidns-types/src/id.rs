use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Stable identity of a namespace.
///
/// Derived deterministically from the namespace's identity string using
/// BLAKE3, so the same name always maps to the same `NamespaceId`. Two
/// registrations of one name share the id; they are told apart by the
/// instance serial their mount carries.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespaceId {
    hash: [u8; 32],
}

impl NamespaceId {
    /// Derive the id for a namespace identity string.
    pub fn derive(identity: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"oidns-namespace-v1:");
        hasher.update(identity.as_bytes());
        Self {
            hash: *hasher.finalize().as_bytes(),
        }
    }

    /// The raw 32-byte hash.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.hash
    }

    /// Full hex-encoded string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.hash)
    }

    /// Short identifier (first 8 hex characters).
    pub fn short_id(&self) -> String {
        format!("ns:{}", hex::encode(&self.hash[..4]))
    }

    /// Seed mixed into the index shard hash.
    pub fn shard_seed(&self) -> u64 {
        let mut word = [0u8; 8];
        word.copy_from_slice(&self.hash[..8]);
        u64::from_le_bytes(word)
    }

    /// Parse from a hex string (64 hex characters, optional `ns:` prefix).
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let s = s.strip_prefix("ns:").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(TypeError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self { hash: arr })
    }

    pub fn from_raw(hash: [u8; 32]) -> Self {
        Self { hash }
    }
}

impl fmt::Debug for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NamespaceId({})", self.short_id())
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_id())
    }
}

/// Identifier of one live namespace object.
///
/// The numeric part comes from a runtime-wide monotonic allocator, so it is
/// unique among live objects across every namespace; ordering compares it
/// first. The pair is immutable for the lifetime of the object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId {
    pub namespace: NamespaceId,
    pub ino: u64,
}

impl ObjectId {
    pub fn new(namespace: NamespaceId, ino: u64) -> Self {
        Self { namespace, ino }
    }

    /// Parse the `<namespace hex>/<ino>` form produced by [`ObjectId::to_full_string`].
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let (ns, ino) = s
            .rsplit_once('/')
            .ok_or_else(|| TypeError::InvalidObjectId(s.to_string()))?;
        let ino = ino
            .parse::<u64>()
            .map_err(|_| TypeError::InvalidObjectId(s.to_string()))?;
        Ok(Self {
            namespace: NamespaceId::from_hex(ns)?,
            ino,
        })
    }

    /// Lossless textual form.
    pub fn to_full_string(&self) -> String {
        format!("{}/{}", self.namespace.to_hex(), self.ino)
    }
}

impl Ord for ObjectId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ino
            .cmp(&other.ino)
            .then_with(|| self.namespace.cmp(&other.namespace))
    }
}

impl PartialOrd for ObjectId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({}/{})", self.namespace.short_id(), self.ino)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace.short_id(), self.ino)
    }
}
