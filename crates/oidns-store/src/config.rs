use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Limits and timeouts of one mounted namespace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Longest entry name, in bytes.
    pub name_max: usize,
    /// Longest symlink text, in bytes.
    pub path_max: usize,
    /// Cap on live nodes per mount; `None` is unlimited.
    pub max_nodes: Option<usize>,
    /// How long a structural change waits for a lease holder before
    /// revoking the lease.
    pub lease_break_timeout_ms: u64,
}

impl StoreConfig {
    pub fn lease_break_timeout(&self) -> Duration {
        Duration::from_millis(self.lease_break_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name_max: 255,
            path_max: 4096,
            max_nodes: None,
            lease_break_timeout_ms: 45_000,
        }
    }
}
