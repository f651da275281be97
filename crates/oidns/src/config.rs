use serde::{Deserialize, Serialize};

use oidns_index::IndexConfig;
use oidns_store::StoreConfig;
use oidns_types::DEFAULT_ID_BATCH;

use crate::error::{NsError, NsResult};

/// Configuration of one [`Runtime`](crate::Runtime).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub index: IndexConfig,
    /// Limits applied to every registered namespace.
    pub store: StoreConfig,
    /// Ids each thread draws from the shared counter at once. 0 and 1 mean
    /// every id is a shared atomic increment.
    pub id_batch: u64,
    /// Symlinks followed while resolving a folder before giving up.
    pub max_nested_links: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            index: IndexConfig::default(),
            store: StoreConfig::default(),
            id_batch: DEFAULT_ID_BATCH,
            max_nested_links: 8,
        }
    }
}

impl RuntimeConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> NsResult<Self> {
        toml::from_str(s).map_err(|e| NsError::InvalidArgument(format!("runtime config: {e}")))
    }
}
