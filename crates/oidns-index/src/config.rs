use serde::{Deserialize, Serialize};

/// Smallest shard count exponent honored.
pub const MIN_SHARD_BITS: u32 = 6;
/// Largest shard count exponent honored.
pub const MAX_SHARD_BITS: u32 = 16;

/// Sizing of the object index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// The index has `2^shard_bits` shards, after clamping to
    /// [`MIN_SHARD_BITS`]..=[`MAX_SHARD_BITS`].
    pub shard_bits: u32,
}

impl IndexConfig {
    /// The shard count exponent actually used.
    pub fn effective_bits(&self) -> u32 {
        self.shard_bits.clamp(MIN_SHARD_BITS, MAX_SHARD_BITS)
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self { shard_bits: 10 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_1024_shards() {
        assert_eq!(IndexConfig::default().effective_bits(), 10);
    }

    #[test]
    fn out_of_range_bits_are_clamped() {
        assert_eq!(IndexConfig { shard_bits: 0 }.effective_bits(), MIN_SHARD_BITS);
        assert_eq!(IndexConfig { shard_bits: 40 }.effective_bits(), MAX_SHARD_BITS);
    }

    #[test]
    fn missing_keys_take_defaults() {
        let config: IndexConfig = toml::from_str("").unwrap();
        assert_eq!(config, IndexConfig::default());
        let config: IndexConfig = toml::from_str("shard_bits = 7").unwrap();
        assert_eq!(config.shard_bits, 7);
    }
}
