//! Loader configuration
//!
//! ```toml
//! verified_boot = true
//! registry_capacity = 8
//! minimum_svn = 2
//!
//! [pools]
//! normal_limit = 0x100000
//! temporary_limit = 0x40000
//!
//! [hash_store]
//! trusted_keys = ["9f86d081884c7d65..."]
//!
//! [hash_store.digests]
//! SG02 = "2c26b46b68ffc68f..."
//! ```

use crate::auth::{HashStore, HashStoreConfig};
use crate::error::{BootError, Result};
use crate::memory::MemoryPools;
use crate::registry::DEFAULT_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Byte budgets for the two memory pools; `None` is unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normal_limit: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporary_limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Reject components and containers that declare no authentication
    #[serde(default = "default_verified_boot")]
    pub verified_boot: bool,

    /// Number of containers the registry can hold
    #[serde(default = "default_registry_capacity")]
    pub registry_capacity: usize,

    /// Lowest security version number accepted for containers and payloads
    #[serde(default)]
    pub minimum_svn: u8,

    #[serde(default)]
    pub pools: PoolLimits,

    #[serde(default)]
    pub hash_store: HashStoreConfig,
}

fn default_verified_boot() -> bool {
    true
}

fn default_registry_capacity() -> usize {
    DEFAULT_CAPACITY
}

impl Default for LoaderConfig {
    fn default() -> Self {
        LoaderConfig {
            verified_boot: default_verified_boot(),
            registry_capacity: default_registry_capacity(),
            minimum_svn: 0,
            pools: PoolLimits::default(),
            hash_store: HashStoreConfig::default(),
        }
    }
}

impl LoaderConfig {
    /// Configuration with verified boot disabled, for development images
    pub fn permissive() -> Self {
        LoaderConfig {
            verified_boot: false,
            ..Default::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: LoaderConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.registry_capacity == 0 {
            return Err(BootError::Config(
                "registry_capacity must be at least 1".to_string(),
            ));
        }
        HashStore::from_config(&self.hash_store)?;
        Ok(())
    }

    pub fn memory_pools(&self) -> MemoryPools {
        MemoryPools::with_limits(self.pools.normal_limit, self.pools.temporary_limit)
    }

    pub fn hash_store(&self) -> Result<HashStore> {
        HashStore::from_config(&self.hash_store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::Tag;

    #[test]
    fn test_defaults() {
        let config = LoaderConfig::from_toml_str("").unwrap();
        assert!(config.verified_boot);
        assert_eq!(config.registry_capacity, DEFAULT_CAPACITY);
        assert_eq!(config.minimum_svn, 0);
        assert_eq!(config.pools, PoolLimits::default());
    }

    #[test]
    fn test_full_config() {
        let config = LoaderConfig::from_toml_str(
            r#"
            verified_boot = false
            registry_capacity = 3
            minimum_svn = 2

            [pools]
            temporary_limit = 4096

            [hash_store]
            trusted_keys = ["0000000000000000000000000000000000000000000000000000000000000000"]

            [hash_store.digests]
            SG02 = "abcd"
            "#,
        )
        .unwrap();

        assert!(!config.verified_boot);
        assert_eq!(config.registry_capacity, 3);
        assert_eq!(config.minimum_svn, 2);
        assert_eq!(config.pools.temporary_limit, Some(4096));
        assert_eq!(config.pools.normal_limit, None);

        let store = config.hash_store().unwrap();
        assert_eq!(store.digest(Tag::new(b"SG02")), Some(&[0xab, 0xcd][..]));
        assert!(store.is_trusted_key(&[0u8; 32]));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            LoaderConfig::from_toml_str("registry_capacity = 0"),
            Err(BootError::Config(_))
        ));
    }

    #[test]
    fn test_bad_digest_rejected() {
        let result = LoaderConfig::from_toml_str(
            r#"
            [hash_store.digests]
            SG02 = "not-hex"
            "#,
        );
        assert!(matches!(result, Err(BootError::Config(_))));
    }

    #[test]
    fn test_bad_tag_rejected() {
        let result = LoaderConfig::from_toml_str(
            r#"
            [hash_store.digests]
            TOOLONG = "abcd"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_permissive() {
        assert!(!LoaderConfig::permissive().verified_boot);
    }
}
