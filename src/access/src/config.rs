//! Manager configuration

use crate::error::{AccessError, Result};
use serde::{Deserialize, Serialize};

/// Resolved-rights cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache resolved rights per (policy, actor)
    pub enabled: bool,

    /// Maximum number of entries in the cache
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 10_000,
        }
    }
}

/// Access manager configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Resolved-rights cache
    pub cache: CacheConfig,
}

impl ManagerConfig {
    /// Parse from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| AccessError::Config(e.to_string()))
    }

    /// Disable the resolved-rights cache
    pub fn without_cache(mut self) -> Self {
        self.cache.enabled = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_partial() {
        let config = ManagerConfig::from_json(r#"{"cache":{"capacity":64}}"#).unwrap();
        assert!(config.cache.enabled);
        assert_eq!(config.cache.capacity, 64);
    }

    #[test]
    fn test_from_json_invalid() {
        assert!(matches!(
            ManagerConfig::from_json("{not json"),
            Err(AccessError::Config(_))
        ));
    }
}
