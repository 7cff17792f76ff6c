//! Configuration types

use crate::{ConfigError, SieveResult};
use serde::{Deserialize, Serialize};

/// Default number of guard artifacts held by the guard cache.
pub const DEFAULT_GUARD_CAPACITY: usize = 10;

/// Default number of queriers tracked by the timestamp directory.
pub const DEFAULT_TIMESTAMP_CAPACITY: usize = 10;

/// Incremental merges allowed before a rebuild is forced.
pub const DEFAULT_MAX_CHAINED_MERGES: u32 = 10;

/// Configuration for the guard cache subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardCacheConfig {
    /// Capacity of the CLOCK guard cache.
    pub guard_capacity: usize,
    /// Capacity of the timestamp directory.
    pub timestamp_capacity: usize,
    /// Chained incremental merges after which the cost model regenerates.
    pub max_chained_merges: u32,
}

impl Default for GuardCacheConfig {
    fn default() -> Self {
        Self {
            guard_capacity: DEFAULT_GUARD_CAPACITY,
            timestamp_capacity: DEFAULT_TIMESTAMP_CAPACITY,
            max_chained_merges: DEFAULT_MAX_CHAINED_MERGES,
        }
    }
}

impl GuardCacheConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the guard cache capacity.
    pub fn with_guard_capacity(mut self, capacity: usize) -> Self {
        self.guard_capacity = capacity;
        self
    }

    /// Set the timestamp directory capacity.
    pub fn with_timestamp_capacity(mut self, capacity: usize) -> Self {
        self.timestamp_capacity = capacity;
        self
    }

    /// Set the merge chain cap.
    pub fn with_max_chained_merges(mut self, max: u32) -> Self {
        self.max_chained_merges = max;
        self
    }

    /// Parse a config from TOML. Missing fields take their defaults.
    pub fn from_toml_str(input: &str) -> SieveResult<Self> {
        let config: Self = toml::from_str(input).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - guard_capacity > 0
    /// - timestamp_capacity > 0
    pub fn validate(&self) -> SieveResult<()> {
        if self.guard_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "guard_capacity".to_string(),
                value: self.guard_capacity.to_string(),
                reason: "guard_capacity must be greater than 0".to_string(),
            }
            .into());
        }

        if self.timestamp_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "timestamp_capacity".to_string(),
                value: self.timestamp_capacity.to_string(),
                reason: "timestamp_capacity must be greater than 0".to_string(),
            }
            .into());
        }

        Ok(())
    }
}
