/// Tunables for the spatial index and the review session
///
/// Both structs serialize to JSON so a host application can keep them next to
/// its own settings. Missing fields fall back to the defaults below.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Index builder and query tunables
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct IndexConfig {
    /// Entries accumulated before a full build commits a batch
    pub full_batch_size: usize,

    /// Entries accumulated before a catch-up refresh commits a batch
    pub refresh_batch_size: usize,

    /// Number of most-recently-created assets a refresh looks at
    pub refresh_window: usize,

    /// Minimum seconds between two unforced refreshes
    pub refresh_min_interval_secs: u64,

    /// Maximum candidate rows fetched for one bounding box
    pub query_cap: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            full_batch_size: 1_000,
            refresh_batch_size: 100,
            refresh_window: 400,
            refresh_min_interval_secs: 20,
            query_cap: 5_000,
        }
    }
}

impl IndexConfig {
    pub fn refresh_min_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_min_interval_secs)
    }

    /// Convert to JSON string for storage
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Load from a JSON file on disk
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_json(&json)?)
    }
}

/// Review session tunables
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Ranked place suggestions kept per cluster
    pub max_suggestions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { max_suggestions: 5 }
    }
}
