//! Rich store configuration
//!
//! Stored as JSON. Example:
//!
//! ```json
//! {
//!   "cache_capacity": 512,
//!   "backend": {
//!     "kind": "relational",
//!     "database_path": ".rich_store/index.db",
//!     "staging_dir": ".rich_store/staging",
//!     "flush_block_threshold": 50,
//!     "flush_interval_secs": 10,
//!     "read_pool_size": 4
//!   }
//! }
//! ```

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rich::{
    DocumentBackend, DocumentConfig, IndexBackend, IndexResult, RelationalBackend,
    RelationalConfig, RichStore, DEFAULT_CACHE_CAPACITY,
};
use crate::storage::Store;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] serde_json::Error),
}

/// Which index backend to open
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    Relational(RelationalConfig),
    Document(DocumentConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Relational(RelationalConfig::default())
    }
}

impl BackendConfig {
    /// Open the configured backend
    ///
    /// The relational backend recovers orphaned staging files before returning.
    pub fn open(&self) -> IndexResult<Box<dyn IndexBackend>> {
        Ok(match self {
            BackendConfig::Relational(config) => Box::new(RelationalBackend::open(config)?),
            BackendConfig::Document(config) => Box::new(DocumentBackend::open(config)?),
        })
    }
}

/// Top-level rich store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RichStoreConfig {
    /// Number of cached block digests
    pub cache_capacity: usize,
    pub backend: BackendConfig,
}

impl Default for RichStoreConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            backend: BackendConfig::default(),
        }
    }
}

impl RichStoreConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

impl<S: Store> RichStore<S> {
    /// Wrap `store` with the backend and cache described by `config`
    pub fn from_config(store: S, config: &RichStoreConfig) -> IndexResult<Self> {
        let backend = config.backend.open()?;
        Ok(Self::new(store, backend, config.cache_capacity))
    }
}
