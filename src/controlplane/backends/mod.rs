//! Storage Backend Adapters
//!
//! Provides adapters for block-storage target services:
//! - targetd: LVM volumes exported over iSCSI

pub mod targetd;

pub use targetd::*;

use crate::domain::ports::StorageBackend;
use crate::error::{Error, Result};
use std::sync::Arc;

/// Factory for creating storage backend adapters
pub struct BackendFactory;

impl BackendFactory {
    /// Create a backend adapter by name
    pub fn create(name: &str, config: BackendConfig) -> Result<Arc<dyn StorageBackend>> {
        match name.to_lowercase().as_str() {
            "targetd" | "iscsi" => Ok(Arc::new(TargetdClient::new(config.targetd)?)),
            _ => Err(Error::Configuration(format!("unknown backend: {}", name))),
        }
    }
}

/// Combined backend configuration
#[derive(Debug, Clone, Default)]
pub struct BackendConfig {
    pub targetd: TargetdConfig,
}
