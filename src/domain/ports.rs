//! Domain Ports - Boundaries to the external collaborators
//!
//! The provisioning core talks to two remote systems: the block-storage
//! target service (volumes and exports) and the cluster state store
//! (persistent volume records). Adapters in `controlplane` implement these
//! traits; tests use in-memory fakes.

use crate::domain::model::ProvisionedVolume;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

// =============================================================================
// Backend Errors
// =============================================================================

/// Machine-readable failure code reported by the storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendErrorCode {
    /// A volume with the requested name already exists in the pool
    NameConflict,
    /// The addressed volume does not exist
    VolumeNotFound,
    /// The addressed export does not exist
    ExportNotFound,
    /// The pool does not exist
    InvalidPool,
    /// Any other coded failure, including transport errors
    Other(i64),
}

impl BackendErrorCode {
    /// targetd error code for a name conflict
    pub const NAME_CONFLICT: i64 = -50;
    /// targetd error code for an unknown volume
    pub const NOT_FOUND_VOLUME: i64 = -103;
    /// targetd error code for an unknown pool
    pub const INVALID_POOL: i64 = -110;
    /// targetd error code for an unknown export
    pub const NOT_FOUND_VOLUME_EXPORT: i64 = -151;

    /// Map a raw targetd error code
    pub fn from_code(code: i64) -> Self {
        match code {
            Self::NAME_CONFLICT => BackendErrorCode::NameConflict,
            Self::NOT_FOUND_VOLUME => BackendErrorCode::VolumeNotFound,
            Self::NOT_FOUND_VOLUME_EXPORT => BackendErrorCode::ExportNotFound,
            Self::INVALID_POOL => BackendErrorCode::InvalidPool,
            other => BackendErrorCode::Other(other),
        }
    }

    /// Raw numeric code
    pub fn code(&self) -> i64 {
        match self {
            BackendErrorCode::NameConflict => Self::NAME_CONFLICT,
            BackendErrorCode::VolumeNotFound => Self::NOT_FOUND_VOLUME,
            BackendErrorCode::ExportNotFound => Self::NOT_FOUND_VOLUME_EXPORT,
            BackendErrorCode::InvalidPool => Self::INVALID_POOL,
            BackendErrorCode::Other(code) => *code,
        }
    }
}

impl std::fmt::Display for BackendErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendErrorCode::NameConflict => write!(f, "name conflict"),
            BackendErrorCode::VolumeNotFound => write!(f, "volume not found"),
            BackendErrorCode::ExportNotFound => write!(f, "export not found"),
            BackendErrorCode::InvalidPool => write!(f, "invalid pool"),
            BackendErrorCode::Other(code) => write!(f, "code {}", code),
        }
    }
}

/// Failure reported by a storage backend call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code} ({message})")]
pub struct BackendError {
    pub code: BackendErrorCode,
    pub message: String,
}

impl BackendError {
    pub fn new(code: BackendErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Failure that never reached the backend (transport, decoding)
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(BackendErrorCode::Other(0), message)
    }
}

/// Result type for backend calls
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Backend call sites, used to pick the absorbed failure code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOperation {
    CreateVolume,
    CreateExport,
    DestroyExport,
    DestroyVolume,
}

impl std::fmt::Display for BackendOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendOperation::CreateVolume => write!(f, "create volume"),
            BackendOperation::CreateExport => write!(f, "create export"),
            BackendOperation::DestroyExport => write!(f, "destroy export"),
            BackendOperation::DestroyVolume => write!(f, "destroy volume"),
        }
    }
}

// =============================================================================
// Storage Backend Port
// =============================================================================

/// Volume and export primitives of the block-storage target service
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Create a volume of `size_bytes` named `name` in `pool`
    async fn create_volume(&self, pool: &str, name: &str, size_bytes: u64) -> BackendResult<()>;

    /// Export a volume to an initiator, returning the logical unit number
    async fn create_export(&self, pool: &str, name: &str, initiator: &str) -> BackendResult<i32>;

    /// Remove the export of a volume to an initiator
    async fn destroy_export(&self, pool: &str, name: &str, initiator: &str) -> BackendResult<()>;

    /// Destroy a volume
    async fn destroy_volume(&self, pool: &str, name: &str) -> BackendResult<()>;

    /// Get backend name
    fn backend_name(&self) -> &str;
}

// =============================================================================
// Volume Store Port
// =============================================================================

/// Durable store of provisioned volume records, addressed by name
///
/// `create` fails with `Error::ResourceExists` when the name is taken and
/// `delete` fails with `Error::ResourceNotFound` when it is absent, so callers
/// can decide whether those conditions are acceptable.
#[async_trait]
pub trait VolumeStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<ProvisionedVolume>>;

    /// Create a record; `field_manager` identifies the writer for conflict arbitration
    async fn create(&self, volume: &ProvisionedVolume, field_manager: &str) -> Result<()>;

    async fn delete(&self, name: &str) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type StorageBackendRef = Arc<dyn StorageBackend>;
pub type VolumeStoreRef = Arc<dyn VolumeStore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_code_mapping() {
        assert_eq!(BackendErrorCode::from_code(-50), BackendErrorCode::NameConflict);
        assert_eq!(BackendErrorCode::from_code(-103), BackendErrorCode::VolumeNotFound);
        assert_eq!(BackendErrorCode::from_code(-151), BackendErrorCode::ExportNotFound);
        assert_eq!(BackendErrorCode::from_code(-110), BackendErrorCode::InvalidPool);
        assert_eq!(BackendErrorCode::from_code(-1), BackendErrorCode::Other(-1));

        for code in [-50, -103, -151, -110, -32602] {
            assert_eq!(BackendErrorCode::from_code(code).code(), code);
        }
    }

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::new(BackendErrorCode::VolumeNotFound, "no such volume pvc-1");
        assert_eq!(err.to_string(), "volume not found (no such volume pvc-1)");
        assert_eq!(format!("{}", BackendOperation::DestroyExport), "destroy export");
    }
}
