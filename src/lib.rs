//! targetd Provisioner
//!
//! A Kubernetes dynamic volume provisioner for iSCSI volumes managed by
//! targetd.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                    Reconciliation Adapter                         │
//! │   StorageClass watcher            PersistentVolumeClaim controller│
//! └───────────────┬──────────────────────────────┬───────────────────┘
//!                 │                              │
//!   ┌─────────────┴───────────┐    ┌─────────────┴───────────────────┐
//!   │ ParameterValidator      │    │ ClaimFilterSet                  │
//!   │ StorageClassCache       │◄───┤ VolumeLifecycleController       │
//!   └─────────────────────────┘    │ ErrorClassifier                 │
//!                                  └───────┬─────────────────┬───────┘
//!                                          │                 │
//!                              ┌───────────┴─────┐  ┌────────┴────────┐
//!                              │ targetd JSON-RPC│  │ PersistentVolume│
//!                              │ (StorageBackend)│  │ (VolumeStore)   │
//!                              └─────────────────┘  └─────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`provisioner`]: Filters, validation, cache and the volume lifecycle
//! - [`controlplane`]: Backend adapter, volume store and reconcilers
//! - [`domain`]: Core domain types and ports
//! - [`error`]: Error types and their retry classification

pub mod controlplane;
pub mod domain;
pub mod error;
pub mod provisioner;

// Re-export commonly used types
pub use controlplane::{
    BackendConfig, BackendFactory, Context, KubeVolumeStore, Metrics, ProvisionerConfig,
    RetryConfig, TargetdClient, TargetdConfig,
};

pub use domain::model::{ClaimEvent, ClaimPhase, ProvisionedVolume, StorageClassEvent, VolumeRequest};
pub use domain::ports::{StorageBackend, StorageBackendRef, VolumeStore, VolumeStoreRef};

pub use error::{Error, ErrorAction, Result};

pub use provisioner::{
    ClaimFilterSet, CreateOutcome, Disposition, ErrorClassifier, ParameterValidator,
    StorageClassCache, StorageClassParameters, VolumeLifecycleController,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
