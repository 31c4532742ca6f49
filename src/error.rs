//! Error types for the targetd provisioner
//!
//! Every failure carries enough structure to be classified as absorbed,
//! retryable or permanent. The reconciliation adapter turns that
//! classification into a requeue decision.

use crate::domain::ports::{BackendError, BackendOperation};
use crate::provisioner::classifier::{Disposition, ErrorClassifier};
use std::time::Duration;
use thiserror::Error;

/// Delay before an unimplemented operation is attempted again
pub const NOT_IMPLEMENTED_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Unified error type for the provisioner
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not implemented yet: {0}")]
    NotImplemented(String),

    // =========================================================================
    // Provisioning Configuration Errors
    // =========================================================================
    #[error("Unknown storage class: {name}")]
    UnknownStorageClass { name: String },

    #[error("Storage class {storage_class} is missing parameters: {}", missing.join(", "))]
    MissingParameters {
        storage_class: String,
        missing: Vec<String>,
    },

    #[error("Access mode not supported: {}", modes.join(", "))]
    UnsupportedAccessMode { modes: Vec<String> },

    #[error("Invalid claim: {0}")]
    InvalidClaim(String),

    #[error("Capacity parse error: {0}")]
    CapacityParse(String),

    #[error("Annotation {annotation} is missing on persistent volume {volume}")]
    MissingAnnotation { volume: String, annotation: String },

    // =========================================================================
    // Backend Errors
    // =========================================================================
    #[error("Unable to {operation}: {source}")]
    Backend {
        operation: BackendOperation,
        #[source]
        source: BackendError,
    },

    #[error("Backend HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    #[error("Finalizer error: {0}")]
    Finalizer(String),

    // =========================================================================
    // Misc Errors
    // =========================================================================
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Classify this error as absorbed, retryable or permanent
    pub fn disposition(&self) -> Disposition {
        match self {
            Error::Backend { operation, source } => ErrorClassifier::classify(*operation, source),

            // Nothing a retry can fix
            Error::Configuration(_)
            | Error::UnknownStorageClass { .. }
            | Error::MissingParameters { .. }
            | Error::UnsupportedAccessMode { .. }
            | Error::InvalidClaim(_)
            | Error::CapacityParse(_)
            | Error::MissingAnnotation { .. } => Disposition::Abort,

            _ => Disposition::Retry,
        }
    }

    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            Error::NotImplemented(_) => ErrorAction::RequeueAfter(NOT_IMPLEMENTED_RETRY_DELAY),
            _ => match self.disposition() {
                Disposition::Abort => ErrorAction::NoRequeue,
                Disposition::Absorb | Disposition::Retry => ErrorAction::RequeueWithBackoff,
            },
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Short machine-friendly reason, used for events and metrics labels
    pub fn reason(&self) -> &'static str {
        match self {
            Error::UnknownStorageClass { .. } => "UnknownStorageClass",
            Error::MissingParameters { .. } => "MissingParameters",
            Error::UnsupportedAccessMode { .. } => "UnsupportedAccessMode",
            Error::InvalidClaim(_) | Error::CapacityParse(_) => "InvalidClaim",
            Error::MissingAnnotation { .. } => "MissingAnnotation",
            Error::Backend { .. } | Error::Http(_) => "BackendError",
            Error::NotImplemented(_) => "NotImplemented",
            Error::Kube(_)
            | Error::ResourceNotFound { .. }
            | Error::ResourceExists { .. }
            | Error::Finalizer(_) => "ClusterError",
            _ => "InternalError",
        }
    }
}

/// Result type alias for the provisioner
pub type Result<T> = std::result::Result<T, Error>;
