//! Backend failure classification
//!
//! Every backend call site passes its result through [`ErrorClassifier::resolve`],
//! which decides whether a failure already means the desired end state was
//! reached (absorb) or has to be surfaced to the reconciliation engine.

use crate::domain::ports::{BackendError, BackendErrorCode, BackendOperation, BackendResult};
use crate::error::{Error, Result};
use tracing::debug;

/// Outcome of classifying a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Desired end state already reached, continue as if successful
    Absorb,
    /// Transient or unclassified, reschedule with backoff
    Retry,
    /// Structurally unfixable, stop retrying
    Abort,
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Disposition::Absorb => write!(f, "absorb"),
            Disposition::Retry => write!(f, "retry"),
            Disposition::Abort => write!(f, "abort"),
        }
    }
}

/// Maps backend failure codes to dispositions
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify a failure of `operation`
    ///
    /// Only the "already there" / "already gone" code of each operation is
    /// absorbed. Export creation absorbs nothing.
    pub fn classify(operation: BackendOperation, error: &BackendError) -> Disposition {
        match (operation, error.code) {
            (BackendOperation::CreateVolume, BackendErrorCode::NameConflict)
            | (BackendOperation::DestroyExport, BackendErrorCode::ExportNotFound)
            | (BackendOperation::DestroyVolume, BackendErrorCode::VolumeNotFound) => {
                Disposition::Absorb
            }
            _ => Disposition::Retry,
        }
    }

    /// Settle the result of a backend call
    ///
    /// Returns `Ok(Some(value))` on success, `Ok(None)` when the failure was
    /// absorbed and `Err` otherwise.
    pub fn resolve<T>(operation: BackendOperation, result: BackendResult<T>) -> Result<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(source) => match Self::classify(operation, &source) {
                Disposition::Absorb => {
                    debug!("Absorbed backend failure on {}: {}", operation, source);
                    Ok(None)
                }
                Disposition::Retry | Disposition::Abort => Err(Error::Backend { operation, source }),
            },
        }
    }
}
