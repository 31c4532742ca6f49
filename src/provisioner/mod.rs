//! Volume Lifecycle Reconciliation
//!
//! The decision rules of the provisioner: which events to act on, how a
//! storage class is validated and cached, and the ordered backend and store
//! calls that create and tear down a volume.

pub mod cache;
pub mod classifier;
pub mod filters;
pub mod lifecycle;
pub mod parameters;
pub mod quantity;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::StorageClassCache;
pub use classifier::{Disposition, ErrorClassifier};
pub use filters::ClaimFilterSet;
pub use lifecycle::{
    CreateOutcome, VolumeLifecycleController, CONTROLLER_NAME, INITIATOR_ANNOTATION,
    POOL_ANNOTATION,
};
pub use parameters::{ParameterValidator, StorageClassParameters};
pub use quantity::parse_quantity;
