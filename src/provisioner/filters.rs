//! Event filters
//!
//! Side-effect free predicates deciding which storage class and claim events
//! this provisioner instance acts on.

use crate::domain::model::{ClaimEvent, ClaimPhase, StorageClassEvent};

/// Claim annotation naming the provisioner expected to serve it
pub const STORAGE_PROVISIONER_ANNOTATION_BETA: &str =
    "volume.beta.kubernetes.io/storage-provisioner";

/// GA successor of [`STORAGE_PROVISIONER_ANNOTATION_BETA`]
pub const STORAGE_PROVISIONER_ANNOTATION: &str = "volume.kubernetes.io/storage-provisioner";

/// Predicates parameterized by the configured provisioner name
#[derive(Debug, Clone)]
pub struct ClaimFilterSet {
    provisioner_name: String,
}

impl ClaimFilterSet {
    pub fn new(provisioner_name: impl Into<String>) -> Self {
        Self {
            provisioner_name: provisioner_name.into(),
        }
    }

    pub fn provisioner_name(&self) -> &str {
        &self.provisioner_name
    }

    /// The storage class names this provisioner
    pub fn storage_class_applies(&self, event: &StorageClassEvent) -> bool {
        event.provisioner == self.provisioner_name
    }

    /// The claim was handed to this provisioner
    pub fn owns_claim(&self, claim: &ClaimEvent) -> bool {
        [STORAGE_PROVISIONER_ANNOTATION_BETA, STORAGE_PROVISIONER_ANNOTATION]
            .iter()
            .filter_map(|key| claim.annotations.get(*key))
            .any(|provisioner| *provisioner == self.provisioner_name)
    }

    /// The claim is owned and waiting for a volume
    pub fn should_create(&self, claim: &ClaimEvent) -> bool {
        claim.phase() == ClaimPhase::Pending && self.owns_claim(claim)
    }

    /// The claim is owned and reached a bound volume that may need teardown
    pub fn should_delete(&self, claim: &ClaimEvent) -> bool {
        claim.phase() == ClaimPhase::Bound && self.owns_claim(claim)
    }

    /// The claim is owned, bound, and asks for a different size
    pub fn should_resize(&self, claim: &ClaimEvent) -> bool {
        self.owns_claim(claim) && claim.pending_resize().is_some()
    }
}
