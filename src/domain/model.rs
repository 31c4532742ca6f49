//! Domain Model - Typed event payloads and volume records
//!
//! The reconciliation adapter translates cluster objects into these plain
//! structures; the provisioning core never sees untyped payloads.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Prefix of every provisioned volume name
pub const VOLUME_NAME_PREFIX: &str = "pvc-";

/// Deterministic volume name for a claim UID
pub fn volume_name(claim_uid: &str) -> String {
    format!("{}{}", VOLUME_NAME_PREFIX, claim_uid)
}

// =============================================================================
// Storage Class Events
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClassEventKind {
    /// Added or modified
    Applied,
    Deleted,
}

/// Observed change to a storage class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageClassEvent {
    pub kind: StorageClassEventKind,
    pub name: String,
    /// Provisioner responsible for the class
    pub provisioner: String,
    /// Raw provisioning parameters
    pub parameters: BTreeMap<String, String>,
    pub reclaim_policy: Option<String>,
    pub mount_options: Vec<String>,
}

// =============================================================================
// Claim Events
// =============================================================================

/// Lifecycle phase of a claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimPhase {
    Pending,
    Bound,
    Lost,
    /// Phase not reported yet, or not one we know
    Unknown,
}

impl ClaimPhase {
    pub fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => ClaimPhase::Pending,
            Some("Bound") => ClaimPhase::Bound,
            Some("Lost") => ClaimPhase::Lost,
            _ => ClaimPhase::Unknown,
        }
    }
}

impl std::fmt::Display for ClaimPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClaimPhase::Pending => write!(f, "Pending"),
            ClaimPhase::Bound => write!(f, "Bound"),
            ClaimPhase::Lost => write!(f, "Lost"),
            ClaimPhase::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Observed state of a persistent volume claim
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClaimEvent {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub annotations: BTreeMap<String, String>,
    pub phase: Option<ClaimPhase>,
    pub storage_class_name: Option<String>,
    /// Requested size, e.g. "5Gi"
    pub requested_storage: Option<String>,
    /// Capacity reported in the claim status once bound
    pub capacity: Option<String>,
    pub access_modes: Vec<String>,
    pub volume_mode: Option<String>,
    /// Name of the bound volume
    pub volume_name: Option<String>,
}

impl ClaimEvent {
    pub fn phase(&self) -> ClaimPhase {
        self.phase.clone().unwrap_or(ClaimPhase::Unknown)
    }

    /// Requested and reported sizes, when a bound claim asks for a different size
    pub fn pending_resize(&self) -> Option<(&str, &str)> {
        if self.phase() != ClaimPhase::Bound {
            return None;
        }
        match (self.capacity.as_deref(), self.requested_storage.as_deref()) {
            (Some(old), Some(new)) if old != new => Some((old, new)),
            _ => None,
        }
    }
}

/// Reference from a volume record back to its claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRef {
    pub namespace: String,
    pub name: String,
    pub uid: String,
}

// =============================================================================
// Volume Request
// =============================================================================

/// Provisioning request derived from a claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeRequest {
    pub claim: ClaimRef,
    pub storage_class_name: String,
    /// Human-readable quantity, e.g. "5Gi"
    pub size: String,
    pub access_modes: Vec<String>,
    pub volume_mode: Option<String>,
}

impl VolumeRequest {
    pub fn from_claim(claim: &ClaimEvent) -> Result<Self> {
        let storage_class_name = claim.storage_class_name.clone().ok_or_else(|| {
            Error::InvalidClaim(format!(
                "{}/{} does not reference a storage class",
                claim.namespace, claim.name
            ))
        })?;
        let size = claim.requested_storage.clone().ok_or_else(|| {
            Error::InvalidClaim(format!(
                "{}/{} does not request any storage",
                claim.namespace, claim.name
            ))
        })?;

        Ok(Self {
            claim: ClaimRef {
                namespace: claim.namespace.clone(),
                name: claim.name.clone(),
                uid: claim.uid.clone(),
            },
            storage_class_name,
            size,
            access_modes: claim.access_modes.clone(),
            volume_mode: claim.volume_mode.clone(),
        })
    }

    pub fn volume_name(&self) -> String {
        volume_name(&self.claim.uid)
    }
}

// =============================================================================
// Provisioned Volume
// =============================================================================

/// What happens to backend resources once the record is released
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReclaimPolicy {
    #[default]
    Delete,
    Retain,
    Recycle,
}

impl std::fmt::Display for ReclaimPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReclaimPolicy::Delete => write!(f, "Delete"),
            ReclaimPolicy::Retain => write!(f, "Retain"),
            ReclaimPolicy::Recycle => write!(f, "Recycle"),
        }
    }
}

impl FromStr for ReclaimPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Delete" => Ok(ReclaimPolicy::Delete),
            "Retain" => Ok(ReclaimPolicy::Retain),
            "Recycle" => Ok(ReclaimPolicy::Recycle),
            other => Err(Error::Configuration(format!(
                "unknown reclaim policy: {}",
                other
            ))),
        }
    }
}

/// iSCSI connection parameters of a provisioned volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IscsiVolumeSource {
    /// Primary portal, the first configured one
    pub target_portal: String,
    pub portals: Vec<String>,
    /// Target IQN
    pub iqn: String,
    pub lun: i32,
    pub initiator_name: String,
    pub fs_type: String,
}

/// Durable record of a successfully provisioned volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedVolume {
    pub name: String,
    /// Capacity as requested, e.g. "5Gi"
    pub capacity: String,
    pub access_modes: Vec<String>,
    pub reclaim_policy: ReclaimPolicy,
    pub volume_mode: Option<String>,
    pub storage_class_name: Option<String>,
    pub mount_options: Vec<String>,
    pub claim_ref: Option<ClaimRef>,
    pub iscsi: IscsiVolumeSource,
    pub annotations: BTreeMap<String, String>,
}

impl ProvisionedVolume {
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}
