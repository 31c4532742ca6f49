//! Storage class parameter validation
//!
//! A storage class handled by this provisioner must carry the backend
//! coordinates of its volumes. Classes with incomplete parameters are never
//! cached.

use crate::domain::model::{ReclaimPolicy, StorageClassEvent};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PARAM_POOL: &str = "pool";
pub const PARAM_PORTALS: &str = "portals";
pub const PARAM_TARGET: &str = "target";
pub const PARAM_INITIATOR_NAME: &str = "initiatorName";
pub const PARAM_FS_TYPE: &str = "fsType";

/// Parameters every storage class must define
pub const REQUIRED_PARAMETERS: [&str; 4] =
    [PARAM_POOL, PARAM_PORTALS, PARAM_TARGET, PARAM_INITIATOR_NAME];

/// Filesystem used when the class does not name one
pub const DEFAULT_FS_TYPE: &str = "ext4";

/// Validated provisioning parameters of a storage class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageClassParameters {
    /// Backend pool volumes are allocated from
    pub pool: String,
    /// Portal addresses, in configured order
    pub portals: Vec<String>,
    /// Target IQN
    pub target: String,
    /// Initiator volumes are exported to
    pub initiator_name: String,
    pub fs_type: String,
    pub reclaim_policy: ReclaimPolicy,
    pub mount_options: Vec<String>,
}

impl StorageClassParameters {
    /// Primary portal
    pub fn target_portal(&self) -> &str {
        // validation guarantees at least one portal
        self.portals.first().map(String::as_str).unwrap_or_default()
    }
}

/// Checks storage class parameters for completeness
pub struct ParameterValidator;

impl ParameterValidator {
    /// Validate a raw parameter map
    ///
    /// Returns the missing required keys, in the order of
    /// [`REQUIRED_PARAMETERS`], when the map is incomplete.
    pub fn validate(
        parameters: &BTreeMap<String, String>,
    ) -> std::result::Result<StorageClassParameters, Vec<String>> {
        let portals = parameters
            .get(PARAM_PORTALS)
            .map(|raw| split_portals(raw))
            .unwrap_or_default();

        let missing: Vec<String> = REQUIRED_PARAMETERS
            .iter()
            .filter(|key| match **key {
                PARAM_PORTALS => portals.is_empty(),
                key => !parameters.contains_key(key),
            })
            .map(|key| key.to_string())
            .collect();

        if !missing.is_empty() {
            return Err(missing);
        }

        Ok(StorageClassParameters {
            pool: parameters[PARAM_POOL].clone(),
            portals,
            target: parameters[PARAM_TARGET].clone(),
            initiator_name: parameters[PARAM_INITIATOR_NAME].clone(),
            fs_type: parameters
                .get(PARAM_FS_TYPE)
                .cloned()
                .unwrap_or_else(|| DEFAULT_FS_TYPE.to_string()),
            reclaim_policy: ReclaimPolicy::default(),
            mount_options: Vec::new(),
        })
    }

    /// Validate the parameters carried by a storage class event
    pub fn from_event(event: &StorageClassEvent) -> Result<StorageClassParameters> {
        let mut parameters =
            Self::validate(&event.parameters).map_err(|missing| Error::MissingParameters {
                storage_class: event.name.clone(),
                missing,
            })?;

        if let Some(policy) = &event.reclaim_policy {
            parameters.reclaim_policy = policy.parse()?;
        }
        parameters.mount_options = event.mount_options.clone();

        Ok(parameters)
    }
}

/// Split a comma separated portal list, dropping blank segments
fn split_portals(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|portal| !portal.is_empty())
        .map(str::to_string)
        .collect()
}
