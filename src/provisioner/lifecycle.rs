//! Volume lifecycle controller
//!
//! Turns a claim into an exported backend volume plus its persistent volume
//! record, and back. Every step is idempotent so an interrupted sequence
//! converges when the reconciliation engine invokes it again:
//!
//! ```text
//! create:  cache lookup -> access modes -> create volume -> create export -> store record
//! delete:  read record  -> reclaim policy -> destroy export -> destroy volume -> delete record
//! ```

use crate::domain::model::{
    IscsiVolumeSource, ProvisionedVolume, ReclaimPolicy, VolumeRequest,
};
use crate::domain::ports::{BackendOperation, StorageBackendRef, VolumeStoreRef};
use crate::error::{Error, Result};
use crate::provisioner::cache::StorageClassCache;
use crate::provisioner::classifier::ErrorClassifier;
use crate::provisioner::parameters::StorageClassParameters;
use crate::provisioner::quantity::parse_quantity;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Name used for annotations, the finalizer and the field manager
pub const CONTROLLER_NAME: &str = "targetd-provisioner";

/// Annotation holding the backend pool of a provisioned volume
pub const POOL_ANNOTATION: &str = "targetd-provisioner/pool";

/// Annotation holding the initiator a volume is exported to
pub const INITIATOR_ANNOTATION: &str = "targetd-provisioner/initiatorName";

/// Access modes allowing several writers, which a single iSCSI export cannot serve
pub const MULTI_WRITER_ACCESS_MODES: [&str; 1] = ["ReadWriteMany"];

/// Result of a successful create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A new persistent volume record was written
    Created,
    /// An earlier attempt already recorded the volume
    AlreadyRecorded,
}

/// Orchestrates backend and store calls for claims
pub struct VolumeLifecycleController {
    cache: Arc<StorageClassCache>,
    backend: StorageBackendRef,
    store: VolumeStoreRef,
    field_manager: String,
}

impl VolumeLifecycleController {
    pub fn new(
        cache: Arc<StorageClassCache>,
        backend: StorageBackendRef,
        store: VolumeStoreRef,
    ) -> Self {
        Self {
            cache,
            backend,
            store,
            field_manager: CONTROLLER_NAME.to_string(),
        }
    }

    pub fn with_field_manager(mut self, field_manager: impl Into<String>) -> Self {
        self.field_manager = field_manager.into();
        self
    }

    pub fn cache(&self) -> &Arc<StorageClassCache> {
        &self.cache
    }

    /// Provision a volume for a claim
    #[instrument(skip(self, request), fields(claim = %request.claim.name, volume = %request.volume_name()))]
    pub async fn create(&self, request: &VolumeRequest) -> Result<CreateOutcome> {
        let class = self.cache.get(&request.storage_class_name)?;
        check_access_modes(&request.access_modes)?;

        let name = request.volume_name();
        let size_bytes = parse_quantity(&request.size)?;

        info!(
            "Creating volume {}/{} ({} bytes)",
            class.pool, name, size_bytes
        );
        let created = ErrorClassifier::resolve(
            BackendOperation::CreateVolume,
            self.backend.create_volume(&class.pool, &name, size_bytes).await,
        )?;
        if created.is_none() {
            info!("Volume {}/{} already exists, reusing it", class.pool, name);
        }

        let lun = ErrorClassifier::resolve(
            BackendOperation::CreateExport,
            self.backend
                .create_export(&class.pool, &name, &class.initiator_name)
                .await,
        )?
        .ok_or_else(|| Error::Internal(format!("no LUN returned for export of {}", name)))?;
        debug!(
            "Exported {}/{} to {} as LUN {}",
            class.pool, name, class.initiator_name, lun
        );

        let volume = build_volume(request, &class, lun);
        match self.store.create(&volume, &self.field_manager).await {
            Ok(()) => {
                info!("Created persistent volume {}", name);
                Ok(CreateOutcome::Created)
            }
            Err(Error::ResourceExists { .. }) => {
                debug!("Persistent volume {} already recorded", name);
                Ok(CreateOutcome::AlreadyRecorded)
            }
            Err(e) => Err(e),
        }
    }

    /// Tear down the volume recorded under `volume_name`
    #[instrument(skip(self))]
    pub async fn delete(&self, volume_name: &str) -> Result<()> {
        let volume = match self.store.get(volume_name).await? {
            Some(volume) => volume,
            None => {
                info!("Persistent volume {} is already gone", volume_name);
                return Ok(());
            }
        };

        if volume.reclaim_policy == ReclaimPolicy::Retain {
            info!(
                "Skipping deletion of persistent volume {}: reclaim policy is set to Retain",
                volume_name
            );
            return Ok(());
        }

        let pool = required_annotation(&volume, POOL_ANNOTATION)?;
        let initiator = required_annotation(&volume, INITIATOR_ANNOTATION)?;

        info!("Deleting volume {}/{}", pool, volume_name);

        // the export must go first, an exported volume cannot be destroyed
        ErrorClassifier::resolve(
            BackendOperation::DestroyExport,
            self.backend
                .destroy_export(pool, volume_name, initiator)
                .await,
        )?;
        ErrorClassifier::resolve(
            BackendOperation::DestroyVolume,
            self.backend.destroy_volume(pool, volume_name).await,
        )?;

        match self.store.delete(volume_name).await {
            Ok(()) | Err(Error::ResourceNotFound { .. }) => {
                info!("Deleted persistent volume {}", volume_name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Resize a volume. Not supported yet, always asks to be retried later.
    pub async fn resize(&self, old: &str, new: &str) -> Result<()> {
        Err(Error::NotImplemented(format!(
            "resize from {} to {}",
            old, new
        )))
    }
}

/// Reject access modes the backend cannot honour
pub fn check_access_modes(modes: &[String]) -> Result<()> {
    if modes
        .iter()
        .any(|mode| MULTI_WRITER_ACCESS_MODES.contains(&mode.as_str()))
    {
        return Err(Error::UnsupportedAccessMode {
            modes: modes.to_vec(),
        });
    }
    Ok(())
}

/// Assemble the record of a volume exported as `lun`
pub fn build_volume(
    request: &VolumeRequest,
    class: &StorageClassParameters,
    lun: i32,
) -> ProvisionedVolume {
    let annotations = BTreeMap::from([
        (POOL_ANNOTATION.to_string(), class.pool.clone()),
        (INITIATOR_ANNOTATION.to_string(), class.initiator_name.clone()),
    ]);

    ProvisionedVolume {
        name: request.volume_name(),
        capacity: request.size.clone(),
        access_modes: request.access_modes.clone(),
        reclaim_policy: class.reclaim_policy,
        volume_mode: request.volume_mode.clone(),
        storage_class_name: Some(request.storage_class_name.clone()),
        mount_options: class.mount_options.clone(),
        claim_ref: Some(request.claim.clone()),
        iscsi: IscsiVolumeSource {
            target_portal: class.target_portal().to_string(),
            portals: class.portals.clone(),
            iqn: class.target.clone(),
            lun,
            initiator_name: class.initiator_name.clone(),
            fs_type: class.fs_type.clone(),
        },
        annotations,
    }
}

fn required_annotation<'a>(volume: &'a ProvisionedVolume, key: &str) -> Result<&'a str> {
    volume
        .annotation(key)
        .ok_or_else(|| Error::MissingAnnotation {
            volume: volume.name.clone(),
            annotation: key.to_string(),
        })
}
