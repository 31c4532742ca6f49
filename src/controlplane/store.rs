//! Persistent volume store
//!
//! Implements the volume store port over the cluster's PersistentVolume API
//! and converts between domain records and k8s-openapi objects.

use crate::domain::model::{ClaimRef, IscsiVolumeSource, ProvisionedVolume, ReclaimPolicy};
use crate::domain::ports::VolumeStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    ISCSIPersistentVolumeSource, ObjectReference, PersistentVolume, PersistentVolumeSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use std::collections::BTreeMap;
use tracing::debug;

const KIND: &str = "PersistentVolume";

/// Volume store backed by the Kubernetes API
pub struct KubeVolumeStore {
    api: Api<PersistentVolume>,
}

impl KubeVolumeStore {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl VolumeStore for KubeVolumeStore {
    async fn get(&self, name: &str) -> Result<Option<ProvisionedVolume>> {
        match self.api.get_opt(name).await? {
            Some(pv) => Ok(Some(from_persistent_volume(&pv)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, volume: &ProvisionedVolume, field_manager: &str) -> Result<()> {
        let params = PostParams {
            field_manager: Some(field_manager.to_string()),
            ..Default::default()
        };

        self.api
            .create(&params, &to_persistent_volume(volume))
            .await
            .map_err(|e| classify_kube_error(&volume.name, e))?;

        debug!("Stored persistent volume {}", volume.name);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.api
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| classify_kube_error(name, e))?;
        Ok(())
    }
}

/// Turn conflict and not-found API errors into their dedicated variants
fn classify_kube_error(name: &str, err: kube::Error) -> Error {
    match err {
        kube::Error::Api(ref response) if response.code == 409 => Error::ResourceExists {
            kind: KIND.into(),
            name: name.into(),
        },
        kube::Error::Api(ref response) if response.code == 404 => Error::ResourceNotFound {
            kind: KIND.into(),
            name: name.into(),
        },
        other => Error::Kube(other),
    }
}

/// Build the PersistentVolume object for a record
pub fn to_persistent_volume(volume: &ProvisionedVolume) -> PersistentVolume {
    let claim_ref = volume.claim_ref.as_ref().map(|claim| ObjectReference {
        api_version: Some("v1".into()),
        kind: Some("PersistentVolumeClaim".into()),
        namespace: Some(claim.namespace.clone()),
        name: Some(claim.name.clone()),
        uid: Some(claim.uid.clone()),
        ..Default::default()
    });

    let iscsi = &volume.iscsi;

    PersistentVolume {
        metadata: ObjectMeta {
            name: Some(volume.name.clone()),
            annotations: Some(volume.annotations.clone()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            access_modes: Some(volume.access_modes.clone()),
            capacity: Some(BTreeMap::from([(
                "storage".to_string(),
                Quantity(volume.capacity.clone()),
            )])),
            claim_ref,
            persistent_volume_reclaim_policy: Some(volume.reclaim_policy.to_string()),
            storage_class_name: volume.storage_class_name.clone(),
            volume_mode: volume.volume_mode.clone(),
            mount_options: (!volume.mount_options.is_empty())
                .then(|| volume.mount_options.clone()),
            iscsi: Some(ISCSIPersistentVolumeSource {
                target_portal: iscsi.target_portal.clone(),
                portals: Some(iscsi.portals.clone()),
                iqn: iscsi.iqn.clone(),
                lun: iscsi.lun,
                initiator_name: Some(iscsi.initiator_name.clone()),
                fs_type: Some(iscsi.fs_type.clone()),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Read a record back from a PersistentVolume object
pub fn from_persistent_volume(pv: &PersistentVolume) -> Result<ProvisionedVolume> {
    let name = pv
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::Internal("persistent volume without a name".into()))?;
    let spec = pv
        .spec
        .as_ref()
        .ok_or_else(|| Error::Internal(format!("persistent volume {} has no spec", name)))?;
    let iscsi = spec.iscsi.as_ref().ok_or_else(|| {
        Error::Internal(format!("persistent volume {} has no iSCSI source", name))
    })?;

    let reclaim_policy = match spec.persistent_volume_reclaim_policy.as_deref() {
        Some(policy) => policy.parse::<ReclaimPolicy>()?,
        None => ReclaimPolicy::default(),
    };

    let claim_ref = spec.claim_ref.as_ref().and_then(|r| {
        Some(ClaimRef {
            namespace: r.namespace.clone()?,
            name: r.name.clone()?,
            uid: r.uid.clone().unwrap_or_default(),
        })
    });

    Ok(ProvisionedVolume {
        capacity: spec
            .capacity
            .as_ref()
            .and_then(|c| c.get("storage"))
            .map(|q| q.0.clone())
            .unwrap_or_default(),
        access_modes: spec.access_modes.clone().unwrap_or_default(),
        reclaim_policy,
        volume_mode: spec.volume_mode.clone(),
        storage_class_name: spec.storage_class_name.clone(),
        mount_options: spec.mount_options.clone().unwrap_or_default(),
        claim_ref,
        iscsi: IscsiVolumeSource {
            target_portal: iscsi.target_portal.clone(),
            portals: iscsi.portals.clone().unwrap_or_default(),
            iqn: iscsi.iqn.clone(),
            lun: iscsi.lun,
            initiator_name: iscsi.initiator_name.clone().unwrap_or_default(),
            fs_type: iscsi.fs_type.clone().unwrap_or_default(),
        },
        annotations: pv.metadata.annotations.clone().unwrap_or_default(),
        name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioner::{INITIATOR_ANNOTATION, POOL_ANNOTATION};
    use assert_matches::assert_matches;

    fn volume() -> ProvisionedVolume {
        ProvisionedVolume {
            name: "pvc-abc123".into(),
            capacity: "5Gi".into(),
            access_modes: vec!["ReadWriteOnce".into()],
            reclaim_policy: ReclaimPolicy::Delete,
            volume_mode: Some("Filesystem".into()),
            storage_class_name: Some("fast".into()),
            mount_options: vec![],
            claim_ref: Some(ClaimRef {
                namespace: "default".into(),
                name: "data".into(),
                uid: "abc123".into(),
            }),
            iscsi: IscsiVolumeSource {
                target_portal: "10.0.0.1:3260".into(),
                portals: vec!["10.0.0.1:3260".into(), "10.0.0.2:3260".into()],
                iqn: "iqn.example".into(),
                lun: 2,
                initiator_name: "iqn.initiator".into(),
                fs_type: "ext4".into(),
            },
            annotations: BTreeMap::from([
                (POOL_ANNOTATION.to_string(), "p0".to_string()),
                (INITIATOR_ANNOTATION.to_string(), "iqn.initiator".to_string()),
            ]),
        }
    }

    #[test]
    fn test_persistent_volume_shape() {
        let pv = to_persistent_volume(&volume());

        assert_eq!(pv.metadata.name.as_deref(), Some("pvc-abc123"));
        let annotations = pv.metadata.annotations.as_ref().unwrap();
        assert_eq!(annotations[POOL_ANNOTATION], "p0");

        let spec = pv.spec.as_ref().unwrap();
        assert_eq!(spec.persistent_volume_reclaim_policy.as_deref(), Some("Delete"));
        assert_eq!(spec.capacity.as_ref().unwrap()["storage"], Quantity("5Gi".into()));
        assert_eq!(spec.mount_options, None);

        let claim_ref = spec.claim_ref.as_ref().unwrap();
        assert_eq!(claim_ref.kind.as_deref(), Some("PersistentVolumeClaim"));
        assert_eq!(claim_ref.uid.as_deref(), Some("abc123"));

        let iscsi = spec.iscsi.as_ref().unwrap();
        assert_eq!(iscsi.target_portal, "10.0.0.1:3260");
        assert_eq!(iscsi.lun, 2);
        assert_eq!(iscsi.initiator_name.as_deref(), Some("iqn.initiator"));
    }

    #[test]
    fn test_read_back() {
        let original = volume();
        let read = from_persistent_volume(&to_persistent_volume(&original)).unwrap();
        assert_eq!(read, original);
    }

    #[test]
    fn test_read_foreign_volume() {
        let mut pv = to_persistent_volume(&volume());
        pv.spec.as_mut().unwrap().persistent_volume_reclaim_policy = Some("Retain".into());
        assert_eq!(
            from_persistent_volume(&pv).unwrap().reclaim_policy,
            ReclaimPolicy::Retain
        );

        pv.spec.as_mut().unwrap().iscsi = None;
        assert_matches!(from_persistent_volume(&pv), Err(Error::Internal(_)));
    }

    #[test]
    fn test_classify_kube_error() {
        let api_error = |code| {
            kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".into(),
                message: "test".into(),
                reason: "test".into(),
                code,
            })
        };

        assert_matches!(
            classify_kube_error("pvc-1", api_error(409)),
            Error::ResourceExists { .. }
        );
        assert_matches!(
            classify_kube_error("pvc-1", api_error(404)),
            Error::ResourceNotFound { .. }
        );
        assert_matches!(classify_kube_error("pvc-1", api_error(500)), Error::Kube(_));
    }
}
