//! Reconciliation adapter
//!
//! Bridges kube-runtime and the provisioning core: storage classes are
//! watched into the cache, claims are driven through a finalizer-guarded
//! controller, and error dispositions become requeue decisions.

use crate::controlplane::metrics::{Metrics, OPERATION_CREATE, OPERATION_DELETE, OPERATION_RESIZE};
use crate::controlplane::retry::{RetryConfig, RetryTracker};
use crate::domain::model::{
    volume_name, ClaimEvent, ClaimPhase, StorageClassEvent, StorageClassEventKind, VolumeRequest,
};
use crate::error::{Error, ErrorAction, Result};
use crate::provisioner::cache::StorageClassCache;
use crate::provisioner::classifier::Disposition;
use crate::provisioner::filters::ClaimFilterSet;
use crate::provisioner::lifecycle::{CreateOutcome, VolumeLifecycleController, CONTROLLER_NAME};
use crate::provisioner::parameters::ParameterValidator;
use futures::StreamExt;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::events::{Event as KubeEvent, EventType, Recorder, Reporter};
use kube::runtime::finalizer::{finalizer, Error as FinalizerError, Event as FinalizerEvent};
use kube::runtime::watcher::{self, watcher};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, Resource, ResourceExt};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Finalizer guarding owned claims until their volume is torn down
pub const FINALIZER: &str = "targetd-provisioner/finalizer";

// =============================================================================
// Configuration
// =============================================================================

/// Settings of the reconciliation adapter
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// Name matched against storage classes and claim annotations
    pub provisioner_name: String,
    pub field_manager: String,
    /// Reported as the event source instance
    pub instance: Option<String>,
    pub retry: RetryConfig,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            provisioner_name: "targetd".to_string(),
            field_manager: CONTROLLER_NAME.to_string(),
            instance: None,
            retry: RetryConfig::default(),
        }
    }
}

// =============================================================================
// Event Conversion
// =============================================================================

/// Typed view of a storage class watch event
pub fn storage_class_event(class: &StorageClass, kind: StorageClassEventKind) -> StorageClassEvent {
    StorageClassEvent {
        kind,
        name: class.name_any(),
        provisioner: class.provisioner.clone(),
        parameters: class.parameters.clone().unwrap_or_default(),
        reclaim_policy: class.reclaim_policy.clone(),
        mount_options: class.mount_options.clone().unwrap_or_default(),
    }
}

/// Typed view of a claim
pub fn claim_event(claim: &PersistentVolumeClaim) -> ClaimEvent {
    let spec = claim.spec.as_ref();
    let status = claim.status.as_ref();

    ClaimEvent {
        name: claim.name_any(),
        namespace: claim.namespace().unwrap_or_default(),
        uid: claim.uid().unwrap_or_default(),
        annotations: claim.annotations().clone(),
        phase: status.map(|s| ClaimPhase::parse(s.phase.as_deref())),
        storage_class_name: spec.and_then(|s| s.storage_class_name.clone()),
        requested_storage: spec
            .and_then(|s| s.resources.as_ref())
            .and_then(|r| r.requests.as_ref())
            .and_then(|r| r.get("storage"))
            .map(|q| q.0.clone()),
        capacity: status
            .and_then(|s| s.capacity.as_ref())
            .and_then(|c| c.get("storage"))
            .map(|q| q.0.clone()),
        access_modes: spec
            .and_then(|s| s.access_modes.clone())
            .unwrap_or_default(),
        volume_mode: spec.and_then(|s| s.volume_mode.clone()),
        volume_name: spec.and_then(|s| s.volume_name.clone()),
    }
}

// =============================================================================
// Decisions
// =============================================================================

/// What a claim event asks the lifecycle controller to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimAction {
    Create,
    Resize { old: String, new: String },
    Delete { volume: String },
    Ignore,
}

/// Decision for a live claim
pub fn apply_action(filters: &ClaimFilterSet, claim: &ClaimEvent) -> ClaimAction {
    if filters.should_create(claim) {
        return ClaimAction::Create;
    }
    if filters.should_resize(claim) {
        if let Some((old, new)) = claim.pending_resize() {
            return ClaimAction::Resize {
                old: old.to_string(),
                new: new.to_string(),
            };
        }
    }
    ClaimAction::Ignore
}

/// Decision for a claim being deleted
pub fn cleanup_action(filters: &ClaimFilterSet, claim: &ClaimEvent) -> ClaimAction {
    if !filters.should_delete(claim) {
        return ClaimAction::Ignore;
    }
    let volume = claim
        .volume_name
        .clone()
        .unwrap_or_else(|| volume_name(&claim.uid));
    ClaimAction::Delete { volume }
}

/// Apply a storage class event to the cache
///
/// Returns whether the cache changed. A class missing required parameters is
/// evicted and reported as a permanent error.
pub fn handle_storage_class_event(
    filters: &ClaimFilterSet,
    cache: &StorageClassCache,
    event: &StorageClassEvent,
) -> Result<bool> {
    if !filters.storage_class_applies(event) {
        return Ok(false);
    }

    match event.kind {
        StorageClassEventKind::Deleted => Ok(cache.remove(&event.name).is_some()),
        StorageClassEventKind::Applied => match ParameterValidator::from_event(event) {
            Ok(parameters) => {
                cache.put(event.name.clone(), parameters);
                Ok(true)
            }
            Err(e) => {
                cache.remove(&event.name);
                Err(e)
            }
        },
    }
}

/// Requeue decision for a failed reconciliation of `key`
pub fn requeue_action(error: &Error, retry: &RetryTracker, key: &str) -> Action {
    match error.action() {
        ErrorAction::NoRequeue => Action::await_change(),
        ErrorAction::RequeueAfter(delay) => Action::requeue(delay),
        ErrorAction::RequeueWithBackoff => Action::requeue(retry.next_delay(key)),
    }
}

fn outcome<T>(result: &Result<T>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(e) => match e.disposition() {
            Disposition::Abort => "abort",
            Disposition::Absorb | Disposition::Retry => "retry",
        },
    }
}

/// Normal event for a finished operation, `None` when nothing changed
fn success_event(
    operation: &str,
    created: Option<CreateOutcome>,
    claim: &str,
) -> Option<(&'static str, String)> {
    if created == Some(CreateOutcome::AlreadyRecorded) {
        return None;
    }
    let reason = match operation {
        OPERATION_DELETE => "VolumeDeleted",
        _ => "ProvisioningSucceeded",
    };
    Some((reason, format!("{} of volume for claim {} succeeded", operation, claim)))
}

// =============================================================================
// Context
// =============================================================================

/// Shared state of the reconcilers
pub struct Context {
    client: Client,
    controller: VolumeLifecycleController,
    filters: ClaimFilterSet,
    metrics: Metrics,
    retry: RetryTracker,
    reporter: Reporter,
    ready: AtomicBool,
}

impl Context {
    pub fn new(
        client: Client,
        controller: VolumeLifecycleController,
        config: &ProvisionerConfig,
        metrics: Metrics,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            controller,
            filters: ClaimFilterSet::new(config.provisioner_name.clone()),
            metrics,
            retry: RetryTracker::new(config.retry),
            reporter: Reporter {
                controller: CONTROLLER_NAME.to_string(),
                instance: config.instance.clone(),
            },
            ready: AtomicBool::new(false),
        })
    }

    /// Storage classes were listed at least once
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    async fn apply(&self, claim: &PersistentVolumeClaim) -> Result<Action> {
        let event = claim_event(claim);

        match apply_action(&self.filters, &event) {
            ClaimAction::Create => {
                let created = self
                    .observe(claim, OPERATION_CREATE, async {
                        let request = VolumeRequest::from_claim(&event)?;
                        self.controller.create(&request).await
                    })
                    .await?;
                self.announce(claim, OPERATION_CREATE, Some(created)).await;
            }
            ClaimAction::Resize { old, new } => {
                self.observe(claim, OPERATION_RESIZE, self.controller.resize(&old, &new))
                    .await?;
                self.announce(claim, OPERATION_RESIZE, None).await;
            }
            _ => debug!("Nothing to do for claim {}/{}", event.namespace, event.name),
        }

        Ok(Action::await_change())
    }

    async fn cleanup(&self, claim: &PersistentVolumeClaim) -> Result<Action> {
        let event = claim_event(claim);

        if let ClaimAction::Delete { volume } = cleanup_action(&self.filters, &event) {
            self.observe(claim, OPERATION_DELETE, self.controller.delete(&volume))
                .await?;
            self.announce(claim, OPERATION_DELETE, None).await;
        }

        Ok(Action::await_change())
    }

    /// Run a lifecycle operation, recording its outcome
    async fn observe<F, T>(&self, claim: &PersistentVolumeClaim, operation: &str, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = op.await;
        self.metrics
            .record(operation, outcome(&result), started.elapsed().as_secs_f64());

        if let Err(e) = &result {
            if !e.is_retryable() {
                warn!("Giving up on claim {}: {}", claim.name_any(), e);
                self.publish(claim, EventType::Warning, e.reason(), e.to_string(), operation)
                    .await;
            }
        }

        result
    }

    async fn announce(
        &self,
        claim: &PersistentVolumeClaim,
        operation: &str,
        created: Option<CreateOutcome>,
    ) {
        match success_event(operation, created, &claim.name_any()) {
            Some((reason, note)) => {
                self.publish(claim, EventType::Normal, reason, note, operation)
                    .await
            }
            None => debug!("Volume for claim {} already recorded", claim.name_any()),
        }
    }

    async fn publish(
        &self,
        claim: &PersistentVolumeClaim,
        type_: EventType,
        reason: &str,
        note: String,
        action: &str,
    ) {
        let recorder = Recorder::new(
            self.client.clone(),
            self.reporter.clone(),
            claim.object_ref(&()),
        );
        let event = KubeEvent {
            type_,
            reason: reason.to_string(),
            note: Some(note),
            action: action.to_string(),
            secondary: None,
        };

        if let Err(e) = recorder.publish(event).await {
            warn!("Failed to publish event on claim {}: {}", claim.name_any(), e);
        }
    }
}

// =============================================================================
// Reconcilers
// =============================================================================

/// Reconcile one claim
pub async fn reconcile(claim: Arc<PersistentVolumeClaim>, ctx: Arc<Context>) -> Result<Action> {
    let has_finalizer = claim.finalizers().iter().any(|f| f == FINALIZER);
    let event = claim_event(&claim);

    // claims of other provisioners never get our finalizer
    if !ctx.filters.owns_claim(&event) && !has_finalizer {
        return Ok(Action::await_change());
    }

    let api: Api<PersistentVolumeClaim> = Api::namespaced(ctx.client.clone(), &event.namespace);
    let context = &ctx;
    let action = finalizer(&api, FINALIZER, claim, |finalizer_event| async move {
        match finalizer_event {
            FinalizerEvent::Apply(claim) => context.apply(&claim).await,
            FinalizerEvent::Cleanup(claim) => context.cleanup(&claim).await,
        }
    })
    .await
    .map_err(|e| match e {
        FinalizerError::ApplyFailed(e) | FinalizerError::CleanupFailed(e) => e,
        other => Error::Finalizer(other.to_string()),
    })?;

    ctx.retry.reset(&event.uid);
    Ok(action)
}

/// Requeue policy for failed claim reconciliations
pub fn error_policy(claim: Arc<PersistentVolumeClaim>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = claim.uid().unwrap_or_else(|| claim.name_any());
    let action = requeue_action(error, &ctx.retry, &key);

    if error.is_retryable() {
        warn!(
            claim = %claim.name_any(),
            disposition = %error.disposition(),
            "Reconciliation failed, will retry: {}",
            error
        );
    } else {
        warn!(claim = %claim.name_any(), "Reconciliation failed permanently: {}", error);
    }

    action
}

/// Keep the storage class cache in sync with the cluster
pub async fn watch_storage_classes(ctx: Arc<Context>, synced: oneshot::Sender<()>) {
    let api: Api<StorageClass> = Api::all(ctx.client.clone());
    let cache = ctx.controller.cache().clone();
    let mut synced = Some(synced);

    let stream = watcher(api, watcher::Config::default()).default_backoff();
    futures::pin_mut!(stream);

    while let Some(event) = stream.next().await {
        match event {
            Ok(watcher::Event::Applied(class)) => {
                apply_storage_class(&ctx, &cache, &class, StorageClassEventKind::Applied)
            }
            Ok(watcher::Event::Deleted(class)) => {
                apply_storage_class(&ctx, &cache, &class, StorageClassEventKind::Deleted)
            }
            Ok(watcher::Event::Restarted(classes)) => {
                let mut seen = HashSet::new();
                for class in &classes {
                    apply_storage_class(&ctx, &cache, class, StorageClassEventKind::Applied);
                    seen.insert(class.name_any());
                }
                let evicted = cache.retain_only(&seen);
                if evicted > 0 {
                    debug!("Evicted {} vanished storage classes", evicted);
                }

                if let Some(tx) = synced.take() {
                    ctx.ready.store(true, Ordering::Relaxed);
                    let _ = tx.send(());
                }
            }
            Err(e) => warn!("Storage class watch error: {}", e),
        }

        ctx.metrics.set_storage_classes(cache.len());
    }
}

fn apply_storage_class(
    ctx: &Context,
    cache: &StorageClassCache,
    class: &StorageClass,
    kind: StorageClassEventKind,
) {
    let event = storage_class_event(class, kind);
    match handle_storage_class_event(&ctx.filters, cache, &event) {
        Ok(true) => info!("Storage class {} {:?}", event.name, kind),
        Ok(false) => {}
        Err(e) => warn!("Not watching claims for storage class {}: {}", event.name, e),
    }
}

/// Run the storage class watcher and the claim controller until shutdown
pub async fn run(ctx: Arc<Context>) {
    let (synced_tx, synced_rx) = oneshot::channel();
    let storage_classes = tokio::spawn(watch_storage_classes(ctx.clone(), synced_tx));

    // claims referencing a class not cached yet would be rejected
    if synced_rx.await.is_err() {
        warn!("Storage class watcher stopped before the initial listing");
    }
    info!("Storage classes synced, starting claim controller");

    let claims: Api<PersistentVolumeClaim> = Api::all(ctx.client.clone());
    Controller::new(claims, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((claim, _)) => debug!("Reconciled claim {}", claim),
                Err(e) => warn!("Claim reconciliation error: {}", e),
            }
        })
        .await;

    storage_classes.abort();
    info!("Claim controller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioner::parameters::DEFAULT_FS_TYPE;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::time::Duration;

    fn claim(phase: &str) -> PersistentVolumeClaim {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "PersistentVolumeClaim",
            "metadata": {
                "name": "data",
                "namespace": "default",
                "uid": "abc123",
                "annotations": { "volume.kubernetes.io/storage-provisioner": "targetd" }
            },
            "spec": {
                "storageClassName": "fast",
                "accessModes": ["ReadWriteOnce"],
                "volumeMode": "Filesystem",
                "resources": { "requests": { "storage": "5Gi" } }
            },
            "status": { "phase": phase }
        }))
        .unwrap()
    }

    fn storage_class(provisioner: &str, parameters: serde_json::Value) -> StorageClass {
        serde_json::from_value(json!({
            "apiVersion": "storage.k8s.io/v1",
            "kind": "StorageClass",
            "metadata": { "name": "fast" },
            "provisioner": provisioner,
            "parameters": parameters,
            "reclaimPolicy": "Retain",
            "mountOptions": ["noatime"]
        }))
        .unwrap()
    }

    fn complete_parameters() -> serde_json::Value {
        json!({
            "pool": "p0",
            "portals": "10.0.0.1:3260,10.0.0.2:3260",
            "target": "iqn.example",
            "initiatorName": "iqn.initiator"
        })
    }

    #[test]
    fn test_claim_event_conversion() {
        let event = claim_event(&claim("Pending"));

        assert_eq!(event.name, "data");
        assert_eq!(event.namespace, "default");
        assert_eq!(event.uid, "abc123");
        assert_eq!(event.phase(), ClaimPhase::Pending);
        assert_eq!(event.storage_class_name.as_deref(), Some("fast"));
        assert_eq!(event.requested_storage.as_deref(), Some("5Gi"));
        assert_eq!(event.access_modes, vec!["ReadWriteOnce"]);
        assert_eq!(event.capacity, None);
        assert_eq!(event.volume_name, None);
    }

    #[test]
    fn test_claim_actions() {
        let filters = ClaimFilterSet::new("targetd");

        let pending = claim_event(&claim("Pending"));
        assert_eq!(apply_action(&filters, &pending), ClaimAction::Create);
        assert_eq!(cleanup_action(&filters, &pending), ClaimAction::Ignore);

        let mut bound = claim_event(&claim("Bound"));
        bound.capacity = Some("5Gi".into());
        bound.volume_name = Some("pvc-abc123".into());
        assert_eq!(apply_action(&filters, &bound), ClaimAction::Ignore);
        assert_eq!(
            cleanup_action(&filters, &bound),
            ClaimAction::Delete {
                volume: "pvc-abc123".into()
            }
        );

        bound.requested_storage = Some("10Gi".into());
        assert_eq!(
            apply_action(&filters, &bound),
            ClaimAction::Resize {
                old: "5Gi".into(),
                new: "10Gi".into()
            }
        );

        let other = ClaimFilterSet::new("someone-else");
        assert_eq!(apply_action(&other, &pending), ClaimAction::Ignore);
        assert_eq!(cleanup_action(&other, &bound), ClaimAction::Ignore);
    }

    #[test]
    fn test_cleanup_falls_back_to_derived_name() {
        let filters = ClaimFilterSet::new("targetd");
        let bound = claim_event(&claim("Bound"));

        assert_eq!(
            cleanup_action(&filters, &bound),
            ClaimAction::Delete {
                volume: "pvc-abc123".into()
            }
        );
    }

    #[test]
    fn test_storage_class_event_conversion() {
        let event = storage_class_event(
            &storage_class("targetd", complete_parameters()),
            StorageClassEventKind::Applied,
        );

        assert_eq!(event.name, "fast");
        assert_eq!(event.provisioner, "targetd");
        assert_eq!(event.parameters["pool"], "p0");
        assert_eq!(event.reclaim_policy.as_deref(), Some("Retain"));
        assert_eq!(event.mount_options, vec!["noatime"]);
    }

    #[test]
    fn test_storage_class_events_update_cache() {
        let filters = ClaimFilterSet::new("targetd");
        let cache = StorageClassCache::new();
        let class = storage_class("targetd", complete_parameters());

        let applied = storage_class_event(&class, StorageClassEventKind::Applied);
        assert!(handle_storage_class_event(&filters, &cache, &applied).unwrap());
        let cached = cache.get("fast").unwrap();
        assert_eq!(cached.pool, "p0");
        assert_eq!(cached.fs_type, DEFAULT_FS_TYPE);
        assert_eq!(cached.mount_options, vec!["noatime"]);

        let deleted = storage_class_event(&class, StorageClassEventKind::Deleted);
        assert!(handle_storage_class_event(&filters, &cache, &deleted).unwrap());
        assert!(cache.is_empty());

        // deleting twice is a no-op
        assert!(!handle_storage_class_event(&filters, &cache, &deleted).unwrap());
    }

    #[test]
    fn test_foreign_storage_class_is_ignored() {
        let filters = ClaimFilterSet::new("targetd");
        let cache = StorageClassCache::new();
        let class = storage_class("ebs.csi.aws.com", complete_parameters());

        let applied = storage_class_event(&class, StorageClassEventKind::Applied);
        assert!(!handle_storage_class_event(&filters, &cache, &applied).unwrap());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_incomplete_storage_class_is_evicted() {
        let filters = ClaimFilterSet::new("targetd");
        let cache = StorageClassCache::new();

        let complete = storage_class("targetd", complete_parameters());
        handle_storage_class_event(
            &filters,
            &cache,
            &storage_class_event(&complete, StorageClassEventKind::Applied),
        )
        .unwrap();

        let incomplete = storage_class("targetd", json!({ "pool": "p0" }));
        let err = handle_storage_class_event(
            &filters,
            &cache,
            &storage_class_event(&incomplete, StorageClassEventKind::Applied),
        )
        .unwrap_err();

        assert_matches!(err, Error::MissingParameters { ref missing, .. } if missing.len() == 3);
        assert!(!err.is_retryable());
        assert!(!cache.contains("fast"));
    }

    #[test]
    fn test_requeue_actions() {
        let retry = RetryTracker::new(RetryConfig {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(4),
            multiplier: 2.0,
            randomization_factor: 0.0,
        });

        let abort = Error::UnknownStorageClass { name: "fast".into() };
        assert_eq!(requeue_action(&abort, &retry, "abc123"), Action::await_change());

        let not_implemented = Error::NotImplemented("resize".into());
        assert_eq!(
            requeue_action(&not_implemented, &retry, "abc123"),
            Action::requeue(crate::error::NOT_IMPLEMENTED_RETRY_DELAY)
        );

        let transient = Error::Internal("boom".into());
        assert_eq!(
            requeue_action(&transient, &retry, "abc123"),
            Action::requeue(Duration::from_secs(1))
        );
        assert_eq!(
            requeue_action(&transient, &retry, "abc123"),
            Action::requeue(Duration::from_secs(2))
        );
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(outcome(&Ok(())), "success");
        assert_eq!(outcome::<()>(&Err(Error::Internal("boom".into()))), "retry");
        assert_eq!(
            outcome::<CreateOutcome>(&Err(Error::UnsupportedAccessMode {
                modes: vec!["ReadWriteMany".into()]
            })),
            "abort"
        );
    }

    #[test]
    fn test_success_event_only_for_new_volumes() {
        let (reason, note) =
            success_event(OPERATION_CREATE, Some(CreateOutcome::Created), "data").unwrap();
        assert_eq!(reason, "ProvisioningSucceeded");
        assert!(note.contains("data"));

        assert_eq!(
            success_event(OPERATION_CREATE, Some(CreateOutcome::AlreadyRecorded), "data"),
            None
        );

        assert_matches!(
            success_event(OPERATION_DELETE, None, "data"),
            Some(("VolumeDeleted", _))
        );
        assert_matches!(
            success_event(OPERATION_RESIZE, None, "data"),
            Some(("ProvisioningSucceeded", _))
        );
    }
}
