//! In-memory backend and store used by the provisioner tests
//!
//! Both record every call so tests can assert ordering and call counts.

use crate::domain::model::ProvisionedVolume;
use crate::domain::ports::{
    BackendError, BackendErrorCode, BackendOperation, BackendResult, StorageBackend, VolumeStore,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    CreateVolume { pool: String, name: String, size_bytes: u64 },
    CreateExport { pool: String, name: String, initiator: String },
    DestroyExport { pool: String, name: String, initiator: String },
    DestroyVolume { pool: String, name: String },
}

impl BackendCall {
    pub fn operation(&self) -> BackendOperation {
        match self {
            BackendCall::CreateVolume { .. } => BackendOperation::CreateVolume,
            BackendCall::CreateExport { .. } => BackendOperation::CreateExport,
            BackendCall::DestroyExport { .. } => BackendOperation::DestroyExport,
            BackendCall::DestroyVolume { .. } => BackendOperation::DestroyVolume,
        }
    }
}

#[derive(Default)]
struct BackendState {
    /// (pool, name) -> size
    volumes: BTreeMap<(String, String), u64>,
    /// (pool, name, initiator) -> lun
    exports: BTreeMap<(String, String, String), i32>,
    calls: Vec<BackendCall>,
    failures: HashMap<BackendOperation, VecDeque<BackendError>>,
}

/// Backend that behaves like targetd for the four primitives
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<BackendState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `operation` fail with `code`
    pub fn fail_next(&self, operation: BackendOperation, code: BackendErrorCode) {
        self.state
            .lock()
            .failures
            .entry(operation)
            .or_default()
            .push_back(BackendError::new(code, "injected failure"));
    }

    pub fn insert_volume(&self, pool: &str, name: &str, size_bytes: u64) {
        self.state
            .lock()
            .volumes
            .insert((pool.into(), name.into()), size_bytes);
    }

    pub fn volume_size(&self, pool: &str, name: &str) -> Option<u64> {
        self.state
            .lock()
            .volumes
            .get(&(pool.to_string(), name.to_string()))
            .copied()
    }

    pub fn volume_count(&self) -> usize {
        self.state.lock().volumes.len()
    }

    pub fn export_count(&self) -> usize {
        self.state.lock().exports.len()
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().calls.clone()
    }

    pub fn operations(&self) -> Vec<BackendOperation> {
        self.calls().iter().map(BackendCall::operation).collect()
    }

    fn injected(state: &mut BackendState, operation: BackendOperation) -> Option<BackendError> {
        state.failures.get_mut(&operation).and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl StorageBackend for FakeBackend {
    async fn create_volume(&self, pool: &str, name: &str, size_bytes: u64) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::CreateVolume {
            pool: pool.into(),
            name: name.into(),
            size_bytes,
        });
        if let Some(err) = Self::injected(&mut state, BackendOperation::CreateVolume) {
            return Err(err);
        }

        let key = (pool.to_string(), name.to_string());
        if state.volumes.contains_key(&key) {
            return Err(BackendError::new(
                BackendErrorCode::NameConflict,
                format!("volume {} already exists", name),
            ));
        }
        state.volumes.insert(key, size_bytes);
        Ok(())
    }

    async fn create_export(&self, pool: &str, name: &str, initiator: &str) -> BackendResult<i32> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::CreateExport {
            pool: pool.into(),
            name: name.into(),
            initiator: initiator.into(),
        });
        if let Some(err) = Self::injected(&mut state, BackendOperation::CreateExport) {
            return Err(err);
        }

        if !state.volumes.contains_key(&(pool.to_string(), name.to_string())) {
            return Err(BackendError::new(BackendErrorCode::VolumeNotFound, name));
        }

        let key = (pool.to_string(), name.to_string(), initiator.to_string());
        if let Some(lun) = state.exports.get(&key) {
            return Ok(*lun);
        }
        let lun = state.exports.values().max().map(|lun| lun + 1).unwrap_or(0);
        state.exports.insert(key, lun);
        Ok(lun)
    }

    async fn destroy_export(&self, pool: &str, name: &str, initiator: &str) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::DestroyExport {
            pool: pool.into(),
            name: name.into(),
            initiator: initiator.into(),
        });
        if let Some(err) = Self::injected(&mut state, BackendOperation::DestroyExport) {
            return Err(err);
        }

        let key = (pool.to_string(), name.to_string(), initiator.to_string());
        match state.exports.remove(&key) {
            Some(_) => Ok(()),
            None => Err(BackendError::new(BackendErrorCode::ExportNotFound, name)),
        }
    }

    async fn destroy_volume(&self, pool: &str, name: &str) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::DestroyVolume {
            pool: pool.into(),
            name: name.into(),
        });
        if let Some(err) = Self::injected(&mut state, BackendOperation::DestroyVolume) {
            return Err(err);
        }

        if state.exports.keys().any(|(p, n, _)| p == pool && n == name) {
            return Err(BackendError::new(
                BackendErrorCode::Other(-303),
                format!("volume {} is still exported", name),
            ));
        }
        match state.volumes.remove(&(pool.to_string(), name.to_string())) {
            Some(_) => Ok(()),
            None => Err(BackendError::new(BackendErrorCode::VolumeNotFound, name)),
        }
    }

    fn backend_name(&self) -> &str {
        "fake"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Get(String),
    Create { name: String, field_manager: String },
    Delete(String),
}

/// Store keeping records in a map
#[derive(Default)]
pub struct FakeStore {
    volumes: Mutex<BTreeMap<String, ProvisionedVolume>>,
    calls: Mutex<Vec<StoreCall>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, volume: ProvisionedVolume) {
        self.volumes.lock().insert(volume.name.clone(), volume);
    }

    pub fn volume(&self, name: &str) -> Option<ProvisionedVolume> {
        self.volumes.lock().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.volumes.lock().len()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl VolumeStore for FakeStore {
    async fn get(&self, name: &str) -> Result<Option<ProvisionedVolume>> {
        self.calls.lock().push(StoreCall::Get(name.into()));
        Ok(self.volumes.lock().get(name).cloned())
    }

    async fn create(&self, volume: &ProvisionedVolume, field_manager: &str) -> Result<()> {
        self.calls.lock().push(StoreCall::Create {
            name: volume.name.clone(),
            field_manager: field_manager.into(),
        });

        let mut volumes = self.volumes.lock();
        if volumes.contains_key(&volume.name) {
            return Err(Error::ResourceExists {
                kind: "PersistentVolume".into(),
                name: volume.name.clone(),
            });
        }
        volumes.insert(volume.name.clone(), volume.clone());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.calls.lock().push(StoreCall::Delete(name.into()));
        match self.volumes.lock().remove(name) {
            Some(_) => Ok(()),
            None => Err(Error::ResourceNotFound {
                kind: "PersistentVolume".into(),
                name: name.into(),
            }),
        }
    }
}
