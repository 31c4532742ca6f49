//! Storage class cache
//!
//! Validated parameters of the storage classes handled by this provisioner,
//! keyed by class name. Written by storage class events, read by claim
//! handlers running concurrently.

use crate::error::{Error, Result};
use crate::provisioner::parameters::StorageClassParameters;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Shared map of storage class name to parameters
#[derive(Debug, Default)]
pub struct StorageClassCache {
    classes: RwLock<HashMap<String, Arc<StorageClassParameters>>>,
}

impl StorageClassCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Insert or replace the parameters of a class
    pub fn put(&self, name: impl Into<String>, parameters: StorageClassParameters) {
        self.classes.write().insert(name.into(), Arc::new(parameters));
    }

    /// Forget a class; no-op when unknown
    pub fn remove(&self, name: &str) -> Option<Arc<StorageClassParameters>> {
        self.classes.write().remove(name)
    }

    /// Look up a class
    pub fn get(&self, name: &str) -> Result<Arc<StorageClassParameters>> {
        self.classes
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownStorageClass {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.read().contains_key(name)
    }

    /// Drop every class not in `names`, returning how many were dropped
    pub fn retain_only(&self, names: &HashSet<String>) -> usize {
        let mut classes = self.classes.write();
        let before = classes.len();
        classes.retain(|name, _| names.contains(name));
        before - classes.len()
    }

    pub fn len(&self) -> usize {
        self.classes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.read().is_empty()
    }
}
