//! Visible instances and their status.
//!
//! Readers get an `Arc` snapshot of the current instance; a completed build
//! replaces the `Arc` in one step, so nobody ever sees a half-built
//! instance. With a [`StateCache`] attached, every change is written
//! through and restored on the next start.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::{debug, warn};

use super::instance::{InstanceKey, InstanceRecord, InstanceStatus, MaterializedInstance};
use crate::cache::{CacheResult, StateCache, StateKey};

#[derive(Default)]
pub struct InstanceStore {
    instances: DashMap<InstanceKey, Arc<MaterializedInstance>>,
    statuses: DashMap<InstanceKey, InstanceStatus>,
    state: Option<Mutex<StateCache>>,
}

impl InstanceStore {
    /// A store kept only in memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store persisted to `cache`, restoring what it already holds.
    ///
    /// Builds interrupted by a restart come back as stale.
    pub fn with_state(cache: StateCache) -> CacheResult<Self> {
        let store = Self::new();
        for (_, record) in cache.scan::<InstanceRecord>(StateKey::INSTANCE_PREFIX)? {
            let status = match record.status {
                InstanceStatus::Building => InstanceStatus::Stale,
                status => status,
            };
            let key = record.instance.key.clone();
            store.statuses.insert(key.clone(), status);
            store.instances.insert(key, Arc::new(record.instance));
        }
        debug!(instances = store.instances.len(), "restored pre-aggregation state");
        Ok(Self {
            state: Some(Mutex::new(cache)),
            ..store
        })
    }

    /// The visible instance for `key`.
    pub fn get(&self, key: &InstanceKey) -> Option<Arc<MaterializedInstance>> {
        self.instances.get(key).map(|entry| entry.value().clone())
    }

    pub fn status(&self, key: &InstanceKey) -> InstanceStatus {
        self.statuses
            .get(key)
            .map(|entry| *entry.value())
            .unwrap_or(InstanceStatus::Absent)
    }

    pub fn set_status(&self, key: &InstanceKey, status: InstanceStatus) {
        self.statuses.insert(key.clone(), status);
        if let Some(instance) = self.get(key) {
            self.persist(&instance, status);
        }
    }

    /// Mark a failed or cancelled build as over.
    pub fn reset_status(&self, key: &InstanceKey) {
        let status = if self.instances.contains_key(key) {
            InstanceStatus::Stale
        } else {
            InstanceStatus::Absent
        };
        self.set_status(key, status);
    }

    /// Make `instance` the visible one, returning the instance it replaced.
    pub fn swap(&self, instance: MaterializedInstance) -> Option<Arc<MaterializedInstance>> {
        let key = instance.key.clone();
        let instance = Arc::new(instance);
        let previous = self.instances.insert(key.clone(), instance.clone());
        self.statuses.insert(key, InstanceStatus::Ready);
        self.persist(&instance, InstanceStatus::Ready);
        previous
    }

    /// Every visible instance, ordered by key.
    pub fn instances(&self) -> Vec<Arc<MaterializedInstance>> {
        let mut all: Vec<_> = self.instances.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    // In-memory state stays authoritative when the write-through fails.
    fn persist(&self, instance: &MaterializedInstance, status: InstanceStatus) {
        let Some(state) = &self.state else {
            return;
        };
        let record = InstanceRecord {
            instance: instance.clone(),
            status,
        };
        let result = match state.lock() {
            Ok(cache) => cache.set(&instance.key.state_key(), &record),
            Err(poisoned) => poisoned.into_inner().set(&instance.key.state_key(), &record),
        };
        if let Err(e) = result {
            warn!(instance = %instance.key, error = %e, "failed to persist instance state");
        }
    }
}
