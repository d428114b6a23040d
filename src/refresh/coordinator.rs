//! Single-flight build coordination.
//!
//! Each instance identity moves through
//!
//! ```text
//! ABSENT ──> BUILDING ──> READY ──> STALE ──> BUILDING ──> READY
//!              │                                 │
//!              └── failure: back to ABSENT ──────┴── failure: back to STALE
//! ```
//!
//! At most one build per identity runs at a time. The first caller to find
//! an instance stale starts a build as its own task and registers it in the
//! in-flight table; later callers subscribe to the same result. A build is
//! never cancelled because a waiter went away: only [`BuildCoordinator::shutdown`]
//! aborts builds.
//!
//! A build writes a new, uniquely named table, publishes it through the
//! storage driver and only then swaps the visible instance. The table it
//! replaces is dropped afterwards, best effort.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use super::driver::{BuildRequest, SourceDriver, StorageDriver};
use super::error::{BuildError, BuildResult, EnsureError};
use super::evaluator::{Freshness, RefreshKeyEvaluator};
use super::instance::{InstanceKey, InstanceStatus, Location, MaterializedInstance};
use super::refresh_key::{Clock, RefreshKeyFactory, SystemClock};
use super::store::InstanceStore;
use super::target::BuildTarget;
use crate::config::{Settings, SettingsError};
use crate::planner::snake_case;

type SharedResult = Option<BuildResult<Arc<MaterializedInstance>>>;

struct InFlight {
    result: watch::Receiver<SharedResult>,
    abort: AbortHandle,
}

struct Inner {
    storage: Arc<dyn StorageDriver>,
    store: InstanceStore,
    evaluator: RefreshKeyEvaluator,
    refresh_keys: RefreshKeyFactory,
    clock: Arc<dyn Clock>,
    schema: String,
    in_flight: DashMap<InstanceKey, InFlight>,
    shut_down: AtomicBool,
}

/// Keeps materialized instances fresh, building each at most once at a time.
///
/// Cheap to clone; clones share the in-flight table and the store.
#[derive(Clone)]
pub struct BuildCoordinator {
    inner: Arc<Inner>,
}

impl BuildCoordinator {
    pub fn new(
        source: Arc<dyn SourceDriver>,
        storage: Arc<dyn StorageDriver>,
        settings: &Settings,
    ) -> Result<Self, SettingsError> {
        let refresh_keys = RefreshKeyFactory::new(
            source,
            Arc::new(SystemClock),
            settings.refresh.default_every()?,
        );
        Self::with_parts(storage, settings, InstanceStore::new(), refresh_keys)
    }

    /// Coordinator over an existing store and refresh key factory.
    ///
    /// Build timestamps come from the factory's clock.
    pub fn with_parts(
        storage: Arc<dyn StorageDriver>,
        settings: &Settings,
        store: InstanceStore,
        refresh_keys: RefreshKeyFactory,
    ) -> Result<Self, SettingsError> {
        Ok(Self {
            inner: Arc::new(Inner {
                storage,
                store,
                evaluator: RefreshKeyEvaluator::new(settings.refresh.key_renewal_threshold()?),
                clock: refresh_keys.clock(),
                refresh_keys,
                schema: settings.storage.schema.clone(),
                in_flight: DashMap::new(),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    pub fn store(&self) -> &InstanceStore {
        &self.inner.store
    }

    /// Current visible instance, fresh or not.
    pub fn current(&self, key: &InstanceKey) -> Option<Arc<MaterializedInstance>> {
        self.inner.store.get(key)
    }

    pub fn status(&self, key: &InstanceKey) -> InstanceStatus {
        self.inner.store.status(key)
    }

    /// Whether a build for `key` is running.
    pub fn is_building(&self, key: &InstanceKey) -> bool {
        self.inner.in_flight.contains_key(key)
    }

    /// Return a fresh instance for `target`, building it if needed.
    pub async fn ensure_fresh(&self, target: &BuildTarget) -> BuildResult<Arc<MaterializedInstance>> {
        self.ensure_fresh_with(target, false).await
    }

    /// Like [`ensure_fresh`](Self::ensure_fresh); `renew` recomputes the
    /// refresh key instead of using a cached one.
    pub async fn ensure_fresh_with(
        &self,
        target: &BuildTarget,
        renew: bool,
    ) -> BuildResult<Arc<MaterializedInstance>> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(BuildError::Cancelled);
        }
        // Join a running build without probing the source again
        if let Some(result) = self.in_flight_result(&target.key) {
            return await_result(result).await;
        }

        let strategy = self
            .inner
            .refresh_keys
            .strategy(target.refresh_key.as_ref())
            .map_err(|e| BuildError::InvalidRefreshKey(e.to_string()))?;
        let current = self.inner.store.get(&target.key);
        let freshness = self
            .inner
            .evaluator
            .evaluate(&target.key, current.as_deref(), strategy.as_ref(), renew)
            .await;

        if let Some(instance) = current {
            if freshness == Freshness::Fresh && instance.structure_version == target.structure_version {
                return Ok(instance);
            }
            if self.inner.store.status(&target.key) == InstanceStatus::Ready {
                self.inner.store.set_status(&target.key, InstanceStatus::Stale);
            }
        }

        let result = self.start_or_join(target, freshness);
        await_result(result).await
    }

    /// [`ensure_fresh`](Self::ensure_fresh) with a bounded wait.
    ///
    /// Timing out leaves the build running for other waiters.
    pub async fn ensure_fresh_within(
        &self,
        target: &BuildTarget,
        wait: Duration,
        renew: bool,
    ) -> Result<Arc<MaterializedInstance>, EnsureError> {
        match tokio::time::timeout(wait, self.ensure_fresh_with(target, renew)).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                debug!(instance = %target.key, ?wait, "stopped waiting for build");
                Err(EnsureError::TimedOut(wait))
            }
        }
    }

    /// Abort every in-flight build. Waiters receive [`BuildError::Cancelled`].
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::Release);
        for entry in self.inner.in_flight.iter() {
            entry.value().abort.abort();
        }
        info!("build coordinator shut down");
    }

    fn in_flight_result(&self, key: &InstanceKey) -> Option<watch::Receiver<SharedResult>> {
        self.inner
            .in_flight
            .get(key)
            .map(|entry| entry.value().result.clone())
    }

    fn start_or_join(&self, target: &BuildTarget, freshness: Freshness) -> watch::Receiver<SharedResult> {
        match self.inner.in_flight.entry(target.key.clone()) {
            Entry::Occupied(entry) => entry.get().result.clone(),
            // Checked under the entry lock so `shutdown` sees every build it must abort
            Entry::Vacant(_) if self.inner.shut_down.load(Ordering::Acquire) => {
                watch::channel(Some(Err(BuildError::Cancelled))).1
            }
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(None);
                self.inner.store.set_status(&target.key, InstanceStatus::Building);
                info!(instance = %target.key, "starting pre-aggregation build");

                let build = tokio::spawn(self.inner.clone().build(target.clone(), freshness));
                let abort = build.abort_handle();
                let inner = self.inner.clone();
                let key = target.key.clone();
                tokio::spawn(async move {
                    let result = match build.await {
                        Ok(result) => result,
                        Err(e) if e.is_cancelled() => Err(BuildError::Cancelled),
                        Err(e) => Err(BuildError::Panicked(e.to_string())),
                    };
                    inner.finish(&key, result, tx);
                });

                entry.insert(InFlight {
                    result: rx.clone(),
                    abort,
                });
                rx
            }
        }
    }
}

impl Inner {
    async fn build(
        self: Arc<Self>,
        target: BuildTarget,
        freshness: Freshness,
    ) -> BuildResult<Arc<MaterializedInstance>> {
        let previous = self.store.get(&target.key);
        let refresh_key = freshness.current_key().cloned();

        // A build that finished after this caller evaluated may already match
        if let (Some(previous), Some(current)) = (&previous, &refresh_key) {
            if previous.refresh_key.as_ref() == Some(current)
                && previous.structure_version == target.structure_version
            {
                debug!(instance = %target.key, "instance already fresh");
                return Ok(previous.clone());
            }
        }

        let location = Location {
            kind: target.location,
            table: self.table_name(&target),
        };
        let request = BuildRequest {
            target: &target,
            location: &location,
        };
        if let Err(e) = self.storage.materialize(&request).await {
            self.drop_quietly(&location).await;
            return Err(e.into());
        }
        let previous_location = previous.as_ref().map(|p| &p.location);
        if let Err(e) = self
            .storage
            .publish(&target.key, &location, previous_location)
            .await
        {
            self.drop_quietly(&location).await;
            return Err(e.into());
        }

        let instance = MaterializedInstance {
            key: target.key.clone(),
            refresh_key,
            built_at: self.clock.now(),
            location,
            structure_version: target.structure_version.clone(),
        };
        let superseded = self.store.swap(instance);
        if let Some(old) = superseded {
            self.drop_quietly(&old.location).await;
        }
        self.store
            .get(&target.key)
            .ok_or_else(|| BuildError::Panicked(format!("instance {} vanished after swap", target.key)))
    }

    fn finish(&self, key: &InstanceKey, result: BuildResult<Arc<MaterializedInstance>>, tx: watch::Sender<SharedResult>) {
        match &result {
            Ok(instance) => info!(instance = %key, table = %instance.location, "pre-aggregation ready"),
            Err(e) => {
                warn!(instance = %key, error = %e, "pre-aggregation build failed");
                self.store.reset_status(key);
            }
        }
        self.in_flight.remove(key);
        tx.send_replace(Some(result));
    }

    async fn drop_quietly(&self, location: &Location) {
        if let Err(e) = self.storage.drop_table(location).await {
            warn!(table = %location, error = %e, "failed to drop table");
        }
    }

    /// `schema.cube_name[_partition]_version_suffix`; unique per build.
    fn table_name(&self, target: &BuildTarget) -> String {
        let mut name = format!(
            "{}.{}_{}",
            self.schema,
            snake_case(&target.key.cube),
            snake_case(&target.key.pre_aggregation)
        );
        if let Some(partition) = &target.key.partition {
            name.push('_');
            name.push_str(partition);
        }
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        name.push('_');
        name.push_str(&target.structure_version);
        name.push('_');
        name.push_str(&suffix[..8]);
        name
    }
}

async fn await_result(mut result: watch::Receiver<SharedResult>) -> BuildResult<Arc<MaterializedInstance>> {
    match result.wait_for(Option::is_some).await {
        Ok(value) => value.clone().unwrap_or(Err(BuildError::Cancelled)),
        Err(_) => Err(BuildError::Cancelled),
    }
}
