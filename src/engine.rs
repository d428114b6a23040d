//! Query-time entry point.
//!
//! [`PreAggregationEngine::plan`] turns a query into either a rewritten
//! query over fresh materialized tables or a signal to run against the raw
//! source. Nothing past this boundary is an error: unresolvable queries,
//! missing matches, slow builds and failed builds all become a
//! [`FallbackReason`].

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::{CacheError, StateCache};
use crate::config::{Settings, SettingsError};
use crate::model::LocationKind;
use crate::planner::{candidates_for, match_candidates, rewrite, select, MatchResult, RewrittenQuery, SelectOverride};
use crate::refresh::{
    BuildCoordinator, BuildError, BuildTarget, EnsureError, InstanceKey, InstanceStore,
    MaterializedInstance, RefreshKeyFactory, RefreshScheduler, SchedulerError, SchedulerHandle,
    SourceDriver, StorageDriver, SystemClock,
};
use crate::semantic::{classify, Catalog, Query, QueryRequirements, SchemaError};

/// Errors constructing an engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("failed to open pre-aggregation state: {0}")]
    State(#[from] CacheError),
}

/// Why a query runs against the raw source.
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackReason {
    /// The query opted out of pre-aggregations.
    Disabled,
    /// The query references members the catalog doesn't have.
    UnresolvedQuery(SchemaError),
    NoMatchingPreAggregation,
    /// Waiting for a build took longer than the configured wait.
    BuildTimedOut,
    /// The build failed and there was no earlier instance to serve.
    BuildFailed(BuildError),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::Disabled => f.write_str("pre-aggregations disabled for this query"),
            FallbackReason::UnresolvedQuery(e) => write!(f, "query could not be resolved: {}", e),
            FallbackReason::NoMatchingPreAggregation => f.write_str("no matching pre-aggregation"),
            FallbackReason::BuildTimedOut => f.write_str("timed out waiting for pre-aggregation build"),
            FallbackReason::BuildFailed(e) => write!(f, "degraded: {}", e),
        }
    }
}

/// Something the caller should know about a plan that still succeeded.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// A rebuild failed; the previous instance was served instead.
    ServedStaleAfterBuildFailure {
        instance: InstanceKey,
        error: BuildError,
    },
}

/// Where and how to execute a query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryPlan {
    PreAggregation {
        rewritten: RewrittenQuery,
        selection: MatchResult,
        notices: Vec<Notice>,
    },
    RawSource {
        reason: FallbackReason,
    },
}

impl QueryPlan {
    pub fn is_pre_aggregation(&self) -> bool {
        matches!(self, QueryPlan::PreAggregation { .. })
    }

    pub fn rewritten(&self) -> Option<&RewrittenQuery> {
        match self {
            QueryPlan::PreAggregation { rewritten, .. } => Some(rewritten),
            QueryPlan::RawSource { .. } => None,
        }
    }

    pub fn fallback_reason(&self) -> Option<&FallbackReason> {
        match self {
            QueryPlan::PreAggregation { .. } => None,
            QueryPlan::RawSource { reason } => Some(reason),
        }
    }
}

/// The selected pre-aggregation for a query, before anything is built.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub requirements: QueryRequirements,
    pub selection: MatchResult,
}

enum Served {
    Instance(Arc<MaterializedInstance>, Option<Notice>),
    Fallback(FallbackReason),
}

pub struct PreAggregationEngine {
    catalog: watch::Sender<Arc<Catalog>>,
    coordinator: BuildCoordinator,
    settings: Settings,
    wait_timeout: Duration,
    default_location: LocationKind,
    scheduler: Mutex<Option<SchedulerHandle>>,
}

impl PreAggregationEngine {
    /// Engine with state persisted where `settings` says.
    pub fn new(
        catalog: Catalog,
        source: Arc<dyn SourceDriver>,
        storage: Arc<dyn StorageDriver>,
        settings: Settings,
    ) -> Result<Self, EngineError> {
        settings.validate()?;
        let store = match settings.storage.state_path()? {
            Some(path) => {
                info!(path = %path.display(), "opening pre-aggregation state");
                InstanceStore::with_state(StateCache::open(&path)?)?
            }
            None => InstanceStore::new(),
        };
        let refresh_keys = RefreshKeyFactory::new(
            source,
            Arc::new(SystemClock),
            settings.refresh.default_every()?,
        );
        let coordinator = BuildCoordinator::with_parts(storage, &settings, store, refresh_keys)?;
        Self::with_coordinator(catalog, coordinator, settings)
    }

    /// Engine over an existing coordinator.
    pub fn with_coordinator(
        catalog: Catalog,
        coordinator: BuildCoordinator,
        settings: Settings,
    ) -> Result<Self, EngineError> {
        let (catalog, _) = watch::channel(Arc::new(catalog));
        Ok(Self {
            catalog,
            coordinator,
            wait_timeout: settings.refresh.wait_timeout()?,
            default_location: settings.storage.default_location()?,
            settings,
            scheduler: Mutex::new(None),
        })
    }

    pub fn catalog(&self) -> Arc<Catalog> {
        self.catalog.borrow().clone()
    }

    pub fn coordinator(&self) -> &BuildCoordinator {
        &self.coordinator
    }

    /// Swap in a reloaded catalog. Plans in progress finish on the old one.
    pub fn reload(&self, catalog: Catalog) {
        self.catalog.send_replace(Arc::new(catalog));
        info!("pre-aggregation catalog reloaded");
    }

    /// Start background refresh, if enabled and not already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_background_refresh(&self) -> Result<bool, SettingsError> {
        if !self.settings.refresh.background {
            return Ok(false);
        }
        let mut scheduler = self.scheduler.lock().unwrap_or_else(|e| e.into_inner());
        if scheduler.is_some() {
            return Ok(false);
        }
        *scheduler = Some(RefreshScheduler::start(
            self.coordinator.clone(),
            self.catalog.subscribe(),
            &self.settings,
        )?);
        Ok(true)
    }

    /// Queue a background refresh of one instance.
    pub fn trigger_background_refresh(&self, key: InstanceKey) -> Result<(), SchedulerError> {
        let scheduler = self.scheduler.lock().unwrap_or_else(|e| e.into_inner());
        match scheduler.as_ref() {
            Some(handle) => handle.trigger_background_refresh(key),
            None => Err(SchedulerError::Stopped),
        }
    }

    /// Stop background refresh and cancel in-flight builds.
    pub async fn shutdown(&self) {
        let scheduler = self.scheduler.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = scheduler {
            handle.shutdown().await;
        }
        self.coordinator.shutdown();
    }

    /// Classify, match and select without building anything.
    pub fn select(&self, query: &Query) -> Result<Selection, FallbackReason> {
        self.select_in(&self.catalog(), query)
    }

    // Ids in the returned selection are only valid for `catalog`.
    fn select_in(&self, catalog: &Catalog, query: &Query) -> Result<Selection, FallbackReason> {
        if query.options.disable_pre_aggregations {
            return Err(FallbackReason::Disabled);
        }
        let requirements = classify(catalog, query).map_err(FallbackReason::UnresolvedQuery)?;
        let candidates = candidates_for(catalog, &requirements);
        let matches = match_candidates(catalog, &requirements, &candidates);
        let over = SelectOverride {
            force_original_sql: query.options.use_original_sql_pre_aggregations,
        };
        let selection = select(&matches, over)
            .cloned()
            .ok_or(FallbackReason::NoMatchingPreAggregation)?;
        debug!(
            pre_aggregation = %selection.id,
            candidates = candidates.len(),
            matches = matches.len(),
            "selected pre-aggregation"
        );
        Ok(Selection {
            requirements,
            selection,
        })
    }

    /// Plan a query, building or refreshing the selected pre-aggregation
    /// within the configured wait.
    pub async fn plan(&self, query: &Query) -> QueryPlan {
        let catalog = self.catalog();
        let Selection {
            requirements,
            selection,
        } = match self.select_in(&catalog, query) {
            Ok(selection) => selection,
            Err(reason) => {
                debug!(%reason, "using raw source");
                return QueryPlan::RawSource { reason };
            }
        };

        let pre_aggregation = catalog.pre_aggregation(selection.pre_aggregation);
        let targets = BuildTarget::for_read(
            &catalog,
            pre_aggregation,
            selection.read_range.as_ref(),
            self.default_location,
        );
        let renew = query.options.renew_query;
        let served = join_all(targets.iter().map(|target| self.serve(target, renew))).await;

        let mut instances = Vec::with_capacity(served.len());
        let mut notices = Vec::new();
        for served in served {
            match served {
                Served::Instance(instance, notice) => {
                    instances.push(instance);
                    notices.extend(notice);
                }
                Served::Fallback(reason) => {
                    debug!(%reason, pre_aggregation = %selection.id, "using raw source");
                    return QueryPlan::RawSource { reason };
                }
            }
        }

        let location = instances
            .first()
            .map(|i| i.location.kind)
            .unwrap_or(self.default_location);
        let tables = instances.iter().map(|i| i.location.table.clone()).collect();
        let rewritten = rewrite(&catalog, &requirements, &selection, location, tables);
        QueryPlan::PreAggregation {
            rewritten,
            selection,
            notices,
        }
    }

    async fn serve(&self, target: &BuildTarget, renew: bool) -> Served {
        match self
            .coordinator
            .ensure_fresh_within(target, self.wait_timeout, renew)
            .await
        {
            Ok(instance) => Served::Instance(instance, None),
            Err(EnsureError::TimedOut(_)) => Served::Fallback(FallbackReason::BuildTimedOut),
            Err(EnsureError::Build(error)) => match self.coordinator.current(&target.key) {
                Some(previous) => {
                    warn!(instance = %target.key, %error, "serving previous instance after failed build");
                    let notice = Notice::ServedStaleAfterBuildFailure {
                        instance: target.key.clone(),
                        error,
                    };
                    Served::Instance(previous, Some(notice))
                }
                None => Served::Fallback(FallbackReason::BuildFailed(error)),
            },
        }
    }
}
