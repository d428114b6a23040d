//! Refresh key evaluation.
//!
//! Compares the current refresh key of an instance with the one it was built
//! with. Computed keys are reused for a short renewal window so a burst of
//! queries does not probe the source once per query.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::error::StalenessCheckError;
use super::instance::{InstanceKey, MaterializedInstance};
use super::refresh_key::{RefreshKeyStrategy, RefreshKeyValue};

/// Result of comparing an instance against its current refresh key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// The stored key equals the current key.
    Fresh,
    /// The key changed since the instance was built.
    Stale { current: RefreshKeyValue },
    /// Nothing has been built yet.
    Absent { current: RefreshKeyValue },
    /// The probe failed; assumed stale.
    Unknown { error: StalenessCheckError },
}

impl Freshness {
    pub fn is_stale(&self) -> bool {
        !matches!(self, Freshness::Fresh)
    }

    /// The key a rebuild should record, when known.
    pub fn current_key(&self) -> Option<&RefreshKeyValue> {
        match self {
            Freshness::Stale { current } | Freshness::Absent { current } => Some(current),
            Freshness::Fresh | Freshness::Unknown { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedKey {
    value: RefreshKeyValue,
    computed_at: Instant,
}

/// Evaluates staleness with a per-instance key cache.
#[derive(Debug)]
pub struct RefreshKeyEvaluator {
    renewal_threshold: Duration,
    keys: DashMap<InstanceKey, CachedKey>,
}

impl RefreshKeyEvaluator {
    pub fn new(renewal_threshold: Duration) -> Self {
        Self {
            renewal_threshold,
            keys: DashMap::new(),
        }
    }

    /// Current refresh key for `key`, from the cache when still valid.
    ///
    /// `renew` skips the cache.
    pub async fn current_key(
        &self,
        key: &InstanceKey,
        strategy: &dyn RefreshKeyStrategy,
        renew: bool,
    ) -> Result<RefreshKeyValue, StalenessCheckError> {
        let ttl = strategy.renewal_interval().unwrap_or(self.renewal_threshold);
        if !renew {
            if let Some(cached) = self.keys.get(key) {
                if cached.computed_at.elapsed() < ttl {
                    return Ok(cached.value.clone());
                }
            }
        }

        match strategy.compute().await {
            Ok(value) => {
                self.keys.insert(
                    key.clone(),
                    CachedKey {
                        value: value.clone(),
                        computed_at: Instant::now(),
                    },
                );
                Ok(value)
            }
            Err(source) => {
                self.keys.remove(key);
                Err(StalenessCheckError {
                    key: key.clone(),
                    source,
                })
            }
        }
    }

    /// Decide whether `instance` must be rebuilt.
    pub async fn evaluate(
        &self,
        key: &InstanceKey,
        instance: Option<&MaterializedInstance>,
        strategy: &dyn RefreshKeyStrategy,
        renew: bool,
    ) -> Freshness {
        let current = match self.current_key(key, strategy, renew).await {
            Ok(current) => current,
            Err(error) => {
                warn!(instance = %key, error = %error.source, "refresh key probe failed, assuming stale");
                return Freshness::Unknown { error };
            }
        };

        let freshness = match instance {
            None => Freshness::Absent { current },
            Some(instance) if instance.refresh_key.as_ref() == Some(&current) => Freshness::Fresh,
            Some(_) => Freshness::Stale { current },
        };
        debug!(instance = %key, stale = freshness.is_stale(), "evaluated refresh key");
        freshness
    }

    /// Forget the cached key of `key`.
    pub fn invalidate(&self, key: &InstanceKey) {
        self.keys.remove(key);
    }
}
