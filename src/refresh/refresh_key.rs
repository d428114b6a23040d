//! Refresh key strategies.
//!
//! A refresh key is an opaque token: when the token computed now differs
//! from the one stored with an instance, the instance is stale. How the
//! token is computed is a [`RefreshKeyStrategy`]:
//!
//! | Definition          | Strategy                                      |
//! |---------------------|-----------------------------------------------|
//! | `sql`               | [`SqlRefreshKey`], probed through the source  |
//! | `sql` + `every`     | [`SqlRefreshKey`], probed at most once per `every` |
//! | `every`             | [`EveryRefreshKey`], wall clock bucket        |
//! | `immutable`         | [`ImmutableRefreshKey`], never changes        |
//! | nothing             | the factory default (`every = default_every`) |

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::driver::SourceDriver;
use super::error::DriverResult;
use crate::config::{parse_duration, SettingsError};
use crate::model::RefreshKeyDef;

/// Opaque freshness token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefreshKeyValue(String);

impl RefreshKeyValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RefreshKeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Computes the current refresh key of an instance.
#[async_trait]
pub trait RefreshKeyStrategy: Send + Sync + fmt::Debug {
    async fn compute(&self) -> DriverResult<RefreshKeyValue>;

    /// How long a computed key may be reused, if the strategy dictates it.
    fn renewal_interval(&self) -> Option<Duration> {
        None
    }
}

/// Wall clock source, replaceable in tests.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Probes the source database with a SQL statement.
pub struct SqlRefreshKey {
    sql: String,
    every: Option<Duration>,
    source: Arc<dyn SourceDriver>,
}

impl SqlRefreshKey {
    pub fn new(sql: impl Into<String>, source: Arc<dyn SourceDriver>) -> Self {
        Self {
            sql: sql.into(),
            every: None,
            source,
        }
    }

    /// Probe at most once per `every`.
    pub fn every(mut self, every: Duration) -> Self {
        self.every = Some(every);
        self
    }
}

impl fmt::Debug for SqlRefreshKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlRefreshKey")
            .field("sql", &self.sql)
            .field("every", &self.every)
            .finish()
    }
}

#[async_trait]
impl RefreshKeyStrategy for SqlRefreshKey {
    async fn compute(&self) -> DriverResult<RefreshKeyValue> {
        let value = self.source.query_refresh_key(&self.sql).await?;
        Ok(RefreshKeyValue::new(format!("sql:{}", value)))
    }

    fn renewal_interval(&self) -> Option<Duration> {
        self.every
    }
}

/// Buckets wall clock time into `every` sized intervals.
#[derive(Debug, Clone)]
pub struct EveryRefreshKey {
    every: Duration,
    clock: Arc<dyn Clock>,
}

impl EveryRefreshKey {
    pub fn new(every: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { every, clock }
    }
}

#[async_trait]
impl RefreshKeyStrategy for EveryRefreshKey {
    async fn compute(&self) -> DriverResult<RefreshKeyValue> {
        let every_ms = (self.every.as_millis() as i64).max(1);
        let bucket = self.clock.now().timestamp_millis().div_euclid(every_ms);
        Ok(RefreshKeyValue::new(format!("every:{}:{}", every_ms, bucket)))
    }
}

/// A key that never changes: built once, never refreshed.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmutableRefreshKey;

#[async_trait]
impl RefreshKeyStrategy for ImmutableRefreshKey {
    async fn compute(&self) -> DriverResult<RefreshKeyValue> {
        Ok(RefreshKeyValue::new("immutable"))
    }
}

/// Builds strategies from refresh key definitions.
#[derive(Clone)]
pub struct RefreshKeyFactory {
    source: Arc<dyn SourceDriver>,
    clock: Arc<dyn Clock>,
    default: Arc<dyn RefreshKeyStrategy>,
}

impl RefreshKeyFactory {
    /// Factory whose default strategy refreshes every `default_every`.
    pub fn new(source: Arc<dyn SourceDriver>, clock: Arc<dyn Clock>, default_every: Duration) -> Self {
        let default = Arc::new(EveryRefreshKey::new(default_every, clock.clone()));
        Self {
            source,
            clock,
            default,
        }
    }

    /// Replace the strategy used when no refresh key is declared.
    pub fn with_default(mut self, default: Arc<dyn RefreshKeyStrategy>) -> Self {
        self.default = default;
        self
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn strategy(
        &self,
        definition: Option<&RefreshKeyDef>,
    ) -> Result<Arc<dyn RefreshKeyStrategy>, SettingsError> {
        let Some(definition) = definition else {
            return Ok(self.default.clone());
        };
        if definition.immutable {
            return Ok(Arc::new(ImmutableRefreshKey));
        }
        let every = definition.every.as_deref().map(parse_duration).transpose()?;
        Ok(match (&definition.sql, every) {
            (Some(sql), every) => {
                let strategy = SqlRefreshKey::new(sql, self.source.clone());
                Arc::new(match every {
                    Some(every) => strategy.every(every),
                    None => strategy,
                })
            }
            (None, Some(every)) => Arc::new(EveryRefreshKey::new(every, self.clock.clone())),
            (None, None) => self.default.clone(),
        })
    }
}

impl fmt::Debug for RefreshKeyFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshKeyFactory")
            .field("default", &self.default)
            .finish()
    }
}
