//! Database collaborators used by refresh.
//!
//! The subsystem never talks to a database directly. Freshness probes go
//! through a [`SourceDriver`], and materialization plus visibility swaps go
//! through a [`StorageDriver`]. Both are async and object safe so the engine
//! can hold them as `Arc<dyn ...>`.

use async_trait::async_trait;

use super::error::DriverResult;
use super::instance::{InstanceKey, Location};
use super::target::BuildTarget;

/// A build command: materialize `target` into the fresh table `location`.
#[derive(Debug, Clone, Copy)]
pub struct BuildRequest<'a> {
    pub target: &'a BuildTarget,
    pub location: &'a Location,
}

/// The source database queried for refresh keys.
#[async_trait]
pub trait SourceDriver: Send + Sync {
    /// Run a refresh key probe and return its single value as text.
    async fn query_refresh_key(&self, sql: &str) -> DriverResult<String>;
}

/// The storage layer owning materialized tables.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Write a new table. The table must not be visible to readers yet.
    async fn materialize(&self, request: &BuildRequest<'_>) -> DriverResult<()>;

    /// Make `location` the visible table for `key`, replacing `previous`.
    ///
    /// Must be atomic from a reader's point of view.
    async fn publish(
        &self,
        key: &InstanceKey,
        location: &Location,
        previous: Option<&Location>,
    ) -> DriverResult<()>;

    /// Drop a table that is no longer visible.
    async fn drop_table(&self, location: &Location) -> DriverResult<()>;
}
