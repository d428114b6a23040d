//! Refresh and build error types.

use std::time::Duration;

use thiserror::Error;

use super::instance::InstanceKey;

/// Result type for driver calls.
pub type DriverResult<T> = Result<T, DriverError>;

/// Result type for builds.
pub type BuildResult<T> = Result<T, BuildError>;

/// Errors reported by the source or storage drivers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// Could not reach the database.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The database rejected or failed the statement.
    #[error("query failed: {0}")]
    Query(String),

    /// The call did not complete in time.
    #[error("driver call timed out after {0:?}")]
    Timeout(Duration),
}

impl DriverError {
    /// Whether retrying the same call may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, DriverError::Connection(_) | DriverError::Timeout(_))
    }
}

/// A freshness probe failed. The instance is treated as stale.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("staleness check failed for {key}: {source}")]
pub struct StalenessCheckError {
    pub key: InstanceKey,
    #[source]
    pub source: DriverError,
}

/// Materialization failed. Any prior instance is left untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("build failed: {0}")]
    Driver(#[from] DriverError),

    /// The coordinator shut down before the build finished.
    #[error("build cancelled by shutdown")]
    Cancelled,

    #[error("build task panicked: {0}")]
    Panicked(String),

    /// The refresh key of the pre-aggregation could not be interpreted.
    #[error("invalid refresh key: {0}")]
    InvalidRefreshKey(String),
}

/// Outcome of a bounded wait on a build.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnsureError {
    #[error(transparent)]
    Build(#[from] BuildError),

    /// The caller stopped waiting; the build keeps running.
    #[error("gave up waiting for build after {0:?}")]
    TimedOut(Duration),
}
