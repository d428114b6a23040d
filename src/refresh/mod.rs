//! Freshness and materialization of pre-aggregations.
//!
//! Unlike [`crate::semantic`] and [`crate::planner`], everything here talks
//! to databases and is async:
//!
//! - [`refresh_key`] / [`evaluator`]: is an instance stale?
//! - [`coordinator`]: single-flight builds with atomic visibility swaps
//! - [`store`]: the visible instances, optionally persisted
//! - [`scheduler`]: background refresh independent of query traffic

pub mod coordinator;
pub mod driver;
pub mod error;
pub mod evaluator;
pub mod instance;
pub mod refresh_key;
pub mod scheduler;
pub mod store;
pub mod target;

pub use coordinator::BuildCoordinator;
pub use driver::{BuildRequest, SourceDriver, StorageDriver};
pub use error::{BuildError, BuildResult, DriverError, DriverResult, EnsureError, StalenessCheckError};
pub use evaluator::{Freshness, RefreshKeyEvaluator};
pub use instance::{InstanceKey, InstanceRecord, InstanceStatus, Location, MaterializedInstance};
pub use refresh_key::{
    Clock, EveryRefreshKey, ImmutableRefreshKey, RefreshKeyFactory, RefreshKeyStrategy,
    RefreshKeyValue, SqlRefreshKey, SystemClock,
};
pub use scheduler::{RefreshScheduler, RetryPolicy, SchedulerError, SchedulerHandle};
pub use store::InstanceStore;
pub use target::BuildTarget;
