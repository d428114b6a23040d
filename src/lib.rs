//! # Mantis pre-aggregations
//!
//! Answers semantic-layer queries from materialized rollups when that gives
//! the same result as the raw source, and keeps those rollups fresh.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │             CatalogSpec (cubes, measures,                │
//! │        dimensions, joins, pre-aggregations)              │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [semantic::Catalog::resolve]
//! ┌─────────────────────────────────────────────────────────┐
//! │      Catalog (interned ids, leaf sets, cycle-free)       │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!          Query ──────────▼ [semantic::classify]
//! ┌─────────────────────────────────────────────────────────┐
//! │   QueryRequirements (leaves, additivity, time grain)     │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [planner: match, select]
//! ┌─────────────────────────────────────────────────────────┐
//! │          MatchResult (or raw source fallback)            │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [refresh: evaluate, single-flight build]
//! ┌─────────────────────────────────────────────────────────┐
//! │       MaterializedInstance (atomically swapped)          │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [planner::rewrite]
//! ┌─────────────────────────────────────────────────────────┐
//! │                    RewrittenQuery                        │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything above the refresh step is pure and synchronous. The refresh
//! step is async and reaches the databases only through the
//! [`refresh::SourceDriver`] and [`refresh::StorageDriver`] traits.

pub mod cache;
pub mod config;
pub mod engine;
pub mod model;
pub mod planner;
pub mod refresh;
pub mod semantic;

pub use engine::{EngineError, FallbackReason, Notice, PreAggregationEngine, QueryPlan, Selection};

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::config::Settings;
    pub use crate::engine::{FallbackReason, Notice, PreAggregationEngine, QueryPlan};
    pub use crate::model::{
        CatalogSpec, Cube, Dimension, DimensionType, Granularity, Join, LocationKind, Measure,
        MeasureKind, PreAggregationDef, PreAggregationType, RefreshKeyDef, Relationship,
    };
    pub use crate::planner::{MatchResult, MeasureStrategy, RewrittenQuery};
    pub use crate::refresh::{
        BuildCoordinator, BuildError, BuildRequest, BuildTarget, DriverError, DriverResult,
        InstanceKey, Location, MaterializedInstance, SourceDriver, StorageDriver,
    };
    pub use crate::semantic::{Catalog, DateRange, Query, QueryOptions, SchemaError};
}
