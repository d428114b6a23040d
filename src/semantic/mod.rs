//! Semantic layer - resolved catalog, additivity, time alignment and query
//! classification.
//!
//! Everything here is pure and synchronous: a [`Catalog`] is immutable once
//! resolved, and classification never touches a database. This is the half
//! of the pipeline that can run on any worker without locking.

pub mod additivity;
pub mod catalog;
pub mod error;
pub mod query;
pub mod time;

pub use additivity::{is_additive, reaggregation, Reaggregation};
pub use catalog::{
    qualify, token_path, Catalog, CubeId, DimensionId, MeasureId, PreAggregationId, PreAggregationIndex,
    ResolvedCube, ResolvedDimension, ResolvedJoin, ResolvedMeasure, ResolvedPreAggregation,
};
pub use error::{SchemaError, SchemaResult};
pub use query::{classify, Query, QueryOptions, QueryRequirements, TimeDimensionQuery, TimeRequirement};
pub use time::{
    common_granularity, partition_key, period_end, period_start, CanonicalRange, DateRange,
};
