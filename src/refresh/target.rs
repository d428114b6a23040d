//! What to build for an instance identity.
//!
//! A [`BuildTarget`] carries everything the coordinator and the storage
//! driver need, so builds never hold a reference to a catalog that may be
//! reloaded underneath them.

use serde::Serialize;

use super::instance::InstanceKey;
use crate::model::{Granularity, LocationKind, PreAggregationType, RefreshKeyDef};
use crate::semantic::{
    partition_key, period_start, Catalog, DateRange, PreAggregationId, ResolvedPreAggregation,
};

/// A pre-aggregation instance to materialize.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildTarget {
    pub key: InstanceKey,
    pub kind: PreAggregationType,
    /// Source SQL of the owning cube.
    pub source_sql: String,
    /// Qualified measure paths to store.
    pub measures: Vec<String>,
    /// Qualified dimension paths to store.
    pub dimensions: Vec<String>,
    pub time_dimension: Option<String>,
    pub granularity: Option<Granularity>,
    /// Rows to materialize; `None` builds everything.
    pub date_range: Option<DateRange>,
    pub refresh_key: Option<RefreshKeyDef>,
    pub location: LocationKind,
    pub structure_version: String,
}

impl BuildTarget {
    /// Target for `pre_aggregation`, or for the partition holding `partition`.
    pub fn new(
        catalog: &Catalog,
        pre_aggregation: &ResolvedPreAggregation,
        partition: Option<DateRange>,
        default_location: LocationKind,
    ) -> Self {
        let partition_name = match (pre_aggregation.partition_granularity, &partition) {
            (Some(g), Some(range)) => Some(partition_key(g, period_start(g, range.start))),
            _ => None,
        };
        let date_range = partition.or(pre_aggregation.build_range);

        Self {
            key: InstanceKey::for_pre_aggregation(&pre_aggregation.id, partition_name),
            kind: pre_aggregation.kind,
            source_sql: catalog.cube(pre_aggregation.cube).sql.clone(),
            measures: pre_aggregation
                .measures
                .iter()
                .map(|id| catalog.measure(*id).path.clone())
                .collect(),
            dimensions: pre_aggregation
                .dimensions
                .iter()
                .map(|id| catalog.dimension(*id).path.clone())
                .collect(),
            time_dimension: pre_aggregation
                .time_dimension
                .map(|id| catalog.dimension(id).path.clone()),
            granularity: pre_aggregation.granularity,
            date_range,
            refresh_key: pre_aggregation.refresh_key.clone(),
            location: pre_aggregation.location.unwrap_or(default_location),
            structure_version: pre_aggregation.structure_version.clone(),
        }
    }

    /// Targets holding the rows of `read_range`.
    ///
    /// Unpartitioned pre-aggregations have a single target. Partitioned
    /// rollups get one per partition period overlapping the range, clipped
    /// to the build range.
    pub fn for_read(
        catalog: &Catalog,
        pre_aggregation: &ResolvedPreAggregation,
        read_range: Option<&DateRange>,
        default_location: LocationKind,
    ) -> Vec<Self> {
        let (Some(granularity), Some(build_range)) =
            (pre_aggregation.partition_granularity, pre_aggregation.build_range)
        else {
            return vec![Self::new(catalog, pre_aggregation, None, default_location)];
        };
        let range = read_range
            .and_then(|r| r.intersect(&build_range))
            .unwrap_or(build_range);
        range
            .periods(granularity)
            .iter()
            .filter_map(|period| period.intersect(&build_range))
            .map(|partition| Self::new(catalog, pre_aggregation, Some(partition), default_location))
            .collect()
    }

    /// Every target kept fresh by background refresh.
    pub fn scheduled(catalog: &Catalog, default_location: LocationKind) -> Vec<Self> {
        catalog
            .pre_aggregations()
            .iter()
            .filter(|p| p.scheduled_refresh)
            .flat_map(|p| Self::for_read(catalog, p, None, default_location))
            .collect()
    }

    /// Resolve an instance key against `catalog`.
    pub fn resolve(
        catalog: &Catalog,
        key: &InstanceKey,
        default_location: LocationKind,
    ) -> Option<Self> {
        let id = PreAggregationId::new(&key.cube, &key.pre_aggregation);
        let pre_aggregation = catalog.find_pre_aggregation(&id)?;
        Self::for_read(catalog, pre_aggregation, None, default_location)
            .into_iter()
            .find(|target| &target.key == key)
    }
}
