//! Query shape and classification.
//!
//! [`classify`] resolves a query's member names against a catalog and
//! extracts what a pre-aggregation must provide to answer it.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::catalog::{Catalog, CubeId, DimensionId, MeasureId};
use super::error::{SchemaError, SchemaResult};
use super::time::DateRange;
use crate::model::{Granularity, Relationship};

/// An analytical query, as received from the API layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    #[serde(default)]
    pub measures: Vec<String>,
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub time_dimension: Option<TimeDimensionQuery>,
    /// Members the query filters on.
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub options: QueryOptions,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn measure(mut self, path: impl Into<String>) -> Self {
        self.measures.push(path.into());
        self
    }

    pub fn dimension(mut self, path: impl Into<String>) -> Self {
        self.dimensions.push(path.into());
        self
    }

    pub fn filter(mut self, path: impl Into<String>) -> Self {
        self.filters.push(path.into());
        self
    }

    pub fn time_dimension(
        mut self,
        path: impl Into<String>,
        granularity: Option<Granularity>,
        date_range: Option<DateRange>,
    ) -> Self {
        self.time_dimension = Some(TimeDimensionQuery {
            dimension: path.into(),
            granularity,
            date_range,
        });
        self
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeDimensionQuery {
    pub dimension: String,
    #[serde(default)]
    pub granularity: Option<Granularity>,
    #[serde(default)]
    pub date_range: Option<DateRange>,
}

/// Per-query overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    /// Only originalSql pre-aggregations may serve this query.
    #[serde(default)]
    pub use_original_sql_pre_aggregations: bool,
    /// Re-check the refresh key now instead of using a cached one.
    #[serde(default)]
    pub renew_query: bool,
    /// Skip pre-aggregations entirely.
    #[serde(default)]
    pub disable_pre_aggregations: bool,
}

/// Time dimension a query groups or filters by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRequirement {
    pub dimension: DimensionId,
    pub granularity: Option<Granularity>,
    pub date_range: Option<DateRange>,
}

/// What a pre-aggregation must provide to answer a query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequirements {
    /// Requested measures and measure filters, in request order.
    pub measures: Vec<MeasureId>,
    /// Transitive leaves of `measures`, deduplicated.
    pub leaf_measures: Vec<MeasureId>,
    pub is_leaf_additive: bool,
    /// Measures whose rows fan out through the query's joins.
    pub multiplied_measures: Vec<MeasureId>,
    /// Grouping dimensions, sorted.
    pub dimensions: Vec<DimensionId>,
    /// Dimensions filtered on, sorted.
    pub filter_dimensions: Vec<DimensionId>,
    pub time_dimension: Option<TimeRequirement>,
    /// Cubes the query touches, in declaration order.
    pub cubes: Vec<CubeId>,
}

impl QueryRequirements {
    /// Leaf re-aggregation is allowed only for additive, non-fanned-out queries.
    pub fn uses_additive_path(&self) -> bool {
        self.is_leaf_additive && self.multiplied_measures.is_empty()
    }

    pub fn required_granularity(&self) -> Option<Granularity> {
        self.time_dimension.and_then(|t| t.granularity)
    }
}

/// Resolve a query and extract its requirements.
pub fn classify(catalog: &Catalog, query: &Query) -> SchemaResult<QueryRequirements> {
    let mut cubes = HashSet::new();

    let mut measures = Vec::new();
    let mut filter_dimensions = Vec::new();
    for path in &query.measures {
        push_unique(&mut measures, catalog.find_measure(checked_path(path)?)?);
    }
    for path in &query.filters {
        let path = checked_path(path)?;
        match catalog.find_measure(path) {
            Ok(id) => push_unique(&mut measures, id),
            Err(_) => push_unique(&mut filter_dimensions, catalog.find_dimension(path)?),
        }
    }

    let mut dimensions = Vec::new();
    for path in &query.dimensions {
        push_unique(&mut dimensions, catalog.find_dimension(checked_path(path)?)?);
    }

    let mut time_dimension = None;
    if let Some(td) = &query.time_dimension {
        let dimension = catalog.find_dimension(checked_path(&td.dimension)?)?;
        cubes.insert(catalog.dimension(dimension).cube);
        if td.granularity.is_some() || td.date_range.is_some() {
            time_dimension = Some(TimeRequirement {
                dimension,
                granularity: td.granularity,
                date_range: td.date_range,
            });
        }
    }

    let mut leaf_measures = Vec::new();
    for id in &measures {
        cubes.insert(catalog.measure(*id).cube);
        for leaf in catalog.leaf_measures(*id) {
            push_unique(&mut leaf_measures, *leaf);
        }
    }
    for id in dimensions.iter().chain(&filter_dimensions) {
        cubes.insert(catalog.dimension(*id).cube);
    }

    let is_leaf_additive = leaf_measures.iter().all(|leaf| catalog.is_additive(*leaf));

    let mut cubes: Vec<CubeId> = cubes.into_iter().collect();
    cubes.sort();
    let multiplied = multiplied_cubes(catalog, &cubes);
    let multiplied_measures = measures
        .iter()
        .copied()
        .filter(|m| multiplied.contains(&catalog.measure(*m).cube))
        .collect();

    dimensions.sort();
    filter_dimensions.sort();

    Ok(QueryRequirements {
        measures,
        leaf_measures,
        is_leaf_additive,
        multiplied_measures,
        dimensions,
        filter_dimensions,
        time_dimension,
        cubes,
    })
}

/// Cubes whose rows are repeated by joins among `cubes`.
///
/// A `hasMany` join repeats the declaring cube, a `belongsTo` join repeats
/// the target cube.
fn multiplied_cubes(catalog: &Catalog, cubes: &[CubeId]) -> HashSet<CubeId> {
    let mut multiplied = HashSet::new();
    for (i, a) in cubes.iter().enumerate() {
        for b in &cubes[i + 1..] {
            for join in catalog.joins_between(*a, *b) {
                match join.relationship {
                    Relationship::HasMany => {
                        multiplied.insert(join.from);
                    }
                    Relationship::BelongsTo => {
                        multiplied.insert(join.to);
                    }
                    Relationship::HasOne => {}
                }
            }
        }
    }
    multiplied
}

fn checked_path(path: &str) -> SchemaResult<&str> {
    match path.split_once('.') {
        Some((cube, member)) if !cube.is_empty() && !member.is_empty() => Ok(path),
        _ => Err(SchemaError::InvalidReference(format!(
            "expected 'Cube.member', got '{}'",
            path
        ))),
    }
}

fn push_unique<T: PartialEq>(items: &mut Vec<T>, item: T) {
    if !items.contains(&item) {
        items.push(item);
    }
}
