//! Candidate matching.
//!
//! Decides, per pre-aggregation, whether its stored rows can answer a
//! classified query. Additive queries may read a rollup stored at a finer
//! grain and aggregate it again; non-additive queries need a rollup whose
//! rows are exactly the query's rows.

use std::collections::HashSet;

use crate::model::{Granularity, PreAggregationType};
use crate::semantic::{
    common_granularity, Catalog, CubeId, DateRange, DimensionId, PreAggregationId,
    PreAggregationIndex, QueryRequirements, ResolvedPreAggregation,
};

/// How the query's measures are read from the rollup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureStrategy {
    /// Stored measures are read as-is.
    Exact,
    /// Measures are recomputed from stored additive leaves.
    LeafReaggregation,
    /// The pre-aggregation holds source rows; any measure can be computed.
    SourceRows,
}

/// A pre-aggregation able to answer the query.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub pre_aggregation: PreAggregationIndex,
    pub id: PreAggregationId,
    pub kind: PreAggregationType,
    pub cube: CubeId,
    /// Position among the owning cube's pre-aggregations.
    pub declaration_index: usize,
    pub measure_strategy: MeasureStrategy,
    /// Granularity the rollup is read at, for time-dimension queries.
    pub effective_granularity: Option<Granularity>,
    /// Whether stored rows must be grouped again.
    pub needs_reaggregation: bool,
    /// Range of the stored data to read, clipped to the build range.
    pub read_range: Option<DateRange>,
}

impl MatchResult {
    /// Stable ranking key: type tier, then cube order, then declaration order.
    pub fn rank_key(&self) -> (u8, CubeId, usize) {
        (self.kind.tier(), self.cube, self.declaration_index)
    }
}

/// Pre-aggregations of the query's cubes, in declaration order.
pub fn candidates_for(catalog: &Catalog, requirements: &QueryRequirements) -> Vec<PreAggregationIndex> {
    catalog
        .pre_aggregations()
        .iter()
        .filter(|p| requirements.cubes.contains(&p.cube))
        .map(|p| p.index)
        .collect()
}

/// Filter `candidates` down to those that can answer the query.
///
/// Input order is preserved. Absence of a match is not an error.
pub fn match_candidates(
    catalog: &Catalog,
    requirements: &QueryRequirements,
    candidates: &[PreAggregationIndex],
) -> Vec<MatchResult> {
    candidates
        .iter()
        .filter_map(|index| match_pre_aggregation(catalog, requirements, catalog.pre_aggregation(*index)))
        .collect()
}

/// Match a single pre-aggregation.
pub fn match_pre_aggregation(
    catalog: &Catalog,
    requirements: &QueryRequirements,
    pre_aggregation: &ResolvedPreAggregation,
) -> Option<MatchResult> {
    let matched = match pre_aggregation.kind {
        PreAggregationType::OriginalSql => match_original_sql(requirements, pre_aggregation),
        PreAggregationType::Rollup if requirements.uses_additive_path() => {
            match_additive(catalog, requirements, pre_aggregation)
        }
        PreAggregationType::Rollup => match_non_additive(requirements, pre_aggregation),
    };
    matched.map(|m| MatchResult {
        pre_aggregation: pre_aggregation.index,
        id: pre_aggregation.id.clone(),
        kind: pre_aggregation.kind,
        cube: pre_aggregation.cube,
        declaration_index: pre_aggregation.declaration_index,
        measure_strategy: m.measure_strategy,
        effective_granularity: m.effective_granularity,
        needs_reaggregation: m.needs_reaggregation,
        read_range: m.read_range,
    })
}

struct Matched {
    measure_strategy: MeasureStrategy,
    effective_granularity: Option<Granularity>,
    needs_reaggregation: bool,
    read_range: Option<DateRange>,
}

fn match_original_sql(
    requirements: &QueryRequirements,
    pre_aggregation: &ResolvedPreAggregation,
) -> Option<Matched> {
    if requirements.cubes != [pre_aggregation.cube] {
        return None;
    }
    Some(Matched {
        measure_strategy: MeasureStrategy::SourceRows,
        effective_granularity: requirements.required_granularity(),
        needs_reaggregation: true,
        read_range: requirements.time_dimension.and_then(|t| t.date_range),
    })
}

fn match_additive(
    catalog: &Catalog,
    requirements: &QueryRequirements,
    pre_aggregation: &ResolvedPreAggregation,
) -> Option<Matched> {
    let stored_dimensions: HashSet<DimensionId> = pre_aggregation.dimensions.iter().copied().collect();
    if !requirements
        .dimensions
        .iter()
        .all(|d| stored_dimensions.contains(d))
        || !filters_stored(requirements, pre_aggregation)
    {
        return None;
    }

    let (effective_granularity, same_time_grain) = match requirements.time_dimension {
        Some(required) => {
            if pre_aggregation.time_dimension != Some(required.dimension) {
                return None;
            }
            let stored = pre_aggregation.granularity?;
            let effective =
                common_granularity(required.granularity, required.date_range.as_ref(), stored)?;
            let same = required.granularity == Some(stored) && effective == stored;
            (Some(effective), same)
        }
        // Time buckets collapse into one group
        None => (None, pre_aggregation.time_dimension.is_none()),
    };

    let read_range = read_range(requirements, pre_aggregation)?;

    let same_dimensions = requirements.dimensions.len() == stored_dimensions.len();
    let needs_reaggregation = !(same_dimensions && same_time_grain);

    let stored_measures: HashSet<_> = pre_aggregation.measures.iter().copied().collect();
    let measure_strategy = if !needs_reaggregation
        && requirements.measures.iter().all(|m| stored_measures.contains(m))
    {
        MeasureStrategy::Exact
    } else if requirements
        .leaf_measures
        .iter()
        .all(|m| stored_measures.contains(m) && catalog.is_additive(*m))
    {
        MeasureStrategy::LeafReaggregation
    } else {
        return None;
    };

    Some(Matched {
        measure_strategy,
        effective_granularity,
        needs_reaggregation,
        read_range,
    })
}

/// Filters can use any stored dimension, the time dimension included.
fn filters_stored(requirements: &QueryRequirements, pre_aggregation: &ResolvedPreAggregation) -> bool {
    requirements.filter_dimensions.iter().all(|d| {
        pre_aggregation.dimensions.contains(d) || pre_aggregation.time_dimension == Some(*d)
    })
}

/// Non-additive measures are only correct at exactly the stored grain.
fn match_non_additive(
    requirements: &QueryRequirements,
    pre_aggregation: &ResolvedPreAggregation,
) -> Option<Matched> {
    let mut stored_dimensions = pre_aggregation.dimensions.clone();
    stored_dimensions.sort();
    stored_dimensions.dedup();
    if stored_dimensions != requirements.dimensions || !filters_stored(requirements, pre_aggregation)
    {
        return None;
    }

    let effective_granularity = match requirements.time_dimension {
        Some(required) => {
            if pre_aggregation.time_dimension != Some(required.dimension) {
                return None;
            }
            let stored = pre_aggregation.granularity?;
            if required.granularity != Some(stored) {
                return None;
            }
            if let Some(range) = &required.date_range {
                if !range.is_aligned(stored) {
                    return None;
                }
            }
            Some(stored)
        }
        None => {
            if pre_aggregation.time_dimension.is_some() {
                return None;
            }
            None
        }
    };

    if !requirements
        .measures
        .iter()
        .all(|m| pre_aggregation.measures.contains(m))
    {
        return None;
    }

    Some(Matched {
        measure_strategy: MeasureStrategy::Exact,
        effective_granularity,
        needs_reaggregation: false,
        read_range: read_range(requirements, pre_aggregation)?,
    })
}

/// The stored range to read; `None` in the outer option rejects the rollup.
///
/// Partitioned rollups only hold their build range, so a query reaching
/// outside of it cannot be answered from them.
fn read_range(
    requirements: &QueryRequirements,
    pre_aggregation: &ResolvedPreAggregation,
) -> Option<Option<DateRange>> {
    let query_range = requirements.time_dimension.and_then(|t| t.date_range);
    if !pre_aggregation.is_partitioned() {
        return Some(query_range);
    }
    let build_range = pre_aggregation.build_range?;
    match query_range {
        Some(range) if build_range.start <= range.start && range.end <= build_range.end => {
            Some(Some(range))
        }
        Some(_) => None,
        None => Some(Some(build_range)),
    }
}
