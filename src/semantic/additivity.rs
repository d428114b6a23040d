//! Measure additivity.
//!
//! An additive measure can be computed from partial aggregates stored at a
//! finer grain by aggregating them again. Everything else has to be
//! recomputed from rows at the grain it is queried at.

use super::catalog::{Catalog, MeasureId};
use super::error::SchemaResult;
use crate::model::MeasureKind;

/// How a stored partial aggregate is combined into a coarser one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reaggregation {
    Sum,
    Min,
    Max,
    /// Merge of approximate distinct-count sketches.
    Merge,
}

impl Reaggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reaggregation::Sum => "sum",
            Reaggregation::Min => "min",
            Reaggregation::Max => "max",
            Reaggregation::Merge => "merge",
        }
    }
}

/// True iff partial results of `kind` can be combined across partitions.
///
/// Exact distinct counts are not additive: the same value may be counted in
/// two partitions.
pub fn is_additive(kind: MeasureKind) -> bool {
    matches!(
        kind,
        MeasureKind::Count
            | MeasureKind::Sum
            | MeasureKind::Min
            | MeasureKind::Max
            | MeasureKind::CountDistinctApprox
    )
}

/// The re-aggregation for an additive kind.
pub fn reaggregation(kind: MeasureKind) -> Option<Reaggregation> {
    match kind {
        MeasureKind::Count | MeasureKind::Sum => Some(Reaggregation::Sum),
        MeasureKind::Min => Some(Reaggregation::Min),
        MeasureKind::Max => Some(Reaggregation::Max),
        MeasureKind::CountDistinctApprox => Some(Reaggregation::Merge),
        _ => None,
    }
}

impl Catalog {
    pub fn is_additive(&self, id: MeasureId) -> bool {
        is_additive(self.measure(id).kind)
    }

    /// A leaf measure references no other measure.
    pub fn is_leaf(&self, id: MeasureId) -> bool {
        self.measure(id).references.is_empty()
    }

    pub fn leaf_measures(&self, id: MeasureId) -> &[MeasureId] {
        &self.measure(id).leaves
    }

    /// Additivity of a measure looked up by its qualified path.
    pub fn is_additive_path(&self, path: &str) -> SchemaResult<bool> {
        Ok(self.is_additive(self.find_measure(path)?))
    }

    /// Whether every leaf under `id` is additive.
    pub fn is_leaf_additive(&self, id: MeasureId) -> bool {
        self.leaf_measures(id).iter().all(|leaf| self.is_additive(*leaf))
    }
}
