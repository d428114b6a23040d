//! Pre-aggregation selection.
//!
//! Exactly one match wins, by the stable key `(type tier, cube declaration
//! index, pre-aggregation declaration index)`. Rollups always rank before
//! originalSql pre-aggregations regardless of where they were declared.

use super::matcher::MatchResult;
use crate::model::PreAggregationType;

/// Caller-supplied restriction on selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectOverride {
    /// Only originalSql pre-aggregations are eligible.
    pub force_original_sql: bool,
}

/// Pick the winning match, or `None` to run against the raw source.
pub fn select(matches: &[MatchResult], over: SelectOverride) -> Option<&MatchResult> {
    matches
        .iter()
        .filter(|m| !over.force_original_sql || m.kind == PreAggregationType::OriginalSql)
        .min_by_key(|m| m.rank_key())
}
