//! Primitive schema types shared by cubes and pre-aggregations.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Time granularity, finest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl Granularity {
    /// All granularities, finest first.
    pub const ALL: [Granularity; 8] = [
        Granularity::Second,
        Granularity::Minute,
        Granularity::Hour,
        Granularity::Day,
        Granularity::Week,
        Granularity::Month,
        Granularity::Quarter,
        Granularity::Year,
    ];

    /// Parse a granularity from a string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "second" => Some(Granularity::Second),
            "minute" => Some(Granularity::Minute),
            "hour" => Some(Granularity::Hour),
            "day" => Some(Granularity::Day),
            "week" => Some(Granularity::Week),
            "month" => Some(Granularity::Month),
            "quarter" => Some(Granularity::Quarter),
            "year" => Some(Granularity::Year),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Second => "second",
            Granularity::Minute => "minute",
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
            Granularity::Quarter => "quarter",
            Granularity::Year => "year",
        }
    }

    /// Returns all granularities this one can be rolled up into, itself included.
    ///
    /// Weeks do not nest into months, so `week` only rolls into itself and
    /// anything finer than a day can reach both branches.
    pub fn and_coarser(&self) -> Vec<Granularity> {
        match self {
            Granularity::Week => vec![Granularity::Week],
            Granularity::Month => vec![Granularity::Month, Granularity::Quarter, Granularity::Year],
            Granularity::Quarter => vec![Granularity::Quarter, Granularity::Year],
            Granularity::Year => vec![Granularity::Year],
            finer => Granularity::ALL
                .iter()
                .copied()
                .filter(|g| g >= finer)
                .collect(),
        }
    }

    /// Whether rows stored at this granularity can be re-aggregated to `target`.
    pub fn rolls_up_to(&self, target: Granularity) -> bool {
        self.and_coarser().contains(&target)
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregation kind of a measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MeasureKind {
    Count,
    Sum,
    Min,
    Max,
    Avg,
    CountDistinct,
    CountDistinctApprox,
    /// Custom formula, usually over other measures.
    Number,
    RunningTotal,
}

impl MeasureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasureKind::Count => "count",
            MeasureKind::Sum => "sum",
            MeasureKind::Min => "min",
            MeasureKind::Max => "max",
            MeasureKind::Avg => "avg",
            MeasureKind::CountDistinct => "countDistinct",
            MeasureKind::CountDistinctApprox => "countDistinctApprox",
            MeasureKind::Number => "number",
            MeasureKind::RunningTotal => "runningTotal",
        }
    }
}

impl fmt::Display for MeasureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dimension value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionType {
    String,
    Number,
    Time,
    Boolean,
    Geo,
}

/// Join relationship, seen from the cube declaring the join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Relationship {
    BelongsTo,
    HasMany,
    HasOne,
}

/// Pre-aggregation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PreAggregationType {
    Rollup,
    OriginalSql,
}

impl PreAggregationType {
    /// Selection tier: rollups always rank before originalSql.
    pub fn tier(&self) -> u8 {
        match self {
            PreAggregationType::Rollup => 0,
            PreAggregationType::OriginalSql => 1,
        }
    }
}

impl fmt::Display for PreAggregationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreAggregationType::Rollup => f.write_str("rollup"),
            PreAggregationType::OriginalSql => f.write_str("originalSql"),
        }
    }
}

/// Where a materialized pre-aggregation lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationKind {
    /// The source database itself.
    Source,
    /// A separate external database.
    External,
    /// The dedicated columnar store.
    Dedicated,
}

impl LocationKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "source" => Some(LocationKind::Source),
            "external" => Some(LocationKind::External),
            "dedicated" => Some(LocationKind::Dedicated),
            _ => None,
        }
    }
}

impl fmt::Display for LocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationKind::Source => f.write_str("source"),
            LocationKind::External => f.write_str("external"),
            LocationKind::Dedicated => f.write_str("dedicated"),
        }
    }
}
