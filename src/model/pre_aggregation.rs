// src/model/pre_aggregation.rs
use crate::model::types::{Granularity, LocationKind, PreAggregationType};
use serde::{Deserialize, Serialize};

/// A pre-aggregation definition as declared on a cube.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreAggregationDef {
    pub name: String,
    #[serde(rename = "type", default = "default_type")]
    pub kind: PreAggregationType,
    #[serde(default)]
    pub measures: Vec<String>,
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub time_dimension: Option<String>,
    #[serde(default)]
    pub granularity: Option<Granularity>,
    /// Split the materialization into one table per period.
    #[serde(default)]
    pub partition_granularity: Option<Granularity>,
    /// Inclusive `[start, end]` range to build when partitioned.
    #[serde(default)]
    pub build_range: Option<[String; 2]>,
    #[serde(default)]
    pub refresh_key: Option<RefreshKeyDef>,
    #[serde(default)]
    pub location: Option<LocationKind>,
    /// Whether the background scheduler keeps this pre-aggregation warm.
    #[serde(default = "default_scheduled_refresh")]
    pub scheduled_refresh: bool,
}

fn default_type() -> PreAggregationType {
    PreAggregationType::Rollup
}

fn default_scheduled_refresh() -> bool {
    true
}

impl PreAggregationDef {
    /// A rollup with no references yet.
    pub fn rollup(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PreAggregationType::Rollup,
            measures: Vec::new(),
            dimensions: Vec::new(),
            time_dimension: None,
            granularity: None,
            partition_granularity: None,
            build_range: None,
            refresh_key: None,
            location: None,
            scheduled_refresh: true,
        }
    }

    /// An originalSql pre-aggregation of the owning cube.
    pub fn original_sql(name: impl Into<String>) -> Self {
        Self {
            kind: PreAggregationType::OriginalSql,
            ..Self::rollup(name)
        }
    }

    pub fn measures<I, S>(mut self, measures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.measures = measures.into_iter().map(Into::into).collect();
        self
    }

    pub fn dimensions<I, S>(mut self, dimensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dimensions = dimensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn time_dimension(mut self, dimension: impl Into<String>, granularity: Granularity) -> Self {
        self.time_dimension = Some(dimension.into());
        self.granularity = Some(granularity);
        self
    }

    pub fn partitioned(mut self, granularity: Granularity, start: &str, end: &str) -> Self {
        self.partition_granularity = Some(granularity);
        self.build_range = Some([start.to_string(), end.to_string()]);
        self
    }

    pub fn refresh_key(mut self, refresh_key: RefreshKeyDef) -> Self {
        self.refresh_key = Some(refresh_key);
        self
    }
}

/// How freshness of a pre-aggregation is decided.
///
/// `sql` is probed against the source database; `every` alone buckets wall
/// clock time; both together re-probe `sql` at most once per `every`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshKeyDef {
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub every: Option<String>,
    /// Never refresh once built.
    #[serde(default)]
    pub immutable: bool,
}

impl RefreshKeyDef {
    pub fn sql(sql: impl Into<String>) -> Self {
        Self {
            sql: Some(sql.into()),
            ..Self::default()
        }
    }

    pub fn every(every: impl Into<String>) -> Self {
        Self {
            every: Some(every.into()),
            ..Self::default()
        }
    }

    pub fn immutable() -> Self {
        Self {
            immutable: true,
            ..Self::default()
        }
    }
}
