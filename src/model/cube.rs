// src/model/cube.rs
use crate::model::dimension::{Dimension, Join};
use crate::model::measure::Measure;
use crate::model::pre_aggregation::{PreAggregationDef, RefreshKeyDef};
use serde::{Deserialize, Serialize};

/// A cube: a named table-like entity over a source SQL expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cube {
    pub name: String,
    pub sql: String,
    #[serde(default)]
    pub measures: Vec<Measure>,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
    #[serde(default)]
    pub joins: Vec<Join>,
    /// Declaration order is significant for selection.
    #[serde(default)]
    pub pre_aggregations: Vec<PreAggregationDef>,
    /// Default refresh key for this cube's pre-aggregations.
    #[serde(default)]
    pub refresh_key: Option<RefreshKeyDef>,
}

impl Cube {
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
            measures: Vec::new(),
            dimensions: Vec::new(),
            joins: Vec::new(),
            pre_aggregations: Vec::new(),
            refresh_key: None,
        }
    }

    pub fn measure(mut self, measure: Measure) -> Self {
        self.measures.push(measure);
        self
    }

    pub fn dimension(mut self, dimension: Dimension) -> Self {
        self.dimensions.push(dimension);
        self
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn pre_aggregation(mut self, pre_aggregation: PreAggregationDef) -> Self {
        self.pre_aggregations.push(pre_aggregation);
        self
    }
}
