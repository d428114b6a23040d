//! Schema definitions consumed from the modeling layer.
//!
//! These are plain, deserializable structures. They are validated and
//! interned into a [`crate::semantic::Catalog`] once per schema load.

pub mod cube;
pub mod dimension;
pub mod measure;
pub mod pre_aggregation;
pub mod types;

pub use cube::Cube;
pub use dimension::{Dimension, Join};
pub use measure::Measure;
pub use pre_aggregation::{PreAggregationDef, RefreshKeyDef};
pub use types::{
    DimensionType, Granularity, LocationKind, MeasureKind, PreAggregationType, Relationship,
};

use serde::{Deserialize, Serialize};

/// The full set of cubes, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogSpec {
    pub cubes: Vec<Cube>,
}

impl CatalogSpec {
    pub fn new(cubes: Vec<Cube>) -> Self {
        Self { cubes }
    }

    /// Parse a catalog from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
