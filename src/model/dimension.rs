// src/model/dimension.rs
use crate::model::types::{DimensionType, Relationship};
use serde::{Deserialize, Serialize};

/// A dimension definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dimension {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DimensionType,
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub primary_key: bool,
}

impl Dimension {
    pub fn new(name: impl Into<String>, kind: DimensionType) -> Self {
        Self {
            name: name.into(),
            kind,
            sql: None,
            primary_key: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }
}

/// A join from the declaring cube to `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub target: String,
    pub relationship: Relationship,
    /// Join condition over both cubes' fields.
    #[serde(default)]
    pub sql: String,
}

impl Join {
    pub fn new(target: impl Into<String>, relationship: Relationship) -> Self {
        Self {
            target: target.into(),
            relationship,
            sql: String::new(),
        }
    }

    pub fn on(mut self, sql: impl Into<String>) -> Self {
        self.sql = sql.into();
        self
    }
}
