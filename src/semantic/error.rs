//! Schema error type for the semantic layer.
//!
//! Raised while resolving a catalog (fatal at schema load) and while
//! resolving a query's member names against a catalog.

use std::fmt;

/// Result type for semantic operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors in schema definitions or member references.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// Referenced a cube that doesn't exist.
    UnknownCube(String),

    /// Referenced a measure that doesn't exist.
    UnknownMeasure(String),

    /// Referenced a dimension that doesn't exist.
    UnknownDimension(String),

    /// A cube, member or pre-aggregation name is declared twice.
    Duplicate { kind: &'static str, name: String },

    /// Measure references form one or more cycles.
    CyclicMeasureReference {
        /// Each cycle as a list of qualified measure names.
        cycles: Vec<Vec<String>>,
    },

    /// A pre-aggregation definition is inconsistent.
    InvalidPreAggregation {
        pre_aggregation: String,
        message: String,
    },

    /// A refresh key definition cannot be interpreted.
    InvalidRefreshKey {
        pre_aggregation: String,
        message: String,
    },

    /// A date range is malformed or inverted.
    InvalidDateRange(String),

    /// A member reference is not of the form `Cube.member`.
    InvalidReference(String),
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::UnknownCube(name) => write!(f, "Unknown cube: '{}'", name),
            SchemaError::UnknownMeasure(name) => write!(f, "Unknown measure: '{}'", name),
            SchemaError::UnknownDimension(name) => write!(f, "Unknown dimension: '{}'", name),
            SchemaError::Duplicate { kind, name } => {
                write!(f, "Duplicate {} '{}'", kind, name)
            }
            SchemaError::CyclicMeasureReference { cycles } => {
                writeln!(f, "Circular measure references detected:")?;
                for (i, cycle) in cycles.iter().enumerate() {
                    writeln!(f, "  Cycle {}: {} → (back to start)", i + 1, cycle.join(" → "))?;
                }
                Ok(())
            }
            SchemaError::InvalidPreAggregation {
                pre_aggregation,
                message,
            } => {
                write!(f, "Invalid pre-aggregation '{}': {}", pre_aggregation, message)
            }
            SchemaError::InvalidRefreshKey {
                pre_aggregation,
                message,
            } => {
                write!(
                    f,
                    "Invalid refresh key on '{}': {}",
                    pre_aggregation, message
                )
            }
            SchemaError::InvalidDateRange(msg) => write!(f, "Invalid date range: {}", msg),
            SchemaError::InvalidReference(msg) => write!(f, "Invalid reference: {}", msg),
        }
    }
}

impl std::error::Error for SchemaError {}
