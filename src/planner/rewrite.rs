//! Query rewrite onto a selected pre-aggregation.
//!
//! Produces a dialect-neutral description of how to read the query's
//! members from the materialized tables. Turning it into SQL is the job of
//! the execution layer.

use std::fmt;

use super::matcher::{MatchResult, MeasureStrategy};
use crate::model::measure::replace_member_tokens;
use crate::model::{Granularity, LocationKind};
use crate::semantic::{
    reaggregation, token_path, Catalog, DateRange, DimensionId, MeasureId, PreAggregationId, QueryRequirements,
    Reaggregation,
};

/// A stored column and the member it provides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnProjection {
    pub member: String,
    pub column: String,
}

/// A stored leaf read with its re-aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafColumn {
    pub member: String,
    pub column: String,
    pub aggregation: Reaggregation,
}

/// How one requested measure is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeasureProjection {
    /// A stored measure column, re-aggregated when rows are grouped again.
    Stored {
        member: String,
        column: String,
        aggregation: Option<Reaggregation>,
    },
    /// A formula evaluated over re-aggregated leaf columns.
    ///
    /// `expression` has every measure reference, nested formulas included,
    /// replaced by its leaf aggregation.
    Derived {
        member: String,
        expression: Option<String>,
        leaves: Vec<LeafColumn>,
    },
    /// Computed from source rows held by an originalSql pre-aggregation.
    Source { member: String },
}

/// The time dimension column and the grain it is read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeProjection {
    pub member: String,
    pub column: String,
    pub stored: Option<Granularity>,
    pub granularity: Option<Granularity>,
}

/// A query rewritten to read from materialized pre-aggregation tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenQuery {
    pub pre_aggregation: PreAggregationId,
    pub location: LocationKind,
    /// One table per partition, to be read as a union.
    pub tables: Vec<String>,
    pub measures: Vec<MeasureProjection>,
    pub dimensions: Vec<ColumnProjection>,
    pub time_dimension: Option<TimeProjection>,
    pub date_range: Option<DateRange>,
    /// Whether stored rows are grouped again.
    pub group_by: bool,
}

/// Build the rewritten query for a selected match.
pub fn rewrite(
    catalog: &Catalog,
    requirements: &QueryRequirements,
    selection: &MatchResult,
    location: LocationKind,
    tables: Vec<String>,
) -> RewrittenQuery {
    let source_rows = selection.measure_strategy == MeasureStrategy::SourceRows;

    let measures = requirements
        .measures
        .iter()
        .map(|id| project_measure(catalog, *id, selection))
        .collect();

    let dimensions = requirements
        .dimensions
        .iter()
        .map(|id| ColumnProjection {
            member: catalog.dimension(*id).path.clone(),
            column: dimension_column(catalog, *id, source_rows),
        })
        .collect();

    let time_dimension = requirements.time_dimension.map(|required| {
        let stored = if source_rows {
            None
        } else {
            catalog.pre_aggregation(selection.pre_aggregation).granularity
        };
        let base = dimension_column(catalog, required.dimension, source_rows);
        TimeProjection {
            member: catalog.dimension(required.dimension).path.clone(),
            column: match stored {
                Some(g) => format!("{}_{}", base, g),
                None => base,
            },
            stored,
            granularity: required.granularity,
        }
    });

    RewrittenQuery {
        pre_aggregation: selection.id.clone(),
        location,
        tables,
        measures,
        dimensions,
        time_dimension,
        date_range: selection.read_range,
        group_by: selection.needs_reaggregation,
    }
}

fn project_measure(catalog: &Catalog, id: MeasureId, selection: &MatchResult) -> MeasureProjection {
    let measure = catalog.measure(id);
    let member = measure.path.clone();
    match selection.measure_strategy {
        MeasureStrategy::SourceRows => MeasureProjection::Source { member },
        MeasureStrategy::Exact => MeasureProjection::Stored {
            member,
            column: member_column(catalog, id),
            aggregation: if selection.needs_reaggregation {
                reaggregation(measure.kind)
            } else {
                None
            },
        },
        MeasureStrategy::LeafReaggregation if catalog.is_leaf(id) => MeasureProjection::Stored {
            member,
            column: member_column(catalog, id),
            aggregation: reaggregation(measure.kind),
        },
        MeasureStrategy::LeafReaggregation => MeasureProjection::Derived {
            member,
            expression: expand_formula(catalog, id),
            leaves: catalog
                .leaf_measures(id)
                .iter()
                .filter_map(|leaf| {
                    let leaf_measure = catalog.measure(*leaf);
                    reaggregation(leaf_measure.kind).map(|aggregation| LeafColumn {
                        member: leaf_measure.path.clone(),
                        column: member_column(catalog, *leaf),
                        aggregation,
                    })
                })
                .collect(),
        },
    }
}

fn expand_formula(catalog: &Catalog, id: MeasureId) -> Option<String> {
    let measure = catalog.measure(id);
    let sql = measure.sql.as_deref()?;
    let cube = &catalog.cube(measure.cube).name;
    Some(replace_member_tokens(sql, |token| {
        let target = catalog.find_measure(&token_path(cube, token)?).ok()?;
        if !catalog.is_leaf(target) {
            return expand_formula(catalog, target).map(|inner| format!("({})", inner));
        }
        let column = member_column(catalog, target);
        Some(match reaggregation(catalog.measure(target).kind) {
            Some(agg) => format!("{}({})", agg.as_str(), column),
            None => column,
        })
    }))
}

/// Stored column name for a measure: `orders__total_amount`.
pub fn member_column(catalog: &Catalog, id: MeasureId) -> String {
    let measure = catalog.measure(id);
    column_name(&catalog.cube(measure.cube).name, &measure.name)
}

fn dimension_column(catalog: &Catalog, id: DimensionId, source_rows: bool) -> String {
    let dimension = catalog.dimension(id);
    if source_rows {
        snake_case(&dimension.name)
    } else {
        column_name(&catalog.cube(dimension.cube).name, &dimension.name)
    }
}

fn column_name(cube: &str, member: &str) -> String {
    format!("{}__{}", snake_case(cube), snake_case(member))
}

/// `completedAt` -> `completed_at`, `LineItems` -> `line_items`.
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(c.to_lowercase());
            prev_lower = false;
        } else {
            out.push(c);
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
        }
    }
    out
}

impl fmt::Display for MeasureProjection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasureProjection::Stored {
                member,
                column,
                aggregation: Some(agg),
            } => write!(f, "{}({}) AS {}", agg.as_str(), column, member),
            MeasureProjection::Stored { member, column, .. } => {
                write!(f, "{} AS {}", column, member)
            }
            MeasureProjection::Derived {
                member,
                expression: Some(expression),
                ..
            } => write!(f, "{} AS {}", expression, member),
            MeasureProjection::Derived { member, leaves, .. } => {
                let leaves: Vec<String> = leaves
                    .iter()
                    .map(|l| format!("{}({})", l.aggregation.as_str(), l.column))
                    .collect();
                write!(f, "{}[{}] AS {}", member, leaves.join(", "), member)
            }
            MeasureProjection::Source { member } => write!(f, "{} AS {}", member, member),
        }
    }
}

impl fmt::Display for RewrittenQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut select: Vec<String> = Vec::new();
        for d in &self.dimensions {
            select.push(format!("{} AS {}", d.column, d.member));
        }
        if let Some(t) = &self.time_dimension {
            match t.granularity {
                Some(g) if t.stored != Some(g) => {
                    select.push(format!("{}({}) AS {}.{}", g, t.column, t.member, g))
                }
                Some(g) => select.push(format!("{} AS {}.{}", t.column, t.member, g)),
                None => {}
            }
        }
        for m in &self.measures {
            select.push(m.to_string());
        }

        write!(
            f,
            "SELECT {} FROM {}:{}",
            select.join(", "),
            self.location,
            self.tables.join(" UNION ALL ")
        )?;
        if let (Some(range), Some(t)) = (&self.date_range, &self.time_dimension) {
            write!(f, " WHERE {} IN {}", t.column, range)?;
        }
        if self.group_by {
            f.write_str(" GROUP BY ALL")?;
        }
        Ok(())
    }
}
