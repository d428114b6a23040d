//! Pre-aggregation planning: match, select, rewrite.
//!
//! ```text
//! QueryRequirements ──► candidates_for ──► match_candidates ──► select ──► rewrite
//!                        (declaration      (drops what can't     (tier,     (reads from
//!                         order)            answer the query)     order)     the tables)
//! ```
//!
//! All three steps are pure. A `None` from [`select`] means the query runs
//! against the raw source.

pub mod matcher;
pub mod rewrite;
pub mod selector;

pub use matcher::{candidates_for, match_candidates, match_pre_aggregation, MatchResult, MeasureStrategy};
pub use rewrite::{
    rewrite, snake_case, ColumnProjection, LeafColumn, MeasureProjection, RewrittenQuery,
    TimeProjection,
};
pub use selector::{select, SelectOverride};
