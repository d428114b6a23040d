// src/model/measure.rs
use crate::model::types::MeasureKind;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Token standing for the owning cube's table in member SQL.
pub const CUBE_TOKEN: &str = "CUBE";

/// Matches `{member}` and `{Cube.member}` references inside measure SQL.
static MEMBER_REF_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_]\w*(?:\.[A-Za-z_]\w*)?)\}").unwrap());

/// A measure definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measure {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MeasureKind,
    /// SQL expression; `{member}` tokens reference measures, dimensions
    /// or `{CUBE}`.
    #[serde(default)]
    pub sql: Option<String>,
    /// Explicit references to other measures.
    #[serde(default)]
    pub references: Vec<String>,
}

impl Measure {
    pub fn new(name: impl Into<String>, kind: MeasureKind) -> Self {
        Self {
            name: name.into(),
            kind,
            sql: None,
            references: Vec::new(),
        }
    }

    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    /// Member tokens in this measure's SQL, first occurrence order.
    ///
    /// Tokens may name measures or dimensions; only the catalog can tell
    /// which.
    pub fn sql_tokens(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        if let Some(sql) = &self.sql {
            for name in member_tokens(sql) {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        names
    }
}

/// `{member}` tokens in `sql`, in order, duplicates included.
pub fn member_tokens(sql: &str) -> impl Iterator<Item = &str> {
    MEMBER_REF_PATTERN
        .captures_iter(sql)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str()))
}

/// Replace each `{member}` token for which `f` returns a value.
pub fn replace_member_tokens(sql: &str, mut f: impl FnMut(&str) -> Option<String>) -> String {
    MEMBER_REF_PATTERN
        .replace_all(sql, |caps: &regex::Captures<'_>| {
            f(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
