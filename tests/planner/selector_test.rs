//! Selection over real matches from the fixture catalog.

#[path = "../common/mod.rs"]
mod common;

use preagg::model::{Granularity, PreAggregationType};
use preagg::planner::{candidates_for, match_candidates, select, MatchResult, SelectOverride};
use preagg::semantic::{classify, Catalog, Query};

fn matches(catalog: &Catalog, query: &Query) -> Vec<MatchResult> {
    let req = classify(catalog, query).unwrap();
    match_candidates(catalog, &req, &candidates_for(catalog, &req))
}

#[test]
fn test_selection_is_independent_of_match_order() {
    let catalog = common::catalog();
    let query = Query::new()
        .measure("Orders.count")
        .time_dimension("Orders.completedAt", Some(Granularity::Month), None);
    let found = matches(&catalog, &query);

    let forward = select(&found, SelectOverride::default()).unwrap().id.clone();
    let mut reversed = found.clone();
    reversed.reverse();
    let backward = select(&reversed, SelectOverride::default()).unwrap().id.clone();

    assert_eq!(forward, backward);
    assert_eq!(forward.to_string(), "Orders.byMonth");
}

#[test]
fn test_original_sql_only_when_no_rollup_matches() {
    let catalog = common::catalog();
    let query = Query::new()
        .measure("Orders.uniqueUsers")
        .measure("Orders.maxAmount");
    let found = matches(&catalog, &query);
    let selected = select(&found, SelectOverride::default()).unwrap();
    assert_eq!(selected.kind, PreAggregationType::OriginalSql);
    assert_eq!(selected.id.name, "main");
}

#[test]
fn test_forced_original_sql_skips_rollups() {
    let catalog = common::catalog();
    let query = Query::new()
        .measure("Orders.count")
        .time_dimension("Orders.completedAt", Some(Granularity::Month), None);
    let found = matches(&catalog, &query);

    let forced = SelectOverride {
        force_original_sql: true,
    };
    assert_eq!(select(&found, forced).unwrap().id.name, "main");

    // LineItems declares no originalSql pre-aggregation
    let line_items = Query::new()
        .measure("LineItems.price")
        .time_dimension("LineItems.createdAt", Some(Granularity::Month), None);
    let found = matches(&catalog, &line_items);
    assert!(!found.is_empty());
    assert!(select(&found, forced).is_none());
}

#[test]
fn test_earlier_declared_rollup_wins_on_tie() {
    let catalog = common::catalog();
    // Both LineItems rollups store price at day grain
    let query = Query::new()
        .measure("LineItems.price")
        .time_dimension("LineItems.createdAt", Some(Granularity::Day), None);
    let found = matches(&catalog, &query);
    let names: Vec<&str> = found.iter().map(|m| m.id.name.as_str()).collect();
    assert_eq!(names, vec!["priceQuantity", "daily"]);
    assert_eq!(
        select(&found, SelectOverride::default()).unwrap().id.name,
        "priceQuantity"
    );
}
