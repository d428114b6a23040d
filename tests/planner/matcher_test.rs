//! Candidate matching and query rewrite over the fixture catalog.

#[path = "../common/mod.rs"]
mod common;

use preagg::model::{
    CatalogSpec, Cube, Dimension, DimensionType, Granularity, LocationKind, Measure, MeasureKind,
    PreAggregationDef, PreAggregationType,
};
use preagg::planner::{
    candidates_for, match_candidates, rewrite, select, MatchResult, MeasureProjection,
    MeasureStrategy, SelectOverride,
};
use preagg::semantic::{classify, Catalog, DateRange, Query};

fn matches(catalog: &Catalog, query: &Query) -> Vec<MatchResult> {
    let req = classify(catalog, query).unwrap();
    let candidates = candidates_for(catalog, &req);
    match_candidates(catalog, &req, &candidates)
}

fn names(matches: &[MatchResult]) -> Vec<&str> {
    matches.iter().map(|m| m.id.name.as_str()).collect()
}

fn range(start: &str, end: &str) -> DateRange {
    DateRange::parse(start, end).unwrap()
}

#[test]
fn test_monthly_count_matches_monthly_rollup() {
    let catalog = common::catalog();
    let query = Query::new()
        .measure("Orders.count")
        .time_dimension("Orders.completedAt", Some(Granularity::Month), None);

    let found = matches(&catalog, &query);
    assert_eq!(names(&found), vec!["main", "byMonth", "byStatusDay"]);

    let selected = select(&found, SelectOverride::default()).unwrap();
    assert_eq!(selected.id.name, "byMonth");
    assert_eq!(selected.kind, PreAggregationType::Rollup);
    assert_eq!(selected.measure_strategy, MeasureStrategy::Exact);
    assert_eq!(selected.effective_granularity, Some(Granularity::Month));
    assert!(!selected.needs_reaggregation);
}

#[test]
fn test_finer_rollup_is_reaggregated() {
    let catalog = common::catalog();
    let query = Query::new()
        .measure("Orders.count")
        .time_dimension("Orders.completedAt", Some(Granularity::Month), None);

    let found = matches(&catalog, &query);
    let daily = found.iter().find(|m| m.id.name == "byStatusDay").unwrap();
    assert_eq!(daily.measure_strategy, MeasureStrategy::LeafReaggregation);
    assert!(daily.needs_reaggregation);
    assert_eq!(daily.effective_granularity, Some(Granularity::Month));
}

#[test]
fn test_unaligned_range_rejects_coarse_rollup() {
    let catalog = common::catalog();
    let query = Query::new().measure("Orders.count").time_dimension(
        "Orders.completedAt",
        Some(Granularity::Month),
        Some(range("2020-01-05T00:00:00.000", "2020-01-31T23:59:59.999")),
    );

    let found = matches(&catalog, &query);
    assert!(!names(&found).contains(&"byMonth"));

    let selected = select(&found, SelectOverride::default()).unwrap();
    assert_eq!(selected.id.name, "byStatusDay");
    assert_eq!(selected.effective_granularity, Some(Granularity::Day));
}

#[test]
fn test_aligned_range_keeps_coarse_rollup() {
    let catalog = common::catalog();
    let query = Query::new().measure("Orders.count").time_dimension(
        "Orders.completedAt",
        Some(Granularity::Month),
        Some(range("2020-01-01T00:00:00.000", "2020-01-31T23:59:59.999")),
    );
    let selected = select(&matches(&catalog, &query), SelectOverride::default())
        .cloned()
        .unwrap();
    assert_eq!(selected.id.name, "byMonth");
}

#[test]
fn test_formula_measure_uses_stored_leaves() {
    let catalog = common::catalog();
    let query = Query::new()
        .measure("Orders.averageOrder")
        .time_dimension("Orders.completedAt", Some(Granularity::Month), None);

    let found = matches(&catalog, &query);
    let selected = select(&found, SelectOverride::default()).unwrap();
    assert_eq!(selected.id.name, "byMonth");
    assert_eq!(selected.measure_strategy, MeasureStrategy::LeafReaggregation);
}

#[test]
fn test_profit_margin_without_stored_leaf_falls_back() {
    let catalog = common::catalog();
    let jan = range("2020-01-01", "2020-01-31");

    for granularity in [None, Some(Granularity::Day)] {
        let query = Query::new()
            .measure("LineItems.profitMargin")
            .time_dimension("LineItems.createdAt", granularity, Some(jan));
        let found = matches(&catalog, &query);
        assert!(found.is_empty(), "unexpected match {:?}", names(&found));
        assert!(select(&found, SelectOverride::default()).is_none());
    }
}

#[test]
fn test_non_additive_never_matches_measure_subset() {
    let catalog = common::catalog();
    let query = Query::new()
        .measure("Orders.avgAmount")
        .measure("Orders.uniqueUsers")
        .dimension("Orders.status");

    let found = matches(&catalog, &query);
    // Only the source-rows copy can compute both
    assert_eq!(names(&found), vec!["main"]);
    for m in &found {
        assert_ne!(m.kind, PreAggregationType::Rollup);
    }
}

#[test]
fn test_non_additive_exact_grain_match() {
    let catalog = common::catalog();
    let query = Query::new()
        .measure("Orders.avgAmount")
        .dimension("Orders.status");

    let found = matches(&catalog, &query);
    let selected = select(&found, SelectOverride::default()).unwrap();
    assert_eq!(selected.id.name, "avgByStatus");
    assert_eq!(selected.measure_strategy, MeasureStrategy::Exact);
    assert!(!selected.needs_reaggregation);

    // Rolling the status groups up would average averages
    let rolled_up = Query::new().measure("Orders.avgAmount");
    let found = matches(&catalog, &rolled_up);
    assert_eq!(names(&found), vec!["main"]);
}

#[test]
fn test_non_additive_time_grain_must_be_exact() {
    let catalog = common::catalog();
    let by_day = Query::new()
        .measure("Orders.uniqueUsers")
        .dimension("Orders.status")
        .time_dimension("Orders.completedAt", Some(Granularity::Day), None);
    assert!(names(&matches(&catalog, &by_day)).contains(&"byStatusDay"));

    let by_month = Query::new()
        .measure("Orders.uniqueUsers")
        .dimension("Orders.status")
        .time_dimension("Orders.completedAt", Some(Granularity::Month), None);
    assert!(!names(&matches(&catalog, &by_month)).contains(&"byStatusDay"));
}

#[test]
fn test_filter_dimension_must_be_stored() {
    let catalog = common::catalog();
    let query = Query::new()
        .measure("Orders.count")
        .filter("Orders.status")
        .time_dimension("Orders.completedAt", Some(Granularity::Month), None);

    let found = matches(&catalog, &query);
    assert!(!names(&found).contains(&"byMonth"));
    assert_eq!(
        select(&found, SelectOverride::default()).unwrap().id.name,
        "byStatusDay"
    );
}

#[test]
fn test_filter_on_stored_time_dimension() {
    let catalog = common::catalog();
    let additive = Query::new()
        .measure("Orders.count")
        .filter("Orders.completedAt")
        .time_dimension("Orders.completedAt", Some(Granularity::Day), None);
    let found = matches(&catalog, &additive);
    assert_eq!(names(&found), vec!["main", "byStatusDay"]);
    assert_eq!(
        select(&found, SelectOverride::default()).unwrap().id.name,
        "byStatusDay"
    );

    let non_additive = Query::new()
        .measure("Orders.uniqueUsers")
        .dimension("Orders.status")
        .filter("Orders.completedAt")
        .time_dimension("Orders.completedAt", Some(Granularity::Day), None);
    let found = matches(&catalog, &non_additive);
    assert_eq!(names(&found), vec!["main", "byStatusDay"]);

    // Not stored in a rollup without a time dimension
    let by_status = Query::new()
        .measure("Orders.avgAmount")
        .dimension("Orders.status")
        .filter("Orders.completedAt");
    assert_eq!(names(&matches(&catalog, &by_status)), vec!["main"]);
}

#[test]
fn test_partitioned_rollup_reads_within_build_range() {
    let catalog = common::catalog();
    let feb = range("2020-02-01", "2020-02-29");
    let query = Query::new()
        .measure("LineItems.count")
        .time_dimension("LineItems.createdAt", Some(Granularity::Day), Some(feb));

    let found = matches(&catalog, &query);
    let selected = select(&found, SelectOverride::default()).unwrap();
    assert_eq!(selected.id.name, "daily");
    assert_eq!(selected.read_range, Some(feb));

    let outside = Query::new().measure("LineItems.count").time_dimension(
        "LineItems.createdAt",
        Some(Granularity::Day),
        Some(range("2019-12-01", "2020-01-31")),
    );
    assert!(matches(&catalog, &outside).is_empty());
}

#[test]
fn test_fanned_out_measures_do_not_match() {
    let catalog = common::catalog();
    let query = Query::new()
        .measure("Orders.count")
        .measure("Users.count")
        .dimension("Users.city");
    assert!(matches(&catalog, &query).is_empty());
}

#[test]
fn test_original_sql_serves_only_its_cube() {
    let catalog = common::catalog();
    let query = Query::new().measure("Orders.count").dimension("Users.city");
    assert!(!names(&matches(&catalog, &query)).contains(&"main"));
}

#[test]
fn test_rewrite_exact_monthly() {
    let catalog = common::catalog();
    let query = Query::new()
        .measure("Orders.count")
        .measure("Orders.totalAmount")
        .time_dimension("Orders.completedAt", Some(Granularity::Month), None);
    let req = classify(&catalog, &query).unwrap();
    let found = match_candidates(&catalog, &req, &candidates_for(&catalog, &req));
    let selected = select(&found, SelectOverride::default()).unwrap();

    let rewritten = rewrite(
        &catalog,
        &req,
        selected,
        LocationKind::External,
        vec!["pre_aggregations.orders_by_month_1a2b3c4d".to_string()],
    );
    assert!(!rewritten.group_by);
    insta::assert_snapshot!(
        rewritten.to_string(),
        @"SELECT orders__completed_at_month AS Orders.completedAt.month, orders__count AS Orders.count, orders__total_amount AS Orders.totalAmount FROM external:pre_aggregations.orders_by_month_1a2b3c4d"
    );
}

#[test]
fn test_rewrite_formula_over_daily_rollup() {
    let catalog = common::catalog();
    let query = Query::new().measure("Orders.averageOrder").time_dimension(
        "Orders.completedAt",
        Some(Granularity::Month),
        Some(range("2020-01-05", "2020-01-31")),
    );
    let req = classify(&catalog, &query).unwrap();
    let found = match_candidates(&catalog, &req, &candidates_for(&catalog, &req));
    let selected = select(&found, SelectOverride::default()).unwrap();
    assert_eq!(selected.id.name, "byStatusDay");

    let rewritten = rewrite(
        &catalog,
        &req,
        selected,
        LocationKind::External,
        vec!["pre_aggregations.orders_by_status_day_x".to_string()],
    );
    match &rewritten.measures[0] {
        MeasureProjection::Derived {
            member,
            expression,
            leaves,
        } => {
            assert_eq!(member, "Orders.averageOrder");
            assert_eq!(
                expression.as_deref(),
                Some("sum(orders__total_amount) / sum(orders__count)")
            );
            let columns: Vec<&str> = leaves.iter().map(|l| l.column.as_str()).collect();
            assert_eq!(columns, vec!["orders__total_amount", "orders__count"]);
        }
        other => panic!("expected derived projection, got {:?}", other),
    }
    insta::assert_snapshot!(
        rewritten.to_string(),
        @"SELECT month(orders__completed_at_day) AS Orders.completedAt.month, sum(orders__total_amount) / sum(orders__count) AS Orders.averageOrder FROM external:pre_aggregations.orders_by_status_day_x WHERE orders__completed_at_day IN [2020-01-05T00:00:00.000, 2020-01-31T23:59:59.999] GROUP BY ALL"
    );
}

#[test]
fn test_rewrite_expands_nested_formula() {
    let sales = Cube::new("Sales", "SELECT * FROM sales")
        .measure(Measure::new("revenue", MeasureKind::Sum).with_sql("amount"))
        .measure(Measure::new("cost", MeasureKind::Sum).with_sql("cost"))
        .measure(Measure::new("count", MeasureKind::Count))
        .measure(Measure::new("profit", MeasureKind::Number).with_sql("{revenue} - {cost}"))
        .measure(
            Measure::new("profitPerOrder", MeasureKind::Number).with_sql("{profit} / {count}"),
        )
        .dimension(Dimension::new("soldAt", DimensionType::Time))
        .pre_aggregation(
            PreAggregationDef::rollup("daily")
                .measures(["revenue", "cost", "count"])
                .time_dimension("soldAt", Granularity::Day),
        );
    let catalog = Catalog::resolve(CatalogSpec::new(vec![sales])).unwrap();
    let query = Query::new()
        .measure("Sales.profitPerOrder")
        .time_dimension("Sales.soldAt", Some(Granularity::Month), None);
    let req = classify(&catalog, &query).unwrap();
    let found = match_candidates(&catalog, &req, &candidates_for(&catalog, &req));
    let selected = select(&found, SelectOverride::default()).unwrap();
    assert_eq!(selected.measure_strategy, MeasureStrategy::LeafReaggregation);

    let rewritten = rewrite(
        &catalog,
        &req,
        selected,
        LocationKind::External,
        vec!["pre_aggregations.sales_daily_x".to_string()],
    );
    insta::assert_snapshot!(
        rewritten.measures[0].to_string(),
        @"(sum(sales__revenue) - sum(sales__cost)) / sum(sales__count) AS Sales.profitPerOrder"
    );
}
