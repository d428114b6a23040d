//! Query classification against the fixture catalog.

#[path = "../common/mod.rs"]
mod common;

use preagg::model::Granularity;
use preagg::semantic::{classify, DateRange, Query, SchemaError};

#[test]
fn test_simple_additive_query() {
    let catalog = common::catalog();
    let query = Query::new()
        .measure("Orders.count")
        .time_dimension("Orders.completedAt", Some(Granularity::Month), None);

    let req = classify(&catalog, &query).unwrap();
    assert!(req.is_leaf_additive);
    assert!(req.uses_additive_path());
    assert_eq!(req.required_granularity(), Some(Granularity::Month));
    assert_eq!(req.cubes, vec![catalog.find_cube("Orders").unwrap()]);
    assert!(req.multiplied_measures.is_empty());
}

#[test]
fn test_formula_leaves_are_collected() {
    let catalog = common::catalog();
    let query = Query::new()
        .measure("Orders.averageOrder")
        .measure("Orders.count");

    let req = classify(&catalog, &query).unwrap();
    let leaves: Vec<&str> = req
        .leaf_measures
        .iter()
        .map(|id| catalog.measure(*id).path.as_str())
        .collect();
    assert_eq!(leaves, vec!["Orders.totalAmount", "Orders.count"]);
    assert!(req.is_leaf_additive);
}

#[test]
fn test_non_additive_leaf_disables_additive_path() {
    let catalog = common::catalog();
    let query = Query::new().measure("Orders.uniqueUsers");
    let req = classify(&catalog, &query).unwrap();
    assert!(!req.is_leaf_additive);
    assert!(!req.uses_additive_path());
}

#[test]
fn test_belongs_to_multiplies_target_cube() {
    let catalog = common::catalog();
    let query = Query::new()
        .measure("Orders.count")
        .measure("Users.count")
        .dimension("Users.city");

    let req = classify(&catalog, &query).unwrap();
    let multiplied: Vec<&str> = req
        .multiplied_measures
        .iter()
        .map(|id| catalog.measure(*id).path.as_str())
        .collect();
    assert_eq!(multiplied, vec!["Users.count"]);
    assert!(!req.uses_additive_path());
    assert_eq!(req.cubes.len(), 2);
}

#[test]
fn test_filters_split_into_measures_and_dimensions() {
    let catalog = common::catalog();
    let query = Query::new()
        .measure("Orders.count")
        .filter("Orders.status")
        .filter("Orders.totalAmount");

    let req = classify(&catalog, &query).unwrap();
    assert_eq!(req.measures.len(), 2);
    assert_eq!(
        req.filter_dimensions,
        vec![catalog.find_dimension("Orders.status").unwrap()]
    );
    assert!(req.dimensions.is_empty());
}

#[test]
fn test_time_dimension_without_grain_or_range_is_ignored() {
    let catalog = common::catalog();
    let query = Query::new()
        .measure("Orders.count")
        .time_dimension("Orders.completedAt", None, None);
    let req = classify(&catalog, &query).unwrap();
    assert!(req.time_dimension.is_none());

    let range = DateRange::parse("2020-01-01", "2020-01-31").unwrap();
    let query = Query::new()
        .measure("Orders.count")
        .time_dimension("Orders.completedAt", None, Some(range));
    let req = classify(&catalog, &query).unwrap();
    assert_eq!(req.time_dimension.unwrap().date_range, Some(range));
}

#[test]
fn test_unresolvable_references() {
    let catalog = common::catalog();

    let err = classify(&catalog, &Query::new().measure("Orders.nope")).unwrap_err();
    assert_eq!(err, SchemaError::UnknownMeasure("Orders.nope".to_string()));

    let err = classify(&catalog, &Query::new().measure("count")).unwrap_err();
    assert!(matches!(err, SchemaError::InvalidReference(_)));

    let err = classify(&catalog, &Query::new().dimension("Orders.nope")).unwrap_err();
    assert!(matches!(err, SchemaError::UnknownDimension(_)));
}

#[test]
fn test_query_from_json() {
    let json = r#"{
        "measures": ["Orders.count"],
        "timeDimension": {
            "dimension": "Orders.completedAt",
            "granularity": "month",
            "dateRange": ["2020-01-01", "2020-01-31"]
        },
        "options": { "useOriginalSqlPreAggregations": true }
    }"#;
    let query: Query = serde_json::from_str(json).unwrap();
    assert!(query.options.use_original_sql_pre_aggregations);

    let catalog = common::catalog();
    let req = classify(&catalog, &query).unwrap();
    let time = req.time_dimension.unwrap();
    assert_eq!(time.granularity, Some(Granularity::Month));
    assert!(time.date_range.unwrap().is_aligned(Granularity::Month));
}
