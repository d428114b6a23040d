//! Shared fixtures: a small e-commerce catalog and in-memory drivers.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use preagg::config::Settings;
use preagg::model::{
    CatalogSpec, Cube, Dimension, DimensionType, Granularity, Join, Measure, MeasureKind,
    PreAggregationDef, RefreshKeyDef, Relationship,
};
use preagg::refresh::{
    BuildCoordinator, BuildRequest, DriverError, DriverResult, InstanceKey, InstanceStore,
    Location, RefreshKeyFactory, SourceDriver, StorageDriver, SystemClock,
};
use preagg::semantic::Catalog;

pub const ORDERS_REFRESH_SQL: &str = "SELECT MAX(updated_at) FROM orders";

pub fn orders() -> Cube {
    let mut cube = Cube::new("Orders", "SELECT * FROM orders")
        .measure(Measure::new("count", MeasureKind::Count))
        .measure(Measure::new("totalAmount", MeasureKind::Sum).with_sql("amount"))
        .measure(Measure::new("minAmount", MeasureKind::Min).with_sql("amount"))
        .measure(Measure::new("maxAmount", MeasureKind::Max).with_sql("amount"))
        .measure(Measure::new("avgAmount", MeasureKind::Avg).with_sql("amount"))
        .measure(Measure::new("uniqueUsers", MeasureKind::CountDistinct).with_sql("user_id"))
        .measure(Measure::new("approxUsers", MeasureKind::CountDistinctApprox).with_sql("user_id"))
        .measure(
            Measure::new("averageOrder", MeasureKind::Number).with_sql("{totalAmount} / {count}"),
        )
        .dimension(Dimension::new("id", DimensionType::Number).primary_key())
        .dimension(Dimension::new("status", DimensionType::String))
        .dimension(Dimension::new("userId", DimensionType::Number))
        .dimension(Dimension::new("completedAt", DimensionType::Time))
        .join(Join::new("Users", Relationship::BelongsTo).on("{CUBE}.user_id = {Users}.id"))
        // Declared first on purpose: rollups must still win
        .pre_aggregation(PreAggregationDef::original_sql("main"))
        .pre_aggregation(
            PreAggregationDef::rollup("byMonth")
                .measures(["count", "totalAmount"])
                .time_dimension("completedAt", Granularity::Month),
        )
        .pre_aggregation(
            PreAggregationDef::rollup("byStatusDay")
                .measures(["count", "totalAmount", "minAmount", "uniqueUsers", "approxUsers"])
                .dimensions(["status"])
                .time_dimension("completedAt", Granularity::Day),
        )
        .pre_aggregation(
            PreAggregationDef::rollup("avgByStatus")
                .measures(["avgAmount"])
                .dimensions(["status"]),
        );
    cube.refresh_key = Some(RefreshKeyDef::sql(ORDERS_REFRESH_SQL));
    cube
}

pub fn line_items() -> Cube {
    Cube::new("LineItems", "SELECT * FROM line_items")
        .measure(Measure::new("count", MeasureKind::Count))
        .measure(Measure::new("price", MeasureKind::Sum).with_sql("price"))
        .measure(Measure::new("quantity", MeasureKind::Sum).with_sql("quantity"))
        .measure(
            Measure::new("profitMargin", MeasureKind::Avg).with_sql("(price - cost) / price"),
        )
        .dimension(Dimension::new("id", DimensionType::Number).primary_key())
        .dimension(Dimension::new("productId", DimensionType::Number))
        .dimension(Dimension::new("createdAt", DimensionType::Time))
        .pre_aggregation(
            PreAggregationDef::rollup("priceQuantity")
                .measures(["price", "quantity"])
                .time_dimension("createdAt", Granularity::Day),
        )
        .pre_aggregation(
            PreAggregationDef::rollup("daily")
                .measures(["count", "price"])
                .time_dimension("createdAt", Granularity::Day)
                .partitioned(Granularity::Month, "2020-01-01", "2020-03-31")
                .refresh_key(RefreshKeyDef::immutable()),
        )
}

pub fn users() -> Cube {
    Cube::new("Users", "SELECT * FROM users")
        .measure(Measure::new("count", MeasureKind::Count))
        .dimension(Dimension::new("id", DimensionType::Number).primary_key())
        .dimension(Dimension::new("city", DimensionType::String))
        .pre_aggregation(
            PreAggregationDef::rollup("byCity")
                .measures(["count"])
                .dimensions(["city"]),
        )
}

pub fn catalog_spec() -> CatalogSpec {
    CatalogSpec::new(vec![orders(), line_items(), users()])
}

pub fn catalog() -> Catalog {
    Catalog::resolve(catalog_spec()).expect("fixture catalog resolves")
}

/// Defaults without persisted state or background refresh.
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.storage.persist_state = false;
    settings.refresh.background = false;
    settings.refresh.wait_timeout = "5s".to_string();
    settings
}

/// Source whose refresh key value tests can change.
#[derive(Default)]
pub struct MockSource {
    value: Mutex<String>,
    fail: AtomicBool,
    pub probes: AtomicUsize,
}

impl MockSource {
    pub fn new(value: &str) -> Arc<Self> {
        Arc::new(Self {
            value: Mutex::new(value.to_string()),
            ..Default::default()
        })
    }

    pub fn set_value(&self, value: &str) {
        *self.value.lock().unwrap() = value.to_string();
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceDriver for MockSource {
    async fn query_refresh_key(&self, _sql: &str) -> DriverResult<String> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(DriverError::Connection("source unavailable".into()));
        }
        Ok(self.value.lock().unwrap().clone())
    }
}

/// Storage recording every call, with a configurable build delay.
#[derive(Default)]
pub struct MockStorage {
    delay: Mutex<Duration>,
    fail: AtomicBool,
    pub materialized: Mutex<Vec<String>>,
    pub published: Mutex<Vec<(InstanceKey, String, Option<String>)>>,
    pub dropped: Mutex<Vec<String>>,
}

impl MockStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        let storage = Self::default();
        *storage.delay.lock().unwrap() = delay;
        Arc::new(storage)
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn build_count(&self) -> usize {
        self.materialized.lock().unwrap().len()
    }

    pub fn dropped_tables(&self) -> Vec<String> {
        self.dropped.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageDriver for MockStorage {
    async fn materialize(&self, request: &BuildRequest<'_>) -> DriverResult<()> {
        self.materialized
            .lock()
            .unwrap()
            .push(request.location.table.clone());
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(DriverError::Query("disk full".into()));
        }
        Ok(())
    }

    async fn publish(
        &self,
        key: &InstanceKey,
        location: &Location,
        previous: Option<&Location>,
    ) -> DriverResult<()> {
        self.published.lock().unwrap().push((
            key.clone(),
            location.table.clone(),
            previous.map(|p| p.table.clone()),
        ));
        Ok(())
    }

    async fn drop_table(&self, location: &Location) -> DriverResult<()> {
        self.dropped.lock().unwrap().push(location.table.clone());
        Ok(())
    }
}

pub fn coordinator(source: Arc<MockSource>, storage: Arc<MockStorage>) -> BuildCoordinator {
    let settings = test_settings();
    let refresh_keys = RefreshKeyFactory::new(source, Arc::new(SystemClock), Duration::from_secs(3600));
    BuildCoordinator::with_parts(storage, &settings, InstanceStore::new(), refresh_keys)
        .expect("test settings are valid")
}
