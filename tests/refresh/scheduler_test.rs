//! Background refresh: ticks, manual triggers, backoff and reloads.

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockSource, MockStorage};
use preagg::config::Settings;
use preagg::model::{
    CatalogSpec, Cube, Dimension, DimensionType, Granularity, Measure, MeasureKind,
    PreAggregationDef, RefreshKeyDef,
};
use preagg::refresh::{BuildCoordinator, InstanceKey, InstanceStatus, RefreshScheduler};
use preagg::semantic::Catalog;
use tokio::sync::watch;
use tokio::time::sleep;

fn events(scheduled: bool) -> Cube {
    let mut daily = PreAggregationDef::rollup("daily")
        .measures(["count"])
        .time_dimension("occurredAt", Granularity::Day)
        .refresh_key(RefreshKeyDef::sql("SELECT MAX(id) FROM events"));
    daily.scheduled_refresh = scheduled;
    Cube::new("Events", "SELECT * FROM events")
        .measure(Measure::new("count", MeasureKind::Count))
        .dimension(Dimension::new("occurredAt", DimensionType::Time))
        .pre_aggregation(daily)
}

fn catalog_of(cubes: Vec<Cube>) -> Arc<Catalog> {
    Arc::new(Catalog::resolve(CatalogSpec::new(cubes)).unwrap())
}

fn settings() -> Settings {
    let mut settings = common::test_settings();
    settings.refresh.background = true;
    settings.refresh.background_interval = "1s".to_string();
    settings.refresh.retry.initial_backoff = "10s".to_string();
    settings.refresh.retry.max_backoff = "60s".to_string();
    settings.refresh.retry.multiplier = 2.0;
    settings
}

fn events_key() -> InstanceKey {
    InstanceKey::new("Events", "daily", None)
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if done() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

fn start(
    coordinator: &BuildCoordinator,
    catalog: Arc<Catalog>,
) -> (preagg::refresh::SchedulerHandle, watch::Sender<Arc<Catalog>>) {
    let (tx, rx) = watch::channel(catalog);
    let handle = RefreshScheduler::start(coordinator.clone(), rx, &settings()).unwrap();
    (handle, tx)
}

#[tokio::test(start_paused = true)]
async fn test_tick_builds_every_scheduled_target() {
    let source = MockSource::new("1");
    let storage = MockStorage::new();
    let coordinator = common::coordinator(source, storage.clone());
    let (handle, _catalog) = start(&coordinator, Arc::new(common::catalog()));

    // Four Orders, four LineItems (three partitions) and one Users instance
    wait_until(|| coordinator.store().len() == 9).await;
    for instance in coordinator.store().instances() {
        assert_eq!(coordinator.status(&instance.key), InstanceStatus::Ready);
    }
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unscheduled_targets_only_refresh_on_trigger() {
    let source = MockSource::new("1");
    let storage = MockStorage::new();
    let coordinator = common::coordinator(source, storage.clone());
    let (handle, _catalog) = start(&coordinator, catalog_of(vec![events(false)]));

    sleep(Duration::from_secs(3)).await;
    assert_eq!(storage.build_count(), 0);

    handle.trigger_background_refresh(events_key()).unwrap();
    wait_until(|| coordinator.current(&events_key()).is_some()).await;
    assert_eq!(storage.build_count(), 1);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_refresh_backs_off() {
    let source = MockSource::new("1");
    let storage = MockStorage::new();
    storage.set_failing(true);
    let coordinator = common::coordinator(source, storage.clone());
    let (handle, _catalog) = start(&coordinator, catalog_of(vec![events(true)]));

    wait_until(|| storage.build_count() == 1).await;
    sleep(Duration::from_secs(5)).await;
    assert_eq!(storage.build_count(), 1, "ticks inside the backoff window are skipped");

    // First retry is due ten seconds after the failure
    sleep(Duration::from_secs(6)).await;
    assert_eq!(storage.build_count(), 2);

    // A manual trigger ignores the backoff
    storage.set_failing(false);
    handle.trigger_background_refresh(events_key()).unwrap();
    wait_until(|| coordinator.current(&events_key()).is_some()).await;
    assert_eq!(storage.build_count(), 3);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_reloaded_catalog_is_picked_up() {
    let source = MockSource::new("1");
    let storage = MockStorage::new();
    let coordinator = common::coordinator(source, storage.clone());
    let (handle, catalog) = start(&coordinator, catalog_of(vec![common::users()]));

    let by_city = InstanceKey::new("Users", "byCity", None);
    wait_until(|| coordinator.current(&by_city).is_some()).await;
    assert!(coordinator.current(&events_key()).is_none());

    catalog.send_replace(catalog_of(vec![common::users(), events(true)]));
    wait_until(|| coordinator.current(&events_key()).is_some()).await;
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unknown_trigger_is_ignored() {
    let source = MockSource::new("1");
    let storage = MockStorage::new();
    let coordinator = common::coordinator(source, storage.clone());
    let (handle, _catalog) = start(&coordinator, catalog_of(vec![events(false)]));

    handle
        .trigger_background_refresh(InstanceKey::new("Nope", "missing", None))
        .unwrap();
    sleep(Duration::from_secs(2)).await;
    assert_eq!(storage.build_count(), 0);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_ticking() {
    let source = MockSource::new("1");
    let storage = MockStorage::new();
    storage.set_failing(true);
    let coordinator = common::coordinator(source, storage.clone());
    let (handle, _catalog) = start(&coordinator, catalog_of(vec![events(true)]));

    wait_until(|| storage.build_count() == 1).await;
    handle.shutdown().await;

    sleep(Duration::from_secs(120)).await;
    assert_eq!(storage.build_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reload_drops_backoff_of_removed_targets() {
    let source = MockSource::new("1");
    let storage = MockStorage::new();
    storage.set_failing(true);
    let coordinator = common::coordinator(source, storage.clone());
    let (handle, catalog) = start(&coordinator, catalog_of(vec![events(true)]));

    wait_until(|| handle.backing_off() == vec![events_key()]).await;

    storage.set_failing(false);
    catalog.send_replace(catalog_of(vec![common::users()]));
    wait_until(|| handle.backing_off().is_empty()).await;
    handle.shutdown().await;
}

#[tokio::test]
async fn test_zero_interval_is_rejected_at_start() {
    let coordinator = common::coordinator(MockSource::new("1"), MockStorage::new());
    let (_tx, rx) = watch::channel(catalog_of(vec![events(true)]));
    let mut settings = settings();
    settings.refresh.background_interval = "0s".to_string();
    assert!(RefreshScheduler::start(coordinator, rx, &settings).is_err());
}
