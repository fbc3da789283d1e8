//! Batch lookups, change-driven invalidation and shutdown.

use async_trait::async_trait;
use chrono::NaiveDate;
use chronicle_cache::{CacheConfig, CachingSeriesSource, InMemoryStoreProvider};
use chronicle_core::{
    ChangeEvent, ChangeListener, ChangeType, DateDoubleSeries, DateWindow, HistoricalSeries, ObjectId,
    SeriesSource, UniqueId,
};
use chronicle_test_utils::assertions::assert_shut_down;
use chronicle_test_utils::fixtures::{close_batch, close_selector, daily_series, ticker};
use chronicle_test_utils::{init_test_tracing, MockSeriesSource};
use std::sync::{Arc, Mutex};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn uid(value: &str) -> UniqueId {
    format!("DbHts~{value}").parse().expect("valid id")
}

async fn two_series_source() -> Arc<MockSeriesSource> {
    let source = Arc::new(MockSeriesSource::new());
    source
        .insert(daily_series(&uid("1"), date(2020, 1, 1), 366), Some(ticker("AAPL")))
        .await;
    source
        .insert(daily_series(&uid("2"), date(2020, 1, 1), 366), Some(ticker("MSFT")))
        .await;
    source
}

async fn caching(source: &Arc<MockSeriesSource>) -> CachingSeriesSource<MockSeriesSource> {
    CachingSeriesSource::new(
        Arc::clone(source),
        &InMemoryStoreProvider,
        &CacheConfig::default(),
    )
    .await
    .expect("caching source")
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(ChangeType, ObjectId)>>,
}

#[async_trait]
impl ChangeListener for Recorder {
    async fn entity_changed(&self, event: &ChangeEvent) {
        self.seen
            .lock()
            .expect("lock poisoned")
            .push((event.change_type, event.object_id.clone()));
    }
}

#[tokio::test]
async fn test_batch_partitions_into_one_bulk_fetch() {
    init_test_tracing();
    let source = two_series_source().await;
    let cache = caching(&source).await;
    let february = DateWindow::closed(date(2020, 2, 1), date(2020, 2, 29));
    let request = close_batch([ticker("AAPL"), ticker("MSFT"), ticker("XYZ")]);

    let first = cache
        .get_series_batch(&request, &february)
        .await
        .expect("batch");
    assert_eq!(first.len(), 3);
    assert_eq!(
        first[&ticker("AAPL")].as_ref().map(|s| s.series().len()),
        Some(29)
    );
    assert_eq!(
        first[&ticker("MSFT")].as_ref().map(|s| s.unique_id().clone()),
        Some(uid("2"))
    );
    assert!(first[&ticker("XYZ")].is_none());
    assert_eq!(source.batch_calls(), 1);

    // hits and the tombstone are all answered locally
    let second = cache
        .get_series_batch(&request, &february)
        .await
        .expect("batch");
    assert_eq!(second, first);
    assert_eq!(source.batch_calls(), 1);

    // a single-series request for the same selector and window shares the key
    let single = cache
        .get_series(&close_selector(&ticker("AAPL")), &february, None)
        .await
        .expect("fetch");
    assert_eq!(single, first[&ticker("AAPL")]);
    assert_eq!(source.series_calls(), 0);
}

#[tokio::test]
async fn test_batch_fetches_only_what_is_missing() {
    let source = two_series_source().await;
    let cache = caching(&source).await;
    let window = DateWindow::closed(date(2020, 3, 1), date(2020, 3, 31));

    cache
        .get_series(&close_selector(&ticker("AAPL")), &window, None)
        .await
        .expect("warm");
    assert_eq!(source.series_calls(), 1);

    let results = cache
        .get_series_batch(&close_batch([ticker("AAPL"), ticker("MSFT")]), &window)
        .await
        .expect("batch");
    assert!(results.values().all(|r| r.is_some()));
    assert_eq!(source.batch_calls(), 1);

    // the bulk fetch asked for the widened window
    let (fetched_window, _) = source.last_request().expect("batch fetch recorded");
    assert_eq!(fetched_window.start, Some(date(2020, 1, 1)));
    assert_eq!(fetched_window.end, Some(date(2021, 1, 1)));
}

#[tokio::test]
async fn test_change_event_invalidates_and_is_forwarded() {
    let source = two_series_source().await;
    let cache = caching(&source).await;
    let recorder = Arc::new(Recorder::default());
    cache.change_manager().add_listener(recorder.clone()).await;

    let selector = close_selector(&ticker("AAPL"));
    let window = DateWindow::closed(date(2020, 1, 1), date(2020, 1, 10));
    let before = cache
        .get_series(&selector, &window, None)
        .await
        .expect("fetch")
        .expect("series exists");
    assert_eq!(before.series().earliest().map(|p| p.value), Some(0.0));
    let _ = cache.get_series(&selector, &window, None).await.expect("hit");
    assert_eq!(source.series_calls(), 1);

    // new data for AAPL, shifted by a year's worth of values
    let mut points: Vec<(NaiveDate, f64)> = Vec::new();
    for p in daily_series(&uid("1"), date(2020, 1, 1), 366).series().iter() {
        points.push((p.date, p.value + 1000.0));
    }
    source
        .update(HistoricalSeries::new(
            uid("1"),
            DateDoubleSeries::from_points(points),
        ))
        .await;

    let after = cache
        .get_series(&selector, &window, None)
        .await
        .expect("fetch")
        .expect("series exists");
    assert_eq!(after.series().earliest().map(|p| p.value), Some(1000.0));
    assert_eq!(source.series_calls(), 2);

    let seen = recorder.seen.lock().expect("lock poisoned").clone();
    assert_eq!(seen, vec![(ChangeType::Changed, uid("1").object_id().clone())]);
    assert_eq!(cache.series_stats().invalidations, 1);
}

#[tokio::test]
async fn test_change_to_one_series_leaves_others_cached() {
    let source = two_series_source().await;
    let cache = caching(&source).await;
    let window = DateWindow::all();

    for symbol in ["AAPL", "MSFT"] {
        cache
            .get_series(&close_selector(&ticker(symbol)), &window, None)
            .await
            .expect("fetch");
    }
    assert!(source.remove(uid("1").object_id()).await);

    let aapl = cache
        .get_series(&close_selector(&ticker("AAPL")), &window, None)
        .await
        .expect("fetch");
    assert!(aapl.is_none());
    let msft = cache
        .get_series(&close_selector(&ticker("MSFT")), &window, None)
        .await
        .expect("fetch");
    assert!(msft.is_some());
    assert_eq!(source.series_calls(), 3);
}

#[tokio::test]
async fn test_invalidation_clears_batch_tombstones() {
    let source = two_series_source().await;
    let cache = caching(&source).await;
    let window = DateWindow::closed(date(2020, 5, 1), date(2020, 5, 31));
    let request = close_batch([ticker("NEW")]);

    let first = cache.get_series_batch(&request, &window).await.expect("batch");
    assert!(first[&ticker("NEW")].is_none());

    source
        .insert(daily_series(&uid("3"), date(2020, 1, 1), 366), Some(ticker("NEW")))
        .await;
    // announcing any change clears every tombstone
    source
        .update(daily_series(&uid("3"), date(2020, 1, 1), 366))
        .await;

    let second = cache.get_series_batch(&request, &window).await.expect("batch");
    assert_eq!(
        second[&ticker("NEW")].as_ref().map(|s| s.series().len()),
        Some(31)
    );
    assert_eq!(source.batch_calls(), 2);
}

#[tokio::test]
async fn test_manual_invalidate_drops_series_and_bundle() {
    let source = two_series_source().await;
    let cache = caching(&source).await;

    cache.get_series_by_id(&uid("1")).await.expect("fetch");
    cache.get_external_id_bundle(&uid("1")).await.expect("fetch");
    cache
        .invalidate(uid("1").object_id())
        .await
        .expect("invalidate");
    cache.get_series_by_id(&uid("1")).await.expect("fetch");
    cache.get_external_id_bundle(&uid("1")).await.expect("fetch");

    assert_eq!(source.by_id_calls(), 2);
    assert_eq!(source.bundle_calls(), 2);
}

#[tokio::test]
async fn test_shutdown_unregisters_listener_and_is_idempotent() {
    let source = two_series_source().await;
    let cache = caching(&source).await;
    assert_eq!(source.change_manager().listener_count().await, 1);

    cache.shutdown().await;
    cache.shutdown().await;
    assert!(cache.is_shut_down());
    assert_eq!(source.change_manager().listener_count().await, 0);

    assert_shut_down(
        &cache
            .get_series(&close_selector(&ticker("AAPL")), &DateWindow::all(), None)
            .await,
    );

    // upstream changes after shutdown reach nobody
    source
        .update(daily_series(&uid("1"), date(2020, 1, 1), 5))
        .await;
}

#[tokio::test]
async fn test_drop_without_shutdown_leaves_listener_registered() {
    let source = two_series_source().await;
    let cache = caching(&source).await;
    cache.get_series_by_id(&uid("1")).await.expect("fetch");
    drop(cache);

    assert_eq!(source.change_manager().listener_count().await, 1);
    // the orphaned listener still handles events without failing
    source
        .update(daily_series(&uid("1"), date(2020, 1, 1), 5))
        .await;
}

