//! CHRONICLE Test Utilities
//!
//! Centralized test infrastructure for the CHRONICLE workspace:
//! - Proptest generators for identifiers, dates and query windows
//! - An in-memory mock series source with call counters
//! - Series fixtures
//! - Custom assertions

// Re-export core types for convenience
pub use chronicle_core::{
    ChangeEvent, ChangeManager, ChangeType, ChronicleError, ChronicleResult, DataPoint,
    DateDoubleSeries, DateWindow, ExternalId, ExternalIdBundle, HistoricalSeries, ObjectId,
    SeriesBatchRequest, SeriesSelector, SeriesSource, SourceError, UniqueId,
};

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::RwLock;

// ============================================================================
// TRACING
// ============================================================================

/// Install a test-friendly tracing subscriber.
///
/// Honours `RUST_LOG`, defaulting to `chronicle_cache=debug`. Safe to call
/// from every test; only the first call installs anything.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("chronicle_cache=debug,chronicle_core=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// MOCK SERIES SOURCE
// ============================================================================

#[derive(Debug, Clone)]
struct StoredSeries {
    series: HistoricalSeries,
    bundle: Option<ExternalIdBundle>,
}

/// In-memory [`SeriesSource`] for tests.
///
/// Selectors built from identifiers resolve to the first stored series whose
/// bundle shares an id with them; source, provider and field are ignored.
/// Every fetch is counted, and [`MockSeriesSource::fail_next`] makes the next
/// fetch fail.
#[derive(Default)]
pub struct MockSeriesSource {
    stored: RwLock<HashMap<ObjectId, StoredSeries>>,
    changes: ChangeManager,
    series_calls: AtomicUsize,
    batch_calls: AtomicUsize,
    by_id_calls: AtomicUsize,
    bundle_calls: AtomicUsize,
    failure: Mutex<Option<String>>,
    last_request: Mutex<Option<(DateWindow, Option<i32>)>>,
}

impl MockSeriesSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a series without announcing it.
    pub async fn insert(&self, series: HistoricalSeries, bundle: Option<ExternalIdBundle>) {
        let object_id = series.object_id().clone();
        self.stored
            .write()
            .await
            .insert(object_id, StoredSeries { series, bundle });
    }

    /// Replace the points of a stored series and publish a `Changed` event.
    ///
    /// A series not stored yet is added and announced as `Added`.
    pub async fn update(&self, series: HistoricalSeries) {
        let object_id = series.object_id().clone();
        let change_type = {
            let mut stored = self.stored.write().await;
            match stored.get_mut(&object_id) {
                Some(existing) => {
                    existing.series = series;
                    ChangeType::Changed
                }
                None => {
                    stored.insert(
                        object_id.clone(),
                        StoredSeries {
                            series,
                            bundle: None,
                        },
                    );
                    ChangeType::Added
                }
            }
        };
        self.changes
            .entity_changed(change_type, object_id, None, None, Utc::now())
            .await;
    }

    /// Remove a stored series and publish a `Removed` event.
    pub async fn remove(&self, object_id: &ObjectId) -> bool {
        let removed = self.stored.write().await.remove(object_id).is_some();
        if removed {
            self.changes
                .entity_changed(ChangeType::Removed, object_id.clone(), None, None, Utc::now())
                .await;
        }
        removed
    }

    /// Make the next fetch of any kind fail with `reason`.
    pub fn fail_next(&self, reason: impl Into<String>) {
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason.into());
    }

    pub fn series_calls(&self) -> usize {
        self.series_calls.load(Ordering::SeqCst)
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn by_id_calls(&self) -> usize {
        self.by_id_calls.load(Ordering::SeqCst)
    }

    pub fn bundle_calls(&self) -> usize {
        self.bundle_calls.load(Ordering::SeqCst)
    }

    /// Window and limit of the most recent single-series or batch fetch.
    pub fn last_request(&self) -> Option<(DateWindow, Option<i32>)> {
        *self.last_request.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record_request(&self, window: &DateWindow, max_points: Option<i32>) {
        *self.last_request.lock().unwrap_or_else(|e| e.into_inner()) = Some((*window, max_points));
    }

    /// Total fetches of any kind.
    pub fn total_calls(&self) -> usize {
        self.series_calls() + self.batch_calls() + self.by_id_calls() + self.bundle_calls()
    }

    fn take_failure(&self) -> ChronicleResult<()> {
        match self.failure.lock().unwrap_or_else(|e| e.into_inner()).take() {
            Some(reason) => Err(SourceError::FetchFailed { reason }.into()),
            None => Ok(()),
        }
    }

    fn resolve<'a>(
        stored: &'a HashMap<ObjectId, StoredSeries>,
        identifiers: &ExternalIdBundle,
    ) -> Option<&'a StoredSeries> {
        let mut candidates: Vec<&StoredSeries> = stored
            .values()
            .filter(|s| {
                s.bundle
                    .as_ref()
                    .is_some_and(|bundle| bundle.intersects(identifiers))
            })
            .collect();
        candidates.sort_by(|a, b| a.series.object_id().cmp(b.series.object_id()));
        candidates.into_iter().next()
    }
}

#[async_trait]
impl SeriesSource for MockSeriesSource {
    async fn series_by_id(&self, unique_id: &UniqueId) -> ChronicleResult<Option<HistoricalSeries>> {
        self.by_id_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        let stored = self.stored.read().await;
        Ok(stored
            .get(unique_id.object_id())
            .map(|s| s.series.clone()))
    }

    async fn series(
        &self,
        selector: &SeriesSelector,
        window: &DateWindow,
        max_points: Option<i32>,
    ) -> ChronicleResult<Option<HistoricalSeries>> {
        self.series_calls.fetch_add(1, Ordering::SeqCst);
        self.record_request(window, max_points);
        self.take_failure()?;
        let stored = self.stored.read().await;
        let found = match selector {
            SeriesSelector::UniqueId(unique_id) => stored.get(unique_id.object_id()),
            SeriesSelector::Identifiers { identifiers, .. }
            | SeriesSelector::Resolved { identifiers, .. } => Self::resolve(&stored, identifiers),
        };
        Ok(found.map(|s| s.series.restrict(window, max_points)))
    }

    async fn series_batch(
        &self,
        request: &SeriesBatchRequest,
        window: &DateWindow,
    ) -> ChronicleResult<HashMap<ExternalIdBundle, Option<HistoricalSeries>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.record_request(window, None);
        self.take_failure()?;
        let stored = self.stored.read().await;
        // unresolved bundles are left out of the map entirely
        Ok(request
            .identifiers
            .iter()
            .filter_map(|bundle| {
                Self::resolve(&stored, bundle)
                    .map(|s| (bundle.clone(), Some(s.series.restrict(window, None))))
            })
            .collect())
    }

    async fn external_id_bundle(
        &self,
        unique_id: &UniqueId,
    ) -> ChronicleResult<Option<ExternalIdBundle>> {
        self.bundle_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        let stored = self.stored.read().await;
        Ok(stored
            .get(unique_id.object_id())
            .and_then(|s| s.bundle.clone()))
    }

    fn change_manager(&self) -> &ChangeManager {
        &self.changes
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for CHRONICLE types.

    use super::*;
    use chrono::{Days, NaiveDate};
    use proptest::prelude::*;

    /// Generate a date between 1990-01-01 and roughly 2040.
    pub fn arb_date() -> impl Strategy<Value = NaiveDate> {
        (0u64..18_250).prop_map(|offset| {
            let base = NaiveDate::from_ymd_opt(1990, 1, 1).unwrap_or_default();
            base.checked_add_days(Days::new(offset)).unwrap_or(base)
        })
    }

    /// Generate a window with optional, ordered bounds and random include
    /// flags.
    pub fn arb_window() -> impl Strategy<Value = DateWindow> {
        (
            proptest::option::of(arb_date()),
            any::<bool>(),
            proptest::option::of(0u64..1_500),
            any::<bool>(),
            any::<bool>(),
        )
            .prop_map(|(start, include_start, span, include_end, open_start)| {
                let end = match (start, span) {
                    (Some(start), Some(span)) => start.checked_add_days(Days::new(span)),
                    (None, Some(span)) => NaiveDate::from_ymd_opt(2000, 1, 1)
                        .and_then(|d| d.checked_add_days(Days::new(span * 7))),
                    (_, None) => None,
                };
                let start = if open_start && end.is_some() { None } else { start };
                DateWindow::new(start, include_start, end, include_end)
            })
    }

    /// Generate a point limit: absent, zero, or up to 3000 either way.
    pub fn arb_max_points() -> impl Strategy<Value = Option<i32>> {
        prop_oneof![
            Just(None),
            Just(Some(0)),
            (1i32..3_000).prop_map(Some),
            (-3_000i32..0).prop_map(Some),
        ]
    }

    /// Generate an ObjectId.
    pub fn arb_object_id() -> impl Strategy<Value = ObjectId> {
        ("[A-Z][A-Za-z]{1,8}", "[0-9]{1,6}").prop_filter_map("valid object id", |(scheme, value)| {
            ObjectId::new(scheme, value).ok()
        })
    }

    /// Generate a UniqueId, latest or versioned.
    pub fn arb_unique_id() -> impl Strategy<Value = UniqueId> {
        (arb_object_id(), proptest::option::of("[0-9]{1,3}")).prop_map(|(oid, version)| {
            match version {
                Some(version) => oid.at_version(version),
                None => oid.at_latest_version(),
            }
        })
    }

    /// Generate a non-empty bundle of up to three external ids.
    pub fn arb_external_id_bundle() -> impl Strategy<Value = ExternalIdBundle> {
        proptest::collection::vec(("TICKER|ISIN|CUSIP", "[A-Z0-9]{3,8}"), 1..=3).prop_map(|ids| {
            ExternalIdBundle::of(
                ids.into_iter()
                    .filter_map(|(scheme, value)| ExternalId::new(scheme, value).ok()),
            )
        })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built series for common testing scenarios.

    use super::*;
    use chrono::{Datelike, Days, NaiveDate, Weekday};

    /// A series with one point per day for `days` days from `start`. The
    /// value of each point is its offset from `start`.
    pub fn daily_series(unique_id: &UniqueId, start: NaiveDate, days: u32) -> HistoricalSeries {
        let points = (0..days).filter_map(|offset| {
            start
                .checked_add_days(Days::new(u64::from(offset)))
                .map(|date| (date, f64::from(offset)))
        });
        HistoricalSeries::new(unique_id.clone(), DateDoubleSeries::from_points(points))
    }

    /// Like [`daily_series`] but with weekends left out.
    pub fn weekday_series(unique_id: &UniqueId, start: NaiveDate, days: u32) -> HistoricalSeries {
        let points = (0..days).filter_map(|offset| {
            start
                .checked_add_days(Days::new(u64::from(offset)))
                .filter(|date| !matches!(date.weekday(), Weekday::Sat | Weekday::Sun))
                .map(|date| (date, f64::from(offset)))
        });
        HistoricalSeries::new(unique_id.clone(), DateDoubleSeries::from_points(points))
    }

    /// A single-ticker bundle.
    pub fn ticker(symbol: &str) -> ExternalIdBundle {
        ExternalId::new("TICKER", symbol)
            .map(ExternalIdBundle::single)
            .unwrap_or_default()
    }

    /// An identifiers selector for the close price of `bundle`.
    pub fn close_selector(bundle: &ExternalIdBundle) -> SeriesSelector {
        SeriesSelector::Identifiers {
            identifiers: bundle.clone(),
            validity_date: None,
            data_source: Some("MOCK".to_string()),
            data_provider: None,
            data_field: "CLOSE".to_string(),
        }
    }

    /// A batch request for the close prices of `bundles`.
    pub fn close_batch(bundles: impl IntoIterator<Item = ExternalIdBundle>) -> SeriesBatchRequest {
        SeriesBatchRequest::new(bundles, Some("MOCK".to_string()), None, "CLOSE")
    }

    /// The (date, value) pairs of a series, for comparisons.
    pub fn points_of(series: &HistoricalSeries) -> Vec<(NaiveDate, f64)> {
        series.series().iter().map(|p| (p.date, p.value)).collect()
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for CHRONICLE-specific validation.

    use super::*;
    use chronicle_core::StoreError;

    /// Assert that two series carry the same id and the same points.
    #[track_caller]
    pub fn assert_same_series(actual: &HistoricalSeries, expected: &HistoricalSeries) {
        assert_eq!(actual.unique_id(), expected.unique_id(), "series ids differ");
        assert_eq!(
            fixtures::points_of(actual),
            fixtures::points_of(expected),
            "points of {} differ",
            actual.unique_id()
        );
    }

    /// Assert that a ChronicleResult is a source fetch failure.
    #[track_caller]
    pub fn assert_fetch_failed<T: std::fmt::Debug>(result: &ChronicleResult<T>) {
        match result {
            Err(ChronicleError::Source(SourceError::FetchFailed { .. })) => {}
            other => panic!("Expected FetchFailed error, got: {:?}", other),
        }
    }

    /// Assert that a ChronicleResult is a shut-down store error.
    #[track_caller]
    pub fn assert_shut_down<T: std::fmt::Debug>(result: &ChronicleResult<T>) {
        match result {
            Err(ChronicleError::Store(StoreError::ShutDown { .. })) => {}
            other => panic!("Expected ShutDown error, got: {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[tokio::test]
    async fn test_mock_resolves_by_bundle_and_restricts() {
        let source = MockSeriesSource::new();
        let uid: UniqueId = "Mock~1".parse().expect("valid id");
        source
            .insert(daily_series(&uid, date(2020, 1, 1), 10), Some(ticker("AAPL")))
            .await;

        let series = source
            .series(
                &close_selector(&ticker("AAPL")),
                &DateWindow::closed(date(2020, 1, 3), date(2020, 1, 4)),
                None,
            )
            .await
            .expect("fetch")
            .expect("resolved");
        assert_eq!(series.series().len(), 2);
        assert_eq!(source.series_calls(), 1);

        let missing = source
            .series(&close_selector(&ticker("MSFT")), &DateWindow::all(), None)
            .await
            .expect("fetch");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_mock_fail_next_fails_once() {
        let source = MockSeriesSource::new();
        let uid: UniqueId = "Mock~1".parse().expect("valid id");
        source.fail_next("boom");
        assertions::assert_fetch_failed(&source.series_by_id(&uid).await);
        assert!(source.series_by_id(&uid).await.expect("second call").is_none());
        assert_eq!(source.by_id_calls(), 2);
        assert_eq!(source.total_calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_update_publishes_change() {
        let source = MockSeriesSource::new();
        let uid: UniqueId = "Mock~1".parse().expect("valid id");
        source.update(daily_series(&uid, date(2020, 1, 1), 3)).await;
        assert!(source.remove(uid.object_id()).await);
        assert!(!source.remove(uid.object_id()).await);
    }

    #[test]
    fn test_weekday_series_skips_weekends() {
        let uid: UniqueId = "Mock~2".parse().expect("valid id");
        // 2020-01-04 is a Saturday
        let series = weekday_series(&uid, date(2020, 1, 1), 7);
        assert_eq!(series.series().len(), 5);
    }

    mod ids {
        use crate::generators::{arb_external_id_bundle, arb_object_id, arb_unique_id};
        use crate::{ExternalIdBundle, ObjectId, UniqueId};
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_ids_survive_display_and_parse(
                object_id in arb_object_id(),
                unique_id in arb_unique_id(),
            ) {
                let parsed: ObjectId = object_id.to_string().parse().expect("rendered object id parses");
                prop_assert_eq!(parsed, object_id);
                let parsed: UniqueId = unique_id.to_string().parse().expect("rendered unique id parses");
                prop_assert_eq!(parsed, unique_id);
            }

            #[test]
            fn prop_bundle_intersects_itself(bundle in arb_external_id_bundle()) {
                prop_assert!(!bundle.is_empty());
                prop_assert!(bundle.intersects(&bundle));
                prop_assert!(!bundle.intersects(&ExternalIdBundle::default()));
            }
        }
    }
}
