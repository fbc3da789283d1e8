//! Caching decorator for a [`SeriesSource`].
//!
//! Queries are widened to a [`RangeKey`] before they reach the cache, so one
//! fetch from the source answers every request whose window falls inside the
//! same calendar years. The exact window is sliced out of the cached series
//! on the way back.

use crate::config::CacheConfig;
use crate::hierarchical::{HierarchicalCache, Lookup};
use crate::range::RangeKey;
use crate::stats::CacheStats;
use crate::store::{DefaultStoreProvider, StoreProvider};
use async_trait::async_trait;
use chronicle_core::{
    ChangeEvent, ChangeListener, ChangeManager, ChronicleResult, DataPoint, DateWindow,
    ExternalIdBundle, HistoricalSeries, ListenerId, ObjectId, SeriesBatchRequest, SeriesSelector,
    SeriesSource, UniqueId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Query key of the series cache.
///
/// A `None` range stands for the whole series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesQueryKey {
    selector: SeriesSelector,
    range: Option<RangeKey>,
}

impl SeriesQueryKey {
    pub fn new(selector: SeriesSelector, range: Option<RangeKey>) -> Self {
        Self { selector, range }
    }

    pub fn selector(&self) -> &SeriesSelector {
        &self.selector
    }

    pub fn range(&self) -> Option<&RangeKey> {
        self.range.as_ref()
    }
}

type SeriesCache = HierarchicalCache<SeriesQueryKey, ObjectId, HistoricalSeries>;
type BundleCache = HierarchicalCache<UniqueId, ObjectId, ExternalIdBundle>;

fn series_identity(_: &SeriesQueryKey, series: &HistoricalSeries) -> ObjectId {
    series.object_id().clone()
}

fn bundle_identity(unique_id: &UniqueId, _: &ExternalIdBundle) -> ObjectId {
    unique_id.object_id().clone()
}

/// Invalidates both caches for every upstream change, then republishes it.
struct InvalidatingListener {
    series: Arc<SeriesCache>,
    bundles: Arc<BundleCache>,
    downstream: Arc<ChangeManager>,
}

#[async_trait]
impl ChangeListener for InvalidatingListener {
    async fn entity_changed(&self, event: &ChangeEvent) {
        tracing::debug!(
            object_id = %event.object_id,
            change_type = ?event.change_type,
            "Upstream change, invalidating"
        );
        if let Err(err) = self.series.invalidate(&event.object_id).await {
            tracing::error!(object_id = %event.object_id, error = %err, "Failed to invalidate cached series");
        }
        if let Err(err) = self.bundles.invalidate(&event.object_id).await {
            tracing::error!(object_id = %event.object_id, error = %err, "Failed to invalidate cached identifier bundle");
        }
        self.downstream.publish(event).await;
    }
}

/// Read-through cache in front of a [`SeriesSource`].
///
/// Also a [`SeriesSource`] itself, so it can stand in wherever the
/// underlying source is expected.
///
/// Call [`CachingSeriesSource::shutdown`] before dropping it. Until then the
/// invalidating listener stays registered on the underlying source's change
/// manager and keeps both caches alive for as long as that source lives.
pub struct CachingSeriesSource<S: SeriesSource + 'static> {
    underlying: Arc<S>,
    series: Arc<SeriesCache>,
    bundles: Arc<BundleCache>,
    changes: Arc<ChangeManager>,
    listener_id: ListenerId,
    shut_down: AtomicBool,
}

impl<S: SeriesSource + 'static> CachingSeriesSource<S> {
    /// Wrap `underlying`, creating the cache stores through `provider`.
    ///
    /// Registers a listener on the underlying source's change manager that
    /// stays registered until [`CachingSeriesSource::shutdown`].
    pub async fn new<P: StoreProvider>(
        underlying: Arc<S>,
        provider: &P,
        config: &CacheConfig,
    ) -> ChronicleResult<Self> {
        let series = Arc::new(HierarchicalCache::new(
            config.store_name("series"),
            provider,
            series_identity,
            config,
        )?);
        let bundles = Arc::new(HierarchicalCache::new(
            config.store_name("bundles"),
            provider,
            bundle_identity,
            config,
        )?);
        let changes = Arc::new(ChangeManager::new());

        let listener = Arc::new(InvalidatingListener {
            series: Arc::clone(&series),
            bundles: Arc::clone(&bundles),
            downstream: Arc::clone(&changes),
        });
        let listener_id = underlying.change_manager().add_listener(listener).await;
        tracing::debug!(prefix = %config.name_prefix, listener = %listener_id, "Caching series source started");

        Ok(Self {
            underlying,
            series,
            bundles,
            changes,
            listener_id,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Wrap `underlying` with stores chosen by `config`.
    pub async fn from_config(underlying: Arc<S>, config: &CacheConfig) -> ChronicleResult<Self> {
        let provider = DefaultStoreProvider::from_config(config)?;
        Self::new(underlying, &provider, config).await
    }

    /// The points of the selected series inside `window`, limited to
    /// `|max_points|` points from the start (positive) or end (negative).
    ///
    /// `None` when the source has no such series. A window outside the
    /// series' dates gives an empty series.
    pub async fn get_series(
        &self,
        selector: &SeriesSelector,
        window: &DateWindow,
        max_points: Option<i32>,
    ) -> ChronicleResult<Option<HistoricalSeries>> {
        let range = RangeKey::for_window(window, max_points);
        let key = SeriesQueryKey::new(selector.clone(), Some(range));
        let canonical = range.canonical_window();
        let underlying = &self.underlying;

        let cached = self
            .series
            .get(&key, || underlying.series(selector, &canonical, range.max_points()))
            .await?;

        if range.is_exact_match(window, max_points) {
            return Ok(cached);
        }
        Ok(cached.map(|series| series.restrict(window, max_points)))
    }

    /// The whole stored series for `unique_id`.
    ///
    /// Latest-version requests share one cached series per object id;
    /// versioned requests are cached per version.
    pub async fn get_series_by_id(
        &self,
        unique_id: &UniqueId,
    ) -> ChronicleResult<Option<HistoricalSeries>> {
        let underlying = &self.underlying;
        if unique_id.is_latest() {
            return self
                .series
                .get_by_identity(unique_id.object_id(), || underlying.series_by_id(unique_id))
                .await;
        }

        let key = SeriesQueryKey::new(SeriesSelector::UniqueId(unique_id.clone()), None);
        self.series
            .get(&key, || underlying.series_by_id(unique_id))
            .await
    }

    /// The last point of the selected series.
    pub async fn get_latest_point(
        &self,
        selector: &SeriesSelector,
    ) -> ChronicleResult<Option<DataPoint>> {
        self.get_latest_point_within(selector, &DateWindow::all())
            .await
    }

    /// The last point of the selected series inside `window`.
    pub async fn get_latest_point_within(
        &self,
        selector: &SeriesSelector,
        window: &DateWindow,
    ) -> ChronicleResult<Option<DataPoint>> {
        let series = self.get_series(selector, window, Some(-1)).await?;
        Ok(series.and_then(|s| s.latest_point()))
    }

    /// Series for many bundles at once.
    ///
    /// Cached and tombstoned bundles are answered locally. The rest are
    /// fetched from the source in a single bulk call for the widened window;
    /// bundles it cannot resolve are tombstoned. Every requested bundle is a
    /// key of the result.
    pub async fn get_series_batch(
        &self,
        request: &SeriesBatchRequest,
        window: &DateWindow,
    ) -> ChronicleResult<HashMap<ExternalIdBundle, Option<HistoricalSeries>>> {
        let range = RangeKey::for_window(window, None);
        let exact = range.is_exact_match(window, None);
        let slice = |series: HistoricalSeries| {
            if exact {
                series
            } else {
                series.restrict(window, None)
            }
        };

        let mut results = HashMap::with_capacity(request.identifiers.len());
        let mut pending = Vec::new();
        for bundle in &request.identifiers {
            let key = SeriesQueryKey::new(request.selector_for(bundle), Some(range));
            match self.series.lookup(&key).await? {
                Lookup::Hit(series) => {
                    results.insert(bundle.clone(), Some(slice(series)));
                }
                Lookup::Missed => {
                    results.insert(bundle.clone(), None);
                }
                Lookup::Absent => pending.push((bundle.clone(), key)),
            }
        }

        if pending.is_empty() {
            return Ok(results);
        }

        tracing::debug!(
            requested = request.identifiers.len(),
            fetching = pending.len(),
            "Batch cache miss, fetching from source"
        );
        let missing = request.with_identifiers(pending.iter().map(|(bundle, _)| bundle.clone()));
        let mut fetched = self
            .underlying
            .series_batch(&missing, &range.canonical_window())
            .await?;

        for (bundle, key) in pending {
            match fetched.remove(&bundle).flatten() {
                Some(series) => {
                    self.series.insert(key, series.clone()).await?;
                    results.insert(bundle, Some(slice(series)));
                }
                None => {
                    self.series.mark_missed(&key).await?;
                    results.insert(bundle, None);
                }
            }
        }
        Ok(results)
    }

    /// The external identifiers of the series stored under `unique_id`.
    pub async fn get_external_id_bundle(
        &self,
        unique_id: &UniqueId,
    ) -> ChronicleResult<Option<ExternalIdBundle>> {
        let underlying = &self.underlying;
        self.bundles
            .get(unique_id, || underlying.external_id_bundle(unique_id))
            .await
    }

    /// Drop everything cached for `object_id`.
    pub async fn invalidate(&self, object_id: &ObjectId) -> ChronicleResult<()> {
        self.series.invalidate(object_id).await?;
        self.bundles.invalidate(object_id).await
    }

    /// Counters of the series cache.
    pub fn series_stats(&self) -> CacheStats {
        self.series.stats()
    }

    /// Counters of the identifier-bundle cache.
    pub fn bundle_stats(&self) -> CacheStats {
        self.bundles.stats()
    }

    /// Stop listening for upstream changes and release the caches.
    /// Idempotent. Every later read fails.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.underlying
            .change_manager()
            .remove_listener(self.listener_id)
            .await;
        self.series.shutdown().await;
        self.bundles.shutdown().await;
        tracing::debug!(listener = %self.listener_id, "Caching series source shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl<S: SeriesSource + 'static> Drop for CachingSeriesSource<S> {
    fn drop(&mut self) {
        if !self.is_shut_down() {
            tracing::warn!(
                listener = %self.listener_id,
                "Caching series source dropped without shutdown, its listener stays registered upstream"
            );
        }
    }
}

#[async_trait]
impl<S: SeriesSource + 'static> SeriesSource for CachingSeriesSource<S> {
    async fn series_by_id(&self, unique_id: &UniqueId) -> ChronicleResult<Option<HistoricalSeries>> {
        self.get_series_by_id(unique_id).await
    }

    async fn series(
        &self,
        selector: &SeriesSelector,
        window: &DateWindow,
        max_points: Option<i32>,
    ) -> ChronicleResult<Option<HistoricalSeries>> {
        self.get_series(selector, window, max_points).await
    }

    async fn series_batch(
        &self,
        request: &SeriesBatchRequest,
        window: &DateWindow,
    ) -> ChronicleResult<HashMap<ExternalIdBundle, Option<HistoricalSeries>>> {
        self.get_series_batch(request, window).await
    }

    async fn external_id_bundle(
        &self,
        unique_id: &UniqueId,
    ) -> ChronicleResult<Option<ExternalIdBundle>> {
        self.get_external_id_bundle(unique_id).await
    }

    /// Changes seen upstream, republished after the caches were invalidated.
    fn change_manager(&self) -> &ChangeManager {
        &self.changes
    }
}
