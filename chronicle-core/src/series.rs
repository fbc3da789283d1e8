//! Date-indexed series values and the windows used to query them.

use crate::{ObjectId, UniqueId};
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// DATA POINTS
// ============================================================================

/// A single observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// An immutable, date-ordered series with at most one point per date.
///
/// Points live behind an `Arc`, so cloning a series is cheap and every
/// derived series (sub-series, head, tail) is a fresh allocation that never
/// aliases a cached copy mutably.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateDoubleSeries {
    points: Arc<[DataPoint]>,
}

impl Default for DateDoubleSeries {
    fn default() -> Self {
        Self::empty()
    }
}

impl DateDoubleSeries {
    pub fn empty() -> Self {
        Self {
            points: Arc::from(Vec::new()),
        }
    }

    /// Build a series from unordered points.
    ///
    /// Points are sorted by date; when a date repeats, the last value
    /// supplied for it wins.
    pub fn from_points(points: impl IntoIterator<Item = (NaiveDate, f64)>) -> Self {
        let mut sorted: Vec<DataPoint> = points
            .into_iter()
            .map(|(date, value)| DataPoint { date, value })
            .collect();
        sorted.sort_by_key(|p| p.date);

        let mut unique: Vec<DataPoint> = Vec::with_capacity(sorted.len());
        for point in sorted {
            match unique.last_mut() {
                Some(last) if last.date == point.date => *last = point,
                _ => unique.push(point),
            }
        }
        Self {
            points: unique.into(),
        }
    }

    fn from_slice(points: &[DataPoint]) -> Self {
        Self {
            points: Arc::from(points),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[DataPoint] {
        &self.points
    }

    pub fn iter(&self) -> impl Iterator<Item = &DataPoint> {
        self.points.iter()
    }

    pub fn earliest(&self) -> Option<DataPoint> {
        self.points.first().copied()
    }

    pub fn latest(&self) -> Option<DataPoint> {
        self.points.last().copied()
    }

    /// Points with `start <= date <= end`.
    pub fn sub_series(&self, start: NaiveDate, end: NaiveDate) -> Self {
        if start > end {
            return Self::empty();
        }
        let lo = self.points.partition_point(|p| p.date < start);
        let hi = self.points.partition_point(|p| p.date <= end);
        if lo == 0 && hi == self.points.len() {
            return self.clone();
        }
        Self::from_slice(&self.points[lo..hi])
    }

    /// The first `n` points.
    pub fn head(&self, n: usize) -> Self {
        if n >= self.points.len() {
            return self.clone();
        }
        Self::from_slice(&self.points[..n])
    }

    /// The last `n` points.
    pub fn tail(&self, n: usize) -> Self {
        let len = self.points.len();
        if n >= len {
            return self.clone();
        }
        Self::from_slice(&self.points[len - n..])
    }
}

// ============================================================================
// DATE WINDOW
// ============================================================================

/// A requested date range. Absent bounds are unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: Option<NaiveDate>,
    pub include_start: bool,
    pub end: Option<NaiveDate>,
    pub include_end: bool,
}

impl Default for DateWindow {
    fn default() -> Self {
        Self::all()
    }
}

impl DateWindow {
    pub const fn new(
        start: Option<NaiveDate>,
        include_start: bool,
        end: Option<NaiveDate>,
        include_end: bool,
    ) -> Self {
        Self {
            start,
            include_start,
            end,
            include_end,
        }
    }

    /// The whole series.
    pub const fn all() -> Self {
        Self::new(None, true, None, true)
    }

    /// `[start, end]`, both inclusive.
    pub const fn closed(start: NaiveDate, end: NaiveDate) -> Self {
        Self::new(Some(start), true, Some(end), true)
    }

    /// Everything from `start` onwards, inclusive.
    pub const fn since(start: NaiveDate) -> Self {
        Self::new(Some(start), true, None, true)
    }

    /// Everything up to `end`, inclusive.
    pub const fn until(end: NaiveDate) -> Self {
        Self::new(None, true, Some(end), true)
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

// ============================================================================
// HISTORICAL SERIES
// ============================================================================

/// A stored series together with the id of the entity it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalSeries {
    unique_id: UniqueId,
    series: DateDoubleSeries,
}

impl HistoricalSeries {
    pub fn new(unique_id: UniqueId, series: DateDoubleSeries) -> Self {
        Self { unique_id, series }
    }

    pub fn unique_id(&self) -> &UniqueId {
        &self.unique_id
    }

    pub fn object_id(&self) -> &ObjectId {
        self.unique_id.object_id()
    }

    pub fn series(&self) -> &DateDoubleSeries {
        &self.series
    }

    pub fn latest_point(&self) -> Option<DataPoint> {
        self.series.latest()
    }

    fn emptied(&self) -> Self {
        Self::new(self.unique_id.clone(), DateDoubleSeries::empty())
    }

    /// Cut `window` out of this series, then keep at most `|max_points|`
    /// points: the first ones for a non-negative limit, the last ones for a
    /// negative limit.
    ///
    /// Exclusive bounds move one day inwards before being clamped to the
    /// series' own extent. A window that lies wholly outside the series
    /// yields an empty series with the same id, never `None`.
    pub fn restrict(&self, window: &DateWindow, max_points: Option<i32>) -> HistoricalSeries {
        if window.is_unbounded() && max_points.is_none() {
            return self.clone();
        }
        let (Some(earliest), Some(latest)) = (self.series.earliest(), self.series.latest()) else {
            return self.clone();
        };

        let start = match window.start {
            None => earliest.date,
            Some(start) => {
                let first = if window.include_start {
                    Some(start)
                } else {
                    start.checked_add_days(Days::new(1))
                };
                match first {
                    Some(first) => first.max(earliest.date),
                    None => return self.emptied(),
                }
            }
        };
        let end = match window.end {
            None => latest.date,
            Some(end) => {
                let last = if window.include_end {
                    Some(end)
                } else {
                    end.checked_sub_days(Days::new(1))
                };
                match last {
                    Some(last) => last.min(latest.date),
                    None => return self.emptied(),
                }
            }
        };
        if start > latest.date || end < earliest.date {
            return self.emptied();
        }

        let mut series = self.series.sub_series(start, end);
        if let Some(limit) = max_points {
            let n = limit.unsigned_abs() as usize;
            if n < series.len() {
                series = if limit >= 0 {
                    series.head(n)
                } else {
                    series.tail(n)
                };
            }
        }
        Self::new(self.unique_id.clone(), series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn ten_days() -> HistoricalSeries {
        let uid: UniqueId = "Test~1".parse().expect("valid id");
        let series =
            DateDoubleSeries::from_points((1..=10).map(|d| (date(2020, 1, d), f64::from(d))));
        HistoricalSeries::new(uid, series)
    }

    #[test]
    fn test_from_points_sorts_and_keeps_last_duplicate() {
        let series = DateDoubleSeries::from_points([
            (date(2020, 1, 3), 3.0),
            (date(2020, 1, 1), 1.0),
            (date(2020, 1, 3), 30.0),
        ]);
        assert_eq!(series.len(), 2);
        assert_eq!(series.earliest().map(|p| p.date), Some(date(2020, 1, 1)));
        assert_eq!(series.latest().map(|p| p.value), Some(30.0));
    }

    #[test]
    fn test_sub_series_inclusive() {
        let hts = ten_days();
        let sub = hts.series().sub_series(date(2020, 1, 3), date(2020, 1, 5));
        let dates: Vec<_> = sub.iter().map(|p| p.date.format("%d").to_string()).collect();
        assert_eq!(dates, vec!["03", "04", "05"]);
        assert!(hts
            .series()
            .sub_series(date(2020, 1, 5), date(2020, 1, 3))
            .is_empty());
    }

    #[test]
    fn test_head_and_tail() {
        let series = ten_days().series().clone();
        assert_eq!(series.head(2).latest().map(|p| p.value), Some(2.0));
        assert_eq!(series.tail(2).earliest().map(|p| p.value), Some(9.0));
        assert_eq!(series.head(50).len(), 10);
        assert_eq!(series.tail(0).len(), 0);
    }

    #[test]
    fn test_restrict_exclusive_bounds() {
        let hts = ten_days();
        let window = DateWindow::new(Some(date(2020, 1, 2)), false, Some(date(2020, 1, 6)), false);
        let restricted = hts.restrict(&window, None);
        let values: Vec<f64> = restricted.series().iter().map(|p| p.value).collect();
        assert_eq!(values, vec![3.0, 4.0, 5.0]);
        assert_eq!(restricted.unique_id(), hts.unique_id());
    }

    #[test]
    fn test_restrict_outside_series_is_empty_not_missing() {
        let hts = ten_days();
        let after = hts.restrict(&DateWindow::since(date(2021, 1, 1)), None);
        assert!(after.series().is_empty());
        assert_eq!(after.unique_id(), hts.unique_id());

        let before = hts.restrict(&DateWindow::until(date(2019, 12, 31)), None);
        assert!(before.series().is_empty());
    }

    #[test]
    fn test_restrict_max_points_sign() {
        let hts = ten_days();
        let window = DateWindow::closed(date(2020, 1, 3), date(2020, 1, 8));

        let first = hts.restrict(&window, Some(2));
        let values: Vec<f64> = first.series().iter().map(|p| p.value).collect();
        assert_eq!(values, vec![3.0, 4.0]);

        let last = hts.restrict(&window, Some(-2));
        let values: Vec<f64> = last.series().iter().map(|p| p.value).collect();
        assert_eq!(values, vec![7.0, 8.0]);

        let none = hts.restrict(&window, Some(0));
        assert!(none.series().is_empty());
    }

    #[test]
    fn test_restrict_does_not_touch_source() {
        let hts = ten_days();
        let _ = hts.restrict(&DateWindow::closed(date(2020, 1, 3), date(2020, 1, 4)), Some(1));
        assert_eq!(hts.series().len(), 10);
    }

    #[test]
    fn test_restrict_unbounded_unlimited_is_whole_series() {
        let hts = ten_days();
        assert!(DateWindow::all().is_unbounded());
        assert!(!DateWindow::since(date(2020, 1, 1)).is_unbounded());
        assert_eq!(hts.restrict(&DateWindow::all(), None), hts);
        assert_eq!(hts.restrict(&DateWindow::all(), Some(-2)).series().len(), 2);
    }

    #[test]
    fn test_restrict_empty_series_returns_itself() {
        let uid: UniqueId = "Test~2".parse().expect("valid id");
        let hts = HistoricalSeries::new(uid, DateDoubleSeries::empty());
        let restricted = hts.restrict(&DateWindow::closed(date(2020, 1, 1), date(2020, 2, 1)), Some(-1));
        assert_eq!(restricted, hts);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_from_points_is_strictly_ordered(
            offsets in proptest::collection::vec((0u64..400, -1e6f64..1e6), 0..64)
        ) {
            let base = date(2020, 1, 1);
            let series = DateDoubleSeries::from_points(
                offsets.iter().map(|(days, value)| (base + Days::new(*days), *value)),
            );
            for pair in series.points().windows(2) {
                prop_assert!(pair[0].date < pair[1].date);
            }
        }

        #[test]
        fn prop_restrict_stays_inside_window(
            lo in 0u64..20,
            span in 0u64..20,
            limit in proptest::option::of(-12i32..12),
        ) {
            let hts = ten_days();
            let start = date(2019, 12, 25) + Days::new(lo);
            let end = start + Days::new(span);
            let restricted = hts.restrict(&DateWindow::closed(start, end), limit);

            prop_assert!(restricted.series().iter().all(|p| p.date >= start && p.date <= end));
            if let Some(limit) = limit {
                prop_assert!(restricted.series().len() <= limit.unsigned_abs() as usize);
            }
        }
    }
}
