//! Canonical sub-range keys.
//!
//! Requests for nearby date ranges are widened to whole calendar years and
//! point limits are rounded up to the next multiple of [`BLOCK_SIZE`], so
//! that many distinct requests share one cached fetch. The exact request is
//! then cut out of the shared series.

use chrono::{Datelike, NaiveDate};
use chronicle_core::DateWindow;
use serde::{Deserialize, Serialize};

/// Granularity of canonical point limits.
pub const BLOCK_SIZE: i64 = 1024;

/// A widened `(start, end, max_points)` request descriptor.
///
/// The canonical start is inclusive. The canonical end, when present, is
/// exclusive: it is always 1 January of the year after the requested end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RangeKey {
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    max_points: Option<i32>,
}

fn start_of_year(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date)
}

fn start_of_next_year(date: NaiveDate) -> Option<NaiveDate> {
    date.year()
        .checked_add(1)
        .and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1))
}

/// Round `n` up past the next block boundary. A multiple of the block size
/// still gains a whole block.
fn round_up_to_block(n: i64) -> i64 {
    n + BLOCK_SIZE - (n & (BLOCK_SIZE - 1))
}

impl RangeKey {
    /// Widen a request.
    ///
    /// A positive `max_points` (first N points from the start) grows by the
    /// days between the canonical and the requested start; a negative one
    /// (last N points up to the end) grows by the days between the requested
    /// and the canonical end. Both are then rounded up to a block boundary.
    /// Zero stays zero. A limit too large for `i32` after widening becomes
    /// unlimited, as does a negative limit whose end cannot be widened.
    pub fn canonicalize(
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        max_points: Option<i32>,
    ) -> Self {
        let canonical_start = start.map(start_of_year);
        let canonical_end = end.and_then(start_of_next_year);

        let max_points = match max_points {
            None => None,
            Some(0) => Some(0),
            Some(limit) if limit < 0 => {
                let mut amp = -i64::from(limit);
                match (end, canonical_end) {
                    (Some(end), Some(canonical_end)) => {
                        amp += (canonical_end - end).num_days();
                        i32::try_from(-round_up_to_block(amp)).ok()
                    }
                    (Some(_), None) => None,
                    (None, _) => i32::try_from(-round_up_to_block(amp)).ok(),
                }
            }
            Some(limit) => {
                let mut mp = i64::from(limit);
                if let (Some(start), Some(canonical_start)) = (start, canonical_start) {
                    mp += (start - canonical_start).num_days();
                }
                i32::try_from(round_up_to_block(mp)).ok()
            }
        };

        Self {
            start: canonical_start,
            end: canonical_end,
            max_points,
        }
    }

    /// Widen the request described by `window` and `max_points`.
    pub fn for_window(window: &DateWindow, max_points: Option<i32>) -> Self {
        Self::canonicalize(window.start, window.end, max_points)
    }

    pub fn start(&self) -> Option<NaiveDate> {
        self.start
    }

    pub fn end(&self) -> Option<NaiveDate> {
        self.end
    }

    pub fn max_points(&self) -> Option<i32> {
        self.max_points
    }

    pub fn include_start(&self) -> bool {
        true
    }

    /// Inclusive only when unbounded.
    pub fn include_end(&self) -> bool {
        self.end.is_none()
    }

    /// The window to fetch from the source.
    pub fn canonical_window(&self) -> DateWindow {
        DateWindow::new(self.start, self.include_start(), self.end, self.include_end())
    }

    /// True when a fetch of this key is exactly what the caller asked for,
    /// so no slicing is needed.
    ///
    /// An include flag is only compared when its bound is present.
    pub fn is_exact_match(&self, window: &DateWindow, max_points: Option<i32>) -> bool {
        window.start == self.start
            && window.end == self.end
            && (window.start.is_none() || window.include_start == self.include_start())
            && (window.end.is_none() || window.include_end == self.include_end())
            && max_points == self.max_points
    }

    /// True when every date `window` admits is inside the canonical window.
    pub fn contains(&self, window: &DateWindow) -> bool {
        let start_ok = match (self.start, window.start) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(canonical), Some(start)) => start >= canonical,
        };
        let end_ok = match (self.end, window.end) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(canonical), Some(end)) => {
                end < canonical || (end == canonical && !window.include_end)
            }
        };
        start_ok && end_ok
    }
}
