//! Backfill time bounds and per-day window clipping
//!
//! A backfill covers `[lower, upper)`: `lower` is the retention horizon
//! (today at midnight UTC minus the retention window) and `upper` is the
//! earliest record the live sink already captured. Every calendar day that
//! intersects that range becomes one window, clipped to the range.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// A half-open time range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Whole calendar day `[00:00, next 00:00)` in UTC
    pub fn for_day(date: NaiveDate) -> Self {
        let start = day_start(date);
        Self {
            start,
            end: start + Duration::days(1),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Midnight UTC at the start of `date`
pub fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Truncate a timestamp to midnight UTC of the same day
pub fn truncate_to_day(ts: DateTime<Utc>) -> DateTime<Utc> {
    day_start(ts.date_naive())
}

/// Validated global bounds for one sink's backfill, `lower < upper`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillBounds {
    lower: DateTime<Utc>,
    upper: DateTime<Utc>,
}

impl BackfillBounds {
    /// Returns `None` when there is nothing to backfill (`upper <= lower`)
    pub fn new(lower: DateTime<Utc>, upper: DateTime<Utc>) -> Option<Self> {
        if upper <= lower {
            return None;
        }
        Some(Self { lower, upper })
    }

    /// Retention horizon: `now` truncated to the day, minus `retention_days`
    pub fn retention_lower_bound(now: DateTime<Utc>, retention_days: u32) -> DateTime<Utc> {
        truncate_to_day(now) - Duration::days(i64::from(retention_days))
    }

    pub fn lower(&self) -> DateTime<Utc> {
        self.lower
    }

    pub fn upper(&self) -> DateTime<Utc> {
        self.upper
    }

    pub fn as_window(&self) -> TimeWindow {
        TimeWindow::new(self.lower, self.upper)
    }

    /// Calendar days whose `[dayStart, dayEnd)` intersects `[lower, upper)`
    ///
    /// A day that starts exactly at `upper` is excluded, since its clipped
    /// window would be empty.
    pub fn days(&self) -> Vec<NaiveDate> {
        let first = self.lower.date_naive();
        let mut days = Vec::new();
        let mut current = first;
        while day_start(current) < self.upper {
            days.push(current);
            match current.succ_opt() {
                Some(next) => current = next,
                None => break,
            }
        }
        days
    }

    /// Clip one calendar day to the bounds:
    /// `[max(lower, dayStart), min(upper, dayEnd)]`
    ///
    /// The result always satisfies `lower <= start <= end <= upper`, even for
    /// days entirely outside the bounds (those collapse to an empty window
    /// pinned to the nearest bound).
    pub fn clip_day(&self, date: NaiveDate) -> TimeWindow {
        let day = TimeWindow::for_day(date);
        let start = day.start.max(self.lower).min(self.upper);
        let end = day.end.min(self.upper).max(start);
        TimeWindow::new(start, end)
    }
}
