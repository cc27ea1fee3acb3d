//! Watermark derivation
//!
//! The watermark is never persisted. Every cycle recomputes it from the
//! store's tail: one bin past the newest record, or `now - retention` for a
//! series that has never been synced.

use crate::series::Series;
use crate::store::{Retention, StoreResult, SyncStore};
use crate::sync::types::{align_to_grid, bin_width};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use std::fmt;

/// Where the next cycle starts, and why
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Watermark {
    /// One bin after the stored tail
    Resumed(DateTime<Utc>),
    /// The store was empty; seeded from the retention horizon
    Seeded(DateTime<Utc>),
}

impl Watermark {
    pub fn instant(&self) -> DateTime<Utc> {
        match self {
            Watermark::Resumed(ts) | Watermark::Seeded(ts) => *ts,
        }
    }

    pub fn is_seeded(&self) -> bool {
        matches!(self, Watermark::Seeded(_))
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Watermark::Resumed(ts) => write!(f, "{} (resumed)", ts),
            Watermark::Seeded(ts) => write!(f, "{} (seeded)", ts),
        }
    }
}

/// Derives cycle bounds from the store and the wall clock
#[derive(Debug, Clone)]
pub struct WatermarkTracker {
    retention: Retention,
    timezone: Tz,
}

impl WatermarkTracker {
    pub fn new(retention: Retention, timezone: Tz) -> Self {
        Self {
            retention,
            timezone,
        }
    }

    /// Smallest instant not yet covered by the series' table
    pub fn next_window_start(
        &self,
        store: &dyn SyncStore,
        series: &Series,
        now: DateTime<Utc>,
    ) -> StoreResult<Watermark> {
        Ok(match store.tail_timestamp(series)? {
            Some(tail) => Watermark::Resumed(tail + bin_width()),
            None => Watermark::Seeded(self.seed(now)),
        })
    }

    /// Start for a never-synced series: `now - retention`, aligned to the grid
    pub fn seed(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        align_to_grid(self.retention.cutoff(now))
    }

    /// The most recent local midnight at or before `now`
    ///
    /// Cycles stop there so that the still-accumulating current day is
    /// never ingested.
    pub fn cycle_end(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.with_timezone(&self.timezone).date_naive();
        local_midnight(self.timezone, today)
    }
}

/// Start of `date` in `timezone`, as UTC
///
/// Zones that skip midnight on a transition day start at the first
/// instant that exists.
pub fn local_midnight(timezone: Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(chrono::NaiveTime::MIN);

    let mut probe = midnight;
    for _ in 0..4 {
        if let Some(dt) = timezone.from_local_datetime(&probe).earliest() {
            return dt.with_timezone(&Utc);
        }
        probe += Duration::minutes(30);
    }

    // no zone has a gap this wide; fall back to treating midnight as UTC
    Utc.from_utc_datetime(&midnight)
}
