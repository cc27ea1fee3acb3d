//! Sample aggregation
//!
//! Bins raw samples onto the 15-minute grid and turns each bin into a
//! canonical [`Record`]:
//!
//! ```text
//!   RawSample* → drop out-of-span → per-bin, per-field mean (zeros excluded)
//!              → localize bin start → calendar fields + HH:MM:SS aggregates
//! ```
//!
//! The grid is derived from the requested span rather than from the samples,
//! so a window that was fetched but returned nothing still produces one
//! record per bin, with every aggregate missing.

use crate::sync::types::{
    align_to_grid, Bin, Field, RawSample, Record, TravelTime, BIN_WIDTH_SECS, DATE_TIME_FORMAT,
    FIELD_COUNT,
};
use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// How weekdays are numbered in the `DayOfWeek` column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WeekdayConvention {
    /// Sunday=1, Monday=2 … Saturday=7 (spreadsheet `WEEKDAY` default)
    #[default]
    SundayFirst,
    /// Monday=1 … Sunday=7 (ISO 8601)
    Iso,
}

impl WeekdayConvention {
    /// Index of `weekday` in 1..=7
    pub fn index(&self, weekday: Weekday) -> u8 {
        let idx = match self {
            WeekdayConvention::SundayFirst => weekday.num_days_from_sunday() + 1,
            WeekdayConvention::Iso => weekday.number_from_monday(),
        };
        idx as u8
    }
}

/// Running sum/count for one field of one bin
#[derive(Debug, Clone, Copy, Default)]
struct FieldAccumulator {
    sum: f64,
    count: u32,
}

impl FieldAccumulator {
    fn push(&mut self, value: f64) {
        // zero is the source's "no reading" marker
        if value != 0.0 && value.is_finite() {
            self.sum += value;
            self.count += 1;
        }
    }

    fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }
}

/// Bins samples and derives calendar and duration columns
#[derive(Debug, Clone)]
pub struct SampleAggregator {
    timezone: Tz,
    weekday: WeekdayConvention,
}

impl SampleAggregator {
    pub fn new(timezone: Tz, weekday: WeekdayConvention) -> Self {
        Self { timezone, weekday }
    }

    /// Aggregate every sample of `[span_start, span_end)` into records
    ///
    /// Records are ordered by bin start and there is exactly one per bin.
    pub fn aggregate(
        &self,
        samples: &[RawSample],
        span_start: DateTime<Utc>,
        span_end: DateTime<Utc>,
    ) -> Vec<Record> {
        self.bin(samples, span_start, span_end)
            .iter()
            .map(|bin| self.to_record(bin))
            .collect()
    }

    /// Compute the per-field means for every bin of the span
    pub fn bin(
        &self,
        samples: &[RawSample],
        span_start: DateTime<Utc>,
        span_end: DateTime<Utc>,
    ) -> Vec<Bin> {
        if span_start >= span_end {
            return Vec::new();
        }

        let grid_start = align_to_grid(span_start);
        let span_secs = (span_end - grid_start).num_seconds();
        let bin_count = ((span_secs + BIN_WIDTH_SECS - 1) / BIN_WIDTH_SECS) as usize;

        let mut accumulators = vec![[FieldAccumulator::default(); FIELD_COUNT]; bin_count];
        let mut discarded = 0usize;

        for sample in samples {
            let ts = match sample.timestamp() {
                Some(ts) if ts >= span_start && ts < span_end => ts,
                _ => {
                    discarded += 1;
                    continue;
                }
            };

            let idx = ((ts - grid_start).num_seconds() / BIN_WIDTH_SECS) as usize;
            let slot = &mut accumulators[idx];
            for (acc, field) in slot.iter_mut().zip(Field::ALL) {
                acc.push(sample.value(field));
            }
        }

        if discarded > 0 {
            tracing::debug!(discarded, "Dropped samples outside the aggregation span");
        }

        accumulators
            .iter()
            .enumerate()
            .map(|(i, slot)| Bin {
                start: grid_start + Duration::seconds(i as i64 * BIN_WIDTH_SECS),
                means: (*slot).map(|acc| acc.mean()),
            })
            .collect()
    }

    /// Localize a bin and format it as a canonical record
    pub fn to_record(&self, bin: &Bin) -> Record {
        let local = bin.start.with_timezone(&self.timezone);

        Record {
            timestamp: bin.start,
            date_time: local.format(DATE_TIME_FORMAT).to_string(),
            month: local.format("%B").to_string(),
            day: local.format("%A").to_string(),
            day_of_week: self.weekday.index(local.weekday()),
            date: local.format("%Y-%m-%d").to_string(),
            time: local.format("%H:%M:%S").to_string(),
            travel_times: bin.means.map(|m| m.map(TravelTime::from_millis)),
        }
    }
}
