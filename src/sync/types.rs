//! Core data types for the synchronization engine
//!
//! This module defines the values that flow through one sync cycle:
//! - `Window`: a bounded half-open fetch range
//! - `RawSample`: one measurement row as delivered by the source
//! - `Field`: the measured travel-time fields
//! - `Bin`: a grid slot with per-field means
//! - `Record`: the canonical persisted row
//! - `TravelTime`: a duration rendered as `HH:MM:SS`

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Width of one aggregation bin in seconds (15 minutes)
pub const BIN_WIDTH_SECS: i64 = 15 * 60;

/// Maximum width of one fetch window in seconds (24 hours)
pub const WINDOW_SECS: i64 = 86_400;

/// Width of one aggregation bin
pub fn bin_width() -> Duration {
    Duration::seconds(BIN_WIDTH_SECS)
}

/// Align an instant down to the start of its grid bin
pub fn align_to_grid(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp();
    let aligned = secs - secs.rem_euclid(BIN_WIDTH_SECS);
    DateTime::<Utc>::from_timestamp(aligned, 0).unwrap_or(ts)
}

/// Half-open time range `[start, end)` submitted to the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    /// Start instant (inclusive)
    pub start: DateTime<Utc>,
    /// End instant (exclusive)
    pub end: DateTime<Utc>,
}

impl Window {
    /// Create a window, returning None if it would be empty
    pub fn try_new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        if start < end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// Start bound as epoch seconds, the unit the source API expects
    pub fn start_epoch(&self) -> i64 {
        self.start.timestamp()
    }

    /// End bound as epoch seconds
    pub fn end_epoch(&self) -> i64 {
        self.end.timestamp()
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Check if an instant falls within this window
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start_epoch(), self.end_epoch())
    }
}

/// A measured travel-time field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Strengths,
    Firsts,
    Lasts,
    Minimums,
    Maximums,
}

/// Number of measured fields carried by every sample and record
pub const FIELD_COUNT: usize = 5;

impl Field {
    /// All fields in canonical column order
    pub const ALL: [Field; FIELD_COUNT] = [
        Field::Strengths,
        Field::Firsts,
        Field::Lasts,
        Field::Minimums,
        Field::Maximums,
    ];

    /// Column header used by both the source payload and the persisted table
    pub fn header(&self) -> &'static str {
        match self {
            Field::Strengths => "Strengths",
            Field::Firsts => "Firsts",
            Field::Lasts => "Lasts",
            Field::Minimums => "Minimums",
            Field::Maximums => "Maximums",
        }
    }
}

/// One raw measurement row from the source
///
/// All measured values are milliseconds; `0` means no reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    /// Unix timestamp in milliseconds
    #[serde(rename = "Timestamp")]
    pub timestamp_ms: i64,
    #[serde(rename = "Strengths", default)]
    pub strengths: f64,
    #[serde(rename = "Firsts", default)]
    pub firsts: f64,
    #[serde(rename = "Lasts", default)]
    pub lasts: f64,
    #[serde(rename = "Minimums", default)]
    pub minimums: f64,
    #[serde(rename = "Maximums", default)]
    pub maximums: f64,
}

impl RawSample {
    /// Create a sample with every field set to the sentinel
    pub fn empty(timestamp_ms: i64) -> Self {
        Self {
            timestamp_ms,
            strengths: 0.0,
            firsts: 0.0,
            lasts: 0.0,
            minimums: 0.0,
            maximums: 0.0,
        }
    }

    /// Builder method: set one field
    pub fn with(mut self, field: Field, value: f64) -> Self {
        match field {
            Field::Strengths => self.strengths = value,
            Field::Firsts => self.firsts = value,
            Field::Lasts => self.lasts = value,
            Field::Minimums => self.minimums = value,
            Field::Maximums => self.maximums = value,
        }
        self
    }

    pub fn value(&self, field: Field) -> f64 {
        match field {
            Field::Strengths => self.strengths,
            Field::Firsts => self.firsts,
            Field::Lasts => self.lasts,
            Field::Minimums => self.minimums,
            Field::Maximums => self.maximums,
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.timestamp_ms)
    }
}

/// A grid slot with the mean of each field's non-sentinel values
#[derive(Debug, Clone, PartialEq)]
pub struct Bin {
    /// Bin start, aligned to the 15-minute grid
    pub start: DateTime<Utc>,
    /// Per-field mean in milliseconds, None when no reading contributed
    pub means: [Option<f64>; FIELD_COUNT],
}

/// A cumulative travel duration, printed as `HH:MM:SS`
///
/// Hours are not wrapped at 24: `TravelTime::from_secs(90_000)` prints `25:00:00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TravelTime(u64);

impl TravelTime {
    pub fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Convert a millisecond mean, rounding to the nearest second
    pub fn from_millis(millis: f64) -> Self {
        Self((millis.max(0.0) / 1000.0).round() as u64)
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TravelTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hours = self.0 / 3600;
        let minutes = (self.0 / 60) % 60;
        let seconds = self.0 % 60;
        write!(f, "{:02}:{:02}:{:02}", hours, minutes, seconds)
    }
}

/// Canonical table header, in persisted column order
pub const RECORD_HEADER: [&str; 6 + FIELD_COUNT] = [
    "DateTime",
    "Month",
    "Day",
    "DayOfWeek",
    "Date",
    "Time",
    "Strengths",
    "Firsts",
    "Lasts",
    "Minimums",
    "Maximums",
];

/// Format of the `DateTime` column (local wall-clock time)
pub const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One persisted row: a localized bin with formatted aggregates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Bin start in UTC; the store's ordering key
    pub timestamp: DateTime<Utc>,
    /// Local `YYYY-MM-DD HH:MM:SS`
    pub date_time: String,
    /// Full month name
    pub month: String,
    /// Full weekday name
    pub day: String,
    /// Weekday index in 1..=7 under the configured convention
    pub day_of_week: u8,
    /// Local `YYYY-MM-DD`
    pub date: String,
    /// Local `HH:MM:SS`
    pub time: String,
    /// Aggregates in canonical field order; None when missing
    pub travel_times: [Option<TravelTime>; FIELD_COUNT],
}

impl Record {
    /// Render the row in canonical column order, missing aggregates as empty cells
    pub fn to_row(&self) -> Vec<String> {
        let mut row = vec![
            self.date_time.clone(),
            self.month.clone(),
            self.day.clone(),
            self.day_of_week.to_string(),
            self.date.clone(),
            self.time.clone(),
        ];
        row.extend(
            self.travel_times
                .iter()
                .map(|t| t.map(|t| t.to_string()).unwrap_or_default()),
        );
        row
    }

    pub fn travel_time(&self, field: Field) -> Option<TravelTime> {
        let idx = Field::ALL.iter().position(|f| *f == field)?;
        self.travel_times[idx]
    }

    /// True when no field carried a reading
    pub fn is_missing(&self) -> bool {
        self.travel_times.iter().all(Option::is_none)
    }
}
