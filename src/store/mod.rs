//! Series tables
//!
//! This module provides the persisted side of a sync cycle:
//!
//! - **csv_store**: flat CSV table per series (the production backend)
//! - **memory**: in-process tables for tests and dry runs
//! - **error**: Error types
//!
//! # Write Path
//!
//! ```text
//!   Records → order check against tail → append (fsync) → prune (temp file + rename)
//! ```
//!
//! Append and prune are separate steps: a failed prune leaves every appended
//! row in place and is simply retried on the next cycle.

pub mod csv_store;
pub mod error;
pub mod memory;

pub use csv_store::CsvSyncStore;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;

use crate::series::Series;
use crate::sync::types::Record;
use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

/// How far back from the most recent record a table keeps data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retention {
    months: u32,
}

impl Retention {
    pub fn months(months: u32) -> Self {
        Self { months }
    }

    /// Two calendar years
    pub fn two_years() -> Self {
        Self::months(24)
    }

    /// Oldest instant kept when `latest` is the newest record
    pub fn cutoff(&self, latest: DateTime<Utc>) -> DateTime<Utc> {
        latest
            .checked_sub_months(Months::new(self.months))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl Default for Retention {
    fn default() -> Self {
        Self::two_years()
    }
}

/// Append-only, time-ordered table per series
///
/// Each series' table is written only by that series' cycle, so
/// implementations need no cross-series coordination.
pub trait SyncStore: Send + Sync {
    /// Timestamp of the newest record, or None if the series was never synced
    fn tail_timestamp(&self, series: &Series) -> StoreResult<Option<DateTime<Utc>>>;

    /// Append records after the current tail
    ///
    /// Every record must be strictly later than the tail and than the record
    /// before it. On violation nothing is written and `OutOfOrder` is returned.
    fn append(&self, series: &Series, records: &[Record]) -> StoreResult<usize>;

    /// Remove records older than `latest - retention`, returning how many went
    ///
    /// Pruning an already-pruned table removes nothing.
    fn prune(&self, series: &Series, retention: Retention) -> StoreResult<usize>;

    /// Number of records currently held for the series
    fn len(&self, series: &Series) -> StoreResult<usize>;

    fn is_empty(&self, series: &Series) -> StoreResult<bool> {
        Ok(self.len(series)? == 0)
    }
}

/// Verify that `records` extend `tail` strictly forward in time
pub fn check_append_order(
    series: &Series,
    tail: Option<DateTime<Utc>>,
    records: &[Record],
) -> StoreResult<()> {
    let mut previous = tail;
    for record in records {
        if let Some(prev) = previous {
            if record.timestamp <= prev {
                return Err(StoreError::OutOfOrder {
                    series: series.id().to_string(),
                    timestamp: record.timestamp,
                    previous: prev,
                });
            }
        }
        previous = Some(record.timestamp);
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::sync::aggregator::{SampleAggregator, WeekdayConvention};
    use crate::sync::types::Record;
    use chrono::{DateTime, Duration, Utc};

    /// Empty-aggregate records for every bin of `[start, start + bins * 15min)`
    pub fn records(start: DateTime<Utc>, bins: i64) -> Vec<Record> {
        let aggregator =
            SampleAggregator::new(chrono_tz::America::Chicago, WeekdayConvention::SundayFirst);
        aggregator.aggregate(&[], start, start + Duration::minutes(15 * bins))
    }
}
