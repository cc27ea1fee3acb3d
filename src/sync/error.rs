//! Cycle error types

use crate::source::FetchError;
use crate::store::StoreError;
use chrono::NaiveDate;
use thiserror::Error;

/// Errors that abandon one series' cycle
///
/// None of these advance the watermark, so the whole cycle can be re-run.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A window could not be fetched; nothing was appended
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Aggregated records would not extend the table forward in time
    #[error("Merge rejected: {0}")]
    Merge(StoreError),

    /// The table could not be read or written
    #[error("Store error: {0}")]
    Store(StoreError),

    /// A backfill range that is reversed or runs past the last representable date
    #[error("Invalid date range {from} to {to}")]
    InvalidRange { from: NaiveDate, to: NaiveDate },
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::OutOfOrder { .. } => SyncError::Merge(err),
            other => SyncError::Store(other),
        }
    }
}

/// Result type alias for cycle operations
pub type SyncResult<T> = Result<T, SyncError>;
