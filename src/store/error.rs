//! Store error types
//!
//! Defines all errors that can occur while reading, appending to, or
//! pruning a series table.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur in a sync store
#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Reading or writing the CSV table failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Records would not extend the table strictly forward in time
    #[error("Out-of-order append for series {series}: {timestamp} is not after {previous}")]
    OutOfOrder {
        series: String,
        timestamp: DateTime<Utc>,
        previous: DateTime<Utc>,
    },

    /// Persisted data could not be interpreted
    #[error("Corrupt table: {0}")]
    Corruption(String),

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
