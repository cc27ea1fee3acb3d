//! Travelsync Sync Engine
//!
//! This module provides the incremental catch-up logic:
//!
//! - **types**: Core data structures (Window, RawSample, Record)
//! - **planner**: Splits a span into day-sized fetch windows
//! - **aggregator**: 15-minute binning, localization and formatting
//! - **watermark**: Derives where the next cycle starts and ends
//! - **controller**: Runs cycles per series and across series
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Cycle:
//!   Store tail → Watermark → Windows → Fetch (per window) → Aggregate (whole span)
//!             → Append → Prune
//! ```

pub mod aggregator;
pub mod controller;
pub mod error;
pub mod planner;
pub mod types;
pub mod watermark;

// Re-export commonly used types
pub use aggregator::{SampleAggregator, WeekdayConvention};
pub use controller::{
    CycleOutcome, CycleState, RunSummary, SeriesFailure, SeriesSyncController,
    SpanData, SyncReport, SyncSettings,
};
pub use error::{SyncError, SyncResult};
pub use planner::{plan, window_count};
pub use types::{
    align_to_grid, bin_width, Bin, Field, RawSample, Record, TravelTime, Window, BIN_WIDTH_SECS,
    FIELD_COUNT, RECORD_HEADER, WINDOW_SECS,
};
pub use watermark::{local_midnight, Watermark, WatermarkTracker};
