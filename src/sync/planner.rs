//! Window planning
//!
//! Splits a catch-up span into day-sized fetch windows. The source caps a
//! single request at 24 hours, so `[from, to)` becomes a run of contiguous
//! 86400 s windows with a truncated final window for any remainder.

use crate::sync::types::{Window, WINDOW_SECS};
use chrono::{DateTime, Duration, Utc};

/// Plan the fetch windows covering `[from, to)`
///
/// Returns an empty plan when `from >= to`, which means the series is
/// already caught up. Planning is deterministic, so a cycle re-run after a
/// failure requests exactly the same windows.
pub fn plan(from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<Window> {
    let mut windows = Vec::with_capacity(window_count(from, to));
    let step = Duration::seconds(WINDOW_SECS);

    let mut start = from;
    while start < to {
        let end = std::cmp::min(start + step, to);
        if let Some(window) = Window::try_new(start, end) {
            windows.push(window);
        }
        start = end;
    }

    windows
}

/// Number of windows `plan(from, to)` produces: `ceil((to - from) / 86400)`
pub fn window_count(from: DateTime<Utc>, to: DateTime<Utc>) -> usize {
    if from >= to {
        return 0;
    }
    let span_ms = (to - from).num_milliseconds();
    let window_ms = WINDOW_SECS * 1000;
    ((span_ms + window_ms - 1) / window_ms) as usize
}
