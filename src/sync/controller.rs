//! Series Sync Controller
//!
//! Runs one catch-up cycle per series and fans cycles out across series.
//!
//! ```text
//!   Idle → Planning → Fetching → Aggregating → Appending → Pruning → Idle
//!                        │
//!                        └── fetch error ──→ Idle (nothing appended)
//! ```
//!
//! All state of a cycle lives in its own context; series share nothing
//! but the read-only controller, so cycles may run in any order.

use crate::series::Series;
use crate::source::{FetchError, SampleSource};
use crate::store::{Retention, SyncStore};
use crate::sync::aggregator::{SampleAggregator, WeekdayConvention};
use crate::sync::error::{SyncError, SyncResult};
use crate::sync::planner;
use crate::sync::types::{RawSample, Record, Window};
use crate::sync::watermark::{local_midnight, Watermark, WatermarkTracker};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Settings shared by every cycle of a run
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Zone used for calendar columns and the cycle end
    pub timezone: Tz,
    pub retention: Retention,
    pub weekday: WeekdayConvention,
    /// Upper bound on concurrently running series cycles
    pub max_concurrent_series: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::America::Chicago,
            retention: Retention::two_years(),
            weekday: WeekdayConvention::SundayFirst,
            max_concurrent_series: 4,
        }
    }
}

/// Stage of a series cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleState {
    Idle,
    Planning,
    Fetching,
    Aggregating,
    Appending,
    Pruning,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleState::Idle => "idle",
            CycleState::Planning => "planning",
            CycleState::Fetching => "fetching",
            CycleState::Aggregating => "aggregating",
            CycleState::Appending => "appending",
            CycleState::Pruning => "pruning",
        };
        f.write_str(name)
    }
}

/// Everything one cycle knows about its series
#[derive(Debug)]
pub(crate) struct CycleContext {
    series: Series,
    watermark: Watermark,
    cycle_end: DateTime<Utc>,
    windows: Vec<Window>,
    samples: Vec<RawSample>,
    /// Every state entered, starting with `Idle`
    history: Vec<CycleState>,
}

impl CycleContext {
    fn new(series: Series, watermark: Watermark, cycle_end: DateTime<Utc>) -> Self {
        Self {
            series,
            watermark,
            cycle_end,
            windows: Vec::new(),
            samples: Vec::new(),
            history: vec![CycleState::Idle],
        }
    }

    fn state(&self) -> CycleState {
        self.history.last().copied().unwrap_or(CycleState::Idle)
    }

    fn transition(&mut self, next: CycleState) {
        tracing::debug!(
            series = self.series.id(),
            from = %self.state(),
            to = %next,
            "Cycle state change"
        );
        self.history.push(next);
    }
}

/// Result of a cycle that appended data
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub series_id: String,
    pub series_name: String,
    pub span_start: DateTime<Utc>,
    pub span_end: DateTime<Utc>,
    pub windows: usize,
    pub samples: usize,
    pub appended: usize,
    pub pruned: usize,
    /// Set when pruning failed after a successful append
    pub prune_error: Option<String>,
}

/// How a series cycle ended
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// Watermark already at the cycle end; nothing was fetched
    CaughtUp { watermark: DateTime<Utc> },
    Synced(SyncReport),
}

/// Records fetched and aggregated for an explicit span
#[derive(Debug, Clone)]
pub struct SpanData {
    pub windows: Vec<Window>,
    pub samples: usize,
    pub records: Vec<Record>,
}

/// Tally of one run across series
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub synced: Vec<SyncReport>,
    pub caught_up: Vec<String>,
    pub failed: Vec<SeriesFailure>,
}

/// A series whose cycle was abandoned
#[derive(Debug, Clone, Serialize)]
pub struct SeriesFailure {
    pub series_id: String,
    pub error: String,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.synced.len() + self.caught_up.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Largest number of day windows fetched for one series
    pub fn days_fetched(&self) -> usize {
        self.synced.iter().map(|r| r.windows).max().unwrap_or(0)
    }

    /// Human-readable completion line
    pub fn completion_message(&self) -> String {
        let days = self.days_fetched();
        let routes = self.synced.len();
        let mut message = format!(
            "Operation complete. {} {} of data for {} {} downloaded and formatted.",
            days,
            plural(days, "day", "days"),
            routes,
            plural(routes, "route", "routes"),
        );
        if !self.caught_up.is_empty() {
            message.push_str(&format!(" {} already up to date.", self.caught_up.len()));
        }
        if self.has_failures() {
            message.push_str(&format!(" {} failed.", self.failed.len()));
        }
        message
    }
}

fn plural<'a>(n: usize, one: &'a str, many: &'a str) -> &'a str {
    if n == 1 {
        one
    } else {
        many
    }
}

/// Orchestrates planning, fetching, aggregation and storage per series
pub struct SeriesSyncController {
    store: Arc<dyn SyncStore>,
    source: Arc<dyn SampleSource>,
    aggregator: SampleAggregator,
    tracker: WatermarkTracker,
    settings: SyncSettings,
}

impl SeriesSyncController {
    pub fn new(
        store: Arc<dyn SyncStore>,
        source: Arc<dyn SampleSource>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            aggregator: SampleAggregator::new(settings.timezone, settings.weekday),
            tracker: WatermarkTracker::new(settings.retention, settings.timezone),
            store,
            source,
            settings,
        }
    }

    /// Run one catch-up cycle for `series` as of `now`
    pub async fn run_cycle(&self, series: &Series, now: DateTime<Utc>) -> SyncResult<CycleOutcome> {
        let watermark = self
            .tracker
            .next_window_start(self.store.as_ref(), series, now)?;
        let cycle_end = self.tracker.cycle_end(now);

        if watermark.is_seeded() {
            tracing::info!(series = series.id(), watermark = %watermark, "No prior records, seeding watermark");
        }

        if watermark.instant() >= cycle_end {
            tracing::debug!(series = series.id(), "Already caught up");
            return Ok(CycleOutcome::CaughtUp {
                watermark: watermark.instant(),
            });
        }

        let mut ctx = CycleContext::new(series.clone(), watermark, cycle_end);
        self.drive(&mut ctx).await.map(CycleOutcome::Synced)
    }

    /// Walk a cycle from planning back to idle
    ///
    /// A fetch or append failure returns straight to `Idle`.
    async fn drive(&self, ctx: &mut CycleContext) -> SyncResult<SyncReport> {
        let series = ctx.series.clone();
        let span_start = ctx.watermark.instant();
        let span_end = ctx.cycle_end;

        ctx.transition(CycleState::Planning);
        ctx.windows = planner::plan(span_start, span_end);

        ctx.transition(CycleState::Fetching);
        if let Err(e) = self.fetch_all(ctx).await {
            ctx.transition(CycleState::Idle);
            return Err(e.into());
        }

        ctx.transition(CycleState::Aggregating);
        let records = self.aggregator.aggregate(&ctx.samples, span_start, span_end);

        ctx.transition(CycleState::Appending);
        let appended = match self.store.append(&series, &records) {
            Ok(n) => n,
            Err(e) => {
                ctx.transition(CycleState::Idle);
                return Err(e.into());
            }
        };

        ctx.transition(CycleState::Pruning);
        let (pruned, prune_error) = match self.store.prune(&series, self.settings.retention) {
            Ok(n) => (n, None),
            Err(e) => {
                tracing::warn!(series = series.id(), error = %e, "Prune failed, will retry next cycle");
                (0, Some(e.to_string()))
            }
        };
        ctx.transition(CycleState::Idle);

        tracing::info!(
            series = series.id(),
            windows = ctx.windows.len(),
            samples = ctx.samples.len(),
            appended,
            pruned,
            "Series synced"
        );

        Ok(SyncReport {
            series_id: series.id().to_string(),
            series_name: series.name().to_string(),
            span_start,
            span_end,
            windows: ctx.windows.len(),
            samples: ctx.samples.len(),
            appended,
            pruned,
            prune_error,
        })
    }

    /// Fetch every planned window in order, stopping at the first failure
    async fn fetch_all(&self, ctx: &mut CycleContext) -> Result<(), FetchError> {
        for (idx, window) in ctx.windows.iter().enumerate() {
            tracing::debug!(
                series = ctx.series.id(),
                window = idx + 1,
                of = ctx.windows.len(),
                window_start = window.start_epoch(),
                window_end = window.end_epoch(),
                source = self.source.name(),
                "Fetching window"
            );
            let samples = self.source.fetch(&ctx.series, window).await?;
            ctx.samples.extend(samples);
        }
        Ok(())
    }

    /// Run a cycle for every series with bounded concurrency
    ///
    /// A failed series is recorded and never stops the others.
    pub async fn sync_all(&self, series: &[Series], now: DateTime<Utc>) -> RunSummary {
        let limit = self.settings.max_concurrent_series.max(1);

        let results: Vec<(&Series, SyncResult<CycleOutcome>)> = stream::iter(series)
            .map(|s| async move { (s, self.run_cycle(s, now).await) })
            .buffer_unordered(limit)
            .collect()
            .await;

        let mut summary = RunSummary::default();
        for (s, result) in results {
            match result {
                Ok(CycleOutcome::Synced(report)) => summary.synced.push(report),
                Ok(CycleOutcome::CaughtUp { .. }) => summary.caught_up.push(s.id().to_string()),
                Err(e) => {
                    tracing::error!(series = s.id(), error = %e, "Series sync failed");
                    summary.failed.push(SeriesFailure {
                        series_id: s.id().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            succeeded = summary.succeeded(),
            failed = summary.failed.len(),
            "Sync run finished"
        );
        summary
    }

    /// Fetch and aggregate an explicit span without touching the store
    pub async fn collect_span(
        &self,
        series: &Series,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<SpanData, FetchError> {
        let windows = planner::plan(start, end);
        let mut samples = Vec::new();
        for window in &windows {
            samples.extend(self.source.fetch(series, window).await?);
        }

        Ok(SpanData {
            records: self.aggregator.aggregate(&samples, start, end),
            samples: samples.len(),
            windows,
        })
    }

    /// Fetch whole local days `from..=to` for a one-off export
    pub async fn backfill(
        &self,
        series: &Series,
        from: NaiveDate,
        to: NaiveDate,
    ) -> SyncResult<SpanData> {
        let after = match to.succ_opt() {
            Some(next) if from <= to => next,
            _ => return Err(SyncError::InvalidRange { from, to }),
        };

        let start = local_midnight(self.settings.timezone, from);
        let end = local_midnight(self.settings.timezone, after);
        Ok(self.collect_span(series, start, end).await?)
    }
}
