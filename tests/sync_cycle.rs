//! End-to-end cycles against a scripted source

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;
use travelsync::sync::plan;
use travelsync::{
    CsvSyncStore, CycleOutcome, FetchError, Field, MemoryStore, RawSample, Record, Retention,
    SampleAggregator, SampleSource, Series, SeriesSyncController, StoreError, StoreResult,
    SyncError, SyncSettings, SyncStore, TravelTime, WeekdayConvention, Window,
};

/// Serves canned samples and fails on request
#[derive(Default)]
struct ScriptedSource {
    samples: Vec<RawSample>,
    /// Series id -> 1-based call number that fails
    fail_on: Mutex<HashMap<String, usize>>,
    calls: Mutex<Vec<(String, Window)>>,
}

impl ScriptedSource {
    fn with_samples(samples: Vec<RawSample>) -> Self {
        Self {
            samples,
            ..Default::default()
        }
    }

    fn fail(&self, series_id: &str, call: usize) {
        self.fail_on
            .lock()
            .unwrap()
            .insert(series_id.to_string(), call);
    }

    fn clear_failures(&self) {
        self.fail_on.lock().unwrap().clear();
    }

    fn calls_for(&self, series_id: &str) -> Vec<Window> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == series_id)
            .map(|(_, w)| *w)
            .collect()
    }

    fn take_calls(&self) -> Vec<(String, Window)> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }
}

#[async_trait]
impl SampleSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch(&self, series: &Series, window: &Window) -> Result<Vec<RawSample>, FetchError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((series.id().to_string(), *window));
            calls.iter().filter(|(id, _)| id == series.id()).count()
        };

        if self.fail_on.lock().unwrap().get(series.id()) == Some(&call) {
            return Err(FetchError::Status {
                series_id: series.id().to_string(),
                window: *window,
                status: 503,
            });
        }

        Ok(self
            .samples
            .iter()
            .filter(|s| s.timestamp().map_or(false, |ts| window.contains(ts)))
            .copied()
            .collect())
    }
}

/// Memory-backed store that can refuse appends or fail to prune
#[derive(Default)]
struct FaultyStore {
    inner: MemoryStore,
    reject_append: bool,
    fail_prune: bool,
}

impl SyncStore for FaultyStore {
    fn tail_timestamp(&self, series: &Series) -> StoreResult<Option<DateTime<Utc>>> {
        self.inner.tail_timestamp(series)
    }

    fn append(&self, series: &Series, records: &[Record]) -> StoreResult<usize> {
        if self.reject_append {
            let previous = self.inner.tail_timestamp(series)?.unwrap_or(DateTime::<Utc>::MIN_UTC);
            return Err(StoreError::OutOfOrder {
                series: series.id().to_string(),
                timestamp: records[0].timestamp,
                previous,
            });
        }
        self.inner.append(series, records)
    }

    fn prune(&self, series: &Series, retention: Retention) -> StoreResult<usize> {
        if self.fail_prune {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.inner.prune(series, retention)
    }

    fn len(&self, series: &Series) -> StoreResult<usize> {
        self.inner.len(series)
    }
}

fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

fn route(id: &str) -> Series {
    Series::new(id, format!("Route {}", id)).unwrap()
}

/// Put a single empty bin at `ts` so the next cycle resumes right after it
fn seed_tail(store: &dyn SyncStore, series: &Series, ts: DateTime<Utc>) {
    let aggregator =
        SampleAggregator::new(chrono_tz::America::Chicago, WeekdayConvention::SundayFirst);
    let records = aggregator.aggregate(&[], ts, ts + Duration::minutes(15));
    store.append(series, &records).unwrap();
}

fn controller(
    store: Arc<dyn SyncStore>,
    source: Arc<ScriptedSource>,
    settings: SyncSettings,
) -> SeriesSyncController {
    SeriesSyncController::new(store, source, settings)
}

#[tokio::test]
async fn test_two_day_catch_up() {
    let series = route("1001");
    let store = Arc::new(MemoryStore::new());
    // Chicago midnight 2023-01-01 is 06:00Z; resume there
    seed_tail(&*store, &series, utc(2023, 1, 1, 5, 45));

    let source = Arc::new(ScriptedSource::with_samples(vec![
        RawSample::empty(utc(2023, 1, 1, 6, 5).timestamp_millis()).with(Field::Firsts, 60_000.0),
        RawSample::empty(utc(2023, 1, 1, 6, 10).timestamp_millis()).with(Field::Firsts, 120_000.0),
        RawSample::empty(utc(2023, 1, 2, 12, 0).timestamp_millis()).with(Field::Firsts, 0.0),
    ]));
    let controller = controller(store.clone(), source.clone(), SyncSettings::default());

    let outcome = controller
        .run_cycle(&series, utc(2023, 1, 3, 12, 0))
        .await
        .unwrap();

    let CycleOutcome::Synced(report) = outcome else {
        panic!("expected a synced cycle");
    };
    assert_eq!(report.windows, 2);
    assert_eq!(report.samples, 3);
    assert_eq!(report.appended, 192);
    assert_eq!(report.span_start, utc(2023, 1, 1, 6, 0));
    assert_eq!(report.span_end, utc(2023, 1, 3, 6, 0));

    assert_eq!(
        source.calls_for("1001"),
        vec![
            Window::try_new(utc(2023, 1, 1, 6, 0), utc(2023, 1, 2, 6, 0)).unwrap(),
            Window::try_new(utc(2023, 1, 2, 6, 0), utc(2023, 1, 3, 6, 0)).unwrap(),
        ]
    );

    let records = store.records(&series).unwrap();
    assert_eq!(records.len(), 193);
    let first = &records[1];
    assert_eq!(first.date_time, "2023-01-01 00:00:00");
    assert_eq!(first.day, "Sunday");
    assert_eq!(first.day_of_week, 1);
    assert_eq!(first.travel_time(Field::Firsts), Some(TravelTime::from_secs(90)));
    assert_eq!(first.travel_time(Field::Lasts), None);

    // The zero reading leaves its bin missing
    let noon = records
        .iter()
        .find(|r| r.timestamp == utc(2023, 1, 2, 12, 0))
        .unwrap();
    assert!(noon.is_missing());

    assert_eq!(
        store.tail_timestamp(&series).unwrap(),
        Some(utc(2023, 1, 3, 5, 45))
    );
}

#[tokio::test]
async fn test_caught_up_series_skips_fetch() {
    let series = route("1001");
    let store = Arc::new(MemoryStore::new());
    seed_tail(&*store, &series, utc(2023, 1, 3, 5, 45));

    let source = Arc::new(ScriptedSource::default());
    let controller = controller(store.clone(), source.clone(), SyncSettings::default());

    let outcome = controller
        .run_cycle(&series, utc(2023, 1, 3, 23, 0))
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        CycleOutcome::CaughtUp { watermark } if watermark == utc(2023, 1, 3, 6, 0)
    ));
    assert!(source.take_calls().is_empty());
    assert_eq!(store.len(&series).unwrap(), 1);
}

#[tokio::test]
async fn test_fetch_failure_appends_nothing_and_retries_same_windows() {
    let series = route("1001");
    let store = Arc::new(MemoryStore::new());
    seed_tail(&*store, &series, utc(2023, 1, 1, 5, 45));

    let source = Arc::new(ScriptedSource::default());
    source.fail("1001", 2);
    let controller = controller(store.clone(), source.clone(), SyncSettings::default());
    let now = utc(2023, 1, 4, 12, 0);
    let expected = plan(utc(2023, 1, 1, 6, 0), utc(2023, 1, 4, 6, 0));
    assert_eq!(expected.len(), 3);

    let err = controller.run_cycle(&series, now).await.unwrap_err();
    match err {
        SyncError::Fetch(e) => {
            assert_eq!(e.series_id(), "1001");
            assert_eq!(*e.window(), expected[1]);
        }
        other => panic!("expected fetch error, got {other:?}"),
    }

    // Window 3 was never requested and the table is untouched
    assert_eq!(source.take_calls().len(), 2);
    assert_eq!(store.len(&series).unwrap(), 1);
    assert_eq!(
        store.tail_timestamp(&series).unwrap(),
        Some(utc(2023, 1, 1, 5, 45))
    );

    source.clear_failures();
    let outcome = controller.run_cycle(&series, now).await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Synced(ref r) if r.windows == 3));

    let retried: Vec<Window> = source.take_calls().into_iter().map(|(_, w)| w).collect();
    assert_eq!(retried, expected);
    assert_eq!(store.len(&series).unwrap(), 1 + 3 * 96);
}

#[tokio::test]
async fn test_failing_series_does_not_stop_others() {
    let good = route("1001");
    let bad = route("2002");
    let store = Arc::new(MemoryStore::new());
    seed_tail(&*store, &good, utc(2023, 1, 1, 5, 45));
    seed_tail(&*store, &bad, utc(2023, 1, 1, 5, 45));

    let source = Arc::new(ScriptedSource::default());
    source.fail("2002", 1);
    let controller = controller(store.clone(), source.clone(), SyncSettings::default());

    let summary = controller
        .sync_all(&[bad.clone(), good.clone()], utc(2023, 1, 3, 12, 0))
        .await;

    assert_eq!(summary.synced.len(), 1);
    assert_eq!(summary.synced[0].series_id, "1001");
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].series_id, "2002");
    assert!(summary.has_failures());
    assert_eq!(
        summary.completion_message(),
        "Operation complete. 2 days of data for 1 route downloaded and formatted. 1 failed."
    );

    assert_eq!(store.len(&good).unwrap(), 1 + 2 * 96);
    assert_eq!(store.len(&bad).unwrap(), 1);
}

#[tokio::test]
async fn test_prune_follows_append() {
    let series = route("1001");
    let store = Arc::new(MemoryStore::new());
    seed_tail(&*store, &series, utc(2022, 12, 1, 5, 45));

    let source = Arc::new(ScriptedSource::default());
    let settings = SyncSettings {
        retention: Retention::months(1),
        ..SyncSettings::default()
    };
    let controller = controller(store.clone(), source, settings);

    let outcome = controller
        .run_cycle(&series, utc(2023, 1, 3, 12, 0))
        .await
        .unwrap();
    let CycleOutcome::Synced(report) = outcome else {
        panic!("expected a synced cycle");
    };

    // Newest bin is 2023-01-03 05:45Z, so everything before 2022-12-03 05:45Z goes
    assert_eq!(report.windows, 33);
    assert_eq!(report.appended, 33 * 96);
    assert_eq!(report.pruned, 192);
    assert!(report.prune_error.is_none());

    let records = store.records(&series).unwrap();
    assert_eq!(records.len(), 31 * 96 + 1);
    assert_eq!(records[0].timestamp, utc(2022, 12, 3, 5, 45));
}

#[tokio::test]
async fn test_never_synced_series_is_seeded_from_retention() {
    let series = route("1001");
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(ScriptedSource::default());
    let settings = SyncSettings {
        retention: Retention::months(1),
        ..SyncSettings::default()
    };
    let controller = controller(store.clone(), source.clone(), settings);

    let now = utc(2023, 2, 1, 12, 7);
    let outcome = controller.run_cycle(&series, now).await.unwrap();
    let CycleOutcome::Synced(report) = outcome else {
        panic!("expected a synced cycle");
    };

    assert_eq!(report.span_start, utc(2023, 1, 1, 12, 0));
    assert_eq!(report.span_end, utc(2023, 2, 1, 6, 0));
    assert_eq!(report.windows, 31);

    let calls = source.calls_for("1001");
    assert_eq!(calls[0].start, utc(2023, 1, 1, 12, 0));
    assert_eq!(calls.last().unwrap().end, utc(2023, 2, 1, 6, 0));
}

#[tokio::test]
async fn test_csv_store_cycle() {
    let dir = tempdir().unwrap();
    let series = route("1001");
    let store = Arc::new(CsvSyncStore::new(dir.path(), chrono_tz::America::Chicago));
    seed_tail(&*store, &series, utc(2023, 1, 1, 5, 45));

    let source = Arc::new(ScriptedSource::with_samples(vec![RawSample::empty(
        utc(2023, 1, 1, 6, 0).timestamp_millis(),
    )
    .with(Field::Maximums, 3_723_000.0)]));
    let controller = controller(store.clone(), source.clone(), SyncSettings::default());
    let now = utc(2023, 1, 2, 12, 0);

    let outcome = controller.run_cycle(&series, now).await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Synced(ref r) if r.appended == 96));

    let content = std::fs::read_to_string(store.table_path(&series)).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 1 + 1 + 96);
    assert_eq!(
        lines[0],
        "DateTime,Month,Day,DayOfWeek,Date,Time,Strengths,Firsts,Lasts,Minimums,Maximums"
    );
    assert_eq!(
        lines[2],
        "2023-01-01 00:00:00,January,Sunday,1,2023-01-01,00:00:00,,,,,01:02:03"
    );

    // A second run on the same day has nothing left to do
    let outcome = controller.run_cycle(&series, now).await.unwrap();
    assert!(matches!(outcome, CycleOutcome::CaughtUp { .. }));
    assert_eq!(store.len(&series).unwrap(), 97);
}

#[tokio::test]
async fn test_prune_failure_keeps_appended_records() {
    let series = route("1001");
    let store = Arc::new(FaultyStore {
        fail_prune: true,
        ..Default::default()
    });
    seed_tail(&*store, &series, utc(2023, 1, 1, 5, 45));

    let controller = controller(
        store.clone(),
        Arc::new(ScriptedSource::default()),
        SyncSettings::default(),
    );
    let outcome = controller
        .run_cycle(&series, utc(2023, 1, 3, 12, 0))
        .await
        .unwrap();

    let CycleOutcome::Synced(report) = outcome else {
        panic!("expected a synced cycle");
    };
    assert_eq!(report.appended, 192);
    assert_eq!(report.pruned, 0);
    assert!(report.prune_error.as_deref().unwrap().contains("disk full"));

    assert_eq!(store.len(&series).unwrap(), 193);
    assert_eq!(
        store.tail_timestamp(&series).unwrap(),
        Some(utc(2023, 1, 3, 5, 45))
    );
}

#[tokio::test]
async fn test_rejected_append_is_a_merge_error() {
    let series = route("1001");
    let store = Arc::new(FaultyStore {
        reject_append: true,
        ..Default::default()
    });
    store
        .inner
        .append(
            &series,
            &SampleAggregator::new(chrono_tz::America::Chicago, WeekdayConvention::SundayFirst)
                .aggregate(&[], utc(2023, 1, 1, 5, 45), utc(2023, 1, 1, 6, 0)),
        )
        .unwrap();

    let source = Arc::new(ScriptedSource::default());
    let controller = controller(store.clone(), source.clone(), SyncSettings::default());
    let err = controller
        .run_cycle(&series, utc(2023, 1, 3, 12, 0))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Merge(StoreError::OutOfOrder { .. })));
    assert_eq!(source.take_calls().len(), 2);
    assert_eq!(store.len(&series).unwrap(), 1);

    let summary = controller
        .sync_all(&[series.clone()], utc(2023, 1, 3, 12, 0))
        .await;
    assert_eq!(summary.failed.len(), 1);
    assert!(summary.failed[0].error.starts_with("Merge rejected"));
}

#[tokio::test]
async fn test_backfill_covers_short_dst_day() {
    let series = route("1001");
    let store = Arc::new(MemoryStore::new());
    // 2023-03-12 loses an hour in Chicago
    let source = Arc::new(ScriptedSource::with_samples(vec![RawSample::empty(
        utc(2023, 3, 12, 12, 0).timestamp_millis(),
    )
    .with(Field::Lasts, 600_000.0)]));
    let controller = controller(store.clone(), source.clone(), SyncSettings::default());

    let from = NaiveDate::from_ymd_opt(2023, 3, 11).unwrap();
    let to = NaiveDate::from_ymd_opt(2023, 3, 12).unwrap();
    let data = controller.backfill(&series, from, to).await.unwrap();

    assert_eq!(
        source.calls_for("1001"),
        vec![
            Window::try_new(utc(2023, 3, 11, 6, 0), utc(2023, 3, 12, 6, 0)).unwrap(),
            Window::try_new(utc(2023, 3, 12, 6, 0), utc(2023, 3, 13, 5, 0)).unwrap(),
        ]
    );
    assert_eq!(data.windows.len(), 2);
    assert_eq!(data.samples, 1);
    assert_eq!(data.records.len(), 47 * 4);
    assert_eq!(data.records[0].date_time, "2023-03-11 00:00:00");
    assert_eq!(data.records.last().unwrap().date_time, "2023-03-12 23:45:00");

    let noon = data
        .records
        .iter()
        .find(|r| r.timestamp == utc(2023, 3, 12, 12, 0))
        .unwrap();
    assert_eq!(noon.travel_time(Field::Lasts), Some(TravelTime::from_secs(600)));

    // backfill never touches the synced table
    assert!(store.is_empty(&series).unwrap());
}

#[tokio::test]
async fn test_backfill_covers_long_dst_day() {
    let series = route("1001");
    let source = Arc::new(ScriptedSource::default());
    let controller = controller(
        Arc::new(MemoryStore::new()),
        source.clone(),
        SyncSettings::default(),
    );

    // 2023-11-05 repeats an hour in Chicago
    let day = NaiveDate::from_ymd_opt(2023, 11, 5).unwrap();
    let data = controller.backfill(&series, day, day).await.unwrap();

    let calls = source.calls_for("1001");
    assert_eq!(calls.first().unwrap().start, utc(2023, 11, 5, 5, 0));
    assert_eq!(calls.last().unwrap().end, utc(2023, 11, 6, 6, 0));
    assert_eq!(calls.len(), 2);
    assert_eq!(data.records.len(), 25 * 4);
}

#[tokio::test]
async fn test_backfill_export_round_trip() {
    let dir = tempdir().unwrap();
    let series = route("1001");
    let store = Arc::new(CsvSyncStore::new(dir.path(), chrono_tz::America::Chicago));
    let controller = controller(
        store.clone(),
        Arc::new(ScriptedSource::default()),
        SyncSettings::default(),
    );

    let day = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
    let data = controller.backfill(&series, day, day).await.unwrap();
    let path = store.write_export(&series, day, day, &data.records).unwrap();

    assert!(path.ends_with("Route 1001/Route 1001 from 2023-01-01 to 2023-01-01.csv"));
    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.lines().count(), 1 + 96);
    assert!(!store.table_path(&series).exists());
}
