//! Flat-file series tables
//!
//! One CSV file per series at `{root}/{name}/{name} - Master.csv`, with the
//! canonical header written when the file is first created.
//!
//! The `DateTime` column holds local wall-clock time, which repeats for one
//! hour when daylight saving ends. Rows are therefore resolved to UTC in file
//! order: an ambiguous wall time maps to the earliest instant that is still
//! after the previous row.

use super::{check_append_order, Retention, StoreError, StoreResult, SyncStore};
use crate::series::Series;
use crate::sync::types::{Record, DATE_TIME_FORMAT, RECORD_HEADER};
use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// A persisted row together with its resolved UTC instant
#[derive(Debug, Clone)]
pub struct StoredRow {
    pub timestamp: DateTime<Utc>,
    pub fields: csv::StringRecord,
}

/// CSV-backed series tables under one root directory
#[derive(Debug, Clone)]
pub struct CsvSyncStore {
    root: PathBuf,
    timezone: Tz,
}

impl CsvSyncStore {
    /// `timezone` must be the zone the `DateTime` column was written in
    pub fn new(root: impl Into<PathBuf>, timezone: Tz) -> Self {
        Self {
            root: root.into(),
            timezone,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a series' table and exports
    pub fn series_dir(&self, series: &Series) -> PathBuf {
        self.root.join(series.name())
    }

    /// Path of a series' master table
    pub fn table_path(&self, series: &Series) -> PathBuf {
        self.series_dir(series)
            .join(format!("{} - Master.csv", series.name()))
    }

    /// Read every row of a series' table in file order
    pub fn read_rows(&self, series: &Series) -> StoreResult<Vec<StoredRow>> {
        let path = self.table_path(series);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&path)?;

        let headers = reader.headers()?.clone();
        if !headers.is_empty() && !is_known_header(&headers) {
            return Err(StoreError::Corruption(format!(
                "{}: unexpected header {:?}, expected {}",
                path.display(),
                headers,
                RECORD_HEADER.join(",")
            )));
        }

        let mut rows: Vec<StoredRow> = Vec::new();
        for (idx, result) in reader.records().enumerate() {
            let fields = result?;
            let raw = fields.get(0).unwrap_or_default();
            let naive = NaiveDateTime::parse_from_str(raw, DATE_TIME_FORMAT).map_err(|e| {
                StoreError::Corruption(format!("{} row {}: {}", path.display(), idx + 2, e))
            })?;

            let previous = rows.last().map(|r| r.timestamp);
            let timestamp = self.resolve_local(naive, previous).ok_or_else(|| {
                StoreError::Corruption(format!(
                    "{} row {}: {} does not exist in {}",
                    path.display(),
                    idx + 2,
                    raw,
                    self.timezone
                ))
            })?;

            rows.push(StoredRow { timestamp, fields });
        }

        Ok(rows)
    }

    fn resolve_local(
        &self,
        naive: NaiveDateTime,
        previous: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        match self.timezone.from_local_datetime(&naive) {
            LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
            LocalResult::Ambiguous(earlier, later) => {
                let earlier = earlier.with_timezone(&Utc);
                match previous {
                    Some(prev) if earlier <= prev => Some(later.with_timezone(&Utc)),
                    _ => Some(earlier),
                }
            }
            LocalResult::None => None,
        }
    }

    /// Path of a one-off export covering local dates `from..=to`
    pub fn export_path(&self, series: &Series, from: NaiveDate, to: NaiveDate) -> PathBuf {
        self.series_dir(series).join(format!(
            "{} from {} to {}.csv",
            series.name(),
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d")
        ))
    }

    /// Write records to a standalone export, replacing any previous one
    ///
    /// The master table is not touched.
    pub fn write_export(
        &self,
        series: &Series,
        from: NaiveDate,
        to: NaiveDate,
        records: &[Record],
    ) -> StoreResult<PathBuf> {
        let path = self.export_path(series, from, to);
        std::fs::create_dir_all(self.series_dir(series))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&path)?;
        Self::write_header(&mut writer)?;
        for record in records {
            writer.write_record(record.to_row())?;
        }
        writer.flush()?;

        tracing::info!(series = series.id(), path = ?path, records = records.len(), "Wrote export");
        Ok(path)
    }

    fn write_header<W: Write>(writer: &mut csv::Writer<W>) -> StoreResult<()> {
        writer.write_record(RECORD_HEADER)?;
        Ok(())
    }
}

/// Tables written before the `DayOfWeek` rename label that column `DoW`
const LEGACY_DAY_OF_WEEK: &str = "DoW";

fn is_known_header(headers: &csv::StringRecord) -> bool {
    headers.len() == RECORD_HEADER.len()
        && headers
            .iter()
            .zip(RECORD_HEADER)
            .all(|(found, expected)| {
                found == expected || (expected == "DayOfWeek" && found == LEGACY_DAY_OF_WEEK)
            })
}

impl SyncStore for CsvSyncStore {
    fn tail_timestamp(&self, series: &Series) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self.read_rows(series)?.last().map(|r| r.timestamp))
    }

    fn append(&self, series: &Series, records: &[Record]) -> StoreResult<usize> {
        let tail = self.tail_timestamp(series)?;
        check_append_order(series, tail, records)?;

        if records.is_empty() {
            return Ok(0);
        }

        let path = self.table_path(series);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let is_new = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if is_new {
            tracing::info!(series = series.id(), path = ?path, "Creating series table");
            Self::write_header(&mut writer)?;
        }
        for record in records {
            writer.write_record(record.to_row())?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;

        tracing::debug!(series = series.id(), records = records.len(), "Appended records");
        Ok(records.len())
    }

    fn prune(&self, series: &Series, retention: Retention) -> StoreResult<usize> {
        let rows = self.read_rows(series)?;
        let Some(latest) = rows.last().map(|r| r.timestamp) else {
            return Ok(0);
        };

        let cutoff = retention.cutoff(latest);
        let kept: Vec<&StoredRow> = rows.iter().filter(|r| r.timestamp >= cutoff).collect();
        let removed = rows.len() - kept.len();
        if removed == 0 {
            return Ok(0);
        }

        // rewrite beside the table, then swap it in with a rename
        let path = self.table_path(series);
        let dir = self.series_dir(series);
        let temp = tempfile::NamedTempFile::new_in(&dir)?;
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(temp.as_file());
            Self::write_header(&mut writer)?;
            for row in &kept {
                writer.write_record(&row.fields)?;
            }
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(&path).map_err(|e| StoreError::Io(e.error))?;

        tracing::info!(
            series = series.id(),
            removed,
            cutoff = %cutoff,
            "Pruned records past retention"
        );
        Ok(removed)
    }

    fn len(&self, series: &Series) -> StoreResult<usize> {
        Ok(self.read_rows(series)?.len())
    }
}
