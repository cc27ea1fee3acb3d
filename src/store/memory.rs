//! In-process series tables
//!
//! Same append/prune semantics as the CSV backend without touching disk.

use super::{check_append_order, Retention, StoreError, StoreResult, SyncStore};
use crate::series::Series;
use crate::sync::types::Record;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// Tables held in memory, keyed by series id
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Vec<Record>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a series' records
    pub fn records(&self, series: &Series) -> StoreResult<Vec<Record>> {
        let tables = self.lock()?;
        Ok(tables.get(series.id()).cloned().unwrap_or_default())
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, HashMap<String, Vec<Record>>>> {
        self.tables
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }
}

impl SyncStore for MemoryStore {
    fn tail_timestamp(&self, series: &Series) -> StoreResult<Option<DateTime<Utc>>> {
        let tables = self.lock()?;
        Ok(tables
            .get(series.id())
            .and_then(|t| t.last())
            .map(|r| r.timestamp))
    }

    fn append(&self, series: &Series, records: &[Record]) -> StoreResult<usize> {
        let mut tables = self.lock()?;
        let table = tables.entry(series.id().to_string()).or_default();

        check_append_order(series, table.last().map(|r| r.timestamp), records)?;
        table.extend_from_slice(records);
        Ok(records.len())
    }

    fn prune(&self, series: &Series, retention: Retention) -> StoreResult<usize> {
        let mut tables = self.lock()?;
        let Some(table) = tables.get_mut(series.id()) else {
            return Ok(0);
        };
        let Some(latest) = table.last().map(|r| r.timestamp) else {
            return Ok(0);
        };

        let cutoff = retention.cutoff(latest);
        let before = table.len();
        table.retain(|r| r.timestamp >= cutoff);
        Ok(before - table.len())
    }

    fn len(&self, series: &Series) -> StoreResult<usize> {
        let tables = self.lock()?;
        Ok(tables.get(series.id()).map(Vec::len).unwrap_or(0))
    }
}
