//! File-backed dataset cache.
//!
//! Every dataset lives in one CSV file under the cache directory, named after its
//! [`DatasetKey`]. A key is stale when its file is missing or holds fewer than
//! `min_bytes` after its header line; the latter catches a previous run that
//! persisted only a header because upstream answered with an empty body. The size
//! guard is measured against each file's own header, so wide and narrow datasets
//! are judged alike. Fresh files are never expired: invalidation is deleting the
//! file (see [`CacheStore::invalidate`]).
//!
//! Within one process every key is resolved at most once: rows are kept in memory
//! after the first load and shared by every clone of the store.
//!
//! Writes go to a sibling temp file and are renamed into place. There is no
//! locking: two processes populating the same key concurrently is unsafe.

use std::collections::HashMap;
use std::fs::{self, File};
use std::future::Future;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::contract::{Row, Table};
use crate::error::{CacheError, SourceError};
use crate::period::Period;

/// Default number of bytes a cache file must hold after its header line.
/// One byte means "at least one data row".
pub const DEFAULT_MIN_BYTES: u64 = 1;

/// Logical name of a cached dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatasetKey {
    TrackingPeople,
    TrackingProjects,
    TaskRates,
    UserAssignments,
    PlanningPeople,
    PlanningProjects,
    Allocations(Period),
    CrossReference(Period),
}

impl DatasetKey {
    /// Stable name used for the cache file (period-scoped keys embed the period).
    pub fn name(&self) -> String {
        match self {
            DatasetKey::TrackingPeople => "tracking_people".to_string(),
            DatasetKey::TrackingProjects => "tracking_projects".to_string(),
            DatasetKey::TaskRates => "task_rates".to_string(),
            DatasetKey::UserAssignments => "user_assignments".to_string(),
            DatasetKey::PlanningPeople => "planning_people".to_string(),
            DatasetKey::PlanningProjects => "planning_projects".to_string(),
            DatasetKey::Allocations(p) => format!("allocations_{p}"),
            DatasetKey::CrossReference(p) => format!("cross_reference_{p}"),
        }
    }

    pub fn period(&self) -> Option<Period> {
        match self {
            DatasetKey::Allocations(p) | DatasetKey::CrossReference(p) => Some(*p),
            _ => None,
        }
    }

    /// Keys whose cached rows this key's producer reads.
    pub fn dependencies(&self) -> Vec<DatasetKey> {
        match self {
            DatasetKey::CrossReference(p) => vec![
                DatasetKey::PlanningPeople,
                DatasetKey::PlanningProjects,
                DatasetKey::Allocations(*p),
            ],
            _ => Vec::new(),
        }
    }
}

impl std::fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name())
    }
}

/// Order `targets` and their transitive dependencies so every key comes after
/// the keys it depends on. Duplicates are dropped; first occurrence wins.
pub fn population_order(targets: &[DatasetKey]) -> Vec<DatasetKey> {
    fn visit(key: DatasetKey, order: &mut Vec<DatasetKey>) {
        if order.contains(&key) {
            return;
        }
        for dep in key.dependencies() {
            visit(dep, order);
        }
        order.push(key);
    }

    let mut order = Vec::new();
    for key in targets {
        visit(*key, &mut order);
    }
    order
}

/// Rows resolved so far in this process, per key.
type Loaded = Arc<Mutex<HashMap<DatasetKey, Vec<Row>>>>;

#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
    min_bytes: u64,
    loaded: Loaded,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            min_bytes: DEFAULT_MIN_BYTES,
            loaded: Loaded::default(),
        }
    }

    pub fn with_min_bytes(mut self, min_bytes: u64) -> Self {
        self.min_bytes = min_bytes;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &DatasetKey) -> PathBuf {
        self.root.join(format!("{}.csv", key.name()))
    }

    /// Bytes stored after the header line, or `None` if the file cannot be read.
    pub fn data_bytes(&self, key: &DatasetKey) -> Option<u64> {
        let file = File::open(self.path_for(key)).ok()?;
        let total = file.metadata().ok()?.len();
        let mut header = Vec::new();
        BufReader::new(file).read_until(b'\n', &mut header).ok()?;
        Some(total.saturating_sub(header.len() as u64))
    }

    pub fn is_stale(&self, key: &DatasetKey) -> bool {
        match self.data_bytes(key) {
            Some(bytes) => bytes < self.min_bytes,
            None => true,
        }
    }

    fn remembered(&self, key: &DatasetKey) -> Option<Vec<Row>> {
        let loaded = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        loaded.get(key).cloned()
    }

    fn remember(&self, key: DatasetKey, rows: &[Row]) {
        let mut loaded = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        loaded.insert(key, rows.to_vec());
    }

    fn forget(&self, key: &DatasetKey) {
        let mut loaded = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        loaded.remove(key);
    }

    /// Return the cached rows for `key` (header stripped), running `producer`
    /// first if the key is stale. A key already resolved by this store (or a
    /// clone of it) is answered from memory, even when its file is stale.
    pub async fn load_or_populate<F, Fut>(
        &self,
        key: DatasetKey,
        producer: F,
    ) -> Result<Vec<Row>, SourceError>
    where
        F: FnOnce(DatasetKey) -> Fut,
        Fut: Future<Output = Result<Table, SourceError>>,
    {
        if let Some(rows) = self.remembered(&key) {
            debug!(key = %key, rows = rows.len(), "Already resolved in this run");
            return Ok(rows);
        }

        let path = self.path_for(&key);
        if self.is_stale(&key) {
            info!(key = %key, path = %path.display(), "Cache miss, populating");
            let table = producer(key).await?;
            self.write(&path, &table)?;
            if self.is_stale(&key) {
                warn!(
                    key = %key,
                    bytes = self.data_bytes(&key).unwrap_or(0),
                    min_bytes = self.min_bytes,
                    "Populated dataset is below the size threshold and will be refetched next run"
                );
            }
        } else {
            debug!(key = %key, path = %path.display(), "Cache hit");
        }
        let rows = self.read(&path)?;
        self.remember(key, &rows);
        Ok(rows)
    }

    /// Delete the cache file for `key`. Returns whether a file was removed.
    pub fn invalidate(&self, key: &DatasetKey) -> Result<bool, CacheError> {
        self.forget(key);
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(key = %key, path = %path.display(), "Invalidated cache entry");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CacheError::Io { path, source }),
        }
    }

    /// Drop the period-scoped files of `period` so the next run refetches them.
    /// Complete periods are immutable and are left alone; returns whether anything
    /// was eligible.
    pub fn refresh_period(&self, period: Period, today: NaiveDate) -> Result<bool, CacheError> {
        if period.is_complete(today) {
            warn!(period = %period, "Period is complete, its cache is kept");
            return Ok(false);
        }
        for key in [DatasetKey::Allocations(period), DatasetKey::CrossReference(period)] {
            self.invalidate(&key)?;
        }
        Ok(true)
    }

    fn read(&self, path: &Path) -> Result<Vec<Row>, SourceError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|source| CacheError::Csv {
                path: path.to_path_buf(),
                source,
            })?;

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|source| CacheError::Csv {
                path: path.to_path_buf(),
                source,
            })?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(rows)
    }

    fn write(&self, path: &Path, table: &Table) -> Result<(), CacheError> {
        fs::create_dir_all(&self.root).map_err(|source| CacheError::Io {
            path: self.root.clone(),
            source,
        })?;

        let tmp = path.with_extension("csv.tmp");
        write_table(&tmp, table)?;
        fs::rename(&tmp, path).map_err(|source| CacheError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), rows = table.len(), "Wrote cache file");
        Ok(())
    }
}

/// Write `table` (header first) to `path` as CSV.
pub fn write_table(path: &Path, table: &Table) -> Result<(), CacheError> {
    let csv_err = |source| CacheError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    writer.write_record(&table.header).map_err(csv_err)?;
    for row in &table.rows {
        writer.write_record(row).map_err(csv_err)?;
    }
    writer.flush().map_err(|source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}
