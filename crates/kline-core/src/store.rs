use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::calendar;
use crate::candle::Candle;
use crate::error::StoreError;
use crate::interval::Interval;
use crate::schema;

/// Persistence contract for candles keyed by (symbol, interval, open_time).
///
/// Implementations must be safe to share between concurrent sync flows; each
/// flow writes a disjoint (symbol, interval) partition.
pub trait CandleStore: Send + Sync {
    /// Newest stored open time for a series.
    fn max_open_time(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Oldest stored open time for a series.
    fn min_open_time(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Remove one candle. Returns whether a row existed.
    fn delete_candle(
        &self,
        symbol: &str,
        interval: Interval,
        open_time: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Insert candles, skipping any whose key is already stored. Existing rows
    /// are never overwritten. Returns the number of rows actually inserted.
    fn upsert_batch(&self, candles: &[Candle]) -> Result<usize, StoreError>;

    /// Candles with `start <= open_time <= end`, ascending by open time.
    fn query_range(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, StoreError>;

    /// Every (symbol, interval) with at least one stored candle, sorted.
    fn list_series(&self) -> Result<Vec<(String, Interval)>, StoreError>;

    /// Every stored candle of a series, ascending.
    fn query_all(&self, symbol: &str, interval: Interval) -> Result<Vec<Candle>, StoreError> {
        match (
            self.min_open_time(symbol, interval)?,
            self.max_open_time(symbol, interval)?,
        ) {
            (Some(first), Some(last)) => self.query_range(symbol, interval, first, last),
            _ => Ok(Vec::new()),
        }
    }

    /// Total rows stored for a series.
    fn count(&self, symbol: &str, interval: Interval) -> Result<usize, StoreError> {
        Ok(self.query_all(symbol, interval)?.len())
    }
}

type SeriesKey = (String, Interval);

/// A partition rewrite sitting in its temp file, not yet renamed into place.
struct Staged {
    tmp: PathBuf,
    path: PathBuf,
    /// Contents before the rewrite, restored if publishing fails part way.
    previous: Vec<Candle>,
}

/// Filesystem-backed store for candle data in Parquet format.
///
/// Directory layout: `{root}/data/{SYMBOL}/{interval}/{YYYY}/{YYYY-MM}.parquet`,
/// one file per calendar month of open time. The interval directory is
/// [`Interval::dir_name`], so `1M` lives under `1mo`.
pub struct ParquetCandleStore {
    data_dir: PathBuf,
    locks: Mutex<HashMap<SeriesKey, Arc<Mutex<()>>>>,
}

impl ParquetCandleStore {
    /// Create a store rooted at the given directory.
    /// The `data/` subdirectory is used automatically.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self::from_data_dir(root.as_ref().join("data"))
    }

    /// Create a store pointing directly at the data directory (no `data/` suffix).
    pub fn from_data_dir(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn series_dir(&self, symbol: &str, interval: Interval) -> PathBuf {
        self.data_dir.join(symbol).join(interval.dir_name())
    }

    /// Path to the monthly Parquet partition holding `open_time`.
    pub fn partition_path(
        &self,
        symbol: &str,
        interval: Interval,
        open_time: DateTime<Utc>,
    ) -> PathBuf {
        self.series_dir(symbol, interval)
            .join(open_time.format("%Y").to_string())
            .join(format!("{}.parquet", open_time.format("%Y-%m")))
    }

    fn series_lock(&self, symbol: &str, interval: Interval) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry((symbol.to_string(), interval))
            .or_default()
            .clone()
    }

    fn read_partition(&self, path: &Path) -> Result<Vec<Candle>, StoreError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        schema::read_parquet(path)
    }

    /// Write a partition's new contents to its sibling temp file.
    fn stage_partition(path: &Path, candles: &[Candle]) -> Result<PathBuf, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("parquet.tmp");
        if let Err(e) = schema::write_parquet(&tmp, candles) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }
        Ok(tmp)
    }

    /// Replace a partition atomically: write a sibling temp file, then rename.
    /// An empty partition removes the file.
    fn write_partition(&self, path: &Path, candles: &[Candle]) -> Result<(), StoreError> {
        if candles.is_empty() {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
            return Ok(());
        }
        let tmp = Self::stage_partition(path, candles)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Move every staged partition into place. If a rename fails, partitions
    /// already replaced get their previous contents back and the remaining
    /// temp files are removed.
    fn publish(&self, staged: Vec<Staged>) -> Result<(), StoreError> {
        for (i, part) in staged.iter().enumerate() {
            if let Err(e) = std::fs::rename(&part.tmp, &part.path) {
                for done in &staged[..i] {
                    if let Err(undo) = self.write_partition(&done.path, &done.previous) {
                        warn!("failed to restore {}: {undo}", done.path.display());
                    }
                }
                Self::discard(&staged[i..]);
                return Err(e.into());
            }
        }
        Ok(())
    }

    fn discard(staged: &[Staged]) {
        for part in staged {
            let _ = std::fs::remove_file(&part.tmp);
        }
    }

    /// Partition files of a series, sorted ascending by month.
    fn partition_files(&self, symbol: &str, interval: Interval) -> Result<Vec<PathBuf>, StoreError> {
        let series_dir = self.series_dir(symbol, interval);
        if !series_dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for year_entry in std::fs::read_dir(&series_dir)? {
            let year_entry = year_entry?;
            if !year_entry.file_type()?.is_dir() {
                continue;
            }
            for file_entry in std::fs::read_dir(year_entry.path())? {
                let file_entry = file_entry?;
                let path = file_entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("parquet") {
                    files.push(path);
                }
            }
        }

        // File stems are YYYY-MM, so lexical order is chronological.
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(files)
    }

    fn edge_open_time(
        &self,
        symbol: &str,
        interval: Interval,
        newest: bool,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let mut files = self.partition_files(symbol, interval)?;
        if newest {
            files.reverse();
        }
        for path in files {
            let candles = schema::read_parquet(&path)?;
            let edge = if newest {
                candles.iter().map(|c| c.open_time()).max()
            } else {
                candles.iter().map(|c| c.open_time()).min()
            };
            if edge.is_some() {
                return Ok(edge);
            }
        }
        Ok(None)
    }

    fn list_dirs(path: &Path) -> Result<Vec<String>, StoreError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

impl CandleStore for ParquetCandleStore {
    fn max_open_time(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.edge_open_time(symbol, interval, true)
    }

    fn min_open_time(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.edge_open_time(symbol, interval, false)
    }

    fn delete_candle(
        &self,
        symbol: &str,
        interval: Interval,
        open_time: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let lock = self.series_lock(symbol, interval);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let path = self.partition_path(symbol, interval, open_time);
        let mut candles = self.read_partition(&path)?;
        let before = candles.len();
        candles.retain(|c| c.open_time() != open_time);
        if candles.len() == before {
            return Ok(false);
        }
        self.write_partition(&path, &candles)?;
        Ok(true)
    }

    /// All-or-nothing across partitions: every touched partition is staged to
    /// a temp file before any is renamed into place.
    fn upsert_batch(&self, candles: &[Candle]) -> Result<usize, StoreError> {
        // Group by series, then by monthly partition.
        let mut grouped: BTreeMap<SeriesKey, BTreeMap<PathBuf, Vec<&Candle>>> = BTreeMap::new();
        for candle in candles {
            let path = self.partition_path(&candle.symbol, candle.interval, candle.open_time());
            grouped
                .entry((candle.symbol.clone(), candle.interval))
                .or_default()
                .entry(path)
                .or_default()
                .push(candle);
        }

        // Locks are taken in key order, the same order every writer uses.
        let locks: Vec<_> = grouped
            .keys()
            .map(|(symbol, interval)| self.series_lock(symbol, *interval))
            .collect();
        let _guards: Vec<_> = locks
            .iter()
            .map(|lock| lock.lock().unwrap_or_else(|e| e.into_inner()))
            .collect();

        let mut staged = Vec::new();
        let mut inserted = 0;
        for (path, incoming) in grouped.into_values().flatten() {
            let previous = match self.read_partition(&path) {
                Ok(rows) => rows,
                Err(e) => {
                    Self::discard(&staged);
                    return Err(e);
                }
            };
            let mut merged: BTreeMap<DateTime<Utc>, Candle> =
                previous.iter().map(|c| (c.open_time(), c.clone())).collect();

            let mut added = 0;
            for candle in incoming {
                if !merged.contains_key(&candle.open_time()) {
                    merged.insert(candle.open_time(), candle.clone());
                    added += 1;
                }
            }
            if added == 0 {
                continue;
            }

            let rows: Vec<Candle> = merged.into_values().collect();
            match Self::stage_partition(&path, &rows) {
                Ok(tmp) => staged.push(Staged { tmp, path, previous }),
                Err(e) => {
                    Self::discard(&staged);
                    return Err(e);
                }
            }
            inserted += added;
        }

        self.publish(staged)?;
        Ok(inserted)
    }

    fn query_range(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, StoreError> {
        let mut all_candles = Vec::new();

        for month in calendar::month_starts(start, end) {
            let path = self.partition_path(symbol, interval, month);
            let candles = self.read_partition(&path)?;
            all_candles.extend(
                candles
                    .into_iter()
                    .filter(|c| c.open_time() >= start && c.open_time() <= end),
            );
        }

        all_candles.sort_by_key(|c| c.open_time());
        Ok(all_candles)
    }

    fn count(&self, symbol: &str, interval: Interval) -> Result<usize, StoreError> {
        let mut total = 0;
        for path in self.partition_files(symbol, interval)? {
            total += schema::read_parquet(&path)?.len();
        }
        Ok(total)
    }

    fn list_series(&self) -> Result<Vec<(String, Interval)>, StoreError> {
        let mut series = Vec::new();
        for symbol in Self::list_dirs(&self.data_dir)? {
            for code in Self::list_dirs(&self.data_dir.join(&symbol))? {
                let Some(interval) = Interval::from_dir_name(&code) else {
                    continue;
                };
                if !self.partition_files(&symbol, interval)?.is_empty() {
                    series.push((symbol.clone(), interval));
                }
            }
        }
        series.sort();
        Ok(series)
    }
}
