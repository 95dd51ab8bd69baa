use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::candle::Candle;
use crate::error::StoreError;
use crate::interval::Interval;
use crate::store::CandleStore;

type Series = BTreeMap<DateTime<Utc>, Candle>;

/// In-memory candle store with the same skip-on-conflict semantics as the
/// Parquet store. Useful for dry runs and as a test double.
#[derive(Default)]
pub struct MemoryCandleStore {
    series: RwLock<BTreeMap<(String, Interval), Series>>,
}

impl MemoryCandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<R>(&self, f: impl FnOnce(&BTreeMap<(String, Interval), Series>) -> R) -> R {
        let guard = self.series.read().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }

    fn write<R>(&self, f: impl FnOnce(&mut BTreeMap<(String, Interval), Series>) -> R) -> R {
        let mut guard = self.series.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}

impl CandleStore for MemoryCandleStore {
    fn max_open_time(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.read(|all| {
            all.get(&(symbol.to_string(), interval))
                .and_then(|s| s.keys().next_back().copied())
        }))
    }

    fn min_open_time(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.read(|all| {
            all.get(&(symbol.to_string(), interval))
                .and_then(|s| s.keys().next().copied())
        }))
    }

    fn delete_candle(
        &self,
        symbol: &str,
        interval: Interval,
        open_time: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(self.write(|all| {
            let key = (symbol.to_string(), interval);
            let removed = all
                .get_mut(&key)
                .is_some_and(|s| s.remove(&open_time).is_some());
            if all.get(&key).is_some_and(|s| s.is_empty()) {
                all.remove(&key);
            }
            removed
        }))
    }

    fn upsert_batch(&self, candles: &[Candle]) -> Result<usize, StoreError> {
        Ok(self.write(|all| {
            let mut inserted = 0;
            for candle in candles {
                let series = all
                    .entry((candle.symbol.clone(), candle.interval))
                    .or_default();
                if !series.contains_key(&candle.open_time()) {
                    series.insert(candle.open_time(), candle.clone());
                    inserted += 1;
                }
            }
            inserted
        }))
    }

    fn query_range(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, StoreError> {
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self.read(|all| {
            all.get(&(symbol.to_string(), interval))
                .map(|s| s.range(start..=end).map(|(_, c)| c.clone()).collect())
                .unwrap_or_default()
        }))
    }

    fn list_series(&self) -> Result<Vec<(String, Interval)>, StoreError> {
        Ok(self.read(|all| all.keys().cloned().collect()))
    }
}
