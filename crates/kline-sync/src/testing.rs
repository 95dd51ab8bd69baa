//! Deterministic exchange and failure-injecting store for engine tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use kline_core::candle::Candle;
use kline_core::error::StoreError;
use kline_core::interval::Interval;
use kline_core::memory::MemoryCandleStore;
use kline_core::store::CandleStore;
use kline_exchange::client::{ExchangeClient, RawCandle};
use kline_exchange::error::ExchangeError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct FetchCall {
    pub interval: Interval,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub limit: u32,
    pub at: Instant,
}

#[derive(Debug, Clone, Copy)]
pub enum Failure {
    RateLimited,
    Malformed,
}

/// Serves a synthetic series: one candle every `interval` from `listing`
/// (optionally until `delisted`), `close = open + duration - 1ms`.
pub struct StubExchange {
    listing: DateTime<Utc>,
    delisted: Option<DateTime<Utc>>,
    ignore_end: bool,
    calls: Mutex<Vec<FetchCall>>,
    failures: Mutex<HashMap<usize, Failure>>,
    corrections: Mutex<HashMap<i64, RawCandle>>,
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
}

impl StubExchange {
    pub fn new(listing: DateTime<Utc>) -> Self {
        Self {
            listing,
            delisted: None,
            ignore_end: false,
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            corrections: Mutex::new(HashMap::new()),
            cancel_after: Mutex::new(None),
        }
    }

    /// Last open time the exchange has data for.
    pub fn delisted_at(mut self, last_open: DateTime<Utc>) -> Self {
        self.delisted = Some(last_open);
        self
    }

    /// Serve up to `limit` candles past the requested end, like a server that
    /// ignores `endTime`.
    pub fn ignoring_end(mut self) -> Self {
        self.ignore_end = true;
        self
    }

    /// Fail the n-th call (0-based).
    pub fn fail_call(self, n: usize, failure: Failure) -> Self {
        self.failures.lock().unwrap().insert(n, failure);
        self
    }

    /// Serve this row instead of the synthetic one at the same open time.
    pub fn correct(self, raw: RawCandle) -> Self {
        self.corrections.lock().unwrap().insert(raw.open_time, raw);
        self
    }

    /// Cancel `token` while serving the n-th call (0-based).
    pub fn cancel_on_call(self, n: usize, token: CancellationToken) -> Self {
        *self.cancel_after.lock().unwrap() = Some((n, token));
        self
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn synthetic(interval: Interval, open_time: DateTime<Utc>, k: i64) -> RawCandle {
        let open = 100 + k % 50;
        let close = open + (k % 3) - 1;
        RawCandle {
            open_time: open_time.timestamp_millis(),
            open: open.to_string(),
            high: (open + 2).to_string(),
            low: (open - 2).to_string(),
            close: close.to_string(),
            volume: Some(format!("{}.5", 10 + k % 7)),
            close_time: (open_time + interval.duration() - TimeDelta::milliseconds(1)).timestamp_millis(),
        }
    }
}

#[async_trait]
impl ExchangeClient for StubExchange {
    fn name(&self) -> &str {
        "stub"
    }

    async fn fetch_candles(
        &self,
        _symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<RawCandle>, ExchangeError> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(FetchCall {
                interval,
                start,
                end,
                limit,
                at: Instant::now(),
            });
            calls.len() - 1
        };

        if let Some((n, token)) = self.cancel_after.lock().unwrap().as_ref()
            && *n == index
        {
            token.cancel();
        }

        match self.failures.lock().unwrap().get(&index) {
            Some(Failure::RateLimited) => {
                return Err(ExchangeError::RateLimited {
                    retry_after_secs: 60,
                });
            }
            Some(Failure::Malformed) => {
                return Err(ExchangeError::Parse("unexpected token at line 1".to_string()));
            }
            None => {}
        }

        let step = interval.duration().num_milliseconds();
        let from = start.max(self.listing);
        let offset = (from - self.listing).num_milliseconds();
        let mut k = (offset + step - 1) / step;
        let corrections = self.corrections.lock().unwrap();
        let mut out = Vec::new();
        while out.len() < limit as usize {
            let open_time = self.listing + TimeDelta::milliseconds(k * step);
            if (!self.ignore_end && open_time > end) || self.delisted.is_some_and(|d| open_time > d) {
                break;
            }
            let row = corrections
                .get(&open_time.timestamp_millis())
                .cloned()
                .unwrap_or_else(|| Self::synthetic(interval, open_time, k));
            out.push(row);
            k += 1;
        }
        Ok(out)
    }
}

/// Memory store whose n-th `upsert_batch` calls (0-based) fail.
pub struct FailingStore {
    inner: MemoryCandleStore,
    fail_upserts: HashSet<usize>,
    upserts: AtomicUsize,
}

impl FailingStore {
    pub fn new(fail_upserts: impl IntoIterator<Item = usize>) -> Self {
        Self {
            inner: MemoryCandleStore::new(),
            fail_upserts: fail_upserts.into_iter().collect(),
            upserts: AtomicUsize::new(0),
        }
    }
}

impl CandleStore for FailingStore {
    fn max_open_time(&self, symbol: &str, interval: Interval) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.inner.max_open_time(symbol, interval)
    }

    fn min_open_time(&self, symbol: &str, interval: Interval) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.inner.min_open_time(symbol, interval)
    }

    fn delete_candle(&self, symbol: &str, interval: Interval, open_time: DateTime<Utc>) -> Result<bool, StoreError> {
        self.inner.delete_candle(symbol, interval, open_time)
    }

    fn upsert_batch(&self, candles: &[Candle]) -> Result<usize, StoreError> {
        let n = self.upserts.fetch_add(1, Ordering::SeqCst);
        if self.fail_upserts.contains(&n) {
            return Err(StoreError::InvalidData("disk full".to_string()));
        }
        self.inner.upsert_batch(candles)
    }

    fn query_range(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, StoreError> {
        self.inner.query_range(symbol, interval, start, end)
    }

    fn list_series(&self) -> Result<Vec<(String, Interval)>, StoreError> {
        self.inner.list_series()
    }
}
