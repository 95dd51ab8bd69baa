//! Checkpointed, paginated synchronization of one (symbol, interval) series.
//!
//! A run resumes from the newest stored candle (re-fetching it, since it may
//! have been captured before it closed), pages forward up to the safe horizon
//! (end of yesterday, UTC), and writes each page with skip-on-conflict
//! semantics. The reported checkpoint only advances across contiguously
//! committed pages.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use kline_core::calendar;
use kline_core::candle::Candle;
use kline_core::error::StoreError;
use kline_core::interval::Interval;
use kline_core::store::CandleStore;
use kline_exchange::binance::MAX_LIMIT;
use kline_exchange::client::ExchangeClient;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{SyncError, TimeRange};
use crate::normalize::normalize_page;

/// What to do when writing a page to the store fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteErrorPolicy {
    /// Stop the pair so nothing is ever written above a gap.
    #[default]
    Abort,
    /// Log, record the skipped range and keep paging. The checkpoint stays at
    /// the last contiguous commit.
    SkipBatch,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Candles requested per page, clamped to the exchange maximum.
    pub page_size: u32,
    /// Pause between consecutive page requests.
    pub page_delay: Duration,
    /// Cold-start floor when nothing better is known.
    pub default_floor: DateTime<Utc>,
    /// Earliest instant the listing probe asks the exchange about.
    pub probe_origin: DateTime<Utc>,
    /// Interval whose earliest stored candle seeds other intervals' floors.
    pub floor_interval: Interval,
    /// Configured per-symbol floors, checked first.
    pub symbol_floors: HashMap<String, DateTime<Utc>>,
    pub on_write_error: WriteErrorPolicy,
}

fn midnight(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(y, m, d)
        .map(calendar::date_start)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            page_size: MAX_LIMIT,
            page_delay: Duration::from_millis(100),
            default_floor: midnight(2019, 9, 1),
            probe_origin: midnight(2019, 1, 1),
            floor_interval: Interval::Day1,
            symbol_floors: HashMap::new(),
            on_write_error: WriteErrorPolicy::Abort,
        }
    }
}

/// One page durably written to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Commit {
    pub range: TimeRange,
    pub inserted: usize,
    /// Reported checkpoint after this commit.
    pub checkpoint: Option<DateTime<Utc>>,
}

/// Outcome of syncing one (symbol, interval).
#[derive(Debug)]
pub struct SyncReport {
    pub symbol: String,
    pub interval: Interval,
    /// Window this run attempted, `None` when already up to date.
    pub range: Option<TimeRange>,
    pub pages: usize,
    /// Newly stored candles, excluding the re-fetched trailing one.
    pub inserted: usize,
    /// Trailing candles deleted and re-written with the exchange's final values.
    pub replaced: usize,
    /// Open time of the newest candle processed.
    pub last_candle_time: Option<DateTime<Utc>>,
    /// Close time of the newest candle of the last contiguous commit.
    pub checkpoint: Option<DateTime<Utc>>,
    pub commits: Vec<Commit>,
    /// Pages whose write failed under [`WriteErrorPolicy::SkipBatch`].
    pub skipped: Vec<TimeRange>,
    pub error: Option<SyncError>,
}

impl SyncReport {
    pub fn new(symbol: &str, interval: Interval) -> Self {
        Self {
            symbol: symbol.to_string(),
            interval,
            range: None,
            pages: 0,
            inserted: 0,
            replaced: 0,
            last_candle_time: None,
            checkpoint: None,
            commits: Vec::new(),
            skipped: Vec::new(),
            error: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Where a cold start begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloorSource {
    Configured,
    Sibling,
    Probe,
    Default,
}

pub struct SyncEngine {
    exchange: Arc<dyn ExchangeClient>,
    store: Arc<dyn CandleStore>,
    options: SyncOptions,
}

impl SyncEngine {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        store: Arc<dyn CandleStore>,
        options: SyncOptions,
    ) -> Self {
        Self {
            exchange,
            store,
            options,
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn store(&self) -> &Arc<dyn CandleStore> {
        &self.store
    }

    pub fn exchange_name(&self) -> &str {
        self.exchange.name()
    }

    /// Bring the series up to the end of yesterday (UTC, as of now).
    pub async fn sync_interval(
        &self,
        symbol: &str,
        interval: Interval,
        cancel: &CancellationToken,
    ) -> SyncReport {
        self.sync_interval_at(symbol, interval, Utc::now(), cancel).await
    }

    /// Like [`sync_interval`](Self::sync_interval) with an explicit clock.
    pub async fn sync_interval_at(
        &self,
        symbol: &str,
        interval: Interval,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> SyncReport {
        let mut report = SyncReport::new(symbol, interval);
        let horizon = calendar::safe_horizon(now);

        match self.run(symbol, interval, horizon, cancel, &mut report).await {
            Ok(()) => info!(
                "{symbol} {interval}: {} inserted, {} replaced over {} page(s), last candle {}",
                report.inserted,
                report.replaced,
                report.pages,
                report
                    .last_candle_time
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Err(e) => {
                if e.is_cancelled() {
                    warn!("{e}");
                } else {
                    error!("{e}");
                }
                report.error = Some(e);
            }
        }
        report
    }

    async fn run(
        &self,
        symbol: &str,
        interval: Interval,
        horizon: DateTime<Utc>,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let read_err = |source: StoreError| SyncError::StorageRead {
            symbol: symbol.to_string(),
            interval,
            source,
        };

        let newest = self
            .store
            .max_open_time(symbol, interval)
            .map_err(read_err)?;
        let mut cursor = match newest {
            Some(t) => t,
            None => {
                let (floor, source) = self.resolve_floor(symbol, interval, horizon).await?;
                info!("{symbol} {interval}: cold start from {floor} ({source:?})");
                floor
            }
        };

        if cursor > horizon {
            debug!("{symbol} {interval}: up to date (cursor {cursor} past horizon {horizon})");
            return Ok(());
        }
        report.range = Some(TimeRange::new(cursor, horizon));

        let page_size = self.options.page_size.clamp(1, MAX_LIMIT);
        let span = interval.duration() * page_size as i32;
        // Deleted only once its replacement has arrived.
        let mut trailing = newest;
        let mut contiguous = true;

        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled {
                    symbol: symbol.to_string(),
                    interval,
                    range: TimeRange::new(cursor, horizon),
                });
            }

            let batch_end = cursor
                .checked_add_signed(span)
                .map_or(horizon, |t| t.min(horizon));
            let range = TimeRange::new(cursor, batch_end);

            let raw = self
                .exchange
                .fetch_candles(symbol, interval, cursor, batch_end, page_size)
                .await
                .map_err(|source| {
                    if source.is_malformed() {
                        SyncError::MalformedResponse {
                            symbol: symbol.to_string(),
                            interval,
                            range,
                            detail: source.to_string(),
                        }
                    } else {
                        SyncError::TransientFetch {
                            symbol: symbol.to_string(),
                            interval,
                            range,
                            source,
                        }
                    }
                })?;
            report.pages += 1;

            if raw.is_empty() {
                debug!("{symbol} {interval}: no candles in {range}, done");
                break;
            }

            let candles = normalize_page(symbol, interval, &raw).map_err(|e| {
                SyncError::MalformedResponse {
                    symbol: symbol.to_string(),
                    interval,
                    range,
                    detail: e.to_string(),
                }
            })?;

            let Some(last_close) = candles.last().map(|c| c.close_time) else {
                break;
            };
            if last_close <= cursor {
                return Err(SyncError::MalformedResponse {
                    symbol: symbol.to_string(),
                    interval,
                    range,
                    detail: format!("last close_time {last_close} does not advance cursor {cursor}"),
                });
            }

            let received = candles.len();
            let closed: Vec<Candle> = candles
                .into_iter()
                .filter(|c| c.open_time() <= horizon)
                .collect();
            if closed.len() < received {
                debug!(
                    "{symbol} {interval}: dropped {} candle(s) past horizon {horizon}",
                    received - closed.len()
                );
            }

            let replace = trailing
                .take()
                .filter(|t| closed.iter().any(|c| c.open_time() == *t));

            if !closed.is_empty() {
                match self.commit_page(symbol, interval, replace, &closed) {
                    Ok((inserted, replaced)) => {
                        report.inserted += inserted;
                        report.replaced += replaced;
                        if contiguous {
                            report.checkpoint = closed.last().map(|c| c.close_time);
                        }
                        report.commits.push(Commit {
                            range,
                            inserted: inserted + replaced,
                            checkpoint: report.checkpoint,
                        });
                        report.last_candle_time = closed.last().map(|c| c.open_time());
                        debug!(
                            "{symbol} {interval}: page {} wrote {} of {} candle(s) for {range}",
                            report.pages,
                            inserted + replaced,
                            closed.len()
                        );
                    }
                    Err(source) => match self.options.on_write_error {
                        WriteErrorPolicy::Abort => {
                            return Err(SyncError::StorageWrite {
                                symbol: symbol.to_string(),
                                interval,
                                range,
                                source,
                            });
                        }
                        WriteErrorPolicy::SkipBatch => {
                            warn!("{symbol} {interval}: skipping page {range} after write failure: {source}");
                            contiguous = false;
                            report.skipped.push(range);
                        }
                    },
                }
            }

            cursor = last_close;
            if cursor >= horizon {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(SyncError::Cancelled {
                        symbol: symbol.to_string(),
                        interval,
                        range: TimeRange::new(cursor, horizon),
                    });
                }
                _ = tokio::time::sleep(self.options.page_delay) => {}
            }
        }

        Ok(())
    }

    /// Returns (newly inserted, replaced). When the write fails, the deleted
    /// trailing row is put back so a failed page never loses committed data.
    fn commit_page(
        &self,
        symbol: &str,
        interval: Interval,
        replace: Option<DateTime<Utc>>,
        candles: &[Candle],
    ) -> Result<(usize, usize), StoreError> {
        let mut previous = Vec::new();
        if let Some(open_time) = replace {
            previous = self.store.query_range(symbol, interval, open_time, open_time)?;
            self.store.delete_candle(symbol, interval, open_time)?;
        }
        let replaced = previous.len().min(1);

        match self.store.upsert_batch(candles) {
            Ok(written) => Ok((written.saturating_sub(replaced), replaced.min(written))),
            Err(e) => {
                if !previous.is_empty()
                    && let Err(restore) = self.store.upsert_batch(&previous)
                {
                    error!("{symbol} {interval}: could not restore trailing candle: {restore}");
                }
                Err(e)
            }
        }
    }

    /// Cold-start floor: configured start, then the sibling interval's earliest
    /// stored candle, then the exchange's first daily candle, then the default.
    pub async fn resolve_floor(
        &self,
        symbol: &str,
        interval: Interval,
        horizon: DateTime<Utc>,
    ) -> Result<(DateTime<Utc>, FloorSource), SyncError> {
        if let Some(floor) = self.options.symbol_floors.get(symbol) {
            return Ok((*floor, FloorSource::Configured));
        }

        let sibling = self.options.floor_interval;
        if sibling != interval
            && let Some(earliest) = self
                .store
                .min_open_time(symbol, sibling)
                .map_err(|source| SyncError::StorageRead {
                    symbol: symbol.to_string(),
                    interval,
                    source,
                })?
        {
            return Ok((earliest, FloorSource::Sibling));
        }

        let origin = self.options.probe_origin;
        match self
            .exchange
            .fetch_candles(symbol, sibling, origin, horizon.max(origin), 1)
            .await
        {
            Ok(rows) => {
                if let Some(first) = rows.first()
                    && let Some(t) = DateTime::from_timestamp_millis(first.open_time)
                {
                    return Ok((t, FloorSource::Probe));
                }
                warn!("{symbol}: listing probe returned nothing, using default floor");
            }
            Err(e) => warn!("{symbol}: listing probe failed ({e}), using default floor"),
        }
        Ok((self.options.default_floor, FloorSource::Default))
    }
}
