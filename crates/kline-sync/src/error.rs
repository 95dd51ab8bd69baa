use std::fmt;

use chrono::{DateTime, Utc};
use kline_core::error::StoreError;
use kline_core::interval::Interval;
use kline_exchange::error::ExchangeError;
use serde::Serialize;
use thiserror::Error;

/// Inclusive instant range, as requested from the exchange or written to storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} .. {}",
            self.start.format("%Y-%m-%dT%H:%M:%SZ"),
            self.end.format("%Y-%m-%dT%H:%M:%SZ")
        )
    }
}

/// Failure of one (symbol, interval) sync.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network, timeout, throttling or API-status failure. Safe to retry on the
    /// next run.
    #[error("{symbol} {interval}: fetch failed for {range}: {source}")]
    TransientFetch {
        symbol: String,
        interval: Interval,
        range: TimeRange,
        #[source]
        source: ExchangeError,
    },

    #[error("{symbol} {interval}: malformed response for {range}: {detail}")]
    MalformedResponse {
        symbol: String,
        interval: Interval,
        range: TimeRange,
        detail: String,
    },

    #[error("{symbol} {interval}: storage write failed for {range}: {source}")]
    StorageWrite {
        symbol: String,
        interval: Interval,
        range: TimeRange,
        #[source]
        source: StoreError,
    },

    #[error("{symbol} {interval}: storage read failed: {source}")]
    StorageRead {
        symbol: String,
        interval: Interval,
        #[source]
        source: StoreError,
    },

    #[error("{symbol} {interval}: cancelled with {range} remaining")]
    Cancelled {
        symbol: String,
        interval: Interval,
        range: TimeRange,
    },

    /// The task running the sync panicked or was aborted.
    #[error("{symbol} {interval}: sync task failed: {reason}")]
    TaskFailed {
        symbol: String,
        interval: Interval,
        reason: String,
    },
}

impl SyncError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled { .. })
    }

    /// The range being attempted when the failure happened, when one was known.
    pub fn range(&self) -> Option<TimeRange> {
        match self {
            SyncError::TransientFetch { range, .. }
            | SyncError::MalformedResponse { range, .. }
            | SyncError::StorageWrite { range, .. }
            | SyncError::Cancelled { range, .. } => Some(*range),
            SyncError::StorageRead { .. } | SyncError::TaskFailed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn messages_carry_pair_and_range() {
        let range = TimeRange::new(
            Utc.with_ymd_and_hms(2024, 10, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 10, 29, 23, 59, 59).unwrap(),
        );
        let err = SyncError::TransientFetch {
            symbol: "BTCUSDT".to_string(),
            interval: Interval::Hour4,
            range,
            source: ExchangeError::RateLimited {
                retry_after_secs: 30,
            },
        };
        assert_eq!(
            err.to_string(),
            "BTCUSDT 4h: fetch failed for 2024-10-01T00:00:00Z .. 2024-10-29T23:59:59Z: \
             Rate limited, retry after 30s"
        );
        assert_eq!(err.range(), Some(range));
        assert!(!err.is_cancelled());
    }
}
