use std::str::FromStr;

use chrono::{DateTime, Utc};
use kline_core::candle::Candle;
use kline_core::interval::Interval;
use kline_exchange::client::RawCandle;
use rust_decimal::Decimal;
use thiserror::Error;

/// A raw field that could not be converted.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid {field} at open_time {open_time}: {value:?}")]
pub struct NormalizeError {
    pub field: &'static str,
    pub value: String,
    pub open_time: i64,
}

fn timestamp(field: &'static str, ms: i64, open_time: i64) -> Result<DateTime<Utc>, NormalizeError> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| NormalizeError {
        field,
        value: ms.to_string(),
        open_time,
    })
}

fn decimal(field: &'static str, text: &str, open_time: i64) -> Result<Decimal, NormalizeError> {
    let text = text.trim();
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .map_err(|_| NormalizeError {
            field,
            value: text.to_string(),
            open_time,
        })
}

/// Convert one exchange row into a stored candle. Timestamps are epoch
/// milliseconds; calendar fields are derived from the UTC open time.
pub fn normalize(symbol: &str, interval: Interval, raw: &RawCandle) -> Result<Candle, NormalizeError> {
    let at = raw.open_time;
    let volume = match raw.volume.as_deref() {
        Some(v) if !v.trim().is_empty() => Some(decimal("volume", v, at)?),
        _ => None,
    };

    Ok(Candle::new(
        symbol,
        interval,
        timestamp("open_time", raw.open_time, at)?,
        timestamp("close_time", raw.close_time, at)?,
        decimal("open", &raw.open, at)?,
        decimal("high", &raw.high, at)?,
        decimal("low", &raw.low, at)?,
        decimal("close", &raw.close, at)?,
        volume,
    ))
}

/// Normalize a page, failing on the first bad row. Output is sorted by open time.
pub fn normalize_page(
    symbol: &str,
    interval: Interval,
    raw: &[RawCandle],
) -> Result<Vec<Candle>, NormalizeError> {
    let mut candles = raw
        .iter()
        .map(|r| normalize(symbol, interval, r))
        .collect::<Result<Vec<_>, _>>()?;
    candles.sort_by_key(|c| c.open_time());
    Ok(candles)
}
