use chrono::{DateTime, Datelike, Timelike, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::interval::Interval;

/// Calendar fields denormalized from a candle's open time for bucketed queries.
/// All values are UTC.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CalendarFields {
    /// Four-digit year, e.g. `"2024"`.
    pub year: String,
    /// Zero-padded `MM-DD`, e.g. `"03-05"`.
    pub day: String,
    /// Hour of day, 0-23.
    pub hour: u32,
    /// Day of week counted from Sunday = 1 through Saturday = 7.
    pub weekday: u32,
    /// Minute of hour, 0-59.
    pub minute: u32,
}

impl CalendarFields {
    pub fn from_open_time(open_time: &DateTime<Utc>) -> Self {
        Self {
            year: format!("{:04}", open_time.year()),
            day: format!("{:02}-{:02}", open_time.month(), open_time.day()),
            hour: open_time.hour(),
            weekday: open_time.weekday().number_from_sunday(),
            minute: open_time.minute(),
        }
    }
}

/// Identity of a stored candle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandleKey {
    pub symbol: String,
    pub interval: Interval,
    pub open_time: DateTime<Utc>,
}

/// A single closed (or trailing, possibly still forming) OHLCV candle.
///
/// `open_time` is fixed at construction so the calendar fields derived from it
/// cannot go stale; build a new candle to move it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candle {
    pub symbol: String,
    pub interval: Interval,
    open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Option<Decimal>,
    calendar: CalendarFields,
}

impl Candle {
    /// Build a candle; calendar fields are always derived from `open_time`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        interval: Interval,
        open_time: DateTime<Utc>,
        close_time: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Option<Decimal>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            calendar: CalendarFields::from_open_time(&open_time),
            open_time,
            close_time,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    pub fn open_time(&self) -> DateTime<Utc> {
        self.open_time
    }

    pub fn calendar(&self) -> &CalendarFields {
        &self.calendar
    }

    pub fn key(&self) -> CandleKey {
        CandleKey {
            symbol: self.symbol.clone(),
            interval: self.interval,
            open_time: self.open_time,
        }
    }

    pub fn direction(&self) -> Direction {
        match self.close.cmp(&self.open) {
            std::cmp::Ordering::Greater => Direction::Up,
            std::cmp::Ordering::Less => Direction::Down,
            std::cmp::Ordering::Equal => Direction::Flat,
        }
    }
}

/// Open-to-close move of a candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Flat,
}
