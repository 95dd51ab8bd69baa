//! Up/down frequencies of stored candles grouped by calendar bucket.
//!
//! Buckets are keyed on the derived calendar fields (UTC day label or UTC
//! hour of open time). Rates are plain ratios expressed as percentages.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::candle::{Candle, Direction};
use crate::error::StoreError;
use crate::interval::Interval;
use crate::store::CandleStore;

/// One historical candle contributing to a bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    /// Year for day buckets, `YYYY-MM-DD` for hour buckets.
    pub label: String,
    pub open: Decimal,
    pub close: Decimal,
    pub diff: Decimal,
    pub direction: Direction,
    pub close_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketStats {
    pub bucket: String,
    pub total: usize,
    pub up: usize,
    pub down: usize,
    pub flat: usize,
    /// Share of up candles, 0-100.
    pub up_rate: f64,
    pub samples: Vec<Sample>,
}

impl BucketStats {
    fn collect<'a>(
        bucket: String,
        candles: impl IntoIterator<Item = &'a Candle>,
        label: impl Fn(&Candle) -> String,
    ) -> Self {
        let mut stats = BucketStats {
            bucket,
            total: 0,
            up: 0,
            down: 0,
            flat: 0,
            up_rate: 0.0,
            samples: Vec::new(),
        };

        for candle in candles {
            let direction = candle.direction();
            match direction {
                Direction::Up => stats.up += 1,
                Direction::Down => stats.down += 1,
                Direction::Flat => stats.flat += 1,
            }
            stats.total += 1;
            stats.samples.push(Sample {
                label: label(candle),
                open: candle.open,
                close: candle.close,
                diff: candle.close - candle.open,
                direction,
                close_time: candle.close_time,
            });
        }

        if stats.total > 0 {
            stats.up_rate = stats.up as f64 / stats.total as f64 * 100.0;
        }
        stats.samples.sort_by(|a, b| a.label.cmp(&b.label));
        stats
    }
}

/// All candles opening on `MM-DD` across every stored year.
pub fn same_date_across_years(candles: &[Candle], month: u32, day: u32) -> BucketStats {
    let label = format!("{month:02}-{day:02}");
    BucketStats::collect(
        label.clone(),
        candles.iter().filter(|c| c.calendar().day == label),
        |c| c.calendar().year.clone(),
    )
}

/// The same day of month in each of the twelve months. Months without any
/// sample (including dates that do not exist, such as `02-30`) are omitted.
pub fn same_day_across_months(candles: &[Candle], day: u32) -> Vec<BucketStats> {
    (1..=12)
        .map(|month| same_date_across_years(candles, month, day))
        .filter(|stats| stats.total > 0)
        .collect()
}

/// All candles opening in UTC hour `hour`.
pub fn hour_of_day(candles: &[Candle], hour: u32) -> BucketStats {
    BucketStats::collect(
        format!("{hour:02}:00"),
        candles.iter().filter(|c| c.calendar().hour == hour),
        |c| c.open_time().format("%Y-%m-%d").to_string(),
    )
}

/// Non-empty hour buckets, 00:00 through 23:00.
pub fn all_hours(candles: &[Candle]) -> Vec<BucketStats> {
    (0..24)
        .map(|hour| hour_of_day(candles, hour))
        .filter(|stats| stats.total > 0)
        .collect()
}

/// Buckets with the highest and lowest up rate. Ties keep the earliest bucket.
pub fn best_and_worst(buckets: &[BucketStats]) -> Option<(&BucketStats, &BucketStats)> {
    let mut iter = buckets.iter();
    let first = iter.next()?;
    let (mut best, mut worst) = (first, first);
    for stats in iter {
        if stats.up_rate > best.up_rate {
            best = stats;
        }
        if stats.up_rate < worst.up_rate {
            worst = stats;
        }
    }
    Some((best, worst))
}

/// Day-of-month analysis of one series.
#[derive(Debug, Clone, Serialize)]
pub struct DayReport {
    pub symbol: String,
    pub interval: Interval,
    pub date: BucketStats,
    pub by_month: Vec<BucketStats>,
    pub best_month: Option<String>,
    pub worst_month: Option<String>,
}

/// Hour-of-day analysis of one intraday series.
#[derive(Debug, Clone, Serialize)]
pub struct HourReport {
    pub symbol: String,
    pub interval: Interval,
    pub hour: BucketStats,
    pub by_hour: Vec<BucketStats>,
}

pub fn day_report(
    store: &dyn CandleStore,
    symbol: &str,
    interval: Interval,
    month: u32,
    day: u32,
) -> Result<DayReport, StoreError> {
    let candles = store.query_all(symbol, interval)?;
    let by_month = same_day_across_months(&candles, day);
    let (best_month, worst_month) = match best_and_worst(&by_month) {
        Some((best, worst)) => (Some(best.bucket.clone()), Some(worst.bucket.clone())),
        None => (None, None),
    };
    Ok(DayReport {
        symbol: symbol.to_string(),
        interval,
        date: same_date_across_years(&candles, month, day),
        by_month,
        best_month,
        worst_month,
    })
}

pub fn hour_report(
    store: &dyn CandleStore,
    symbol: &str,
    interval: Interval,
    hour: u32,
) -> Result<HourReport, StoreError> {
    let candles = store.query_all(symbol, interval)?;
    Ok(HourReport {
        symbol: symbol.to_string(),
        interval,
        hour: hour_of_day(&candles, hour),
        by_hour: all_hours(&candles),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCandleStore;
    use chrono::{TimeDelta, TimeZone};
    use rust_decimal_macros::dec;

    fn daily(y: i32, m: u32, d: u32, open: Decimal, close: Decimal) -> Candle {
        let t = Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap();
        Candle::new(
            "BTCUSDT",
            Interval::Day1,
            t,
            t + TimeDelta::days(1) - TimeDelta::milliseconds(1),
            open,
            open.max(close),
            open.min(close),
            close,
            None,
        )
    }

    fn hourly(d: u32, h: u32, open: Decimal, close: Decimal) -> Candle {
        let t = Utc.with_ymd_and_hms(2024, 6, d, h, 0, 0).unwrap();
        Candle::new(
            "ETHUSDT",
            Interval::Hour1,
            t,
            t + TimeDelta::hours(1) - TimeDelta::milliseconds(1),
            open,
            open.max(close),
            open.min(close),
            close,
            None,
        )
    }

    #[test]
    fn same_date_counts_across_years() {
        let candles = vec![
            daily(2021, 10, 30, dec!(100), dec!(110)),
            daily(2022, 10, 30, dec!(100), dec!(90)),
            daily(2023, 10, 30, dec!(100), dec!(100)),
            daily(2024, 10, 30, dec!(100), dec!(101)),
            daily(2024, 10, 29, dec!(100), dec!(50)),
        ];
        let stats = same_date_across_years(&candles, 10, 30);
        assert_eq!(stats.bucket, "10-30");
        assert_eq!((stats.total, stats.up, stats.down, stats.flat), (4, 2, 1, 1));
        assert!((stats.up_rate - 50.0).abs() < 1e-9);
        let labels: Vec<_> = stats.samples.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["2021", "2022", "2023", "2024"]);
        assert_eq!(stats.samples[1].diff, dec!(-10));
    }

    #[test]
    fn same_day_across_months_skips_missing_dates() {
        let candles = vec![
            daily(2024, 1, 30, dec!(1), dec!(2)),
            daily(2024, 3, 30, dec!(2), dec!(1)),
            daily(2023, 3, 30, dec!(2), dec!(3)),
        ];
        let months = same_day_across_months(&candles, 30);
        let buckets: Vec<_> = months.iter().map(|m| m.bucket.as_str()).collect();
        assert_eq!(buckets, vec!["01-30", "03-30"]);
        assert_eq!(months[1].total, 2);

        let (best, worst) = best_and_worst(&months).unwrap();
        assert_eq!(best.bucket, "01-30");
        assert_eq!(worst.bucket, "03-30");
    }

    #[test]
    fn empty_bucket_has_zero_rate() {
        let stats = same_date_across_years(&[], 2, 29);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.up_rate, 0.0);
        assert!(best_and_worst(&[]).is_none());
    }

    #[test]
    fn hour_buckets_use_utc_open_hour() {
        let candles = vec![
            hourly(1, 14, dec!(10), dec!(11)),
            hourly(2, 14, dec!(10), dec!(9)),
            hourly(2, 15, dec!(10), dec!(12)),
        ];
        let fourteen = hour_of_day(&candles, 14);
        assert_eq!(fourteen.bucket, "14:00");
        assert_eq!(fourteen.total, 2);
        assert_eq!(fourteen.samples[0].label, "2024-06-01");

        let all = all_hours(&candles);
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].bucket, "15:00");
        assert!((all[1].up_rate - 100.0).abs() < 1e-9);
    }

    #[test]
    fn reports_read_through_the_store() {
        let store = MemoryCandleStore::new();
        store
            .upsert_batch(&[
                daily(2022, 5, 15, dec!(1), dec!(2)),
                daily(2023, 5, 15, dec!(2), dec!(1)),
                daily(2023, 6, 15, dec!(1), dec!(2)),
            ])
            .unwrap();

        let report = day_report(&store, "BTCUSDT", Interval::Day1, 5, 15).unwrap();
        assert_eq!(report.date.total, 2);
        assert_eq!(report.by_month.len(), 2);
        assert_eq!(report.best_month.as_deref(), Some("06-15"));
        assert_eq!(report.worst_month.as_deref(), Some("05-15"));

        let hours = hour_report(&store, "BTCUSDT", Interval::Day1, 0).unwrap();
        assert_eq!(hours.hour.total, 3);
    }
}
