//! UTC calendar arithmetic used by the sync horizon, store partitioning and
//! the daily scheduler. Everything here is a pure function of its inputs.

use chrono::{DateTime, Datelike, NaiveDate, TimeDelta, TimeZone, Utc};

/// Midnight UTC at the start of the day containing `t`.
pub fn start_of_day(t: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&t.date_naive().and_time(chrono::NaiveTime::MIN))
}

/// Latest instant whose candles are treated as final: 23:59:59 UTC of the day
/// before `now`.
pub fn safe_horizon(now: DateTime<Utc>) -> DateTime<Utc> {
    start_of_day(now) - TimeDelta::seconds(1)
}

/// Next 00:00:00 UTC strictly after `now`.
pub fn next_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    start_of_day(now) + TimeDelta::days(1)
}

/// First instant of the calendar month containing `t`.
pub fn start_of_month(t: DateTime<Utc>) -> DateTime<Utc> {
    month_start(t.year(), t.month())
}

/// First instant of the month after the one containing `t`.
pub fn first_day_of_next_month(t: DateTime<Utc>) -> DateTime<Utc> {
    if t.month() == 12 {
        month_start(t.year() + 1, 1)
    } else {
        month_start(t.year(), t.month() + 1)
    }
}

/// Start instants of every month intersecting `[start, end]`, ascending.
/// Empty when `start > end`.
pub fn month_starts(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    let mut months = Vec::new();
    if start > end {
        return months;
    }
    let mut current = start_of_month(start);
    while current <= end {
        months.push(current);
        current = first_day_of_next_month(current);
    }
    months
}

/// Midnight UTC at the start of `date`.
pub fn date_start(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

fn month_start(year: i32, month: u32) -> DateTime<Utc> {
    // Day 1 exists in every month of every representable year.
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
