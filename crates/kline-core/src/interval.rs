use std::fmt;
use std::str::FromStr;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported interval code: {0:?}")]
pub struct UnsupportedIntervalError(pub String);

/// Candle bucket width, identified on the wire by its exchange period code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Interval {
    Minute1,
    Minute3,
    Minute5,
    Minute15,
    Minute30,
    Hour1,
    Hour2,
    Hour4,
    Hour6,
    Hour8,
    Hour12,
    Day1,
    Day3,
    Week1,
    Month1,
}

impl Interval {
    pub const ALL: [Interval; 15] = [
        Interval::Minute1,
        Interval::Minute3,
        Interval::Minute5,
        Interval::Minute15,
        Interval::Minute30,
        Interval::Hour1,
        Interval::Hour2,
        Interval::Hour4,
        Interval::Hour6,
        Interval::Hour8,
        Interval::Hour12,
        Interval::Day1,
        Interval::Day3,
        Interval::Week1,
        Interval::Month1,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Interval::Minute1 => "1m",
            Interval::Minute3 => "3m",
            Interval::Minute5 => "5m",
            Interval::Minute15 => "15m",
            Interval::Minute30 => "30m",
            Interval::Hour1 => "1h",
            Interval::Hour2 => "2h",
            Interval::Hour4 => "4h",
            Interval::Hour6 => "6h",
            Interval::Hour8 => "8h",
            Interval::Hour12 => "12h",
            Interval::Day1 => "1d",
            Interval::Day3 => "3d",
            Interval::Week1 => "1w",
            Interval::Month1 => "1M",
        }
    }

    /// Directory name for this interval's stored partitions. `1m` and `1M`
    /// differ only by case, so the month uses `1mo`.
    pub fn dir_name(self) -> &'static str {
        match self {
            Interval::Month1 => "1mo",
            other => other.code(),
        }
    }

    pub fn from_dir_name(name: &str) -> Option<Interval> {
        Interval::ALL.into_iter().find(|i| i.dir_name() == name)
    }

    /// Wall-clock width of one candle.
    ///
    /// `1M` is approximated as 30 days. It is only used to size pagination
    /// windows; stored close times always come from the exchange.
    pub fn duration(self) -> TimeDelta {
        match self {
            Interval::Minute1 => TimeDelta::minutes(1),
            Interval::Minute3 => TimeDelta::minutes(3),
            Interval::Minute5 => TimeDelta::minutes(5),
            Interval::Minute15 => TimeDelta::minutes(15),
            Interval::Minute30 => TimeDelta::minutes(30),
            Interval::Hour1 => TimeDelta::hours(1),
            Interval::Hour2 => TimeDelta::hours(2),
            Interval::Hour4 => TimeDelta::hours(4),
            Interval::Hour6 => TimeDelta::hours(6),
            Interval::Hour8 => TimeDelta::hours(8),
            Interval::Hour12 => TimeDelta::hours(12),
            Interval::Day1 => TimeDelta::days(1),
            Interval::Day3 => TimeDelta::days(3),
            Interval::Week1 => TimeDelta::days(7),
            Interval::Month1 => TimeDelta::days(30),
        }
    }

    /// True when every candle has the same width, so stored open times form
    /// an arithmetic sequence.
    pub fn is_fixed_width(self) -> bool {
        self != Interval::Month1
    }

    /// True for intervals shorter than a day (hour-of-day buckets are meaningful).
    pub fn is_intraday(self) -> bool {
        self.duration() < TimeDelta::days(1)
    }
}

/// Duration lookup by period code.
pub fn duration_of(code: &str) -> Result<TimeDelta, UnsupportedIntervalError> {
    code.parse::<Interval>().map(Interval::duration)
}

impl FromStr for Interval {
    type Err = UnsupportedIntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::ALL
            .into_iter()
            .find(|i| i.code() == s)
            .ok_or_else(|| UnsupportedIntervalError(s.to_string()))
    }
}

impl TryFrom<String> for Interval {
    type Error = UnsupportedIntervalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Interval> for String {
    fn from(value: Interval) -> Self {
        value.code().to_string()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_map_to_durations() {
        assert_eq!(duration_of("1h").unwrap(), TimeDelta::hours(1));
        assert_eq!(duration_of("1d").unwrap(), TimeDelta::hours(24));
        assert_eq!(duration_of("1w").unwrap(), TimeDelta::days(7));
        assert_eq!(duration_of("15m").unwrap(), TimeDelta::minutes(15));
        assert_eq!(duration_of("1M").unwrap(), TimeDelta::days(30));
    }

    #[test]
    fn unknown_code_is_an_error_not_a_default() {
        let err = duration_of("7h").unwrap_err();
        assert_eq!(err, UnsupportedIntervalError("7h".into()));
        assert!("".parse::<Interval>().is_err());
        // Codes are case-sensitive: "1m" is a minute, "1M" a month.
        assert!("1H".parse::<Interval>().is_err());
        assert_eq!("1m".parse::<Interval>().unwrap(), Interval::Minute1);
        assert_eq!("1M".parse::<Interval>().unwrap(), Interval::Month1);
    }

    #[test]
    fn code_parse_is_consistent_for_every_variant() {
        for interval in Interval::ALL {
            assert_eq!(interval.code().parse::<Interval>().unwrap(), interval);
            assert_eq!(interval.to_string(), interval.code());
        }
    }

    #[test]
    fn dir_names_are_unique_ignoring_case() {
        let mut names: Vec<String> = Interval::ALL
            .into_iter()
            .map(|i| i.dir_name().to_ascii_lowercase())
            .collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Interval::ALL.len());
        assert_eq!(Interval::Month1.dir_name(), "1mo");
        assert_eq!(Interval::Minute1.dir_name(), "1m");
        for interval in Interval::ALL {
            assert_eq!(Interval::from_dir_name(interval.dir_name()), Some(interval));
        }
        assert_eq!(Interval::from_dir_name("1M"), None);
    }

    #[test]
    fn string_conversions_use_codes() {
        assert_eq!(String::from(Interval::Hour4), "4h");
        let parsed = Interval::try_from("12h".to_string()).unwrap();
        assert_eq!(parsed, Interval::Hour12);
        assert!(Interval::try_from("2w".to_string()).is_err());
    }

    #[test]
    fn intraday_and_fixed_width() {
        assert!(Interval::Hour12.is_intraday());
        assert!(!Interval::Day1.is_intraday());
        assert!(Interval::Week1.is_fixed_width());
        assert!(!Interval::Month1.is_fixed_width());
    }
}
