use chrono::{DateTime, Utc};

use crate::candle::Candle;
use crate::interval::Interval;

/// A problem found in a stored series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Issue {
    /// Open times repeat.
    Duplicate { open_time: DateTime<Utc> },
    /// Open times are not strictly ascending at this position.
    OutOfOrder { index: usize },
    /// Expected candles missing between two stored open times.
    Gap {
        after: DateTime<Utc>,
        before: DateTime<Utc>,
        missing: i64,
    },
    /// A candle that closes at or before it opens.
    InvalidCloseTime { open_time: DateTime<Utc> },
    /// A candle whose open time is off the `first + k·duration` grid.
    Misaligned { open_time: DateTime<Utc> },
}

/// Check a series, as returned by a range query, against the invariants of a
/// fully synchronized store.
pub fn check_series(candles: &[Candle], interval: Interval) -> Vec<Issue> {
    let mut issues = Vec::new();
    let step = interval.duration();

    for candle in candles {
        if candle.close_time <= candle.open_time() {
            issues.push(Issue::InvalidCloseTime {
                open_time: candle.open_time(),
            });
        }
    }

    let Some(first) = candles.first() else {
        return issues;
    };

    for (i, pair) in candles.windows(2).enumerate() {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.open_time() == prev.open_time() {
            issues.push(Issue::Duplicate {
                open_time: next.open_time(),
            });
            continue;
        }
        if next.open_time() < prev.open_time() {
            issues.push(Issue::OutOfOrder { index: i + 1 });
            continue;
        }
        if !interval.is_fixed_width() {
            continue;
        }

        let offset = next.open_time() - first.open_time();
        if offset.num_milliseconds() % step.num_milliseconds() != 0 {
            issues.push(Issue::Misaligned {
                open_time: next.open_time(),
            });
            continue;
        }

        let missing = (next.open_time() - prev.open_time()).num_milliseconds() / step.num_milliseconds() - 1;
        if missing > 0 {
            issues.push(Issue::Gap {
                after: prev.open_time(),
                before: next.open_time(),
                missing,
            });
        }
    }

    issues
}
