use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kline_core::interval::Interval;
use serde::{Deserialize, Serialize};

use crate::error::ExchangeError;

/// Candle exactly as the exchange reported it, before normalization.
/// Timestamps are milliseconds since the Unix epoch; prices are decimal text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCandle {
    pub open_time: i64,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: Option<String>,
    pub close_time: i64,
}

/// Continuous-contract designation for futures klines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractType {
    #[default]
    Perpetual,
    CurrentQuarter,
    NextQuarter,
}

impl ContractType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContractType::Perpetual => "PERPETUAL",
            ContractType::CurrentQuarter => "CURRENT_QUARTER",
            ContractType::NextQuarter => "NEXT_QUARTER",
        }
    }
}

impl fmt::Display for ContractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContractType {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PERPETUAL" => Ok(ContractType::Perpetual),
            "CURRENT_QUARTER" => Ok(ContractType::CurrentQuarter),
            "NEXT_QUARTER" => Ok(ContractType::NextQuarter),
            other => Err(ExchangeError::Config(format!(
                "unknown contract type: {other}. Expected: PERPETUAL, CURRENT_QUARTER, NEXT_QUARTER"
            ))),
        }
    }
}

/// Paginated access to historical candles.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Exchange name (for logging/display).
    fn name(&self) -> &str;

    /// Fetch at most `limit` candles whose open time lies in `[start, end]`,
    /// sorted ascending by open time. An empty vec means no data in range.
    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<RawCandle>, ExchangeError>;
}
