use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use kline_core::calendar;
use kline_core::interval::{Interval, UnsupportedIntervalError};
use kline_exchange::binance::MAX_LIMIT;
use kline_exchange::client::ContractType;
use serde::Deserialize;
use thiserror::Error;

use crate::engine::{SyncOptions, WriteErrorPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("config lists no symbols")]
    NoSymbols,

    #[error("symbol #{index} is blank")]
    BlankSymbol { index: usize },

    #[error("{symbol}: no intervals configured")]
    NoIntervals { symbol: String },

    #[error("{symbol}: {source}")]
    UnsupportedInterval {
        symbol: String,
        #[source]
        source: UnsupportedIntervalError,
    },

    #[error("{symbol} {interval} is listed more than once")]
    DuplicatePair { symbol: String, interval: Interval },

    #[error("page_size {0} is outside 1..=1500")]
    PageSize(u32),

    #[error("max_concurrency must be at least 1")]
    Concurrency,
}

/// One (symbol, interval) series to keep synchronized.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyncTarget {
    pub symbol: String,
    pub interval: Interval,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolConfig {
    pub symbol: String,
    #[serde(default)]
    pub intervals: Vec<String>,
    /// Earliest date to fetch on a cold start.
    #[serde(default)]
    pub start: Option<NaiveDate>,
}

fn default_page_size() -> u32 {
    MAX_LIMIT
}

fn default_page_delay_ms() -> u64 {
    100
}

fn default_max_concurrency() -> usize {
    4
}

fn default_floor() -> NaiveDate {
    NaiveDate::from_ymd_opt(2019, 9, 1).unwrap_or_default()
}

/// Contents of the JSON config file. Only `symbols` is required.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub symbols: Vec<SymbolConfig>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub contract_type: ContractType,
    #[serde(default)]
    pub on_write_error: WriteErrorPolicy,
    #[serde(default = "default_floor")]
    pub default_floor: NaiveDate,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl SyncConfig {
    /// Read, parse and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&text)?;
        config.targets()?;
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Validate and expand into sync targets, in config order.
    pub fn targets(&self) -> Result<Vec<SyncTarget>, ConfigError> {
        if self.symbols.is_empty() {
            return Err(ConfigError::NoSymbols);
        }
        if !(1..=MAX_LIMIT).contains(&self.page_size) {
            return Err(ConfigError::PageSize(self.page_size));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Concurrency);
        }

        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for (index, entry) in self.symbols.iter().enumerate() {
            let symbol = normalize_symbol(&entry.symbol);
            if symbol.is_empty() {
                return Err(ConfigError::BlankSymbol { index });
            }
            if entry.intervals.is_empty() {
                return Err(ConfigError::NoIntervals { symbol });
            }
            for code in &entry.intervals {
                let interval: Interval =
                    code.trim()
                        .parse()
                        .map_err(|source| ConfigError::UnsupportedInterval {
                            symbol: symbol.clone(),
                            source,
                        })?;
                if !seen.insert((symbol.clone(), interval)) {
                    return Err(ConfigError::DuplicatePair { symbol, interval });
                }
                targets.push(SyncTarget {
                    symbol: symbol.clone(),
                    interval,
                });
            }
        }
        Ok(targets)
    }

    /// Distinct symbols, in config order.
    pub fn symbol_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.symbols
            .iter()
            .map(|s| normalize_symbol(&s.symbol))
            .filter(|s| !s.is_empty() && seen.insert(s.clone()))
            .collect()
    }

    pub fn options(&self) -> SyncOptions {
        let symbol_floors: HashMap<_, _> = self
            .symbols
            .iter()
            .filter_map(|s| {
                s.start
                    .map(|date| (normalize_symbol(&s.symbol), calendar::date_start(date)))
            })
            .collect();
        SyncOptions {
            page_size: self.page_size,
            page_delay: Duration::from_millis(self.page_delay_ms),
            default_floor: calendar::date_start(self.default_floor),
            symbol_floors,
            on_write_error: self.on_write_error,
            ..SyncOptions::default()
        }
    }
}

fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config = SyncConfig::from_json(
            r#"{"symbols":[{"symbol":"BTCUSDT","intervals":["1d","4h","1h"]}]}"#,
        )
        .unwrap();
        assert_eq!(config.page_size, 1500);
        assert_eq!(config.page_delay_ms, 100);
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.contract_type, ContractType::Perpetual);
        assert_eq!(config.on_write_error, WriteErrorPolicy::Abort);
        assert_eq!(config.default_floor, NaiveDate::from_ymd_opt(2019, 9, 1).unwrap());

        let targets = config.targets().unwrap();
        assert_eq!(
            targets.iter().map(|t| t.interval).collect::<Vec<_>>(),
            vec![Interval::Day1, Interval::Hour4, Interval::Hour1]
        );
        assert!(targets.iter().all(|t| t.symbol == "BTCUSDT"));
    }

    #[test]
    fn parses_full_config_into_options() {
        let config = SyncConfig::from_json(
            r#"{
                "symbols": [
                    {"symbol": "btcusdt", "intervals": ["1d"], "start": "2019-09-08"},
                    {"symbol": "ETHUSDT", "intervals": ["1h"]}
                ],
                "page_size": 1000,
                "page_delay_ms": 250,
                "max_concurrency": 2,
                "contract_type": "CURRENT_QUARTER",
                "on_write_error": "skip_batch",
                "default_floor": "2020-01-01",
                "base_url": "http://localhost:8080"
            }"#,
        )
        .unwrap();
        assert_eq!(config.base_url.as_deref(), Some("http://localhost:8080"));
        assert_eq!(config.contract_type, ContractType::CurrentQuarter);
        assert_eq!(config.symbol_names(), vec!["BTCUSDT", "ETHUSDT"]);

        let opts = config.options();
        assert_eq!(opts.page_size, 1000);
        assert_eq!(opts.page_delay, Duration::from_millis(250));
        assert_eq!(opts.on_write_error, WriteErrorPolicy::SkipBatch);
        assert_eq!(opts.default_floor, Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(
            opts.symbol_floors.get("BTCUSDT"),
            Some(&Utc.with_ymd_and_hms(2019, 9, 8, 0, 0, 0).unwrap())
        );
        assert!(!opts.symbol_floors.contains_key("ETHUSDT"));
    }

    fn invalid(json: &str) -> ConfigError {
        SyncConfig::from_json(json).unwrap().targets().unwrap_err()
    }

    #[test]
    fn rejects_invalid_configs() {
        assert!(matches!(invalid(r#"{"symbols":[]}"#), ConfigError::NoSymbols));
        assert!(matches!(
            invalid(r#"{"symbols":[{"symbol":"  ","intervals":["1d"]}]}"#),
            ConfigError::BlankSymbol { index: 0 }
        ));
        assert!(matches!(
            invalid(r#"{"symbols":[{"symbol":"BTCUSDT","intervals":[]}]}"#),
            ConfigError::NoIntervals { .. }
        ));
        assert!(matches!(
            invalid(r#"{"symbols":[{"symbol":"BTCUSDT","intervals":["7h"]}]}"#),
            ConfigError::UnsupportedInterval { .. }
        ));
        assert!(matches!(
            invalid(r#"{"symbols":[{"symbol":"BTCUSDT","intervals":["1h"]},{"symbol":"btcusdt","intervals":["1h"]}]}"#),
            ConfigError::DuplicatePair { interval: Interval::Hour1, .. }
        ));
        assert!(matches!(
            invalid(r#"{"symbols":[{"symbol":"BTCUSDT","intervals":["1h"]}],"page_size":2000}"#),
            ConfigError::PageSize(2000)
        ));
        assert!(matches!(
            invalid(r#"{"symbols":[{"symbol":"BTCUSDT","intervals":["1h"]}],"max_concurrency":0}"#),
            ConfigError::Concurrency
        ));
    }

    #[test]
    fn malformed_json_is_parse_error() {
        assert!(matches!(
            SyncConfig::from_json(r#"{"symbols": "#),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            SyncConfig::from_json(r#"{"page_size": 10}"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_reads_and_validates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"symbols":[{"symbol":"SOLUSDT","intervals":["15m"]}]}"#,
        )
        .unwrap();
        let config = SyncConfig::load(&path).unwrap();
        assert_eq!(config.targets().unwrap()[0].interval, Interval::Minute15);

        std::fs::write(&path, r#"{"symbols":[]}"#).unwrap();
        assert!(matches!(SyncConfig::load(&path), Err(ConfigError::NoSymbols)));

        assert!(matches!(
            SyncConfig::load(dir.path().join("missing.json")),
            Err(ConfigError::Io { .. })
        ));
    }
}
