use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kline_core::interval::Interval;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::client::{ContractType, ExchangeClient, RawCandle};
use crate::error::ExchangeError;

const BINANCE_FUTURES_BASE_URL: &str = "https://fapi.binance.com";

/// Largest page the continuous-klines endpoint serves.
pub const MAX_LIMIT: u32 = 1500;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Binance USDⓈ-M futures continuous-contract klines.
/// Public market data; no authentication required.
pub struct BinanceFuturesClient {
    client: Client,
    base_url: String,
    contract_type: ContractType,
}

impl BinanceFuturesClient {
    pub fn new(contract_type: ContractType) -> Result<Self, ExchangeError> {
        Self::with_base_url(BINANCE_FUTURES_BASE_URL.to_string(), contract_type)
    }

    /// Create with a custom base URL (for testing or a regional mirror).
    pub fn with_base_url(
        base_url: String,
        contract_type: ContractType,
    ) -> Result<Self, ExchangeError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            contract_type,
        })
    }

    pub fn contract_type(&self) -> ContractType {
        self.contract_type
    }
}

#[derive(Debug, Deserialize)]
struct BinanceErrorBody {
    code: i64,
    msg: String,
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

fn millis_field(value: &Value, field: &str) -> Result<i64, ExchangeError> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| ExchangeError::Parse(format!("invalid {field}: {value}")))
}

/// Price fields arrive as decimal strings; numbers are accepted as well.
fn decimal_field(value: &Value, field: &str) -> Result<String, ExchangeError> {
    match value {
        Value::String(s) if !s.is_empty() => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(ExchangeError::Parse(format!("invalid {field}: {value}"))),
    }
}

/// Row layout: `[openTime, open, high, low, close, volume, closeTime, ...]`.
fn parse_row(index: usize, row: &[Value]) -> Result<RawCandle, ExchangeError> {
    if row.len() < 7 {
        return Err(ExchangeError::Parse(format!(
            "kline row {index} has {} fields, expected at least 7: {row:?}",
            row.len()
        )));
    }

    let volume = match &row[5] {
        Value::Null => None,
        v => Some(decimal_field(v, "volume")?),
    };

    Ok(RawCandle {
        open_time: millis_field(&row[0], "open_time")?,
        open: decimal_field(&row[1], "open")?,
        high: decimal_field(&row[2], "high")?,
        low: decimal_field(&row[3], "low")?,
        close: decimal_field(&row[4], "close")?,
        volume,
        close_time: millis_field(&row[6], "close_time")?,
    })
}

fn parse_klines(body: &str) -> Result<Vec<RawCandle>, ExchangeError> {
    let rows: Vec<Vec<Value>> = serde_json::from_str(body).map_err(|e| {
        ExchangeError::Parse(format!(
            "failed to parse klines response: {e}; body starts with: {}",
            truncate(body)
        ))
    })?;

    let mut candles = rows
        .iter()
        .enumerate()
        .map(|(i, row)| parse_row(i, row))
        .collect::<Result<Vec<_>, _>>()?;
    candles.sort_by_key(|c| c.open_time);
    Ok(candles)
}

fn api_error(status: u16, body: &str) -> ExchangeError {
    let message = match serde_json::from_str::<BinanceErrorBody>(body) {
        Ok(err) => format!("{}: {}", err.code, err.msg),
        Err(_) => truncate(body).to_string(),
    };
    ExchangeError::Api { status, message }
}

#[async_trait]
impl ExchangeClient for BinanceFuturesClient {
    fn name(&self) -> &str {
        "binance-futures"
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<RawCandle>, ExchangeError> {
        let limit = limit.clamp(1, MAX_LIMIT);
        debug!(
            %symbol,
            %interval,
            %start,
            %end,
            limit,
            contract_type = %self.contract_type,
            "requesting continuous klines"
        );

        let response = self
            .client
            .get(format!("{}/fapi/v1/continuousKlines", self.base_url))
            .query(&[
                ("pair", symbol.to_string()),
                ("contractType", self.contract_type.as_str().to_string()),
                ("interval", interval.code().to_string()),
                ("startTime", start.timestamp_millis().to_string()),
                ("endTime", end.timestamp_millis().to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        // 418 is Binance's escalation after repeated 429s.
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(ExchangeError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        let body = response.text().await?;
        if !status.is_success() {
            return Err(api_error(status.as_u16(), &body));
        }

        let candles = parse_klines(&body)?;
        debug!(%symbol, %interval, count = candles.len(), "received klines");
        Ok(candles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_continuous_klines_response() {
        let body = r#"[
            [1607444700000, "18879.99", "18900.00", "18878.98", "18896.13", "492.363",
             1607444759999, "9302145.66080", 1874, "385.983", "7292402.33267", "0"],
            [1607444760000, "18896.13", "18915.00", "18890.00", "18901.50", "211.004",
             1607444819999, "3988112.00000", 1002, "100.000", "1890000.00000", "0"]
        ]"#;

        let candles = parse_klines(body).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open_time, 1607444700000);
        assert_eq!(candles[0].close_time, 1607444759999);
        assert_eq!(candles[0].open, "18879.99");
        assert_eq!(candles[0].high, "18900.00");
        assert_eq!(candles[0].low, "18878.98");
        assert_eq!(candles[0].close, "18896.13");
        assert_eq!(candles[0].volume.as_deref(), Some("492.363"));
        assert_eq!(candles[1].close, "18901.50");
    }

    #[test]
    fn numeric_prices_are_accepted() {
        let body = r#"[[1700000000000, 1.5, 2, 1.25, 1.75, null, 1700000059999]]"#;
        let candles = parse_klines(body).unwrap();
        assert_eq!(candles[0].open, "1.5");
        assert_eq!(candles[0].high, "2");
        assert_eq!(candles[0].volume, None);
    }

    #[test]
    fn rows_are_sorted_by_open_time() {
        let body = r#"[
            [1700000060000, "1", "1", "1", "1", "0", 1700000119999],
            [1700000000000, "1", "1", "1", "1", "0", 1700000059999]
        ]"#;
        let candles = parse_klines(body).unwrap();
        assert_eq!(candles[0].open_time, 1700000000000);
    }

    #[test]
    fn empty_response_is_empty_vec() {
        assert!(parse_klines("[]").unwrap().is_empty());
    }

    #[test]
    fn short_row_is_parse_error() {
        let err = parse_klines(r#"[[1700000000000, "1", "1"]]"#).unwrap_err();
        assert!(err.is_malformed());
        assert!(err.to_string().contains("row 0"));
    }

    #[test]
    fn non_array_body_is_parse_error() {
        let err = parse_klines(r#"{"code":-1121,"msg":"Invalid symbol."}"#).unwrap_err();
        assert!(matches!(err, ExchangeError::Parse(_)));
    }

    #[test]
    fn bad_price_is_parse_error() {
        let err = parse_klines(r#"[[1700000000000, true, "1", "1", "1", "0", 1700000059999]]"#)
            .unwrap_err();
        assert!(err.to_string().contains("invalid open"));
    }

    #[test]
    fn api_error_decodes_binance_body() {
        let err = api_error(400, r#"{"code":-1121,"msg":"Invalid symbol."}"#);
        match err {
            ExchangeError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "-1121: Invalid symbol.");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
        assert!(!api_error(502, "<html>bad gateway</html>").is_malformed());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = BinanceFuturesClient::with_base_url(
            "http://localhost:9000/".to_string(),
            ContractType::Perpetual,
        )
        .unwrap();
        assert_eq!(client.base_url, "http://localhost:9000");
        assert_eq!(client.name(), "binance-futures");
        assert_eq!(client.contract_type(), ContractType::Perpetual);
    }
}
