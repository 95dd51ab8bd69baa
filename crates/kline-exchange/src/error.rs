use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Exchange configuration error: {0}")]
    Config(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
}

impl ExchangeError {
    /// True when the exchange answered with a payload that could not be decoded,
    /// as opposed to a transport, throttling or API-status failure.
    pub fn is_malformed(&self) -> bool {
        matches!(self, ExchangeError::Parse(_))
    }
}
