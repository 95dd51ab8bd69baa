use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::interval::Interval;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Stored calendar columns disagree with the ones derived from open_time.
    #[error("calendar columns for {symbol} {interval} at {open_time} disagree with open_time: stored {stored}")]
    CalendarMismatch {
        symbol: String,
        interval: Interval,
        open_time: DateTime<Utc>,
        stored: String,
    },

    #[error("Invalid data: {0}")]
    InvalidData(String),
}
