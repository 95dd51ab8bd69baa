use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, StringArray, TimestampMillisecondArray, UInt32Array};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use rust_decimal::Decimal;

use crate::candle::{CalendarFields, Candle};
use crate::error::StoreError;
use crate::interval::Interval;

fn utc_millis() -> DataType {
    DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into()))
}

pub fn candle_schema() -> Schema {
    Schema::new(vec![
        Field::new("symbol", DataType::Utf8, false),
        Field::new("interval", DataType::Utf8, false),
        Field::new("open_time", utc_millis(), false),
        Field::new("close_time", utc_millis(), false),
        Field::new("open", DataType::Utf8, false),
        Field::new("high", DataType::Utf8, false),
        Field::new("low", DataType::Utf8, false),
        Field::new("close", DataType::Utf8, false),
        Field::new("volume", DataType::Utf8, true),
        Field::new("year", DataType::Utf8, false),
        Field::new("day", DataType::Utf8, false),
        Field::new("hour", DataType::UInt32, false),
        Field::new("weekday", DataType::UInt32, false),
        Field::new("minute", DataType::UInt32, false),
    ])
}

pub fn candles_to_record_batch(candles: &[Candle]) -> Result<RecordBatch, StoreError> {
    let schema = Arc::new(candle_schema());

    let decimals = |f: fn(&Candle) -> Decimal| {
        StringArray::from_iter_values(candles.iter().map(|c| f(c).to_string()))
    };
    let volumes: Vec<Option<String>> = candles
        .iter()
        .map(|c| c.volume.map(|v| v.to_string()))
        .collect();

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(
            candles.iter().map(|c| c.symbol.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            candles.iter().map(|c| c.interval.code()),
        )),
        Arc::new(
            TimestampMillisecondArray::from(
                candles
                    .iter()
                    .map(|c| c.open_time().timestamp_millis())
                    .collect::<Vec<i64>>(),
            )
            .with_timezone("UTC"),
        ),
        Arc::new(
            TimestampMillisecondArray::from(
                candles
                    .iter()
                    .map(|c| c.close_time.timestamp_millis())
                    .collect::<Vec<i64>>(),
            )
            .with_timezone("UTC"),
        ),
        Arc::new(decimals(|c| c.open)),
        Arc::new(decimals(|c| c.high)),
        Arc::new(decimals(|c| c.low)),
        Arc::new(decimals(|c| c.close)),
        Arc::new(StringArray::from(volumes)),
        Arc::new(StringArray::from_iter_values(
            candles.iter().map(|c| c.calendar().year.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            candles.iter().map(|c| c.calendar().day.as_str()),
        )),
        Arc::new(UInt32Array::from(
            candles.iter().map(|c| c.calendar().hour).collect::<Vec<u32>>(),
        )),
        Arc::new(UInt32Array::from(
            candles
                .iter()
                .map(|c| c.calendar().weekday)
                .collect::<Vec<u32>>(),
        )),
        Arc::new(UInt32Array::from(
            candles.iter().map(|c| c.calendar().minute).collect::<Vec<u32>>(),
        )),
    ];

    Ok(RecordBatch::try_new(schema, columns)?)
}

fn column<'a, T: 'static>(
    batch: &'a RecordBatch,
    index: usize,
    name: &str,
) -> Result<&'a T, StoreError> {
    batch
        .column(index)
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| StoreError::InvalidData(format!("expected {name} column")))
}

fn parse_decimal(value: &str, name: &str) -> Result<Decimal, StoreError> {
    value
        .parse()
        .map_err(|e| StoreError::InvalidData(format!("invalid {name} '{value}': {e}")))
}

fn timestamp(millis: i64, name: &str) -> Result<chrono::DateTime<chrono::Utc>, StoreError> {
    chrono::DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::InvalidData(format!("invalid {name}: {millis}")))
}

pub fn record_batch_to_candles(batch: &RecordBatch) -> Result<Vec<Candle>, StoreError> {
    let symbols = column::<StringArray>(batch, 0, "symbol")?;
    let intervals = column::<StringArray>(batch, 1, "interval")?;
    let open_times = column::<TimestampMillisecondArray>(batch, 2, "open_time")?;
    let close_times = column::<TimestampMillisecondArray>(batch, 3, "close_time")?;
    let opens = column::<StringArray>(batch, 4, "open")?;
    let highs = column::<StringArray>(batch, 5, "high")?;
    let lows = column::<StringArray>(batch, 6, "low")?;
    let closes = column::<StringArray>(batch, 7, "close")?;
    let volumes = column::<StringArray>(batch, 8, "volume")?;
    let years = column::<StringArray>(batch, 9, "year")?;
    let days = column::<StringArray>(batch, 10, "day")?;
    let hours = column::<UInt32Array>(batch, 11, "hour")?;
    let weekdays = column::<UInt32Array>(batch, 12, "weekday")?;
    let minutes = column::<UInt32Array>(batch, 13, "minute")?;

    let mut candles = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let interval: Interval = intervals
            .value(i)
            .parse()
            .map_err(|e| StoreError::InvalidData(format!("{e}")))?;
        let volume = if volumes.is_null(i) {
            None
        } else {
            Some(parse_decimal(volumes.value(i), "volume")?)
        };

        let candle = Candle::new(
            symbols.value(i),
            interval,
            timestamp(open_times.value(i), "open_time")?,
            timestamp(close_times.value(i), "close_time")?,
            parse_decimal(opens.value(i), "open")?,
            parse_decimal(highs.value(i), "high")?,
            parse_decimal(lows.value(i), "low")?,
            parse_decimal(closes.value(i), "close")?,
            volume,
        );

        // Stored calendar columns must agree with a fresh derivation.
        let stored = CalendarFields {
            year: years.value(i).to_string(),
            day: days.value(i).to_string(),
            hour: hours.value(i),
            weekday: weekdays.value(i),
            minute: minutes.value(i),
        };
        if &stored != candle.calendar() {
            return Err(StoreError::CalendarMismatch {
                open_time: candle.open_time(),
                interval: candle.interval,
                symbol: candle.symbol,
                stored: format!("{stored:?}"),
            });
        }

        candles.push(candle);
    }

    Ok(candles)
}

pub fn write_parquet(path: &Path, candles: &[Candle]) -> Result<(), StoreError> {
    let batch = candles_to_record_batch(candles)?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let file = std::fs::File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    Ok(())
}

pub fn read_parquet(path: &Path) -> Result<Vec<Candle>, StoreError> {
    let file = std::fs::File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let reader = builder.build()?;

    let mut all_candles = Vec::new();
    for batch in reader {
        let batch = batch?;
        let mut candles = record_batch_to_candles(&batch)?;
        all_candles.append(&mut candles);
    }

    Ok(all_candles)
}
