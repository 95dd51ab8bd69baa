pub mod calendar;
pub mod candle;
pub mod error;
pub mod integrity;
pub mod interval;
pub mod memory;
pub mod schema;
pub mod stats;
pub mod store;
