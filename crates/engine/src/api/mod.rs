//! External API clients

pub mod binance;

pub use binance::{interval_millis, BinanceClient};
