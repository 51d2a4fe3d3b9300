mod rest;
mod stream;

pub use rest::{binance_interval, BinanceMarket};
pub use stream::BinanceKlineStream;
