pub mod client;
pub mod precision;

pub use client::{AccountInfo, BinanceClient, OrderResult, PositionInfo, Ticker24h};
