pub mod commands;
pub mod config;
pub mod context;
pub mod deepar;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod indicators;
pub mod models;
pub mod plot;
pub mod price_data;
pub mod providers;
pub(crate) mod retry;
pub mod split;
pub mod storage;
pub mod tickers;
