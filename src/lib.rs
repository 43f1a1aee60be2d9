//! ARMA-BOT: scheduled ARMA price forecasts for an intraday series.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod data;
pub mod model;
pub mod publish;
pub mod engine;
