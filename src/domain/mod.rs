//! Core domain types and logic.

pub mod ohlcv;
pub mod position;
pub mod portfolio;
pub mod risk;
pub mod backtest;
pub mod metrics;
pub mod sizing;
pub mod strategy;
pub mod universe;
pub mod code_data;
pub mod config_validation;
pub mod error;
