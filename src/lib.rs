//! # Long/Short Rebalancer
//!
//! Replays daily long and short score sheets and builds sector-neutral
//! long/short portfolios on a rebalance schedule.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `solver`: Binary program model and exact branch-and-bound solver
//! - `strategy`: Scheduling, sector-neutral selection and exposure matrices
//! - `backtest`: Score sheet loading, the day-by-day replay and output files
//! - `utils`: Shared utilities and decimal parsing

pub mod backtest;
pub mod config;
pub mod solver;
pub mod strategy;
pub mod utils;

pub use config::Config;
