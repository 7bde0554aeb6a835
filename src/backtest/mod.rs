//! Historical replay of the rebalancing strategy.
//!
//! This module provides:
//! - Score sheet loading (CSV import)
//! - The day-by-day rebalance state machine
//! - A parallel runner that pre-solves selections concurrently
//! - Output file writing
//!
//! # Example
//!
//! ```rust,ignore
//! use long_short_rebalancer::backtest::{RebalanceEngine, ScoreBook};
//!
//! let book = ScoreBook::load("data/long.csv", "data/short.csv")?;
//! let engine = RebalanceEngine::new(book.long.clone(), book.short.clone(), config, selector);
//!
//! let result = engine.run(&book.days);
//! println!("{}", result.summary());
//! ```

mod data;
mod engine;
mod report;
mod runner;

pub use data::{
    load_universe, parse_target_count, DayRow, MalformedCount, ScoreBook, ScoreSheet,
    SheetColumns, TradingDay,
};
pub use engine::{DayAction, DayOutcome, RebalanceEngine, RebalanceState, RunResult, ScoreRows};
pub use report::{rebalance_dates_to_csv, write_outputs, WrittenOutputs};
pub use runner::ReplayRunner;
