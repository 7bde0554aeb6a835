//! Shared utilities.

pub mod decimal;

pub use decimal::{parse_decimal_cell, to_positive_count};
