//! Decimal parsing helpers for score sheet cells.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Parse a numeric cell. Empty or non-numeric cells yield `None`.
///
/// Accepts plain decimals (`-999`, `3.25`) and scientific notation (`1e-3`).
pub fn parse_decimal_cell(cell: &str) -> Option<Decimal> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }
    Decimal::from_str(cell)
        .or_else(|_| Decimal::from_scientific(cell))
        .ok()
}

/// Convert an integral, strictly positive decimal to a count.
pub fn to_positive_count(value: Decimal) -> Option<usize> {
    if value <= Decimal::ZERO || value.fract() != Decimal::ZERO {
        return None;
    }
    value.trunc().to_usize()
}
