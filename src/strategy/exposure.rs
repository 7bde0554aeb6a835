//! Binary inclusion rows over the tradable universe.

use super::portfolio::{Portfolio, Side};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One day's 0/1 membership vector for one side, aligned with the universe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureRow {
    pub day: String,
    pub side: Side,
    pub values: Vec<u8>,
}

impl ExposureRow {
    /// Build the row for `side`. A missing portfolio yields all zeros.
    pub fn build(day: &str, side: Side, portfolio: Option<&Portfolio>, universe: &[String]) -> Self {
        let held = portfolio.map(|p| p.names(side)).unwrap_or_default();
        let values = universe
            .iter()
            .map(|asset| u8::from(held.contains(asset.as_str())))
            .collect();

        Self {
            day: day.to_string(),
            side,
            values,
        }
    }

    /// Universe names flagged in this row.
    pub fn members<'u>(&self, universe: &'u [String]) -> BTreeSet<&'u str> {
        universe
            .iter()
            .zip(&self.values)
            .filter(|(_, &flag)| flag == 1)
            .map(|(asset, _)| asset.as_str())
            .collect()
    }

    pub fn held_count(&self) -> usize {
        self.values.iter().filter(|&&v| v == 1).count()
    }
}

/// Long and short rows for every processed day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureMatrix {
    pub universe: Vec<String>,
    pub long: Vec<ExposureRow>,
    pub short: Vec<ExposureRow>,
}

impl ExposureMatrix {
    pub fn new(universe: Vec<String>) -> Self {
        Self {
            universe,
            long: Vec::new(),
            short: Vec::new(),
        }
    }

    /// Append both sides for one day.
    pub fn push_day(&mut self, day: &str, portfolio: Option<&Portfolio>) {
        self.long
            .push(ExposureRow::build(day, Side::Long, portfolio, &self.universe));
        self.short
            .push(ExposureRow::build(day, Side::Short, portfolio, &self.universe));
    }

    pub fn rows(&self, side: Side) -> &[ExposureRow] {
        match side {
            Side::Long => &self.long,
            Side::Short => &self.short,
        }
    }

    pub fn len(&self) -> usize {
        self.long.len()
    }

    pub fn is_empty(&self) -> bool {
        self.long.is_empty()
    }

    /// Render one side as CSV: `date,<universe...>` then one line per day.
    pub fn to_csv(&self, side: Side) -> String {
        let mut out = String::from("date");
        for asset in &self.universe {
            out.push(',');
            out.push_str(asset);
        }
        out.push('\n');

        for row in self.rows(side) {
            out.push_str(&row.day);
            for value in &row.values {
                out.push(',');
                out.push_str(if *value == 1 { "1" } else { "0" });
            }
            out.push('\n');
        }
        out
    }
}
