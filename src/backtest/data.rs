//! Score sheet loading.
//!
//! Each side (long, short) is a CSV file laid out like a spreadsheet tab:
//!
//! ```csv
//! scores,,,
//! ,,,Energy,Banks,Energy
//! ,,,PETR4,ITUB4,PRIO3
//! 2024Q1,2,2024-01-02,7.5,3.1,-999
//! 2024Q1,2,2024-01-03,7.2,3.3,1.8
//! ```
//!
//! Line 1 is a title row. Lines 2 and 3 carry sector labels and asset names
//! from the fourth column on. Every following line is one trading day:
//! period key, target count, day label, then one score per asset. Cells may
//! be double-quoted, so sector labels can contain commas.

use crate::utils::decimal::{parse_decimal_cell, to_positive_count};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Number of leading columns before the per-asset cells.
pub const LEADING_COLUMNS: usize = 3;

/// Header lines preceding the day rows.
pub const HEADER_LINES: usize = 3;

/// A day's target count is not a positive integer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("target count {raw:?} is not a positive integer")]
pub struct MalformedCount {
    pub raw: String,
}

/// Parse a raw target-count cell.
pub fn parse_target_count(raw: &str) -> Result<usize, MalformedCount> {
    parse_decimal_cell(raw)
        .and_then(to_positive_count)
        .ok_or_else(|| MalformedCount {
            raw: raw.to_string(),
        })
}

/// Asset names and sector labels of one sheet, aligned by position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SheetColumns {
    pub names: Vec<String>,
    pub sectors: Vec<String>,
}

impl SheetColumns {
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// One day line of a sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayRow {
    /// 1-based line number in the source file
    pub line: usize,
    pub period_key: String,
    pub raw_count: String,
    pub label: String,
    /// `None` for empty or non-numeric cells
    pub scores: Vec<Option<Decimal>>,
}

/// A parsed score sheet for one side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSheet {
    pub columns: SheetColumns,
    pub days: Vec<DayRow>,
}

/// Non-blank lines of `content` split into cells, with 1-based line numbers.
fn read_records(content: &str) -> Result<Vec<(usize, Vec<String>)>> {
    let mut records = Vec::new();
    for (i, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(line.as_bytes());

        let cells = match reader.records().next() {
            Some(record) => record
                .with_context(|| format!("Malformed CSV on line {}", i + 1))?
                .iter()
                .map(str::to_string)
                .collect(),
            None => Vec::new(),
        };
        records.push((i + 1, cells));
    }

    Ok(records)
}

fn asset_cells(cells: &[String]) -> Vec<String> {
    cells.iter().skip(LEADING_COLUMNS).cloned().collect()
}

impl ScoreSheet {
    /// Load a sheet from a CSV file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read score sheet: {}", path.display()))?;

        Self::from_csv_content(&content)
            .with_context(|| format!("Invalid score sheet: {}", path.display()))
    }

    /// Parse a sheet from CSV content.
    pub fn from_csv_content(content: &str) -> Result<Self> {
        let lines = read_records(content)?;

        if lines.len() < HEADER_LINES {
            anyhow::bail!(
                "expected {} header lines (title, sectors, names), found {}",
                HEADER_LINES,
                lines.len()
            );
        }

        let mut sectors = asset_cells(&lines[1].1);
        let mut names = asset_cells(&lines[2].1);

        // Trailing empty cells are spreadsheet padding
        while names.last().is_some_and(|n| n.is_empty()) {
            names.pop();
        }
        while sectors.len() > names.len() && sectors.last().is_some_and(|s| s.is_empty()) {
            sectors.pop();
        }

        if names.is_empty() {
            anyhow::bail!("no asset columns found on the names line");
        }
        if sectors.len() != names.len() {
            anyhow::bail!(
                "sector line has {} asset columns but names line has {}",
                sectors.len(),
                names.len()
            );
        }

        let mut days = Vec::with_capacity(lines.len() - HEADER_LINES);
        for (line_no, mut cells) in lines.into_iter().skip(HEADER_LINES) {
            if cells.len() < LEADING_COLUMNS {
                cells.resize(LEADING_COLUMNS, String::new());
            }

            let label = if cells[2].is_empty() {
                format!("row_{}", line_no)
            } else {
                cells[2].clone()
            };

            let raw_scores = &cells[LEADING_COLUMNS..];
            if raw_scores.len() > names.len() && raw_scores[names.len()..].iter().any(|c| !c.is_empty()) {
                warn!(
                    line = line_no,
                    cells = raw_scores.len(),
                    assets = names.len(),
                    "Day row has more score cells than assets, extra cells ignored"
                );
            }
            let scores = (0..names.len())
                .map(|i| raw_scores.get(i).and_then(|c| parse_decimal_cell(c)))
                .collect();

            days.push(DayRow {
                line: line_no,
                period_key: cells[0].clone(),
                raw_count: cells[1].clone(),
                label,
                scores,
            });
        }

        Ok(Self {
            columns: SheetColumns { names, sectors },
            days,
        })
    }
}

/// The long and short rows of one trading day, aligned by index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingDay {
    pub index: usize,
    pub label: String,
    pub period_key: String,
    pub raw_count: String,
    pub long_scores: Vec<Option<Decimal>>,
    pub short_scores: Vec<Option<Decimal>>,
    /// The short sheet's period key when it disagrees with the long sheet's
    pub misaligned_period: Option<String>,
}

impl TradingDay {
    pub fn target_count(&self) -> Result<usize, MalformedCount> {
        parse_target_count(&self.raw_count)
    }
}

/// Both sheets joined day by day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBook {
    pub long: SheetColumns,
    pub short: SheetColumns,
    pub days: Vec<TradingDay>,
}

impl ScoreBook {
    /// Load and join the long and short sheets.
    pub fn load<P: AsRef<Path>>(long_path: P, short_path: P) -> Result<Self> {
        let long = ScoreSheet::from_path(long_path)?;
        let short = ScoreSheet::from_path(short_path)?;
        Ok(Self::from_sheets(long, short))
    }

    /// Join two sheets. The long sheet supplies period key, count and label.
    ///
    /// Only the common prefix of days is kept when the day counts differ.
    pub fn from_sheets(long: ScoreSheet, short: ScoreSheet) -> Self {
        if long.days.len() != short.days.len() {
            warn!(
                long_days = long.days.len(),
                short_days = short.days.len(),
                "Long and short sheets have different day counts, processing the common prefix"
            );
        }

        let days = long
            .days
            .into_iter()
            .zip(short.days)
            .enumerate()
            .map(|(index, (l, s))| {
                let misaligned_period = (l.period_key != s.period_key).then(|| s.period_key.clone());
                TradingDay {
                    index,
                    label: l.label,
                    period_key: l.period_key,
                    raw_count: l.raw_count,
                    long_scores: l.scores,
                    short_scores: s.scores,
                    misaligned_period,
                }
            })
            .collect();

        Self {
            long: long.columns,
            short: short.columns,
            days,
        }
    }

    /// Days whose period keys disagree between the sheets.
    pub fn misaligned_days(&self) -> Vec<&TradingDay> {
        self.days
            .iter()
            .filter(|d| d.misaligned_period.is_some())
            .collect()
    }

    /// Asset names of the long sheet, then new names of the short sheet.
    pub fn default_universe(&self) -> Vec<String> {
        let mut universe: Vec<String> = Vec::new();
        for name in self.long.names.iter().chain(&self.short.names) {
            if !universe.contains(name) {
                universe.push(name.clone());
            }
        }
        universe
    }

    /// Distinct sector labels across both sheets.
    pub fn sectors(&self) -> Vec<String> {
        let mut sectors: Vec<String> = Vec::new();
        for sector in self.long.sectors.iter().chain(&self.short.sectors) {
            if !sectors.contains(sector) {
                sectors.push(sector.clone());
            }
        }
        sectors
    }
}

/// Read an ordered universe file: one name per line, `#` comments allowed.
pub fn load_universe<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read universe file: {}", path.display()))?;

    let universe: Vec<String> = content
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect();

    if universe.is_empty() {
        anyhow::bail!("Universe file {} lists no assets", path.display());
    }
    Ok(universe)
}
