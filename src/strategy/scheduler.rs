//! Calendar cadence rules deciding when a re-optimization is due.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Minimum elapsed calendar days between biweekly rebalances.
pub const BIWEEKLY_MIN_DAYS: i64 = 15;

/// How often the portfolio is re-optimized.
///
/// Parsed case-insensitively from the full names or the one-letter codes
/// used by the score sheets (`d`, `s`, `q`, `m`, `t`, `a`). Any other value
/// is kept as [`Cadence::Unrecognized`] and always reports a rebalance due.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Cadence {
    Daily,
    Weekly,
    /// Twice a month, approximated as "at least 15 calendar days elapsed".
    Biweekly,
    Monthly,
    Quarterly,
    Annual,
    Unrecognized(String),
}

impl Cadence {
    /// True when the value did not match any known cadence.
    pub fn is_recognized(&self) -> bool {
        !matches!(self, Cadence::Unrecognized(_))
    }
}

impl Default for Cadence {
    fn default() -> Self {
        Cadence::Biweekly
    }
}

impl FromStr for Cadence {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cadence = match s.trim().to_ascii_lowercase().as_str() {
            "d" | "daily" => Cadence::Daily,
            "s" | "w" | "weekly" => Cadence::Weekly,
            "q" | "biweekly" | "fortnightly" => Cadence::Biweekly,
            "m" | "monthly" => Cadence::Monthly,
            "t" | "quarterly" => Cadence::Quarterly,
            "a" | "y" | "annual" | "yearly" => Cadence::Annual,
            _ => Cadence::Unrecognized(s.trim().to_string()),
        };
        Ok(cadence)
    }
}

impl From<String> for Cadence {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(cadence) => cadence,
            Err(never) => match never {},
        }
    }
}

impl From<Cadence> for String {
    fn from(value: Cadence) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::Daily => write!(f, "daily"),
            Cadence::Weekly => write!(f, "weekly"),
            Cadence::Biweekly => write!(f, "biweekly"),
            Cadence::Monthly => write!(f, "monthly"),
            Cadence::Quarterly => write!(f, "quarterly"),
            Cadence::Annual => write!(f, "annual"),
            Cadence::Unrecognized(raw) => write!(f, "{}", raw),
        }
    }
}

/// Decide whether a rebalance is due on `current` given the last one.
pub fn is_due(current: NaiveDate, last_rebalance: Option<NaiveDate>, cadence: &Cadence) -> bool {
    if *cadence == Cadence::Daily {
        return true;
    }
    let Some(last) = last_rebalance else {
        return true;
    };

    match cadence {
        Cadence::Daily => true,
        Cadence::Weekly => {
            current.iso_week().week() != last.iso_week().week() || current.year() != last.year()
        }
        Cadence::Biweekly => (current - last).num_days() >= BIWEEKLY_MIN_DAYS,
        Cadence::Monthly => current.month() != last.month() || current.year() != last.year(),
        Cadence::Quarterly => quarter(current) != quarter(last) || current.year() != last.year(),
        Cadence::Annual => current.year() != last.year(),
        Cadence::Unrecognized(_) => true,
    }
}

fn quarter(date: NaiveDate) -> u32 {
    (date.month() - 1) / 3
}

/// Parse a day label into a calendar date.
///
/// Accepts ISO dates (optionally followed by a time) and `DD/MM/YYYY`.
pub fn parse_day(label: &str) -> Option<NaiveDate> {
    let label = label.trim();

    for fmt in ["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(label, fmt) {
            return Some(date);
        }
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(label, fmt) {
            return Some(dt.date());
        }
    }
    None
}
