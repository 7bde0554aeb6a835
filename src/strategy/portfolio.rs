//! Candidate and portfolio records shared by the selector and the engine.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Which leg of the book a candidate or position belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "Long"),
            Side::Short => write!(f, "Short"),
        }
    }
}

/// One tradable asset on one side for one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    pub sector: String,
    pub score: Decimal,
}

impl Candidate {
    pub fn new(name: impl Into<String>, sector: impl Into<String>, score: Decimal) -> Self {
        Self {
            name: name.into(),
            sector: sector.into(),
            score,
        }
    }
}

/// Ordered candidates for one side on one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSet {
    pub side: Side,
    pub candidates: Vec<Candidate>,
}

impl CandidateSet {
    pub fn new(side: Side, candidates: Vec<Candidate>) -> Self {
        Self { side, candidates }
    }

    /// Build a set from aligned name/sector/score columns, dropping every
    /// entry whose score is missing or equal to `sentinel`.
    pub fn from_columns(
        side: Side,
        names: &[String],
        sectors: &[String],
        scores: &[Option<Decimal>],
        sentinel: Decimal,
    ) -> Self {
        let candidates = names
            .iter()
            .zip(sectors)
            .zip(scores)
            .filter_map(|((name, sector), score)| match score {
                Some(score) if *score != sentinel => {
                    Some(Candidate::new(name.clone(), sector.clone(), *score))
                }
                _ => None,
            })
            .collect();

        Self { side, candidates }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter()
    }

    /// Distinct sector labels in first-seen order.
    pub fn sectors(&self) -> Vec<&str> {
        let mut sectors: Vec<&str> = Vec::new();
        for candidate in &self.candidates {
            if !sectors.contains(&candidate.sector.as_str()) {
                sectors.push(&candidate.sector);
            }
        }
        sectors
    }
}

/// A held position produced by a selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub side: Side,
    pub name: String,
    pub score: Decimal,
    pub sector: String,
}

impl Position {
    pub fn from_candidate(side: Side, candidate: &Candidate) -> Self {
        Self {
            side,
            name: candidate.name.clone(),
            score: candidate.score,
            sector: candidate.sector.clone(),
        }
    }
}

/// The long and short positions chosen on a rebalance day.
///
/// "No portfolio yet" is expressed as `Option::<Portfolio>::None` by callers;
/// an empty `Portfolio` is a distinct value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub positions: Vec<Position>,
}

impl Portfolio {
    pub fn new(positions: Vec<Position>) -> Self {
        Self { positions }
    }

    pub fn side(&self, side: Side) -> impl Iterator<Item = &Position> {
        self.positions.iter().filter(move |p| p.side == side)
    }

    pub fn count(&self, side: Side) -> usize {
        self.side(side).count()
    }

    /// Names held on one side.
    pub fn names(&self, side: Side) -> BTreeSet<&str> {
        self.side(side).map(|p| p.name.as_str()).collect()
    }

    /// Long count minus short count within `sector`.
    pub fn sector_imbalance(&self, sector: &str) -> i64 {
        self.positions
            .iter()
            .filter(|p| p.sector == sector)
            .map(|p| match p.side {
                Side::Long => 1,
                Side::Short => -1,
            })
            .sum()
    }

    /// Sum of long scores minus sum of short scores.
    pub fn score_spread(&self) -> Decimal {
        self.positions
            .iter()
            .map(|p| match p.side {
                Side::Long => p.score,
                Side::Short => -p.score,
            })
            .sum()
    }
}
