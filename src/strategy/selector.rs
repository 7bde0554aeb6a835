//! Sector-neutral long/short selection.
//!
//! Picks exactly `target_count` longs and `target_count` shorts maximizing
//! the long score mass minus the short score mass, with the long/short count
//! difference inside every sector bounded by the configured exposure limit.

use super::portfolio::{CandidateSet, Portfolio, Position, Side};
use crate::solver::{BinaryProgram, BinarySolver, SolveStatus, Solution, VarId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// One day's selection problem.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionRequest {
    /// Day label, used to name the program.
    pub label: String,
    pub long: CandidateSet,
    pub short: CandidateSet,
    pub target_count: usize,
    /// Maximum |longs − shorts| within any sector.
    pub sector_bound: u32,
}

/// Why a selection produced no portfolio.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum SelectionError {
    #[error("{side} side has {available} candidates but {required} are required")]
    InsufficientCandidates {
        side: Side,
        available: usize,
        required: usize,
    },

    #[error("solver finished with non-optimal status {0}")]
    SolverNonOptimal(SolveStatus),
}

/// A request translated into a binary program.
#[derive(Debug, Clone)]
pub struct Formulation {
    pub program: BinaryProgram,
    pub long_vars: Vec<VarId>,
    pub short_vars: Vec<VarId>,
}

impl SelectionRequest {
    /// Reject requests that cannot fill `target_count` on both sides.
    pub fn validate(&self) -> Result<(), SelectionError> {
        for set in [&self.long, &self.short] {
            if set.len() < self.target_count {
                return Err(SelectionError::InsufficientCandidates {
                    side: set.side,
                    available: set.len(),
                    required: self.target_count,
                });
            }
        }
        Ok(())
    }

    /// Sector labels present on either side, long side first.
    pub fn sectors(&self) -> Vec<&str> {
        let mut sectors = self.long.sectors();
        for sector in self.short.sectors() {
            if !sectors.contains(&sector) {
                sectors.push(sector);
            }
        }
        sectors
    }

    /// Build the binary program for this request.
    pub fn formulate(&self) -> Formulation {
        let mut program = BinaryProgram::new(format!("select_{}", self.label));

        let long_vars: Vec<VarId> = self
            .long
            .iter()
            .map(|c| program.add_variable(format!("long_{}", c.name), c.score))
            .collect();
        let short_vars: Vec<VarId> = self
            .short
            .iter()
            .map(|c| program.add_variable(format!("short_{}", c.name), -c.score))
            .collect();

        let count = self.target_count as i64;
        program.add_cardinality("long_count", &long_vars, count);
        program.add_cardinality("short_count", &short_vars, count);

        let bound = i64::from(self.sector_bound);
        for sector in self.sectors() {
            let longs = self
                .long
                .iter()
                .zip(&long_vars)
                .filter(|(c, _)| c.sector == sector)
                .map(|(_, &var)| (var, 1));
            let shorts = self
                .short
                .iter()
                .zip(&short_vars)
                .filter(|(c, _)| c.sector == sector)
                .map(|(_, &var)| (var, -1));
            let terms: Vec<(VarId, i64)> = longs.chain(shorts).collect();
            program.add_range(format!("sector_{}", sector), terms, -bound, bound);
        }

        Formulation {
            program,
            long_vars,
            short_vars,
        }
    }

    /// Read the chosen candidates out of an optimal solution.
    pub fn extract(
        &self,
        formulation: &Formulation,
        solution: &Solution,
    ) -> Result<Portfolio, SelectionError> {
        if !solution.is_optimal() {
            return Err(SelectionError::SolverNonOptimal(solution.status));
        }

        let longs = self
            .long
            .iter()
            .zip(&formulation.long_vars)
            .filter(|(_, &var)| solution.value_of(var))
            .map(|(c, _)| Position::from_candidate(Side::Long, c));
        let shorts = self
            .short
            .iter()
            .zip(&formulation.short_vars)
            .filter(|(_, &var)| solution.value_of(var))
            .map(|(c, _)| Position::from_candidate(Side::Short, c));

        Ok(Portfolio::new(longs.chain(shorts).collect()))
    }
}

/// Solves selection requests through a [`BinarySolver`].
#[derive(Clone)]
pub struct SectorNeutralSelector {
    solver: Arc<dyn BinarySolver>,
}

impl SectorNeutralSelector {
    pub fn new(solver: Arc<dyn BinarySolver>) -> Self {
        Self { solver }
    }

    /// Select the day's portfolio, or explain why none could be produced.
    ///
    /// Requests short of candidates are rejected before the solver runs.
    pub fn select(&self, request: &SelectionRequest) -> Result<Portfolio, SelectionError> {
        request.validate()?;

        let formulation = request.formulate();
        debug!(
            day = %request.label,
            variables = formulation.program.num_variables(),
            constraints = formulation.program.constraints().len(),
            "Solving selection"
        );

        let solution = self.solver.solve(&formulation.program);
        let portfolio = request.extract(&formulation, &solution)?;

        info!(
            day = %request.label,
            longs = portfolio.count(Side::Long),
            shorts = portfolio.count(Side::Short),
            spread = %portfolio.score_spread(),
            "Selection optimal"
        );

        Ok(portfolio)
    }
}

impl std::fmt::Debug for SectorNeutralSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectorNeutralSelector").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{BlockSolver, BranchAndBoundSolver, MockBinarySolver};
    use crate::strategy::portfolio::Candidate;
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    // =========================================================================
    // Test Helpers
    // =========================================================================

    fn selector() -> SectorNeutralSelector {
        SectorNeutralSelector::new(Arc::new(BlockSolver::default()))
    }

    fn branch_and_bound_selector() -> SectorNeutralSelector {
        SectorNeutralSelector::new(Arc::new(BranchAndBoundSolver::default()))
    }

    /// Deterministic pseudo-random side: `per_sector` candidates in each of
    /// `sectors` sectors, scores in [-50, 50) with two decimals.
    fn seeded_side(side: Side, sectors: usize, per_sector: usize, seed: u64) -> CandidateSet {
        let mut state = seed;
        let mut next = move || {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) % 10_000
        };
        let candidates = (0..sectors * per_sector)
            .map(|i| {
                let score = Decimal::new(next() as i64 - 5_000, 2);
                Candidate::new(
                    format!("{}{:03}", side, i),
                    format!("S{:02}", i % sectors),
                    score,
                )
            })
            .collect();
        CandidateSet::new(side, candidates)
    }

    /// Optimum of a zero-bound request, where every sector holds as many longs
    /// as shorts: a sector contributing `n` pairs takes its best `n` longs and
    /// lowest `n` shorts, and sectors are combined over their pair counts.
    fn zero_bound_optimum(request: &SelectionRequest) -> Option<Decimal> {
        let sectors = request.sectors();
        let k = request.target_count;
        let mut best: Vec<Option<Decimal>> = vec![None; k + 1];
        best[0] = Some(Decimal::ZERO);
        for sector in sectors {
            let mut longs: Vec<Decimal> = request
                .long
                .iter()
                .filter(|c| c.sector == sector)
                .map(|c| c.score)
                .collect();
            let mut shorts: Vec<Decimal> = request
                .short
                .iter()
                .filter(|c| c.sector == sector)
                .map(|c| c.score)
                .collect();
            longs.sort_by(|a, b| b.cmp(a));
            shorts.sort();
            let mut next = best.clone();
            for done in 0..=k {
                let Some(base) = best[done] else { continue };
                let mut gain = Decimal::ZERO;
                for pairs in 1..=longs.len().min(shorts.len()).min(k - done) {
                    gain += longs[pairs - 1] - shorts[pairs - 1];
                    let total = base + gain;
                    if next[done + pairs].map_or(true, |b| total > b) {
                        next[done + pairs] = Some(total);
                    }
                }
            }
            best = next;
        }
        best[k]
    }

    fn set(side: Side, entries: &[(&str, &str, Decimal)]) -> CandidateSet {
        CandidateSet::new(
            side,
            entries
                .iter()
                .map(|&(name, sector, score)| Candidate::new(name, sector, score))
                .collect(),
        )
    }

    fn request(
        long: CandidateSet,
        short: CandidateSet,
        target_count: usize,
        sector_bound: u32,
    ) -> SelectionRequest {
        SelectionRequest {
            label: "2024-01-02".to_string(),
            long,
            short,
            target_count,
            sector_bound,
        }
    }

    /// Best spread over every assignment meeting the cardinality and sector
    /// rules, by exhaustive enumeration.
    fn exhaustive_best(request: &SelectionRequest) -> Option<Decimal> {
        let formulation = request.formulate();
        let n = formulation.program.num_variables();
        let mut best: Option<Decimal> = None;
        for mask in 0u32..(1u32 << n) {
            let values: Vec<bool> = (0..n).map(|i| mask & (1 << i) != 0).collect();
            if formulation.program.is_feasible(&values) {
                let value = formulation.program.objective_value(&values);
                if best.map_or(true, |b| value > b) {
                    best = Some(value);
                }
            }
        }
        best
    }

    // =========================================================================
    // Selection Tests
    // =========================================================================

    #[test]
    fn test_zero_bound_pairs_within_sector() {
        let req = request(
            set(Side::Long, &[("A", "S1", dec!(10)), ("B", "S2", dec!(8))]),
            set(Side::Short, &[("C", "S1", dec!(9)), ("D", "S2", dec!(1))]),
            1,
            0,
        );

        let portfolio = selector().select(&req).unwrap();

        // Cross-sector pairs are ruled out; B/D (spread 7) beats A/C (spread 1)
        assert_eq!(portfolio.names(Side::Long).into_iter().collect::<Vec<_>>(), vec!["B"]);
        assert_eq!(portfolio.names(Side::Short).into_iter().collect::<Vec<_>>(), vec!["D"]);
        assert_eq!(portfolio.sector_imbalance("S1"), 0);
        assert_eq!(portfolio.sector_imbalance("S2"), 0);
        assert_eq!(portfolio.score_spread(), dec!(7));
    }

    #[test]
    fn test_zero_bound_same_sector_pair_when_only_one_matches() {
        let req = request(
            set(Side::Long, &[("A", "S1", dec!(10)), ("B", "S2", dec!(8))]),
            set(Side::Short, &[("C", "S1", dec!(9)), ("D", "S3", dec!(1))]),
            1,
            0,
        );

        let portfolio = selector().select(&req).unwrap();

        assert!(portfolio.names(Side::Long).contains("A"));
        assert!(portfolio.names(Side::Short).contains("C"));
    }

    #[test]
    fn test_loose_bound_takes_best_spread() {
        let req = request(
            set(Side::Long, &[("A", "S1", dec!(10)), ("B", "S2", dec!(8))]),
            set(Side::Short, &[("C", "S1", dec!(9)), ("D", "S2", dec!(1))]),
            1,
            1,
        );

        let portfolio = selector().select(&req).unwrap();

        assert!(portfolio.names(Side::Long).contains("A"));
        assert!(portfolio.names(Side::Short).contains("D"));
        assert_eq!(portfolio.score_spread(), dec!(9));
    }

    #[test]
    fn test_positions_carry_candidate_fields() {
        let req = request(
            set(Side::Long, &[("A", "Energy", dec!(2.5))]),
            set(Side::Short, &[("B", "Energy", dec!(-1.25))]),
            1,
            0,
        );

        let portfolio = selector().select(&req).unwrap();

        assert_eq!(
            portfolio.positions,
            vec![
                Position {
                    side: Side::Long,
                    name: "A".into(),
                    score: dec!(2.5),
                    sector: "Energy".into(),
                },
                Position {
                    side: Side::Short,
                    name: "B".into(),
                    score: dec!(-1.25),
                    sector: "Energy".into(),
                },
            ]
        );
    }

    #[test]
    fn test_sector_on_one_side_only_is_bounded() {
        // Both longs sit in a sector without shorts; bound 1 allows only one
        let req = request(
            set(
                Side::Long,
                &[("A", "Tech", dec!(9)), ("B", "Tech", dec!(8)), ("C", "Banks", dec!(1))],
            ),
            set(Side::Short, &[("D", "Banks", dec!(0)), ("E", "Utilities", dec!(0))]),
            2,
            1,
        );

        let portfolio = selector().select(&req).unwrap();

        assert!(portfolio.sector_imbalance("Tech").abs() <= 1);
        assert_eq!(portfolio.names(Side::Long).into_iter().collect::<Vec<_>>(), vec!["A", "C"]);
        assert_eq!(Some(portfolio.score_spread()), exhaustive_best(&req));
    }

    #[test]
    fn test_insufficient_candidates_skips_solver() {
        let mut solver = MockBinarySolver::new();
        solver.expect_solve().times(0);
        let selector = SectorNeutralSelector::new(Arc::new(solver));

        let req = request(
            set(Side::Long, &[("A", "S1", dec!(1)), ("B", "S1", dec!(2))]),
            set(
                Side::Short,
                &[("C", "S1", dec!(1)), ("D", "S1", dec!(2)), ("E", "S1", dec!(3))],
            ),
            3,
            5,
        );

        assert_eq!(
            selector.select(&req),
            Err(SelectionError::InsufficientCandidates {
                side: Side::Long,
                available: 2,
                required: 3,
            })
        );
    }

    #[test]
    fn test_non_optimal_status_is_infeasible() {
        let mut solver = MockBinarySolver::new();
        solver
            .expect_solve()
            .times(1)
            .returning(|_| Solution::without_assignment(SolveStatus::NodeLimit));
        let selector = SectorNeutralSelector::new(Arc::new(solver));

        let req = request(
            set(Side::Long, &[("A", "S1", dec!(1))]),
            set(Side::Short, &[("B", "S1", dec!(1))]),
            1,
            0,
        );

        assert_eq!(
            selector.select(&req),
            Err(SelectionError::SolverNonOptimal(SolveStatus::NodeLimit))
        );
    }

    #[test]
    fn test_unsatisfiable_sector_bound_is_infeasible() {
        let req = request(
            set(Side::Long, &[("A", "S1", dec!(1))]),
            set(Side::Short, &[("B", "S2", dec!(1))]),
            1,
            0,
        );

        assert_eq!(
            selector().select(&req),
            Err(SelectionError::SolverNonOptimal(SolveStatus::Infeasible))
        );
    }

    #[test]
    fn test_full_universe_selections_are_optimal() {
        // 180 candidates per side over 15 sectors
        for (k, bound) in [(10, 0), (10, 1), (20, 0), (20, 1), (30, 0), (30, 1)] {
            let req = request(
                seeded_side(Side::Long, 15, 12, 7 + k as u64),
                seeded_side(Side::Short, 15, 12, 1_000 + k as u64),
                k,
                bound,
            );

            let portfolio = selector()
                .select(&req)
                .unwrap_or_else(|e| panic!("k={} bound={}: {}", k, bound, e));

            assert_eq!(portfolio.count(Side::Long), k);
            assert_eq!(portfolio.count(Side::Short), k);
            for sector in req.sectors() {
                assert!(portfolio.sector_imbalance(sector).abs() <= i64::from(bound));
            }
            if bound == 0 {
                assert_eq!(Some(portfolio.score_spread()), zero_bound_optimum(&req));
            }
        }
    }

    #[test]
    fn test_full_universe_loose_bound_is_unconstrained_best() {
        let req = request(
            seeded_side(Side::Long, 15, 12, 11),
            seeded_side(Side::Short, 15, 12, 12),
            10,
            50,
        );

        let portfolio = selector().select(&req).unwrap();

        let mut longs: Vec<Decimal> = req.long.iter().map(|c| c.score).collect();
        let mut shorts: Vec<Decimal> = req.short.iter().map(|c| c.score).collect();
        longs.sort_by(|a, b| b.cmp(a));
        shorts.sort();
        let expected: Decimal =
            longs.iter().take(10).sum::<Decimal>() - shorts.iter().take(10).sum::<Decimal>();
        assert_eq!(portfolio.score_spread(), expected);
    }

    #[test]
    fn test_formulation_shape() {
        let req = request(
            set(Side::Long, &[("A", "S1", dec!(1)), ("B", "S2", dec!(2))]),
            set(Side::Short, &[("C", "S3", dec!(3))]),
            1,
            2,
        );

        let formulation = req.formulate();

        assert_eq!(formulation.program.num_variables(), 3);
        // two cardinality rows plus one row per sector
        assert_eq!(formulation.program.constraints().len(), 5);
        assert_eq!(req.sectors(), vec!["S1", "S2", "S3"]);
        assert_eq!(formulation.program.variables()[2].objective, dec!(-3));
    }

    // =========================================================================
    // Properties
    // =========================================================================

    fn side_strategy(side: Side) -> impl Strategy<Value = CandidateSet> {
        prop::collection::vec((0usize..3, -20i64..20), 1..5).prop_map(move |rows| {
            let candidates = rows
                .into_iter()
                .enumerate()
                .map(|(i, (sector, score))| {
                    Candidate::new(
                        format!("{}{}", side, i),
                        format!("S{}", sector),
                        Decimal::from(score),
                    )
                })
                .collect();
            CandidateSet::new(side, candidates)
        })
    }

    proptest! {
        #[test]
        fn prop_selection_is_feasible_and_optimal(
            long in side_strategy(Side::Long),
            short in side_strategy(Side::Short),
            target_count in 1usize..4,
            sector_bound in 0u32..3,
        ) {
            let req = request(long, short, target_count, sector_bound);
            let outcome = selector().select(&req);

            let fallback = branch_and_bound_selector().select(&req);
            prop_assert_eq!(
                outcome.as_ref().map(|p| p.score_spread()).ok(),
                fallback.as_ref().map(|p| p.score_spread()).ok()
            );

            match (req.validate(), outcome) {
                (Err(expected), Err(actual)) => prop_assert_eq!(expected, actual),
                (Ok(()), Ok(portfolio)) => {
                    prop_assert_eq!(portfolio.count(Side::Long), target_count);
                    prop_assert_eq!(portfolio.count(Side::Short), target_count);
                    for sector in req.sectors() {
                        prop_assert!(portfolio.sector_imbalance(sector).abs() <= i64::from(sector_bound));
                    }
                    prop_assert_eq!(Some(portfolio.score_spread()), exhaustive_best(&req));
                }
                (Ok(()), Err(err)) => {
                    prop_assert_eq!(err, SelectionError::SolverNonOptimal(SolveStatus::Infeasible));
                    prop_assert_eq!(exhaustive_best(&req), None);
                }
                (Err(_), Ok(_)) => prop_assert!(false, "invalid request produced a portfolio"),
            }
        }
    }
}
