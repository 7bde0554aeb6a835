//! Day-by-day rebalance state machine.
//!
//! Replays the joined score sheets, deciding each day whether to re-optimize
//! and carrying the last portfolio forward otherwise.

use crate::backtest::data::{MalformedCount, SheetColumns, TradingDay};
use crate::config::RebalanceConfig;
use crate::strategy::scheduler::{self, parse_day};
use crate::strategy::{
    CandidateSet, Cadence, ExposureMatrix, Portfolio, SectorNeutralSelector, SelectionError,
    SelectionRequest, Side,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Raw long and short score rows of one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRows {
    pub long: Vec<Option<Decimal>>,
    pub short: Vec<Option<Decimal>>,
}

impl ScoreRows {
    pub fn of(day: &TradingDay) -> Self {
        Self {
            long: day.long_scores.clone(),
            short: day.short_scores.clone(),
        }
    }
}

/// Everything carried from one day to the next.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RebalanceState {
    /// Label of the last day with a successful selection
    pub last_rebalance: Option<String>,
    /// Period key used to detect period changes
    pub last_period_key: Option<String>,
    /// Most recently produced portfolio (`None` = no portfolio yet)
    pub last_portfolio: Option<Portfolio>,
    /// Score rows of the last processed day with a valid count
    pub previous_scores: Option<ScoreRows>,
    /// Labels of days with a successful selection, in order
    pub rebalance_days: Vec<String>,
}

/// What happened on a day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayAction {
    /// A new portfolio was selected.
    Rebalanced,
    /// No rebalance was due; the previous portfolio was kept.
    NotDue,
    /// The day's target count was unusable; the previous portfolio was kept.
    MalformedCount(MalformedCount),
    /// A rebalance was attempted and failed; the previous portfolio was kept.
    Infeasible(SelectionError),
}

/// Result of processing one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayOutcome {
    pub index: usize,
    pub label: String,
    pub period_key: String,
    pub action: DayAction,
    /// Portfolio in force after the day (`None` = no portfolio yet)
    pub portfolio: Option<Portfolio>,
}

impl DayOutcome {
    pub fn rebalanced(&self) -> bool {
        self.action == DayAction::Rebalanced
    }
}

/// Outcome of a full replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub outcomes: Vec<DayOutcome>,
    pub final_state: RebalanceState,
}

impl RunResult {
    /// Labels of days with a successful selection.
    pub fn rebalance_days(&self) -> &[String] {
        &self.final_state.rebalance_days
    }

    /// Long and short inclusion rows for every processed day.
    pub fn exposure_matrix(&self, universe: &[String]) -> ExposureMatrix {
        let mut matrix = ExposureMatrix::new(universe.to_vec());
        for outcome in &self.outcomes {
            matrix.push_day(&outcome.label, outcome.portfolio.as_ref());
        }
        matrix
    }

    /// Count outcomes matching a predicate.
    pub fn count_where(&self, predicate: impl Fn(&DayAction) -> bool) -> usize {
        self.outcomes.iter().filter(|o| predicate(&o.action)).count()
    }

    /// Get a summary string.
    pub fn summary(&self) -> String {
        let days = self.outcomes.len();
        let rebalanced = self.count_where(|a| *a == DayAction::Rebalanced);
        let not_due = self.count_where(|a| *a == DayAction::NotDue);
        let malformed = self.count_where(|a| matches!(a, DayAction::MalformedCount(_)));
        let infeasible = self.count_where(|a| matches!(a, DayAction::Infeasible(_)));
        let empty = self.outcomes.iter().filter(|o| o.portfolio.is_none()).count();

        format!(
            "Days processed: {}\nRebalances: {}\nCarried forward (not due): {}\nMalformed counts: {}\nInfeasible attempts: {}\nDays without a portfolio: {}",
            days, rebalanced, not_due, malformed, infeasible, empty,
        )
    }
}

/// Drives the scheduler, score-lag rule and selector over the day sequence.
#[derive(Debug, Clone)]
pub struct RebalanceEngine {
    long_columns: SheetColumns,
    short_columns: SheetColumns,
    config: RebalanceConfig,
    selector: SectorNeutralSelector,
}

impl RebalanceEngine {
    /// Create a new engine for sheets with the given asset columns.
    pub fn new(
        long_columns: SheetColumns,
        short_columns: SheetColumns,
        config: RebalanceConfig,
        selector: SectorNeutralSelector,
    ) -> Self {
        Self {
            long_columns,
            short_columns,
            config,
            selector,
        }
    }

    pub fn config(&self) -> &RebalanceConfig {
        &self.config
    }

    pub fn selector(&self) -> &SectorNeutralSelector {
        &self.selector
    }

    /// Replay every day, solving selections through the configured selector.
    pub fn run(&self, days: &[TradingDay]) -> RunResult {
        self.run_with(days, |_, request| self.selector.select(request))
    }

    /// Replay every day, obtaining selections from `solve(day_index, request)`.
    pub fn run_with<F>(&self, days: &[TradingDay], mut solve: F) -> RunResult
    where
        F: FnMut(usize, &SelectionRequest) -> Result<Portfolio, SelectionError>,
    {
        info!(days = days.len(), cadence = %self.config.cadence, "Starting rebalance replay");

        let mut state = RebalanceState::default();
        let mut outcomes = Vec::with_capacity(days.len());

        for day in days {
            let (next, outcome) = self.step_with(state, day, |request| solve(day.index, request));
            state = next;
            outcomes.push(outcome);
        }

        let result = RunResult {
            outcomes,
            final_state: state,
        };

        info!(
            days = days.len(),
            rebalances = result.rebalance_days().len(),
            "Rebalance replay complete"
        );

        result
    }

    /// Process one day through the configured selector.
    pub fn step(&self, state: RebalanceState, day: &TradingDay) -> (RebalanceState, DayOutcome) {
        self.step_with(state, day, |request| self.selector.select(request))
    }

    /// Process one day, obtaining the selection (if one is attempted) from `solve`.
    pub fn step_with<F>(
        &self,
        mut state: RebalanceState,
        day: &TradingDay,
        solve: F,
    ) -> (RebalanceState, DayOutcome)
    where
        F: FnOnce(&SelectionRequest) -> Result<Portfolio, SelectionError>,
    {
        if let Some(short_key) = &day.misaligned_period {
            warn!(
                day = %day.label,
                long_period = %day.period_key,
                short_period = %short_key,
                "Long and short sheets disagree on the period key"
            );
        }

        let outcome = |action: DayAction, portfolio: Option<Portfolio>| DayOutcome {
            index: day.index,
            label: day.label.clone(),
            period_key: day.period_key.clone(),
            action,
            portfolio,
        };

        let target_count = match day.target_count() {
            Ok(count) => count,
            Err(err) => {
                warn!(day = %day.label, error = %err, "Skipping optimization, keeping previous portfolio");
                let portfolio = state.last_portfolio.clone();
                return (state, outcome(DayAction::MalformedCount(err), portfolio));
            }
        };

        let first_day = day.index == 0;
        let period_changed = state
            .last_period_key
            .as_ref()
            .is_some_and(|key| *key != day.period_key);
        let due = first_day
            || period_changed
            || self.schedule_due(&day.label, state.last_rebalance.as_deref());

        debug!(
            day = %day.label,
            first_day,
            period_changed,
            due,
            target_count,
            "Rebalance decision"
        );

        let today = ScoreRows::of(day);

        if !due {
            if let Some(portfolio) = state.last_portfolio.clone() {
                state.previous_scores = Some(today);
                state.last_period_key = Some(day.period_key.clone());
                return (state, outcome(DayAction::NotDue, Some(portfolio)));
            }
        }

        let lagged = if first_day {
            None
        } else {
            state.previous_scores.as_ref()
        };
        let request = self.build_request(day, target_count, lagged.unwrap_or(&today));

        let action = match solve(&request) {
            Ok(portfolio) => {
                info!(day = %day.label, "Portfolio rebalanced");
                state.last_portfolio = Some(portfolio);
                state.last_rebalance = Some(day.label.clone());
                state.last_period_key = Some(day.period_key.clone());
                state.rebalance_days.push(day.label.clone());
                DayAction::Rebalanced
            }
            Err(err) => {
                warn!(day = %day.label, error = %err, "Selection infeasible, keeping previous portfolio");
                DayAction::Infeasible(err)
            }
        };

        state.previous_scores = Some(today);
        let portfolio = state.last_portfolio.clone();
        (state, outcome(action, portfolio))
    }

    /// Stage the day's candidate sets from `scores`, dropping sentinel entries.
    pub fn build_request(
        &self,
        day: &TradingDay,
        target_count: usize,
        scores: &ScoreRows,
    ) -> SelectionRequest {
        let sentinel = self.config.sentinel_score;
        SelectionRequest {
            label: day.label.clone(),
            long: CandidateSet::from_columns(
                Side::Long,
                &self.long_columns.names,
                &self.long_columns.sectors,
                &scores.long,
                sentinel,
            ),
            short: CandidateSet::from_columns(
                Side::Short,
                &self.short_columns.names,
                &self.short_columns.sectors,
                &scores.short,
                sentinel,
            ),
            target_count,
            sector_bound: self.config.sector_exposure_bound,
        }
    }

    /// Calendar cadence check. Unparseable day labels fail open.
    fn schedule_due(&self, label: &str, last_rebalance: Option<&str>) -> bool {
        let cadence = &self.config.cadence;
        if *cadence == Cadence::Daily {
            return true;
        }
        let Some(last) = last_rebalance else {
            return true;
        };

        match (parse_day(label), parse_day(last)) {
            (Some(current), Some(last)) => scheduler::is_due(current, Some(last), cadence),
            _ => {
                warn!(
                    day = %label,
                    last_rebalance = %last,
                    "Day label is not a date, treating rebalance as due"
                );
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{BlockSolver, MockBinarySolver, Solution, SolveStatus};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    // =========================================================================
    // Test Helpers
    // =========================================================================

    fn columns(names: &[&str], sectors: &[&str]) -> SheetColumns {
        SheetColumns {
            names: names.iter().map(|s| s.to_string()).collect(),
            sectors: sectors.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn config(cadence: Cadence, bound: u32) -> RebalanceConfig {
        RebalanceConfig {
            cadence,
            sector_exposure_bound: bound,
            sentinel_score: dec!(-999),
        }
    }

    fn engine_with(cadence: Cadence, bound: u32, selector: SectorNeutralSelector) -> RebalanceEngine {
        RebalanceEngine::new(
            columns(&["A", "B"], &["S1", "S2"]),
            columns(&["C", "D"], &["S1", "S2"]),
            config(cadence, bound),
            selector,
        )
    }

    fn engine(cadence: Cadence, bound: u32) -> RebalanceEngine {
        engine_with(
            cadence,
            bound,
            SectorNeutralSelector::new(Arc::new(BlockSolver::default())),
        )
    }

    fn scores(values: &[i64]) -> Vec<Option<Decimal>> {
        values.iter().map(|&v| Some(Decimal::from(v))).collect()
    }

    fn day(index: usize, label: &str, key: &str, count: &str, long: &[i64], short: &[i64]) -> TradingDay {
        TradingDay {
            index,
            label: label.to_string(),
            period_key: key.to_string(),
            raw_count: count.to_string(),
            long_scores: scores(long),
            short_scores: scores(short),
            misaligned_period: None,
        }
    }

    fn longs(outcome: &DayOutcome) -> Vec<String> {
        let portfolio = outcome.portfolio.as_ref().expect("portfolio");
        portfolio.side(Side::Long).map(|p| p.name.clone()).collect()
    }

    fn shorts(outcome: &DayOutcome) -> Vec<String> {
        let portfolio = outcome.portfolio.as_ref().expect("portfolio");
        portfolio.side(Side::Short).map(|p| p.name.clone()).collect()
    }

    /// Solution selecting the first long (A) and first short (C).
    fn first_of_each(_: &crate::solver::BinaryProgram) -> Solution {
        Solution {
            status: SolveStatus::Optimal,
            values: vec![true, false, true, false],
            objective: Decimal::ZERO,
            nodes: 1,
        }
    }

    // =========================================================================
    // Scenarios
    // =========================================================================

    #[test]
    fn test_single_day_zero_bound() {
        let engine = engine(Cadence::Quarterly, 0);
        let days = vec![day(0, "2024-01-02", "2024Q1", "1", &[10, 8], &[9, 1])];

        let result = engine.run(&days);

        let outcome = &result.outcomes[0];
        assert!(outcome.rebalanced());
        assert_eq!(longs(outcome), vec!["B"]);
        assert_eq!(shorts(outcome), vec!["D"]);
        assert_eq!(result.rebalance_days(), &["2024-01-02".to_string()]);
    }

    #[test]
    fn test_not_due_repeats_portfolio_without_solving() {
        let mut solver = MockBinarySolver::new();
        solver.expect_solve().times(1).returning(first_of_each);
        let engine = engine_with(
            Cadence::Biweekly,
            0,
            SectorNeutralSelector::new(Arc::new(solver)),
        );
        let days = vec![
            day(0, "2024-01-02", "2024Q1", "1", &[10, 8], &[9, 1]),
            day(1, "2024-01-03", "2024Q1", "1", &[1, 50], &[90, 1]),
        ];

        let result = engine.run(&days);

        assert_eq!(result.outcomes[1].action, DayAction::NotDue);
        assert_eq!(result.outcomes[1].portfolio, result.outcomes[0].portfolio);
        assert_eq!(result.rebalance_days().len(), 1);
        // Not-due days still refresh the score memory
        assert_eq!(
            result.final_state.previous_scores,
            Some(ScoreRows::of(&days[1]))
        );
    }

    #[test]
    fn test_malformed_count_carries_forward_and_keeps_state() {
        let engine = engine(Cadence::Daily, 0);
        let days = vec![
            day(0, "2024-01-02", "2024Q1", "1", &[10, 8], &[9, 1]),
            day(1, "2024-01-03", "2024Q1", "abc", &[1, 50], &[90, 1]),
        ];

        let state = RebalanceState::default();
        let (state, first) = engine.step(state, &days[0]);
        let before = state.clone();
        let (state, second) = engine.step(state, &days[1]);

        assert!(matches!(second.action, DayAction::MalformedCount(_)));
        assert_eq!(second.portfolio, first.portfolio);
        assert_eq!(state, before);
        assert_eq!(state.last_rebalance.as_deref(), Some("2024-01-02"));
    }

    #[test]
    fn test_insufficient_candidates_carries_forward() {
        let engine = engine(Cadence::Daily, 5);
        let days = vec![
            day(0, "2024-01-02", "2024Q1", "1", &[10, 8], &[9, 1]),
            day(1, "2024-01-03", "2024Q1", "3", &[10, 8], &[9, 1]),
        ];

        let result = engine.run(&days);

        assert_eq!(
            result.outcomes[1].action,
            DayAction::Infeasible(SelectionError::InsufficientCandidates {
                side: Side::Long,
                available: 2,
                required: 3,
            })
        );
        assert_eq!(result.outcomes[1].portfolio, result.outcomes[0].portfolio);
        assert_eq!(result.rebalance_days(), &["2024-01-02".to_string()]);
        assert_eq!(result.final_state.last_rebalance.as_deref(), Some("2024-01-02"));
    }

    #[test]
    fn test_first_day_failure_yields_no_portfolio() {
        let engine = engine(Cadence::Monthly, 0);
        let days = vec![
            day(0, "2024-01-02", "2024Q1", "5", &[10, 8], &[9, 1]),
            day(1, "2024-01-03", "2024Q1", "oops", &[10, 8], &[9, 1]),
        ];

        let result = engine.run(&days);

        assert!(result.outcomes.iter().all(|o| o.portfolio.is_none()));
        assert!(result.rebalance_days().is_empty());

        let universe: Vec<String> = ["A", "B", "C", "D", "E"].iter().map(|s| s.to_string()).collect();
        let matrix = result.exposure_matrix(&universe);
        assert_eq!(matrix.len(), 2);
        assert!(matrix.long.iter().chain(&matrix.short).all(|r| r.held_count() == 0));
    }

    // =========================================================================
    // Score Lag and Scheduling
    // =========================================================================

    #[test]
    fn test_due_days_use_previous_day_scores() {
        let engine = engine(Cadence::Daily, 1);
        let days = vec![
            day(0, "2024-01-02", "Q1", "1", &[10, 1], &[1, 10]),
            day(1, "2024-01-03", "Q1", "1", &[1, 10], &[10, 1]),
            day(2, "2024-01-04", "Q1", "1", &[1, 10], &[10, 1]),
        ];

        let result = engine.run(&days);

        // Day one optimizes its own scores, day two still sees day one's
        assert_eq!(longs(&result.outcomes[0]), vec!["A"]);
        assert_eq!(longs(&result.outcomes[1]), vec!["A"]);
        assert_eq!(shorts(&result.outcomes[1]), vec!["C"]);
        // Day three sees day two's scores
        assert_eq!(longs(&result.outcomes[2]), vec!["B"]);
        assert_eq!(shorts(&result.outcomes[2]), vec!["D"]);
    }

    #[test]
    fn test_lagged_scores_skip_malformed_days() {
        let engine = engine(Cadence::Daily, 1);
        let days = vec![
            day(0, "2024-01-02", "Q1", "1", &[10, 1], &[1, 10]),
            day(1, "2024-01-03", "Q1", "n/a", &[1, 10], &[10, 1]),
            day(2, "2024-01-04", "Q1", "1", &[1, 10], &[10, 1]),
        ];

        let result = engine.run(&days);

        // Day three lags to day one because day two never updated the memory
        assert_eq!(longs(&result.outcomes[2]), vec!["A"]);
    }

    #[test]
    fn test_sentinel_scores_never_selected() {
        let engine = engine(Cadence::Daily, 1);
        let days = vec![day(0, "2024-01-02", "Q1", "1", &[5, -999], &[-999, 5])];

        let result = engine.run(&days);

        assert_eq!(longs(&result.outcomes[0]), vec!["A"]);
        assert_eq!(shorts(&result.outcomes[0]), vec!["D"]);
    }

    #[test]
    fn test_period_change_forces_rebalance() {
        let engine = engine(Cadence::Annual, 1);
        let days = vec![
            day(0, "2024-01-02", "2024Q1", "1", &[10, 1], &[1, 10]),
            day(1, "2024-01-03", "2024Q1", "1", &[1, 10], &[10, 1]),
            day(2, "2024-04-01", "2024Q2", "1", &[1, 10], &[10, 1]),
        ];

        let result = engine.run(&days);

        assert_eq!(result.outcomes[1].action, DayAction::NotDue);
        assert!(result.outcomes[2].rebalanced());
        assert_eq!(
            result.rebalance_days(),
            &["2024-01-02".to_string(), "2024-04-01".to_string()]
        );
    }

    #[test]
    fn test_failed_attempt_keeps_period_key() {
        let engine = engine(Cadence::Annual, 1);
        let days = vec![
            day(0, "2024-01-02", "2024Q1", "1", &[10, 1], &[1, 10]),
            day(1, "2024-04-01", "2024Q2", "3", &[10, 1], &[1, 10]),
            day(2, "2024-04-02", "2024Q2", "1", &[10, 1], &[1, 10]),
        ];

        let result = engine.run(&days);

        assert!(matches!(result.outcomes[1].action, DayAction::Infeasible(_)));
        // Period key still reads 2024Q1, so day three retries
        assert!(result.outcomes[2].rebalanced());
        assert_eq!(result.final_state.last_period_key.as_deref(), Some("2024Q2"));
    }

    #[test]
    fn test_biweekly_elapsed_triggers_rebalance() {
        let engine = engine(Cadence::Biweekly, 1);
        let days = vec![
            day(0, "2024-01-01", "Q1", "1", &[10, 1], &[1, 10]),
            day(1, "2024-01-15", "Q1", "1", &[10, 1], &[1, 10]),
            day(2, "2024-01-16", "Q1", "1", &[10, 1], &[1, 10]),
            day(3, "2024-01-17", "Q1", "1", &[10, 1], &[1, 10]),
        ];

        let result = engine.run(&days);

        let actions: Vec<bool> = result.outcomes.iter().map(|o| o.rebalanced()).collect();
        assert_eq!(actions, vec![true, false, true, false]);
    }

    #[test]
    fn test_unparseable_label_fails_open() {
        let engine = engine(Cadence::Monthly, 1);
        let days = vec![
            day(0, "2024-01-02", "Q1", "1", &[10, 1], &[1, 10]),
            day(1, "row_5", "Q1", "1", &[10, 1], &[1, 10]),
        ];

        let result = engine.run(&days);

        assert!(result.outcomes[1].rebalanced());
    }

    #[test]
    fn test_run_with_receives_day_index() {
        let engine = engine(Cadence::Daily, 1);
        let days = vec![
            day(0, "2024-01-02", "Q1", "1", &[10, 1], &[1, 10]),
            day(1, "2024-01-03", "Q1", "1", &[10, 1], &[1, 10]),
        ];
        let mut seen = Vec::new();

        let result = engine.run_with(&days, |index, _request| {
            seen.push(index);
            Err(SelectionError::SolverNonOptimal(SolveStatus::TimedOut))
        });

        assert_eq!(seen, vec![0, 1]);
        assert!(result.outcomes.iter().all(|o| o.portfolio.is_none()));
        assert!(result.summary().contains("Infeasible attempts: 2"));
    }
}
