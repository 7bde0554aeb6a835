//! Exact solver for two-sided programs with independent balance blocks.
//!
//! Recognizes programs made of exactly two disjoint cardinality rows (the
//! sides) plus range rows that each touch one block of variables, counting
//! `+1` for members of one side and `-1` for members of the other, with no
//! variable in more than one range row. Within a block only the number taken
//! from each side matters, and the best way to take `l` members of a side is
//! its `l` largest objective coefficients. A dynamic program over blocks on
//! (taken from side one, taken from side two) then finds the optimum in
//! polynomial time.
//!
//! Anything else is handed to the fallback solver.

use super::{BinaryProgram, BinarySolver, BranchAndBoundSolver, Solution, SolveStatus};
use rust_decimal::Decimal;
use tracing::debug;

/// Block decomposition solver with a general fallback.
#[derive(Debug, Clone, Default)]
pub struct BlockSolver {
    fallback: BranchAndBoundSolver,
}

impl BlockSolver {
    pub fn new(fallback: BranchAndBoundSolver) -> Self {
        Self { fallback }
    }
}

impl BinarySolver for BlockSolver {
    fn solve(&self, program: &BinaryProgram) -> Solution {
        match Decomposition::of(program) {
            Some(decomposition) => {
                let solution = decomposition.solve(program);
                debug!(
                    program = program.name(),
                    blocks = decomposition.blocks.len(),
                    status = %solution.status,
                    objective = %solution.objective,
                    transitions = solution.nodes,
                    "Block program solved"
                );
                solution
            }
            None => {
                debug!(program = program.name(), "No block structure, using branch-and-bound");
                self.fallback.solve(program)
            }
        }
    }
}

/// One balance row (or the unconstrained remainder) and its members.
#[derive(Debug)]
struct Block {
    /// Members per side, best objective coefficient first.
    members: [Vec<usize>; 2],
    /// Activity is `sign * (taken[0] - taken[1])`.
    sign: i64,
    lower: i64,
    upper: i64,
}

impl Block {
    fn allows(&self, taken0: usize, taken1: usize) -> bool {
        let activity = self.sign * (taken0 as i64 - taken1 as i64);
        activity >= self.lower && activity <= self.upper
    }
}

#[derive(Debug)]
struct Decomposition {
    targets: [i64; 2],
    blocks: Vec<Block>,
}

impl Decomposition {
    fn of(program: &BinaryProgram) -> Option<Self> {
        let n = program.num_variables();
        let coeff = |var: usize| program.variables()[var].objective;

        let mut side_of: Vec<Option<usize>> = vec![None; n];
        let mut targets = Vec::new();
        let mut ranges = Vec::new();

        for constraint in program.constraints() {
            let is_cardinality = constraint.lower == constraint.upper
                && !constraint.terms.is_empty()
                && constraint.terms.iter().all(|&(_, c)| c == 1);
            if is_cardinality && targets.len() < 2 {
                let side = targets.len();
                for &(var, _) in &constraint.terms {
                    if side_of[var.0].is_some() {
                        return None;
                    }
                    side_of[var.0] = Some(side);
                }
                targets.push(constraint.lower);
            } else {
                ranges.push(constraint);
            }
        }

        if targets.len() != 2 || side_of.iter().any(Option::is_none) {
            return None;
        }

        let mut in_block = vec![false; n];
        let mut blocks = Vec::with_capacity(ranges.len() + 1);
        for constraint in ranges {
            if constraint.terms.is_empty() {
                return None;
            }
            // The side counted +1 fixes the orientation of the row.
            let mut positive_side = None;
            let mut members: [Vec<usize>; 2] = [Vec::new(), Vec::new()];
            for &(var, c) in &constraint.terms {
                let side = side_of[var.0]?;
                let counted_positive = match c {
                    1 => side,
                    -1 => 1 - side,
                    _ => return None,
                };
                if *positive_side.get_or_insert(counted_positive) != counted_positive {
                    return None;
                }
                if in_block[var.0] {
                    return None;
                }
                in_block[var.0] = true;
                members[side].push(var.0);
            }
            let sign = if positive_side == Some(0) { 1 } else { -1 };
            blocks.push(Block {
                members,
                sign,
                lower: constraint.lower,
                upper: constraint.upper,
            });
        }

        let mut rest: [Vec<usize>; 2] = [Vec::new(), Vec::new()];
        for var in (0..n).filter(|&v| !in_block[v]) {
            if let Some(side) = side_of[var] {
                rest[side].push(var);
            }
        }
        if rest.iter().any(|members| !members.is_empty()) {
            blocks.push(Block {
                members: rest,
                sign: 1,
                lower: i64::MIN,
                upper: i64::MAX,
            });
        }

        for block in &mut blocks {
            for members in &mut block.members {
                members.sort_by(|&a, &b| coeff(b).cmp(&coeff(a)).then(a.cmp(&b)));
            }
        }

        Some(Self {
            targets: [targets[0], targets[1]],
            blocks,
        })
    }

    fn solve(&self, program: &BinaryProgram) -> Solution {
        let n = program.num_variables();
        let coeff = |var: usize| program.variables()[var].objective;

        if self.targets.iter().any(|&t| t < 0) {
            return Solution::without_assignment(SolveStatus::Infeasible);
        }
        let k0 = self.targets[0] as usize;
        let k1 = self.targets[1] as usize;
        let width = k1 + 1;
        let cell = |taken0: usize, taken1: usize| taken0 * width + taken1;

        let mut best: Vec<Option<Decimal>> = vec![None; (k0 + 1) * width];
        best[cell(0, 0)] = Some(Decimal::ZERO);
        let mut choices: Vec<Vec<(usize, usize)>> = Vec::with_capacity(self.blocks.len());
        let mut transitions = 0u64;

        for block in &self.blocks {
            let prefix = block.members.clone().map(|members| {
                let mut sums = Vec::with_capacity(members.len() + 1);
                let mut running = Decimal::ZERO;
                sums.push(running);
                for var in members {
                    running += coeff(var);
                    sums.push(running);
                }
                sums
            });

            let mut next: Vec<Option<Decimal>> = vec![None; best.len()];
            let mut choice = vec![(0usize, 0usize); best.len()];

            for done0 in 0..=k0 {
                for done1 in 0..=k1 {
                    let Some(base) = best[cell(done0, done1)] else {
                        continue;
                    };
                    let max0 = block.members[0].len().min(k0 - done0);
                    let max1 = block.members[1].len().min(k1 - done1);
                    for take0 in 0..=max0 {
                        for take1 in 0..=max1 {
                            if !block.allows(take0, take1) {
                                continue;
                            }
                            transitions += 1;
                            let value = base + prefix[0][take0] + prefix[1][take1];
                            let target = cell(done0 + take0, done1 + take1);
                            if next[target].map_or(true, |current| value > current) {
                                next[target] = Some(value);
                                choice[target] = (take0, take1);
                            }
                        }
                    }
                }
            }

            best = next;
            choices.push(choice);
        }

        if best[cell(k0, k1)].is_none() {
            return Solution {
                status: SolveStatus::Infeasible,
                values: Vec::new(),
                objective: Decimal::ZERO,
                nodes: transitions,
            };
        }

        let mut values = vec![false; n];
        let (mut left0, mut left1) = (k0, k1);
        for (block, choice) in self.blocks.iter().zip(&choices).rev() {
            let (take0, take1) = choice[cell(left0, left1)];
            for &var in &block.members[0][..take0] {
                values[var] = true;
            }
            for &var in &block.members[1][..take1] {
                values[var] = true;
            }
            left0 -= take0;
            left1 -= take1;
        }

        Solution {
            status: SolveStatus::Optimal,
            objective: program.objective_value(&values),
            values,
            nodes: transitions,
        }
    }
}
