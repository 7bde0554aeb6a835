//! Binary (0/1) linear programs and the solver capability used to solve them.
//!
//! The selection logic only builds a [`BinaryProgram`] and hands it to a
//! [`BinarySolver`]; any exact 0/1 solver can sit behind the trait.
//!
//! - `BinaryProgram`: maximization objective plus integer range constraints
//! - `BinarySolver`: status + variable assignment contract
//! - `BlockSolver`: exact dynamic program for two-sided balance programs
//! - `BranchAndBoundSolver`: exact depth-first solver for everything else

mod blocks;
mod branch_bound;

pub use blocks::BlockSolver;
pub use branch_bound::{BranchAndBoundSolver, DEFAULT_MAX_NODES};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Handle to a decision variable inside a [`BinaryProgram`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub(crate) usize);

impl VarId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A 0/1 decision variable with its objective coefficient.
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub objective: Decimal,
}

/// `lower <= Σ coeff·x <= upper` over binary variables.
#[derive(Debug, Clone)]
pub struct Constraint {
    pub name: String,
    pub terms: Vec<(VarId, i64)>,
    pub lower: i64,
    pub upper: i64,
}

impl Constraint {
    /// Activity of the constraint under a full assignment.
    pub fn activity(&self, values: &[bool]) -> i64 {
        self.terms
            .iter()
            .filter(|(var, _)| values[var.0])
            .map(|(_, coeff)| coeff)
            .sum()
    }

    pub fn is_satisfied(&self, values: &[bool]) -> bool {
        let activity = self.activity(values);
        self.lower <= activity && activity <= self.upper
    }
}

/// A maximization problem over binary variables.
#[derive(Debug, Clone, Default)]
pub struct BinaryProgram {
    name: String,
    variables: Vec<Variable>,
    constraints: Vec<Constraint>,
}

impl BinaryProgram {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variables: Vec::new(),
            constraints: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a binary variable contributing `objective` when set to 1.
    pub fn add_variable(&mut self, name: impl Into<String>, objective: Decimal) -> VarId {
        self.variables.push(Variable {
            name: name.into(),
            objective,
        });
        VarId(self.variables.len() - 1)
    }

    /// Add `lower <= Σ coeff·x <= upper`.
    pub fn add_range(
        &mut self,
        name: impl Into<String>,
        terms: Vec<(VarId, i64)>,
        lower: i64,
        upper: i64,
    ) {
        self.constraints.push(Constraint {
            name: name.into(),
            terms,
            lower,
            upper,
        });
    }

    /// Add `Σ x = count` over `vars` (a cardinality constraint).
    pub fn add_cardinality(&mut self, name: impl Into<String>, vars: &[VarId], count: i64) {
        let terms = vars.iter().map(|&var| (var, 1)).collect();
        self.add_range(name, terms, count, count);
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    /// Objective value of a full assignment.
    pub fn objective_value(&self, values: &[bool]) -> Decimal {
        self.variables
            .iter()
            .zip(values)
            .filter(|(_, selected)| **selected)
            .map(|(var, _)| var.objective)
            .sum()
    }

    /// Whether a full assignment satisfies every constraint.
    pub fn is_feasible(&self, values: &[bool]) -> bool {
        values.len() == self.variables.len()
            && self.constraints.iter().all(|c| c.is_satisfied(values))
    }
}

/// Terminal status reported by a solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    /// A proven optimal assignment was found.
    Optimal,
    /// No assignment satisfies the constraints.
    Infeasible,
    /// The search budget ran out before optimality was proven.
    NodeLimit,
    /// The wall-clock limit expired.
    TimedOut,
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveStatus::Optimal => write!(f, "Optimal"),
            SolveStatus::Infeasible => write!(f, "Infeasible"),
            SolveStatus::NodeLimit => write!(f, "NodeLimit"),
            SolveStatus::TimedOut => write!(f, "TimedOut"),
        }
    }
}

/// Status plus variable assignment returned by a solver.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub status: SolveStatus,
    /// One entry per variable; meaningful only when `status` is `Optimal`.
    pub values: Vec<bool>,
    pub objective: Decimal,
    /// Search nodes (or dynamic program transitions) visited, for diagnostics.
    pub nodes: u64,
}

impl Solution {
    /// A solution carrying no assignment.
    pub fn without_assignment(status: SolveStatus) -> Self {
        Self {
            status,
            values: Vec::new(),
            objective: Decimal::ZERO,
            nodes: 0,
        }
    }

    pub fn is_optimal(&self) -> bool {
        self.status == SolveStatus::Optimal
    }

    /// Value of a variable (false when absent from the assignment).
    pub fn value_of(&self, var: VarId) -> bool {
        self.values.get(var.0).copied().unwrap_or(false)
    }
}

/// Capability to solve a [`BinaryProgram`] exactly.
#[cfg_attr(test, mockall::automock)]
pub trait BinarySolver: Send + Sync {
    /// Solve the program, blocking until a terminal status is reached.
    fn solve(&self, program: &BinaryProgram) -> Solution;
}
