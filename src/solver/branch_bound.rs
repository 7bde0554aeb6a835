//! Exact depth-first branch-and-bound for small binary programs.
//!
//! Equality constraints whose coefficients are all `+1` (cardinality rows)
//! are detected up front. Their members are branched on first, best
//! objective coefficient first, which lets the bound be read off prefix sums:
//! a group that still needs `r` members can at best add its next `r`
//! undecided coefficients. Every other constraint is checked through its
//! reachable activity range after each assignment.

use super::{BinaryProgram, BinarySolver, Solution, SolveStatus};
use rust_decimal::Decimal;
use tracing::debug;

/// Default cap on visited search nodes.
pub const DEFAULT_MAX_NODES: u64 = 5_000_000;

/// Exact 0/1 solver with a node budget.
#[derive(Debug, Clone)]
pub struct BranchAndBoundSolver {
    max_nodes: u64,
}

impl BranchAndBoundSolver {
    pub fn new(max_nodes: u64) -> Self {
        Self {
            max_nodes: max_nodes.max(1),
        }
    }

    pub fn max_nodes(&self) -> u64 {
        self.max_nodes
    }
}

impl Default for BranchAndBoundSolver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_NODES)
    }
}

impl BinarySolver for BranchAndBoundSolver {
    fn solve(&self, program: &BinaryProgram) -> Solution {
        let mut search = Search::new(program, self.max_nodes);
        let solution = search.run();

        debug!(
            program = program.name(),
            status = %solution.status,
            objective = %solution.objective,
            nodes = solution.nodes,
            "Binary program solved"
        );

        solution
    }
}

/// Members of one cardinality row, in branching order.
struct Group {
    target: i64,
    /// prefix[k] = sum of the first k member coefficients
    prefix: Vec<Decimal>,
    decided: usize,
    taken: i64,
}

impl Group {
    fn len(&self) -> usize {
        self.prefix.len() - 1
    }

    /// Best achievable contribution of undecided members, or `None` when
    /// the target can no longer be met.
    fn best_remaining(&self) -> Option<Decimal> {
        let needed = self.target - self.taken;
        let free = (self.len() - self.decided) as i64;
        if needed < 0 || needed > free {
            return None;
        }
        let end = self.decided + needed as usize;
        Some(self.prefix[end] - self.prefix[self.decided])
    }
}

struct Search<'a> {
    program: &'a BinaryProgram,
    order: Vec<usize>,
    var_group: Vec<Option<usize>>,
    var_rows: Vec<Vec<(usize, i64)>>,
    groups: Vec<Group>,
    /// First position in `order` holding an ungrouped variable.
    ungrouped_start: usize,
    /// ungrouped_gain[k] = sum of positive coefficients from position
    /// `ungrouped_start + k` to the end
    ungrouped_gain: Vec<Decimal>,
    activity: Vec<i64>,
    free_pos: Vec<i64>,
    free_neg: Vec<i64>,
    values: Vec<bool>,
    objective: Decimal,
    best: Option<(Decimal, Vec<bool>)>,
    nodes: u64,
    max_nodes: u64,
    exhausted: bool,
}

impl<'a> Search<'a> {
    fn new(program: &'a BinaryProgram, max_nodes: u64) -> Self {
        let n = program.num_variables();
        let constraints = program.constraints();
        let coeff = |var: usize| program.variables()[var].objective;

        let mut var_rows = vec![Vec::new(); n];
        let mut free_pos = vec![0i64; constraints.len()];
        let mut free_neg = vec![0i64; constraints.len()];
        for (row, constraint) in constraints.iter().enumerate() {
            for &(var, c) in &constraint.terms {
                var_rows[var.0].push((row, c));
                if c > 0 {
                    free_pos[row] += c;
                } else {
                    free_neg[row] += c;
                }
            }
        }

        // Disjoint cardinality rows become groups.
        let mut var_group: Vec<Option<usize>> = vec![None; n];
        let mut members: Vec<(i64, Vec<usize>)> = Vec::new();
        for constraint in constraints {
            let is_cardinality = constraint.lower == constraint.upper
                && !constraint.terms.is_empty()
                && constraint.terms.iter().all(|&(_, c)| c == 1);
            if !is_cardinality {
                continue;
            }
            let mut vars: Vec<usize> = constraint.terms.iter().map(|(v, _)| v.0).collect();
            vars.sort_unstable();
            let distinct = vars.windows(2).all(|w| w[0] != w[1]);
            if !distinct || vars.iter().any(|&v| var_group[v].is_some()) {
                continue;
            }
            let group_id = members.len();
            for &v in &vars {
                var_group[v] = Some(group_id);
            }
            members.push((constraint.lower, vars));
        }

        let mut order = Vec::with_capacity(n);
        let mut groups = Vec::with_capacity(members.len());
        for (target, mut vars) in members {
            vars.sort_by(|&a, &b| coeff(b).cmp(&coeff(a)).then(a.cmp(&b)));
            let mut prefix = Vec::with_capacity(vars.len() + 1);
            prefix.push(Decimal::ZERO);
            let mut running = Decimal::ZERO;
            for &v in &vars {
                running += coeff(v);
                prefix.push(running);
            }
            order.extend(vars);
            groups.push(Group {
                target,
                prefix,
                decided: 0,
                taken: 0,
            });
        }

        let ungrouped_start = order.len();
        let mut rest: Vec<usize> = (0..n).filter(|&v| var_group[v].is_none()).collect();
        rest.sort_by(|&a, &b| coeff(b).cmp(&coeff(a)).then(a.cmp(&b)));
        let mut ungrouped_gain = vec![Decimal::ZERO; rest.len() + 1];
        for k in (0..rest.len()).rev() {
            ungrouped_gain[k] = ungrouped_gain[k + 1] + coeff(rest[k]).max(Decimal::ZERO);
        }
        order.extend(rest);

        Self {
            program,
            order,
            var_group,
            var_rows,
            groups,
            ungrouped_start,
            ungrouped_gain,
            activity: vec![0; constraints.len()],
            free_pos,
            free_neg,
            values: vec![false; n],
            objective: Decimal::ZERO,
            best: None,
            nodes: 0,
            max_nodes,
            exhausted: false,
        }
    }

    fn run(&mut self) -> Solution {
        let root_feasible = (0..self.activity.len()).all(|row| self.row_feasible(row));
        if root_feasible {
            self.descend(0);
        }

        let status = if self.exhausted {
            SolveStatus::NodeLimit
        } else if self.best.is_some() {
            SolveStatus::Optimal
        } else {
            SolveStatus::Infeasible
        };

        match self.best.take() {
            Some((objective, values)) if status == SolveStatus::Optimal => Solution {
                status,
                values,
                objective,
                nodes: self.nodes,
            },
            _ => Solution {
                nodes: self.nodes,
                ..Solution::without_assignment(status)
            },
        }
    }

    fn descend(&mut self, depth: usize) {
        if self.nodes >= self.max_nodes {
            self.exhausted = true;
            return;
        }
        self.nodes += 1;

        let Some(bound) = self.bound(depth) else {
            return;
        };
        if let Some((best, _)) = &self.best {
            if bound <= *best {
                return;
            }
        }

        if depth == self.order.len() {
            self.best = Some((self.objective, self.values.clone()));
            return;
        }

        let var = self.order[depth];
        for value in [true, false] {
            if self.exhausted {
                return;
            }
            if self.assign(var, value) {
                self.descend(depth + 1);
            }
            self.unassign(var, value);
        }
    }

    /// Optimistic objective reachable from the current node.
    fn bound(&self, depth: usize) -> Option<Decimal> {
        let mut bound = self.objective;
        for group in &self.groups {
            bound += group.best_remaining()?;
        }
        let offset = depth.max(self.ungrouped_start) - self.ungrouped_start;
        bound += self.ungrouped_gain[offset];
        Some(bound)
    }

    fn row_feasible(&self, row: usize) -> bool {
        let constraint = &self.program.constraints()[row];
        self.activity[row] + self.free_neg[row] <= constraint.upper
            && self.activity[row] + self.free_pos[row] >= constraint.lower
    }

    /// Fix `var` and report whether every touched row stays satisfiable.
    fn assign(&mut self, var: usize, value: bool) -> bool {
        self.values[var] = value;
        if value {
            self.objective += self.program.variables()[var].objective;
        }
        if let Some(g) = self.var_group[var] {
            self.groups[g].decided += 1;
            self.groups[g].taken += i64::from(value);
        }

        let mut feasible = true;
        for &(row, c) in &self.var_rows[var] {
            if c > 0 {
                self.free_pos[row] -= c;
            } else {
                self.free_neg[row] -= c;
            }
            if value {
                self.activity[row] += c;
            }
        }
        for &(row, _) in &self.var_rows[var] {
            feasible &= self.row_feasible(row);
        }
        feasible
    }

    fn unassign(&mut self, var: usize, value: bool) {
        self.values[var] = false;
        if value {
            self.objective -= self.program.variables()[var].objective;
        }
        if let Some(g) = self.var_group[var] {
            self.groups[g].decided -= 1;
            self.groups[g].taken -= i64::from(value);
        }
        for &(row, c) in &self.var_rows[var] {
            if c > 0 {
                self.free_pos[row] += c;
            } else {
                self.free_neg[row] += c;
            }
            if value {
                self.activity[row] -= c;
            }
        }
    }
}
