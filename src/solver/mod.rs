//! Constraint solver seam.
//!
//! The engine never decides satisfiability itself. Path conditions are handed to an
//! implementation of [`Solver`], which answers [`Verdict::Sat`] with a model,
//! [`Verdict::Unsat`], or [`Verdict::Unknown`] when it gives up (timeout, unsupported
//! operation, exhausted budget). How `Unknown` is treated is an exploration policy, see
//! [`crate::engine::UnknownPolicy`].
//!
//! # Architecture
//!
//! ```text
//! Explorer ──▶ CachingSolver ──▶ Z3Solver
//! ```
//!
//! # Key Components
//!
//! - [`Solver`] - The trait every backend implements; `Send + Sync` so one instance serves
//!   parallel exploration
//! - [`Model`] - A satisfying assignment of symbol values
//! - [`Z3Solver`] - The SMT backend every explorer uses by default
//! - [`CachingSolver`] - Memoizes decided verdicts per constraint set

mod cache;
mod z3;

use std::{collections::BTreeMap, fmt, sync::Arc};

use strum::Display;

use crate::{
    symbolic::{Assignment, SymbolicExpr},
    Result,
};

pub use cache::{CachingSolver, DEFAULT_CACHE_CAPACITY};
pub use self::z3::Z3Solver;

/// Outcome of a satisfiability check without a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum SatResult {
    /// The constraints have a solution
    Sat,
    /// The constraints have no solution
    Unsat,
    /// The backend could not decide
    Unknown,
}

/// Outcome of a satisfiability check.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Satisfiable, with a witness
    Sat(Model),
    /// Unsatisfiable
    Unsat,
    /// Undecided
    Unknown,
}

impl Verdict {
    /// Drops the model.
    #[must_use]
    pub const fn sat_result(&self) -> SatResult {
        match self {
            Verdict::Sat(_) => SatResult::Sat,
            Verdict::Unsat => SatResult::Unsat,
            Verdict::Unknown => SatResult::Unknown,
        }
    }
}

/// A satisfying assignment.
///
/// Symbols the model does not mention are unconstrained; [`Model::eval`] treats them as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Model {
    values: Assignment,
}

impl Model {
    /// Wraps an assignment.
    #[must_use]
    pub fn new(values: Assignment) -> Self {
        Model { values }
    }

    /// Value assigned to `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<u64> {
        self.values.get(name).copied()
    }

    /// Sets the value of `name`.
    pub fn insert(&mut self, name: impl Into<Arc<str>>, value: u64) {
        self.values.insert(name.into(), value);
    }

    /// Evaluates `expr`, completing missing symbols with zero.
    #[must_use]
    pub fn eval(&self, expr: &SymbolicExpr) -> u64 {
        let symbols = expr.symbols();
        if symbols.keys().all(|name| self.values.contains_key(name)) {
            return expr.evaluate(&self.values).unwrap_or(0);
        }
        let mut completed = self.values.clone();
        for name in symbols.into_keys() {
            completed.entry(name).or_insert(0);
        }
        expr.evaluate(&completed).unwrap_or(0)
    }

    /// Checks that every constraint evaluates to true.
    #[must_use]
    pub fn satisfies(&self, constraints: &[SymbolicExpr]) -> bool {
        constraints.iter().all(|c| self.eval(c) == 1)
    }

    /// The underlying assignment.
    #[must_use]
    pub fn assignment(&self) -> &Assignment {
        &self.values
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sorted: BTreeMap<_, _> = self.values.iter().collect();
        write!(f, "{{")?;
        for (i, (name, value)) in sorted.into_iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name} = {value}")?;
        }
        write!(f, "}}")
    }
}

/// Distinct values an expression can take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Solutions {
    /// These are all the values
    Exactly(Vec<u64>),
    /// There are at least these values, possibly more
    AtLeast(Vec<u64>),
}

impl Solutions {
    /// The values found.
    #[must_use]
    pub fn values(&self) -> &[u64] {
        match self {
            Solutions::Exactly(v) | Solutions::AtLeast(v) => v,
        }
    }
}

/// A constraint solver backend.
///
/// Constraints are 1-bit expressions interpreted as a conjunction.
pub trait Solver: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Decides the conjunction of `constraints`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Solver`] if the backend fails in a way that is not a plain
    /// "unknown" (crash, malformed input).
    fn solve(&self, constraints: &[SymbolicExpr]) -> Result<Verdict>;

    /// Decides satisfiability without producing a model.
    ///
    /// # Errors
    ///
    /// See [`Solver::solve`].
    fn check(&self, constraints: &[SymbolicExpr]) -> Result<SatResult> {
        Ok(self.solve(constraints)?.sat_result())
    }

    /// Produces a model if the constraints are known to be satisfiable.
    ///
    /// # Errors
    ///
    /// See [`Solver::solve`].
    fn model(&self, constraints: &[SymbolicExpr]) -> Result<Option<Model>> {
        Ok(match self.solve(constraints)? {
            Verdict::Sat(model) => Some(model),
            Verdict::Unsat | Verdict::Unknown => None,
        })
    }

    /// Enumerates values of `expr` consistent with `constraints`.
    ///
    /// Repeatedly asks for a model and excludes the value it produced. Stops after
    /// `max + 1` values, or as soon as the backend answers `Unknown`; both cases report
    /// [`Solutions::AtLeast`].
    ///
    /// # Errors
    ///
    /// See [`Solver::solve`].
    fn solutions(
        &self,
        constraints: &[SymbolicExpr],
        expr: &SymbolicExpr,
        max: usize,
    ) -> Result<Solutions> {
        let mut working = constraints.to_vec();
        let mut found = Vec::new();
        while found.len() <= max {
            match self.solve(&working)? {
                Verdict::Sat(model) => {
                    let value = model.eval(expr);
                    found.push(value);
                    working.push(expr.not_equals(&SymbolicExpr::constant(value, expr.width())));
                }
                Verdict::Unsat => return Ok(Solutions::Exactly(found)),
                Verdict::Unknown => return Ok(Solutions::AtLeast(found)),
            }
        }
        Ok(Solutions::AtLeast(found))
    }
}

impl<S: Solver + ?Sized> Solver for Arc<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn solve(&self, constraints: &[SymbolicExpr]) -> Result<Verdict> {
        (**self).solve(constraints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::SymbolicOp;

    #[test]
    fn test_model_eval_completes_missing_symbols() {
        let mut model = Model::default();
        model.insert("a", 5);
        let expr = SymbolicExpr::binary(
            SymbolicOp::Add,
            SymbolicExpr::symbol("a", 32),
            SymbolicExpr::symbol("unbound", 32),
        );
        assert_eq!(model.eval(&expr), 5);
    }

    #[test]
    fn test_solutions_enumerates_small_domain() {
        // x: u8 with x <u 3
        let x = SymbolicExpr::symbol("x", 8);
        let constraint =
            SymbolicExpr::binary(SymbolicOp::LtU, x.clone(), SymbolicExpr::constant(3, 8));
        let solver = Z3Solver::new();
        let solutions = solver.solutions(&[constraint], &x, 10).unwrap();
        let mut values = solutions.values().to_vec();
        values.sort_unstable();
        assert_eq!(values, vec![0, 1, 2]);
        assert!(matches!(solutions, Solutions::Exactly(_)));
    }

    #[test]
    fn test_solutions_caps_at_max() {
        let x = SymbolicExpr::symbol("x", 8);
        let solver = Z3Solver::new();
        let solutions = solver.solutions(&[], &x, 4).unwrap();
        assert!(matches!(solutions, Solutions::AtLeast(ref v) if v.len() == 5));
    }
}
