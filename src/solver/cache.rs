//! Verdict memoization.
//!
//! Sibling paths re-ask the same questions constantly: both arms of a branch share their
//! prefix, and result queries re-check the constraints a path already proved feasible.
//! [`CachingSolver`] keys verdicts by the exact constraint list and shares one table between
//! all exploration workers.
//!
//! The table is bounded: once it holds `capacity` verdicts it is emptied before the next
//! insertion. Long-running sessions that reuse one explorer can also call
//! [`CachingSolver::clear`] between queries.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use dashmap::DashMap;
use tracing::debug;

use crate::{
    solver::{Solver, Verdict},
    symbolic::SymbolicExpr,
    Result,
};

/// Default number of verdicts a [`CachingSolver`] keeps.
pub const DEFAULT_CACHE_CAPACITY: usize = 1 << 16;

/// A [`Solver`] wrapper that remembers decided verdicts.
///
/// `Unknown` is never cached: a backend that timed out may well decide the same query on a
/// later attempt.
pub struct CachingSolver<S> {
    inner: S,
    entries: Arc<DashMap<Vec<SymbolicExpr>, Verdict>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<S: Solver> CachingSolver<S> {
    /// Wraps `inner` with a table of [`DEFAULT_CACHE_CAPACITY`] entries.
    pub fn new(inner: S) -> Self {
        Self::with_capacity(inner, DEFAULT_CACHE_CAPACITY)
    }

    /// Wraps `inner` with a table of at most `capacity` entries.
    pub fn with_capacity(inner: S, capacity: usize) -> Self {
        CachingSolver {
            inner,
            entries: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Number of queries answered from the table.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of queries forwarded to the backend.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Number of cached verdicts.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing has been cached yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every cached verdict. Hit and miss counters are kept.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl<S: Solver> Solver for CachingSolver<S> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn solve(&self, constraints: &[SymbolicExpr]) -> Result<Verdict> {
        if let Some(verdict) = self.entries.get(constraints) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(verdict.clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let verdict = self.inner.solve(constraints)?;
        if verdict != Verdict::Unknown {
            if self.entries.len() >= self.capacity {
                debug!(entries = self.entries.len(), "solver cache full, clearing");
                self.entries.clear();
            }
            self.entries.insert(constraints.to_vec(), verdict.clone());
        }
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        solver::{SatResult, Z3Solver},
        symbolic::SymbolicOp,
    };

    struct Undecided;

    impl Solver for Undecided {
        fn name(&self) -> &'static str {
            "undecided"
        }

        fn solve(&self, _: &[SymbolicExpr]) -> Result<Verdict> {
            Ok(Verdict::Unknown)
        }
    }

    fn above(bound: u64) -> Vec<SymbolicExpr> {
        vec![SymbolicExpr::binary(
            SymbolicOp::GtU,
            SymbolicExpr::symbol("x", 32),
            SymbolicExpr::constant(bound, 32),
        )]
    }

    #[test]
    fn test_unknown_is_not_cached() {
        let solver = CachingSolver::new(Undecided);
        let constraints = above(1);
        assert_eq!(solver.check(&constraints).unwrap(), SatResult::Unknown);
        assert_eq!(solver.check(&constraints).unwrap(), SatResult::Unknown);
        assert_eq!(solver.misses(), 2);
        assert!(solver.is_empty());
    }

    #[test]
    fn test_table_is_bounded() {
        let solver = CachingSolver::with_capacity(Z3Solver::new(), 3);
        for bound in 0..10 {
            assert_eq!(solver.check(&above(bound)).unwrap(), SatResult::Sat);
            assert!(solver.len() <= 3);
        }
        assert_eq!(solver.misses(), 10);
    }

    #[test]
    fn test_repeated_query_hits_cache() {
        let solver = CachingSolver::new(Z3Solver::new());
        let x = SymbolicExpr::symbol("x", 32);
        let constraints = [SymbolicExpr::binary(
            SymbolicOp::GtS,
            x,
            SymbolicExpr::constant(10, 32),
        )];

        assert_eq!(solver.check(&constraints).unwrap(), SatResult::Sat);
        assert_eq!(solver.check(&constraints).unwrap(), SatResult::Sat);
        assert_eq!(solver.misses(), 1);
        assert_eq!(solver.hits(), 1);
        assert_eq!(solver.len(), 1);

        solver.clear();
        assert!(solver.is_empty());
    }
}
