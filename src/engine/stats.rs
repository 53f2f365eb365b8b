//! Exploration counters.
//!
//! Workers update a shared [`Stats`] through relaxed atomics; the report carries a plain
//! [`ExplorationStats`] snapshot.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

/// Counters of a finished exploration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExplorationStats {
    /// States created, the initial state included
    pub states: u64,
    /// Extra successors created by forking
    pub forks: u64,
    /// States dropped as infeasible
    pub pruned: u64,
    /// Steps executed over all paths
    pub steps: u64,
    /// Terminal records produced
    pub terminals: u64,
    /// Feasibility and witness queries sent to the solver
    pub solver_queries: u64,
    /// Queries the solver could not decide
    pub solver_unknown: u64,
    /// Wall-clock time of the exploration
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
pub(crate) struct Stats {
    states: AtomicU64,
    forks: AtomicU64,
    pruned: AtomicU64,
    steps: AtomicU64,
    terminals: AtomicU64,
    solver_queries: AtomicU64,
    solver_unknown: AtomicU64,
}

impl Stats {
    /// Registers a new state and returns its id.
    pub fn new_state(&self) -> u64 {
        self.states.fetch_add(1, Ordering::Relaxed)
    }

    pub fn fork(&self, extra: u64) {
        self.forks.fetch_add(extra, Ordering::Relaxed);
    }

    pub fn prune(&self) {
        self.pruned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn step(&self) {
        self.steps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn terminal(&self) {
        self.terminals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn solver_query(&self) {
        self.solver_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn solver_unknown(&self) {
        self.solver_unknown.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, elapsed: Duration) -> ExplorationStats {
        ExplorationStats {
            states: self.states.load(Ordering::Relaxed),
            forks: self.forks.load(Ordering::Relaxed),
            pruned: self.pruned.load(Ordering::Relaxed),
            steps: self.steps.load(Ordering::Relaxed),
            terminals: self.terminals.load(Ordering::Relaxed),
            solver_queries: self.solver_queries.load(Ordering::Relaxed),
            solver_unknown: self.solver_unknown.load(Ordering::Relaxed),
            elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = Stats::default();
        assert_eq!(stats.new_state(), 0);
        assert_eq!(stats.new_state(), 1);
        stats.fork(2);
        stats.prune();
        stats.solver_query();
        let snapshot = stats.snapshot(Duration::from_millis(5));
        assert_eq!(snapshot.states, 2);
        assert_eq!(snapshot.forks, 2);
        assert_eq!(snapshot.pruned, 1);
        assert_eq!(snapshot.solver_queries, 1);
        assert_eq!(snapshot.elapsed, Duration::from_millis(5));
    }
}
