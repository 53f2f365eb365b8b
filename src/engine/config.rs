//! Exploration configuration.
//!
//! [`ExplorationConfig`] controls how far the engine follows each path and how it reacts to
//! situations the semantics leave open: a solver that cannot decide a query, an access that
//! may leave its object, an allocation of symbolic size.
//!
//! # Configuration Presets
//!
//! - [`ExplorationConfig::default()`] - Bounds suited to small test functions
//! - [`ExplorationConfig::quick()`] - Tight bounds for fast, shallow answers
//! - [`ExplorationConfig::thorough()`] - Generous bounds for deep loops and recursion
//!
//! # Example
//!
//! ```rust
//! use pathscope::engine::{ExplorationConfig, ExplorationOrder};
//!
//! let config = ExplorationConfig::default()
//!     .with_loop_bound(20)
//!     .with_order(ExplorationOrder::BreadthFirst);
//! assert_eq!(config.loop_bound, 20);
//! ```

use std::time::Duration;

use strum::Display;

use crate::engine::{callbacks::Callbacks, hooks::HookRegistry};

/// Order in which pending states are explored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum ExplorationOrder {
    /// Most recently forked state first
    #[default]
    DepthFirst,
    /// Oldest pending state first
    BreadthFirst,
}

/// How an `Unknown` solver answer is treated when checking path feasibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum UnknownPolicy {
    /// Keep the path; it may later turn out to be infeasible
    #[default]
    AssumeFeasible,
    /// Drop the path; feasible behavior may be missed
    AssumeInfeasible,
}

/// What happens when an access may leave its object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum OutOfBoundsPolicy {
    /// The path ends with an out-of-bounds fault. Symbolic offsets fork an in-bounds path
    /// and a faulting path.
    #[default]
    Terminate,
    /// Out-of-bounds integer reads produce fresh symbols and out-of-bounds stores are
    /// dropped. The path continues.
    Symbolic,
}

/// A watchpoint on bytes of a global variable, installed in every initial state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalWatch {
    /// Name hits are reported under
    pub name: String,
    /// Watched global
    pub global: String,
    /// First watched byte
    pub offset: u64,
    /// Number of watched bytes
    pub bytes: u64,
}

/// Configuration of one exploration.
///
/// # Default Values
///
/// | Setting | Default Value |
/// |---------|---------------|
/// | `loop_bound` | 10 |
/// | `recursion_bound` | 10 |
/// | `max_call_depth` | 64 |
/// | `max_steps_per_path` | 1,000,000 |
/// | `order` | depth first |
/// | `parallel` | false |
/// | `timeout` | none |
/// | `solver_timeout` | none |
/// | `unknown_policy` | assume feasible |
/// | `out_of_bounds` | terminate |
/// | `max_symbolic_span` | 256 |
/// | `symbolic_alloc_size` | 256 |
/// | `default_pointee_size` | 64 |
/// | `record_path` | false |
/// | `watchpoints` | none |
/// | `callbacks` | none |
#[derive(Clone, Debug)]
pub struct ExplorationConfig {
    /// Maximum back-edge traversals per loop header, counted per frame and per entry into
    /// the loop.
    pub loop_bound: u32,

    /// Maximum number of simultaneous frames pushed from one call site.
    pub recursion_bound: u32,

    /// Maximum total call depth.
    pub max_call_depth: usize,

    /// Maximum instructions executed on one path.
    pub max_steps_per_path: u64,

    /// Worklist order.
    pub order: ExplorationOrder,

    /// Explore forks concurrently on the rayon thread pool.
    pub parallel: bool,

    /// Wall-clock limit for one query.
    pub timeout: Option<Duration>,

    /// Limit for a single solver query of [`crate::engine::Explorer::with_config`]'s
    /// backend. A query that runs out answers `Unknown`.
    pub solver_timeout: Option<Duration>,

    /// Treatment of undecided feasibility checks.
    pub unknown_policy: UnknownPolicy,

    /// Treatment of possibly out-of-bounds accesses.
    pub out_of_bounds: OutOfBoundsPolicy,

    /// Largest number of offsets a symbolic offset is expanded into.
    pub max_symbolic_span: u64,

    /// Object size used when an allocation size is symbolic.
    pub symbolic_alloc_size: u64,

    /// Size of the object backing a symbolic pointer argument.
    pub default_pointee_size: u64,

    /// Record the visited blocks of each path.
    pub record_path: bool,

    /// Implementations of external functions.
    pub hooks: HookRegistry,

    /// Memory watchpoints on globals.
    pub watchpoints: Vec<GlobalWatch>,

    /// Observers of every executed instruction and terminator.
    pub callbacks: Callbacks,
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        ExplorationConfig {
            loop_bound: 10,
            recursion_bound: 10,
            max_call_depth: 64,
            max_steps_per_path: 1_000_000,
            order: ExplorationOrder::DepthFirst,
            parallel: false,
            timeout: None,
            solver_timeout: None,
            unknown_policy: UnknownPolicy::AssumeFeasible,
            out_of_bounds: OutOfBoundsPolicy::Terminate,
            max_symbolic_span: 256,
            symbolic_alloc_size: 256,
            default_pointee_size: 64,
            record_path: false,
            hooks: HookRegistry::default(),
            watchpoints: Vec::new(),
            callbacks: Callbacks::default(),
        }
    }
}

impl ExplorationConfig {
    /// Tight bounds for fast answers on shallow code.
    #[must_use]
    pub fn quick() -> Self {
        ExplorationConfig {
            loop_bound: 4,
            recursion_bound: 4,
            max_call_depth: 16,
            max_steps_per_path: 100_000,
            timeout: Some(Duration::from_secs(10)),
            ..Default::default()
        }
    }

    /// Generous bounds for deep loops and recursion.
    #[must_use]
    pub fn thorough() -> Self {
        ExplorationConfig {
            loop_bound: 64,
            recursion_bound: 32,
            max_call_depth: 256,
            max_steps_per_path: 10_000_000,
            max_symbolic_span: 4096,
            ..Default::default()
        }
    }

    /// Sets the loop bound.
    #[must_use]
    pub fn with_loop_bound(mut self, bound: u32) -> Self {
        self.loop_bound = bound;
        self
    }

    /// Sets the recursion bound.
    #[must_use]
    pub fn with_recursion_bound(mut self, bound: u32) -> Self {
        self.recursion_bound = bound;
        self
    }

    /// Sets the maximum call depth.
    #[must_use]
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Sets the per-path step limit.
    #[must_use]
    pub fn with_max_steps(mut self, steps: u64) -> Self {
        self.max_steps_per_path = steps;
        self
    }

    /// Sets the exploration order.
    #[must_use]
    pub fn with_order(mut self, order: ExplorationOrder) -> Self {
        self.order = order;
        self
    }

    /// Enables or disables parallel exploration.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Sets the query timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the per-query solver timeout.
    #[must_use]
    pub fn with_solver_timeout(mut self, timeout: Duration) -> Self {
        self.solver_timeout = Some(timeout);
        self
    }

    /// Sets the unknown-verdict policy.
    #[must_use]
    pub fn with_unknown_policy(mut self, policy: UnknownPolicy) -> Self {
        self.unknown_policy = policy;
        self
    }

    /// Sets the out-of-bounds policy.
    #[must_use]
    pub fn with_out_of_bounds(mut self, policy: OutOfBoundsPolicy) -> Self {
        self.out_of_bounds = policy;
        self
    }

    /// Sets the symbolic offset expansion limit.
    #[must_use]
    pub fn with_max_symbolic_span(mut self, span: u64) -> Self {
        self.max_symbolic_span = span;
        self
    }

    /// Sets the size of symbolic-size allocations.
    #[must_use]
    pub fn with_symbolic_alloc_size(mut self, size: u64) -> Self {
        self.symbolic_alloc_size = size;
        self
    }

    /// Sets the size of objects backing symbolic pointer arguments.
    #[must_use]
    pub fn with_default_pointee_size(mut self, size: u64) -> Self {
        self.default_pointee_size = size;
        self
    }

    /// Enables or disables path recording.
    #[must_use]
    pub fn with_record_path(mut self, record: bool) -> Self {
        self.record_path = record;
        self
    }

    /// Replaces the hook registry.
    #[must_use]
    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    /// Watches `bytes` bytes of `global` starting at `offset`, reporting hits as `name`.
    #[must_use]
    pub fn with_watchpoint(
        mut self,
        name: impl Into<String>,
        global: impl Into<String>,
        offset: u64,
        bytes: u64,
    ) -> Self {
        self.watchpoints.push(GlobalWatch {
            name: name.into(),
            global: global.into(),
            offset,
            bytes,
        });
        self
    }

    /// Replaces the callbacks.
    #[must_use]
    pub fn with_callbacks(mut self, callbacks: Callbacks) -> Self {
        self.callbacks = callbacks;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ExplorationConfig::default();
        assert_eq!(config.loop_bound, 10);
        assert_eq!(config.order, ExplorationOrder::DepthFirst);
        assert_eq!(config.unknown_policy, UnknownPolicy::AssumeFeasible);
        assert_eq!(config.out_of_bounds, OutOfBoundsPolicy::Terminate);
        assert!(config.hooks.get("malloc").is_some());
        assert!(config.watchpoints.is_empty());
        assert!(config.callbacks.is_empty());
    }

    #[test]
    fn test_watchpoint_builder() {
        let config = ExplorationConfig::default().with_watchpoint("w", "counter", 4, 4);
        assert_eq!(
            config.watchpoints,
            vec![GlobalWatch {
                name: "w".into(),
                global: "counter".into(),
                offset: 4,
                bytes: 4,
            }]
        );
    }

    #[test]
    fn test_presets_differ() {
        assert!(ExplorationConfig::quick().loop_bound < ExplorationConfig::thorough().loop_bound);
        assert!(ExplorationConfig::quick().timeout.is_some());
    }
}
