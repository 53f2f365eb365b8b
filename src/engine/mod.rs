//! Symbolic execution engine.
//!
//! Runs functions of a linked [`crate::project::Project`] over symbolic inputs, forking at
//! every decision whose outcome depends on them, and reports how each feasible path ends.
//!
//! # Architecture
//!
//! ```text
//! Explorer ──► step ──► interpreter ──┬─► dispatch  (calls, returns, hooks)
//!    │                                ├─► exception (regions, unwinding)
//!    │                                └─► memory    (loads, stores, allocation)
//!    └──► Solver (feasibility, witnesses)
//! ```
//!
//! The step function is pure: it maps one [`ExecutionState`] to its successors and never
//! consults the solver. The [`Explorer`] owns scheduling, pruning, bounds on wall-clock
//! time, and result collection.
//!
//! # Key Components
//!
//! - [`ExecutionState`] / [`Frame`] - One path in progress, cheap to fork
//! - [`step`] - Executes one instruction
//! - [`HookRegistry`] - Models of external functions
//! - [`Explorer`] / [`Query`] - Run an exploration and collect a [`Report`]
//! - [`ExplorationConfig`] - Bounds, policies and hooks
//! - [`Callbacks`] - Observers of every executed instruction and terminator
//!
//! # Examples
//!
//! ```rust
//! use pathscope::prelude::*;
//!
//! // int sign(int x) { return x < 0 ? -1 : 1; }
//! let mut f = FunctionBuilder::new("sign", vec![Param::new("x", Type::i32())], Type::i32());
//! let neg = f.block("neg");
//! let pos = f.block("pos");
//! let lt = f.compare(CompareOp::Lt, f.param(0), Operand::i32(0));
//! f.cond_br(lt, neg, pos);
//! f.position_at(neg);
//! f.ret(Operand::i32(-1));
//! f.position_at(pos);
//! f.ret(Operand::i32(1));
//! let project = Project::link(vec![ModuleBuilder::new("m").function(f.finish()?).build()])?;
//!
//! let explorer = Explorer::with_config(&project, ExplorationConfig::default());
//! let report = explorer.explore(&Query::new("sign"))?;
//! assert!(report.is_complete());
//! assert_eq!(report.returned().count(), 2);
//! # Ok::<(), pathscope::Error>(())
//! ```

mod callbacks;
mod config;
mod dispatch;
mod exception;
mod explorer;
mod hooks;
mod interpreter;
mod result;
mod state;
mod stats;

pub use callbacks::{Callbacks, InstructionCallback, TerminatorCallback};
pub use config::{
    ExplorationConfig, ExplorationOrder, GlobalWatch, OutOfBoundsPolicy, UnknownPolicy,
};
pub use explorer::{ArgSpec, CancellationToken, Explorer, Query, Target};
pub use hooks::{FunctionHook, HookContext, HookOutcome, HookRegistry, BUILTIN_HOOKS};
pub use interpreter::{step, StepContext, Successor};
pub use result::{Bound, Completion, Fault, Input, Outcome, Report, TerminalRecord, Witness};
pub use state::{CallSite, ExecutionState, Frame, PendingException, Status, TryRegion};
pub use stats::ExplorationStats;
