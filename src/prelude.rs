//! # pathscope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the pathscope library. Import this module to get quick access to everything needed
//! to build a program, link it, and explore it.
//!
//! # Examples
//!
//! ```rust
//! use pathscope::prelude::*;
//!
//! let mut f = FunctionBuilder::new("zero", vec![], Type::i32());
//! f.ret(Operand::i32(0));
//! let project = Project::link(vec![ModuleBuilder::new("m").function(f.finish()?).build()])?;
//! let report = Explorer::with_config(&project, ExplorationConfig::default())
//!     .explore(&Query::new("zero"))?;
//! assert_eq!(report.records.len(), 1);
//! # Ok::<(), pathscope::Error>(())
//! ```

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all pathscope operations
pub use crate::Error;

/// The result type used throughout pathscope
pub use crate::Result;

// ================================================================================================
// Program Representation
// ================================================================================================

/// Builders for functions and modules
pub use crate::ir::{FunctionBuilder, ModuleBuilder};

/// Program structure
pub use crate::ir::{BlockId, Function, GlobalVariable, LocalId, Module, Param};

/// Instructions, operands and their operators
pub use crate::ir::{
    BinaryOp, CastOp, CatchClause, CatchFilter, CompareOp, Constant, Instruction, Operand,
    RmwOp, Terminator,
};

/// The type system
pub use crate::ir::{FunctionType, StructType, Type};

// ================================================================================================
// Linking
// ================================================================================================

/// Linked programs and the linker that builds them
pub use crate::project::{FunctionId, Linker, Project};

// ================================================================================================
// Symbolic Values and Memory
// ================================================================================================

/// Bitvector expressions
pub use crate::symbolic::{SymbolGenerator, SymbolicExpr, SymbolicOp};

/// Runtime values and the memory they live in
pub use crate::memory::{Memory, MemoryFault, ObjectId, Pointer, PointerTarget, Value};

/// Memory watchpoints
pub use crate::memory::{AccessKind, WatchHit, Watchpoint, Watchpoints};

// ================================================================================================
// Exploration
// ================================================================================================

/// Driving an exploration
pub use crate::engine::{ArgSpec, CancellationToken, Explorer, Query, Target};

/// Exploration configuration
pub use crate::engine::{
    ExplorationConfig, ExplorationOrder, GlobalWatch, OutOfBoundsPolicy, UnknownPolicy,
};

/// Exploration results
pub use crate::engine::{
    Bound, Completion, ExplorationStats, Fault, Input, Outcome, Report, TerminalRecord, Witness,
};

/// External function hooks
pub use crate::engine::{FunctionHook, HookContext, HookOutcome, HookRegistry};

/// Instruction and terminator observers
pub use crate::engine::Callbacks;

// ================================================================================================
// Solving and Queries
// ================================================================================================

/// The solver seam and its implementations
pub use crate::solver::{CachingSolver, Model, SatResult, Solver, Verdict, Z3Solver};

/// High-level queries
pub use crate::query::{
    find_zero, possible_return_values, PossibleSolutions, ReturnValue, SolutionValue,
};
