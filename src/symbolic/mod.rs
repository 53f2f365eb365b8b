//! Symbolic bit-vector expressions.
//!
//! Every integer the engine computes with, whether it is a function argument, a byte read from
//! memory or a branch condition, is a [`SymbolicExpr`]. Expressions are fixed-width bit-vectors
//! (1 to 64 bits) built from the operations in [`SymbolicOp`], and they fold eagerly: an
//! expression whose inputs are all concrete is always a constant node.
//!
//! # Architecture
//!
//! ```text
//! IR operands → SymbolicExpr (shared, folded DAG) → Solver backend → Assignment
//! ```
//!
//! The same tree is consumed in two ways. The [`crate::solver`] backends translate or search over
//! it to decide satisfiability, and [`SymbolicExpr::evaluate`] replays a model concretely with
//! SMT-LIB semantics, which is how models are verified and query answers computed.
//!
//! # Module Structure
//!
//! - [`ops`] - Symbolic operation types ([`SymbolicOp`]: add, xor, comparison, etc.)
//! - [`expr`] - Expression nodes, smart constructors and evaluation ([`SymbolicExpr`])
//! - [`fresh`] - Per-state generation of unique symbol names ([`SymbolGenerator`])

pub mod expr;
pub mod fresh;
pub mod ops;

pub use expr::{evaluate_binary, evaluate_unary, mask, sign_extend, Assignment, ExprKind, SymbolicExpr};
pub use fresh::SymbolGenerator;
pub use ops::SymbolicOp;
