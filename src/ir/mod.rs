//! Compiled intermediate representation consumed by the engine.
//!
//! The IR is what an external front end hands over: typed, SSA-form functions made of basic
//! blocks, global variables with constant initializer trees, and external declarations to be
//! resolved at link time. It is read-only once a [`crate::project::Project`] has been linked.
//!
//! # Key Components
//!
//! - [`Type`] / [`Layout`] - Integer, pointer, array, vector and struct types with C layout
//! - [`Constant`] - Literals, addresses and constant expressions
//! - [`Instruction`] / [`Terminator`] / [`Operand`] - The instruction set
//! - [`Function`] / [`BasicBlock`] / [`Param`] - Function bodies
//! - [`Module`] / [`GlobalVariable`] - Compilation units
//! - [`builder`] - [`FunctionBuilder`] and [`ModuleBuilder`] for constructing IR in code

pub mod builder;
pub mod constant;
pub mod function;
pub mod instruction;
pub mod module;
pub mod types;

pub use builder::{FunctionBuilder, ModuleBuilder};
pub use constant::Constant;
pub use function::{BasicBlock, Function, FunctionFlags, Param};
pub use instruction::{
    BinaryOp, BlockId, CastOp, CatchClause, CatchFilter, CompareOp, Instruction, LocalId, Operand,
    RmwOp, Terminator,
};
pub use module::{GlobalVariable, Module};
pub use types::{FunctionType, Layout, StructType, Type};
