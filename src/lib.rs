// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![allow(clippy::too_many_arguments)]

//! # pathscope
//!
//! A bounded symbolic execution engine for compiled, typed, SSA-form programs.
//!
//! `pathscope` links a set of IR modules into a [`project::Project`], starts a function with
//! symbolic arguments, and explores every feasible path through it up to configurable loop,
//! recursion, call-depth and step bounds. Each finished path is reported with its path
//! condition and outcome; an SMT-style [`solver::Solver`] turns path conditions into concrete
//! inputs.
//!
//! ## Features
//!
//! - **Byte-granular memory model** - Copy-on-write objects with symbolic bytes and provenance-aware pointers
//! - **Linker and global initializer** - Multi-module symbol resolution and recursive constant initialization
//! - **Pure step interpreter** - Integer, pointer, aggregate and vector semantics with forking on choices
//! - **Exceptions** - Protected regions, typed handlers, rethrow and uncaught escape
//! - **Hooks** - Native implementations for external functions such as `malloc`, `free` and `abort`
//! - **Exploration** - Depth-first, breadth-first or parallel, with cancellation and a time budget
//! - **Queries** - Inputs that make a function return zero, and the set of values it can return
//!
//! ## Quick Start
//!
//! ```rust
//! use pathscope::prelude::*;
//!
//! // int is_ten(int x) { return x - 10; }
//! let mut f = FunctionBuilder::new("is_ten", vec![Param::new("x", Type::i32())], Type::i32());
//! let r = f.binary(BinaryOp::Sub, f.param(0), Operand::i32(10));
//! f.ret(r);
//! let project = Project::link(vec![ModuleBuilder::new("main").function(f.finish()?).build()])?;
//!
//! let explorer = Explorer::with_config(&project, ExplorationConfig::default());
//! assert_eq!(find_zero(&explorer, "is_ten")?, Some(vec![SolutionValue::I32(10)]));
//! # Ok::<(), pathscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`prelude`] - Convenient re-exports of commonly used types and traits
//! - [`ir`] - The typed SSA program representation and its builders
//! - [`symbolic`] - Fixed-width bitvector expressions with constant folding
//! - [`memory`] - Objects, pointers and the byte-level load/store model
//! - [`project`] - Linking and the initialized global image
//! - [`engine`] - Execution state, the step interpreter and the explorer
//! - [`solver`] - The constraint solver seam and its implementations
//! - [`query`] - High-level questions answered by exploration
//! - [`Error`] and [`Result`] - Error handling
//!
//! ## Soundness
//!
//! Exploration is bounded, so a [`engine::Report`] with an incomplete
//! [`engine::Completion`] or with bound-exceeded paths does not cover every behavior of the
//! function. Symbolic pointer offsets are resolved over a bounded span, see
//! [`memory::DEFAULT_SYMBOLIC_SPAN`].

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

pub mod engine;
pub mod ir;
pub mod memory;
pub mod prelude;
pub mod project;
pub mod query;
pub mod solver;
pub mod symbolic;

/// `pathscope` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `pathscope` Error type
///
/// Errors describe problems with the program or with the engine's inputs. Faults of the
/// analyzed program, such as a null dereference, are path outcomes and not errors.
///
/// # Examples
///
/// ```rust
/// use pathscope::{project::Project, Error};
///
/// match Project::link(vec![]).and_then(|p| p.defined("main").map(|_| ())) {
///     Err(Error::UnknownFunction(name)) => assert_eq!(name, "main"),
///     other => panic!("unexpected {other:?}"),
/// }
/// ```
pub use error::Error;
