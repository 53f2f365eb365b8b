//! Linked programs.
//!
//! A [`Project`] is the read-only result of linking a set of IR modules: one function table,
//! one global table, the initialized memory image every execution starts from, and the loop
//! structure of every function. It is shared by reference between all exploration workers.
//!
//! # Architecture
//!
//! ```text
//! Module, Module, ... ──► Linker ──► symbol resolution ──► globals::initialize ──► Project
//!                           │                                                      │
//!                   hook names (externals)                          functions / globals / loops / image
//! ```
//!
//! # Key Components
//!
//! - [`Linker`] - Builder that resolves modules and hook-provided externals
//! - [`Project`] - The linked program
//! - [`FunctionId`] / [`FunctionEntry`] - Function table entries, defined or external
//! - [`GlobalInfo`] - Storage of one global
//! - [`LoopInfo`] - Back edges and loop headers per function
//!
//! # Examples
//!
//! ```rust
//! use pathscope::{ir::{FunctionBuilder, ModuleBuilder, Operand, Type}, project::Project};
//!
//! let mut f = FunctionBuilder::new("answer", vec![], Type::i32());
//! f.ret(Operand::i32(42));
//! let module = ModuleBuilder::new("main").function(f.finish()?).build();
//!
//! let project = Project::link(vec![module])?;
//! assert!(project.defined("answer").is_ok());
//! # Ok::<(), pathscope::Error>(())
//! ```

mod linker;
mod loops;

use std::{fmt, sync::Arc};

use rustc_hash::FxHashMap;

pub use linker::Linker;
pub use loops::LoopInfo;

use crate::{
    ir::{BlockId, Function, Module, Type},
    memory::{globals::GlobalImage, ConstantResolver, ObjectId},
    Error, Result,
};

/// Index of a function in a project's function table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u32);

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn{}", self.0)
    }
}

/// One function table entry.
#[derive(Debug, Clone)]
pub enum FunctionEntry {
    /// A function with a body
    Defined(Arc<Function>),
    /// A function implemented by a hook
    External(String),
}

impl FunctionEntry {
    /// Linkage name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            FunctionEntry::Defined(function) => &function.name,
            FunctionEntry::External(name) => name,
        }
    }
}

/// Storage of a global variable.
#[derive(Debug, Clone)]
pub struct GlobalInfo {
    /// Object holding the global
    pub object: ObjectId,
    /// Declared type
    pub ty: Type,
    /// Declared `const`
    pub constant: bool,
}

/// A linked, initialized program.
#[derive(Debug)]
pub struct Project {
    functions: Vec<FunctionEntry>,
    function_ids: FxHashMap<String, FunctionId>,
    globals: FxHashMap<String, GlobalInfo>,
    loops: Vec<LoopInfo>,
    image: GlobalImage,
}

impl Project {
    /// Links `modules` with the built-in hooks as the only externals.
    ///
    /// # Errors
    ///
    /// See [`Linker::link`].
    pub fn link(modules: Vec<Module>) -> Result<Self> {
        Linker::new().modules(modules).link()
    }

    /// Looks up a function by name.
    #[must_use]
    pub fn function_id(&self, name: &str) -> Option<FunctionId> {
        self.function_ids.get(name).copied()
    }

    /// Function table entry.
    #[must_use]
    pub fn function(&self, id: FunctionId) -> Option<&FunctionEntry> {
        self.functions.get(id.0 as usize)
    }

    /// Function body by name.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownFunction`] if the name is not defined in any module.
    pub fn defined(&self, name: &str) -> Result<(FunctionId, &Arc<Function>)> {
        let id = self
            .function_id(name)
            .ok_or_else(|| Error::UnknownFunction(name.to_string()))?;
        match self.function(id) {
            Some(FunctionEntry::Defined(function)) => Ok((id, function)),
            _ => Err(Error::UnknownFunction(name.to_string())),
        }
    }

    /// Name of a function, for diagnostics.
    #[must_use]
    pub fn function_name(&self, id: FunctionId) -> &str {
        self.function(id).map_or("?", FunctionEntry::name)
    }

    /// All function table entries.
    pub fn functions(&self) -> impl Iterator<Item = (FunctionId, &FunctionEntry)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, entry)| (FunctionId(i as u32), entry))
    }

    /// Storage of a global.
    #[must_use]
    pub fn global(&self, name: &str) -> Option<&GlobalInfo> {
        self.globals.get(name)
    }

    /// Loop structure of a function; empty for externals.
    #[must_use]
    pub fn loops(&self, id: FunctionId) -> Option<&LoopInfo> {
        self.loops.get(id.0 as usize)
    }

    /// Returns `true` if `from -> to` is a back edge of function `id`.
    #[must_use]
    pub fn is_back_edge(&self, id: FunctionId, from: BlockId, to: BlockId) -> bool {
        self.loops(id).is_some_and(|l| l.is_back_edge(from, to))
    }

    /// The initialized globals.
    #[must_use]
    pub fn image(&self) -> &GlobalImage {
        &self.image
    }
}

impl ConstantResolver for Project {
    fn global_object(&self, name: &str) -> Result<ObjectId> {
        self.globals
            .get(name)
            .map(|g| g.object)
            .ok_or_else(|| Error::UnknownGlobal(name.to_string()))
    }

    fn function_id(&self, name: &str) -> Result<FunctionId> {
        Project::function_id(self, name).ok_or_else(|| Error::UnknownFunction(name.to_string()))
    }
}
