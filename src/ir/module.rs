//! Modules: the unit handed over by the front end.

use std::sync::Arc;

use crate::ir::{constant::Constant, function::Function, types::Type};

/// A global variable definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GlobalVariable {
    /// Linkage name
    pub name: String,
    /// Type of the storage
    pub ty: Type,
    /// Initial value; absent means zero-initialized static storage
    pub initializer: Option<Constant>,
    /// Declared `const`. Informational only.
    pub constant: bool,
}

impl GlobalVariable {
    /// Creates a mutable global.
    #[must_use]
    pub fn new(name: impl Into<String>, ty: Type, initializer: Option<Constant>) -> Self {
        GlobalVariable {
            name: name.into(),
            ty,
            initializer,
            constant: false,
        }
    }
}

/// A named collection of definitions and external declarations.
///
/// Declarations are names the module uses but does not define; the linker resolves them
/// against the other modules of a project or against function hooks.
#[derive(Debug, Clone, Default)]
pub struct Module {
    /// Module name, for diagnostics
    pub name: String,
    /// Function definitions
    pub functions: Vec<Arc<Function>>,
    /// Global variable definitions
    pub globals: Vec<GlobalVariable>,
    /// Functions used but defined elsewhere
    pub declarations: Vec<String>,
    /// Globals used but defined elsewhere
    pub extern_globals: Vec<String>,
}

impl Module {
    /// Creates an empty module.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Adds a function definition.
    pub fn add_function(&mut self, function: Function) {
        self.functions.push(Arc::new(function));
    }

    /// Adds a global variable definition.
    pub fn add_global(&mut self, global: GlobalVariable) {
        self.globals.push(global);
    }

    /// Declares an external function.
    pub fn declare_function(&mut self, name: impl Into<String>) {
        self.declarations.push(name.into());
    }

    /// Declares an external global.
    pub fn declare_global(&mut self, name: impl Into<String>) {
        self.extern_globals.push(name.into());
    }

    /// Looks up a function defined in this module.
    #[must_use]
    pub fn function(&self, name: &str) -> Option<&Arc<Function>> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Looks up a global defined in this module.
    #[must_use]
    pub fn global(&self, name: &str) -> Option<&GlobalVariable> {
        self.globals.iter().find(|g| g.name == name)
    }
}
