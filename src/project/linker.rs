//! Module linking.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::{
    engine::{HookRegistry, BUILTIN_HOOKS},
    ir::{Constant, Function, GlobalVariable, Instruction, Module, Operand},
    memory::globals,
    project::{loops::LoopInfo, FunctionEntry, FunctionId, GlobalInfo, Project},
    Error, Result,
};

/// Builder that resolves a set of modules into a [`Project`].
///
/// # Examples
///
/// ```rust
/// use pathscope::{ir::ModuleBuilder, project::Linker};
///
/// let main = ModuleBuilder::new("main").declare("puts").build();
/// let project = Linker::new().module(main).external("puts").link()?;
/// assert!(project.function_id("puts").is_some());
/// # Ok::<(), pathscope::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct Linker {
    /// Modules in link order
    modules: Vec<Module>,
    /// Names provided by function hooks
    externals: BTreeSet<String>,
}

impl Default for Linker {
    fn default() -> Self {
        Self::new()
    }
}

impl Linker {
    /// Creates a linker that knows the built-in hooks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
            externals: BUILTIN_HOOKS.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// Adds a module.
    #[must_use]
    pub fn module(mut self, module: Module) -> Self {
        self.modules.push(module);
        self
    }

    /// Adds several modules.
    #[must_use]
    pub fn modules(mut self, modules: impl IntoIterator<Item = Module>) -> Self {
        self.modules.extend(modules);
        self
    }

    /// Declares a function provided by a hook.
    ///
    /// # Arguments
    /// * `name` - Linkage name the hook is registered under
    #[must_use]
    pub fn external(mut self, name: impl Into<String>) -> Self {
        self.externals.insert(name.into());
        self
    }

    /// Declares every function of a hook registry.
    #[must_use]
    pub fn hooks(mut self, registry: &HookRegistry) -> Self {
        self.externals.extend(registry.names().map(str::to_string));
        self
    }

    /// Resolves all modules into one symbol space and evaluates global initializers.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateSymbol`] if two modules define the same function or global
    /// - [`Error::UnresolvedSymbol`] for a declaration or reference with no definition
    /// - [`Error::InitializerCycle`] for a global value cycle
    /// - [`Error::MalformedType`] for a global without a valid layout
    pub fn link(self) -> Result<Project> {
        let mut function_owner: HashMap<&str, &str> = HashMap::new();
        let mut global_owner: HashMap<&str, &str> = HashMap::new();
        let mut defined: Vec<Arc<Function>> = Vec::new();
        let mut global_defs: Vec<&GlobalVariable> = Vec::new();

        for module in &self.modules {
            for function in &module.functions {
                if let Some(first) = function_owner.insert(&function.name, &module.name) {
                    return Err(Error::DuplicateSymbol {
                        symbol: function.name.clone(),
                        first: first.to_string(),
                        second: module.name.clone(),
                    });
                }
                defined.push(function.clone());
            }
            for global in &module.globals {
                if let Some(first) = global_owner.insert(&global.name, &module.name) {
                    return Err(Error::DuplicateSymbol {
                        symbol: global.name.clone(),
                        first: first.to_string(),
                        second: module.name.clone(),
                    });
                }
                global.ty.validate()?;
                global_defs.push(global);
            }
        }

        // Function table: definitions first, then externals in order of first reference.
        let mut functions: Vec<FunctionEntry> = defined
            .iter()
            .map(|f| FunctionEntry::Defined(f.clone()))
            .collect();
        let mut function_ids: FxHashMap<String, FunctionId> = defined
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), FunctionId(i as u32)))
            .collect();

        for module in &self.modules {
            let mut resolve = |name: &str| -> Result<()> {
                if function_ids.contains_key(name) {
                    return Ok(());
                }
                if !self.externals.contains(name) {
                    return Err(Error::UnresolvedSymbol {
                        symbol: name.to_string(),
                        module: module.name.clone(),
                    });
                }
                let id = FunctionId(functions.len() as u32);
                functions.push(FunctionEntry::External(name.to_string()));
                function_ids.insert(name.to_string(), id);
                Ok(())
            };

            for name in &module.declarations {
                resolve(name)?;
            }
            for name in referenced_functions(module) {
                resolve(name)?;
            }
            for name in &module.extern_globals {
                if !global_owner.contains_key(name.as_str()) {
                    return Err(Error::UnresolvedSymbol {
                        symbol: name.clone(),
                        module: module.name.clone(),
                    });
                }
            }
            for name in referenced_globals(module) {
                if !global_owner.contains_key(name) {
                    return Err(Error::UnresolvedSymbol {
                        symbol: name.to_string(),
                        module: module.name.clone(),
                    });
                }
            }
        }

        let loops = functions
            .iter()
            .map(|entry| match entry {
                FunctionEntry::Defined(function) => LoopInfo::analyze(function),
                FunctionEntry::External(_) => LoopInfo::default(),
            })
            .collect();

        let image = globals::initialize(&global_defs, &function_ids)?;
        let global_info = global_defs
            .iter()
            .filter_map(|g| {
                image.objects.get(&g.name).map(|&object| {
                    (
                        g.name.clone(),
                        GlobalInfo {
                            object,
                            ty: g.ty.clone(),
                            constant: g.constant,
                        },
                    )
                })
            })
            .collect();

        debug!(
            modules = self.modules.len(),
            functions = functions.len(),
            globals = global_defs.len(),
            "linked project"
        );

        Ok(Project {
            functions,
            function_ids,
            globals: global_info,
            loops,
            image,
        })
    }
}

/// Function names referenced by instruction operands and global initializers.
fn referenced_functions(module: &Module) -> BTreeSet<&str> {
    let mut out = BTreeSet::new();
    for_each_constant(module, &mut |c| {
        if let Constant::FunctionAddress(name) = c {
            out.insert(name.as_str());
        }
    });
    out
}

/// Global names referenced by address or by value.
fn referenced_globals(module: &Module) -> BTreeSet<&str> {
    let mut out = BTreeSet::new();
    for_each_constant(module, &mut |c| match c {
        Constant::GlobalAddress(name) | Constant::GlobalValue { name, .. } => {
            out.insert(name.as_str());
        }
        _ => {}
    });
    out
}

fn for_each_constant<'a>(module: &'a Module, visit: &mut impl FnMut(&'a Constant)) {
    for global in &module.globals {
        if let Some(initializer) = &global.initializer {
            initializer.walk(visit);
        }
    }
    for function in &module.functions {
        for block in &function.blocks {
            let operands = block
                .instructions
                .iter()
                .flat_map(Instruction::operands)
                .chain(block.terminator.operands());
            for operand in operands {
                if let Operand::Const(c) = operand {
                    c.walk(visit);
                }
            }
        }
    }
}
