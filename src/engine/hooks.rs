//! Function hooks.
//!
//! External functions have no IR body. Calls to them are served by a [`FunctionHook`]
//! looked up by linkage name in the [`HookRegistry`] of the exploration configuration.
//!
//! # Built-in Hooks
//!
//! | Name | Behavior |
//! |------|----------|
//! | `malloc` | Uninitialized heap object; a symbolic size allocates `symbolic_alloc_size` bytes |
//! | `calloc` | Zero-filled heap object |
//! | `free` | Releases a heap object; null is a no-op |
//! | `abort`, `exit` | Ends the path with [`crate::engine::Outcome::Aborted`] |
//! | `memset` | Fills bytes; the length must be concrete |
//! | `memcpy`, `memmove` | Copies bytes, pointers included; the length must be concrete |
//! | `llvm.vector.reduce.add` | Sum of the lanes of an integer vector |
//! | `llvm.objectsize` | Bytes left in the pointed-to object, or the "unknown" answer |
//!
//! # Examples
//!
//! ```rust
//! use pathscope::engine::{HookContext, HookOutcome, HookRegistry};
//! use pathscope::memory::Value;
//!
//! let hooks = HookRegistry::default().with(
//!     "get_answer",
//!     |_: &mut HookContext<'_>, _: &[Value]| -> pathscope::Result<HookOutcome> {
//!         Ok(HookOutcome::Return(Some(Value::from_u64(42, 32, true))))
//!     },
//! );
//! assert!(hooks.get("get_answer").is_some());
//! assert!(hooks.get("malloc").is_some());
//! ```

use std::{fmt, sync::Arc};

use rustc_hash::FxHashMap;

use crate::{
    engine::config::ExplorationConfig,
    memory::{Fill, Memory, ObjectKind, Pointer, Value, OFFSET_BITS},
    symbolic::{SymbolGenerator, SymbolicExpr, SymbolicOp},
    Error, Result,
};

/// Names of the hooks every registry starts with.
pub const BUILTIN_HOOKS: &[&str] = &[
    "malloc",
    "calloc",
    "free",
    "abort",
    "exit",
    "memset",
    "memcpy",
    "memmove",
    "llvm.vector.reduce.add",
    "llvm.objectsize",
    "llvm.objectsize.i64.p0",
];

/// What a hook invocation produced.
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    /// Return to the caller, with a value for non-void functions
    Return(Option<Value>),
    /// End the path with [`crate::engine::Outcome::Aborted`]
    Abort,
}

/// Access a hook has to the calling state.
///
/// # Lifetime
///
/// The context borrows the calling state and only lives for the duration of the call.
pub struct HookContext<'a> {
    /// Linkage name the hook was invoked under
    pub name: &'a str,
    /// Memory of the calling state
    pub memory: &'a mut Memory,
    /// Fresh-symbol source of the calling state
    pub symbols: &'a mut SymbolGenerator,
    /// Active configuration
    pub config: &'a ExplorationConfig,
    constraints: Vec<SymbolicExpr>,
}

impl<'a> HookContext<'a> {
    /// Creates a context over the given state parts.
    pub fn new(
        name: &'a str,
        memory: &'a mut Memory,
        symbols: &'a mut SymbolGenerator,
        config: &'a ExplorationConfig,
    ) -> Self {
        HookContext {
            name,
            memory,
            symbols,
            config,
            constraints: Vec::new(),
        }
    }

    /// Adds a constraint to the caller's path condition.
    pub fn assume(&mut self, constraint: SymbolicExpr) {
        self.constraints.push(constraint);
    }

    /// A fresh symbol of `width` bits.
    pub fn fresh(&mut self, hint: &str, width: u32) -> SymbolicExpr {
        self.symbols.fresh(hint, width)
    }

    /// Constraints added by the hook.
    #[must_use]
    pub fn into_constraints(self) -> Vec<SymbolicExpr> {
        self.constraints
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::Hook {
            name: self.name.to_string(),
            message: message.into(),
        }
    }

    /// Integer argument `index`.
    ///
    /// # Errors
    ///
    /// [`Error::Hook`] if the argument is missing or not an integer.
    pub fn int_arg<'v>(&self, args: &'v [Value], index: usize) -> Result<&'v SymbolicExpr> {
        args.get(index)
            .and_then(Value::as_int)
            .ok_or_else(|| self.error(format!("argument {index} is not an integer")))
    }

    /// Pointer argument `index`.
    ///
    /// # Errors
    ///
    /// [`Error::Hook`] if the argument is missing or not a pointer.
    pub fn pointer_arg<'v>(&self, args: &'v [Value], index: usize) -> Result<&'v Pointer> {
        args.get(index)
            .and_then(Value::as_pointer)
            .ok_or_else(|| self.error(format!("argument {index} is not a pointer")))
    }

    /// Concrete length argument `index`.
    ///
    /// # Errors
    ///
    /// [`Error::Hook`] if the argument is not an integer, [`Error::Unsupported`] if it is
    /// symbolic.
    pub fn length_arg(&self, args: &[Value], index: usize) -> Result<u64> {
        self.int_arg(args, index)?.as_constant().ok_or_else(|| {
            Error::Unsupported(format!("{} with a symbolic length", self.name))
        })
    }
}

/// An implementation of an external function.
pub trait FunctionHook: Send + Sync {
    /// Runs the function.
    ///
    /// # Errors
    ///
    /// [`Error::Memory`] faults end the calling path with a fault outcome; any other error
    /// aborts the exploration.
    fn call(&self, ctx: &mut HookContext<'_>, args: &[Value]) -> Result<HookOutcome>;
}

impl<F> FunctionHook for F
where
    F: Fn(&mut HookContext<'_>, &[Value]) -> Result<HookOutcome> + Send + Sync,
{
    fn call(&self, ctx: &mut HookContext<'_>, args: &[Value]) -> Result<HookOutcome> {
        self(ctx, args)
    }
}

/// Hooks by linkage name.
#[derive(Clone)]
pub struct HookRegistry {
    hooks: FxHashMap<String, Arc<dyn FunctionHook>>,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("HookRegistry").field("hooks", &names).finish()
    }
}

impl HookRegistry {
    /// A registry without any hooks.
    #[must_use]
    pub fn empty() -> Self {
        HookRegistry {
            hooks: FxHashMap::default(),
        }
    }

    /// A registry holding the built-in hooks.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("malloc", malloc);
        registry.register("calloc", calloc);
        registry.register("free", free);
        registry.register("abort", abort);
        registry.register("exit", abort);
        registry.register("memset", memset);
        registry.register("memcpy", memcpy);
        registry.register("memmove", memcpy);
        registry.register("llvm.vector.reduce.add", vector_reduce_add);
        registry.register("llvm.objectsize", objectsize);
        registry.register("llvm.objectsize.i64.p0", objectsize);
        registry
    }

    /// Registers `hook` under `name`, replacing any previous hook.
    pub fn register(&mut self, name: impl Into<String>, hook: impl FunctionHook + 'static) {
        self.hooks.insert(name.into(), Arc::new(hook));
    }

    /// Builder form of [`HookRegistry::register`].
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, hook: impl FunctionHook + 'static) -> Self {
        self.register(name, hook);
        self
    }

    /// Looks up a hook.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn FunctionHook>> {
        self.hooks.get(name)
    }

    /// Returns `true` if a hook is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.hooks.contains_key(name)
    }

    /// Names of all registered hooks.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.hooks.keys().map(String::as_str)
    }
}

fn heap_object(ctx: &mut HookContext<'_>, size: &SymbolicExpr, fill: Fill) -> Value {
    let size = size
        .as_constant()
        .unwrap_or(ctx.config.symbolic_alloc_size);
    let name = format!("heap{}", ctx.memory.len());
    let id = ctx.memory.allocate(ObjectKind::Heap, name.as_str(), size, fill);
    Value::Pointer(Pointer::to_object(id))
}

fn malloc(ctx: &mut HookContext<'_>, args: &[Value]) -> Result<HookOutcome> {
    let size = ctx.int_arg(args, 0)?.clone();
    Ok(HookOutcome::Return(Some(heap_object(ctx, &size, Fill::Uninit))))
}

fn calloc(ctx: &mut HookContext<'_>, args: &[Value]) -> Result<HookOutcome> {
    let count = SymbolicExpr::resize(ctx.int_arg(args, 0)?.clone(), OFFSET_BITS, false);
    let size = SymbolicExpr::resize(ctx.int_arg(args, 1)?.clone(), OFFSET_BITS, false);
    let total = SymbolicExpr::binary(SymbolicOp::Mul, count, size);
    Ok(HookOutcome::Return(Some(heap_object(ctx, &total, Fill::Zero))))
}

fn free(ctx: &mut HookContext<'_>, args: &[Value]) -> Result<HookOutcome> {
    let pointer = ctx.pointer_arg(args, 0)?;
    ctx.memory.free(pointer)?;
    Ok(HookOutcome::Return(None))
}

fn abort(_ctx: &mut HookContext<'_>, _args: &[Value]) -> Result<HookOutcome> {
    Ok(HookOutcome::Abort)
}

fn memset(ctx: &mut HookContext<'_>, args: &[Value]) -> Result<HookOutcome> {
    let dst = ctx.pointer_arg(args, 0)?;
    let byte = ctx.int_arg(args, 1)?;
    let len = ctx.length_arg(args, 2)?;
    ctx.memory.fill(dst, byte, len)?;
    Ok(HookOutcome::Return(Some(Value::Pointer(dst.clone()))))
}

fn memcpy(ctx: &mut HookContext<'_>, args: &[Value]) -> Result<HookOutcome> {
    let dst = ctx.pointer_arg(args, 0)?;
    let src = ctx.pointer_arg(args, 1)?;
    let len = ctx.length_arg(args, 2)?;
    ctx.memory.copy(dst, src, len, ctx.symbols)?;
    Ok(HookOutcome::Return(Some(Value::Pointer(dst.clone()))))
}

fn vector_reduce_add(ctx: &mut HookContext<'_>, args: &[Value]) -> Result<HookOutcome> {
    let Some(Value::Vector { elements, signed }) = args.first() else {
        return Err(ctx.error("argument 0 is not a vector"));
    };
    let Some((first, rest)) = elements.split_first() else {
        return Err(ctx.error("empty vector"));
    };
    let sum = rest.iter().fold(first.clone(), |acc, lane| {
        SymbolicExpr::binary(SymbolicOp::Add, acc, lane.clone())
    });
    Ok(HookOutcome::Return(Some(Value::int(sum, *signed))))
}

/// `llvm.objectsize(ptr, min, null_unknown, dynamic)`.
///
/// A concrete offset into a live object yields the bytes left in it. Anything else gets the
/// intrinsic's "unknown" answer: 0 when `min` is set, all ones otherwise.
fn objectsize(ctx: &mut HookContext<'_>, args: &[Value]) -> Result<HookOutcome> {
    let pointer = ctx.pointer_arg(args, 0)?;
    let min = ctx.int_arg(args, 1)?;
    let remaining = pointer
        .object()
        .and_then(|id| ctx.memory.object(id))
        .filter(|object| object.live)
        .zip(pointer.concrete_offset())
        .and_then(|(object, offset)| u64::try_from(offset).ok().map(|o| object.size.saturating_sub(o)));
    let size = match remaining {
        Some(bytes) => SymbolicExpr::constant(bytes, 64),
        None => SymbolicExpr::ite(
            min.not_equals(&SymbolicExpr::constant(0, min.width())),
            SymbolicExpr::constant(0, 64),
            SymbolicExpr::constant(u64::MAX, 64),
        ),
    };
    Ok(HookOutcome::Return(Some(Value::int(size, false))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryFault;

    fn context<'a>(
        name: &'a str,
        memory: &'a mut Memory,
        symbols: &'a mut SymbolGenerator,
        config: &'a ExplorationConfig,
    ) -> HookContext<'a> {
        HookContext::new(name, memory, symbols, config)
    }

    #[test]
    fn test_builtins_match_names() {
        let registry = HookRegistry::default();
        for name in BUILTIN_HOOKS {
            assert!(registry.contains(name), "missing {name}");
        }
        assert_eq!(registry.names().count(), BUILTIN_HOOKS.len());
    }

    #[test]
    fn test_malloc_then_double_free() {
        let config = ExplorationConfig::default();
        let mut memory = Memory::new();
        let mut symbols = SymbolGenerator::new();
        let registry = HookRegistry::default();

        let mut ctx = context("malloc", &mut memory, &mut symbols, &config);
        let size = Value::from_u64(16, 64, false);
        let HookOutcome::Return(Some(pointer)) =
            registry.get("malloc").unwrap().call(&mut ctx, &[size]).unwrap()
        else {
            panic!("malloc returned nothing");
        };

        let free = registry.get("free").unwrap();
        let mut ctx = context("free", &mut memory, &mut symbols, &config);
        free.call(&mut ctx, std::slice::from_ref(&pointer)).unwrap();
        let mut ctx = context("free", &mut memory, &mut symbols, &config);
        match free.call(&mut ctx, &[pointer]) {
            Err(Error::Memory(MemoryFault::DoubleFree(_))) => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_symbolic_malloc_uses_configured_size() {
        let config = ExplorationConfig::default().with_symbolic_alloc_size(32);
        let mut memory = Memory::new();
        let mut symbols = SymbolGenerator::new();
        let mut ctx = context("malloc", &mut memory, &mut symbols, &config);
        let size = Value::int(SymbolicExpr::symbol("n", 64), false);
        let outcome = malloc(&mut ctx, &[size]).unwrap();
        let HookOutcome::Return(Some(Value::Pointer(pointer))) = outcome else {
            panic!("unexpected {outcome:?}");
        };
        let object = memory.object(pointer.object().unwrap()).unwrap();
        assert_eq!(object.size, 32);
    }

    #[test]
    fn test_reduce_add_sums_lanes() {
        let config = ExplorationConfig::default();
        let mut memory = Memory::new();
        let mut symbols = SymbolGenerator::new();
        let mut ctx = context("llvm.vector.reduce.add", &mut memory, &mut symbols, &config);
        let vector = Value::Vector {
            elements: (1..=4).map(|v| SymbolicExpr::constant(v, 32)).collect(),
            signed: true,
        };
        let outcome = vector_reduce_add(&mut ctx, &[vector]).unwrap();
        assert_eq!(
            outcome,
            HookOutcome::Return(Some(Value::from_u64(10, 32, true)))
        );
    }

    #[test]
    fn test_objectsize_reports_remaining_bytes() {
        let config = ExplorationConfig::default();
        let mut memory = Memory::new();
        let id = memory.allocate(ObjectKind::Heap, "buf", 24, Fill::Uninit);
        let mut symbols = SymbolGenerator::new();
        let mut ctx = context("llvm.objectsize", &mut memory, &mut symbols, &config);
        let flag = |v| Value::from_u64(v, 1, false);
        let inside = Pointer::to_object(id).offset_by(&SymbolicExpr::constant(10, OFFSET_BITS));
        let args = [Value::Pointer(inside), flag(0), flag(0), flag(0)];
        assert_eq!(
            objectsize(&mut ctx, &args).unwrap(),
            HookOutcome::Return(Some(Value::from_u64(14, 64, false)))
        );

        let unknown = Pointer::to_object(id)
            .offset_by(&SymbolicExpr::symbol("i", OFFSET_BITS));
        for (min, answer) in [(0, u64::MAX), (1, 0)] {
            let args = [Value::Pointer(unknown.clone()), flag(min), flag(0), flag(0)];
            assert_eq!(
                objectsize(&mut ctx, &args).unwrap(),
                HookOutcome::Return(Some(Value::from_u64(answer, 64, false)))
            );
        }
    }

    #[test]
    fn test_memset_requires_concrete_length() {
        let config = ExplorationConfig::default();
        let mut memory = Memory::new();
        let id = memory.allocate(ObjectKind::Heap, "buf", 8, Fill::Uninit);
        let mut symbols = SymbolGenerator::new();
        let mut ctx = context("memset", &mut memory, &mut symbols, &config);
        let args = [
            Value::Pointer(Pointer::to_object(id)),
            Value::from_u64(0, 32, true),
            Value::int(SymbolicExpr::symbol("n", 64), false),
        ];
        assert!(matches!(memset(&mut ctx, &args), Err(Error::Unsupported(_))));
    }
}
