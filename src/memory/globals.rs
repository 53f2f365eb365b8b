//! Global initializer evaluation.
//!
//! Initializers are evaluated once per project, producing the memory image every execution
//! state starts from.
//!
//! # Architecture
//!
//! Evaluation runs in three phases:
//!
//! 1. **Pre-allocation** - every global receives its storage before any initializer runs, so
//!    address references (including cyclic ones such as two globals pointing at each other)
//!    always resolve.
//! 2. **Ordering** - the *value* dependency graph (edges from a global to the globals whose
//!    content its initializer reads) is condensed with Tarjan's algorithm. SCCs come out
//!    dependencies first, which is exactly the evaluation order. A non-trivial SCC or a
//!    self-loop is a genuine value cycle and fails the load.
//! 3. **Evaluation** - initializers are written into their objects in that order; a read of
//!    another global's content sees that global's finished image.

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::{
    ir::{Constant, GlobalVariable},
    memory::{Fill, Memory, ObjectId, ObjectKind, Pointer},
    project::FunctionId,
    symbolic::SymbolGenerator,
    Error, Result,
};

/// Resolves the symbolic names inside constants to memory.
pub trait ConstantResolver {
    /// Storage object of a global.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownGlobal`] if no such global exists.
    fn global_object(&self, name: &str) -> Result<ObjectId>;

    /// Identity of a function.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownFunction`] if no such function exists.
    fn function_id(&self, name: &str) -> Result<FunctionId>;
}

/// The initialized memory of a project.
#[derive(Debug, Clone, Default)]
pub struct GlobalImage {
    /// Memory holding one object per global
    pub memory: Memory,
    /// Generator that produced any symbols in `memory`; states continue from it
    pub symbols: SymbolGenerator,
    /// Storage object per global name
    pub objects: FxHashMap<String, ObjectId>,
}

struct ImageResolver<'a> {
    objects: &'a FxHashMap<String, ObjectId>,
    functions: &'a FxHashMap<String, FunctionId>,
}

impl ConstantResolver for ImageResolver<'_> {
    fn global_object(&self, name: &str) -> Result<ObjectId> {
        self.objects
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownGlobal(name.to_string()))
    }

    fn function_id(&self, name: &str) -> Result<FunctionId> {
        self.functions
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownFunction(name.to_string()))
    }
}

/// Helper struct to group Tarjan's algorithm state
struct TarjanState {
    index_counter: usize,
    stack: Vec<usize>,
    indices: Vec<Option<usize>>,
    lowlinks: Vec<usize>,
    on_stack: Vec<bool>,
    sccs: Vec<Vec<usize>>,
}

impl TarjanState {
    fn new(nodes: usize) -> Self {
        Self {
            index_counter: 0,
            stack: Vec::new(),
            indices: vec![None; nodes],
            lowlinks: vec![0; nodes],
            on_stack: vec![false; nodes],
            sccs: Vec::new(),
        }
    }
}

/// Tarjan's algorithm; components are returned sinks first.
fn tarjan_scc(adjacency: &[Vec<usize>]) -> Result<Vec<Vec<usize>>> {
    let mut state = TarjanState::new(adjacency.len());
    for node in 0..adjacency.len() {
        if state.indices[node].is_none() {
            tarjan_strongconnect(node, adjacency, &mut state)?;
        }
    }
    Ok(state.sccs)
}

fn tarjan_strongconnect(node: usize, adjacency: &[Vec<usize>], state: &mut TarjanState) -> Result<()> {
    state.indices[node] = Some(state.index_counter);
    state.lowlinks[node] = state.index_counter;
    state.index_counter += 1;
    state.stack.push(node);
    state.on_stack[node] = true;

    for &successor in &adjacency[node] {
        match state.indices[successor] {
            None => {
                tarjan_strongconnect(successor, adjacency, state)?;
                state.lowlinks[node] = state.lowlinks[node].min(state.lowlinks[successor]);
            }
            Some(index) if state.on_stack[successor] => {
                state.lowlinks[node] = state.lowlinks[node].min(index);
            }
            Some(_) => {}
        }
    }

    if Some(state.lowlinks[node]) == state.indices[node] {
        let mut scc = Vec::new();
        loop {
            let w = state
                .stack
                .pop()
                .ok_or_else(|| malformed_error!("stack underflow in Tarjan's algorithm"))?;
            state.on_stack[w] = false;
            scc.push(w);
            if w == node {
                break;
            }
        }
        state.sccs.push(scc);
    }
    Ok(())
}

/// Evaluation order of `globals`, as indices into the slice.
///
/// # Errors
///
/// [`Error::InitializerCycle`] for a value-dependency cycle, [`Error::UnknownGlobal`] for a
/// value read of a global that is not in `globals`.
pub fn evaluation_order(globals: &[&GlobalVariable]) -> Result<Vec<usize>> {
    let index: FxHashMap<&str, usize> = globals
        .iter()
        .enumerate()
        .map(|(i, g)| (g.name.as_str(), i))
        .collect();

    let mut adjacency = vec![Vec::new(); globals.len()];
    for (i, global) in globals.iter().enumerate() {
        let Some(initializer) = &global.initializer else {
            continue;
        };
        for dependency in initializer.value_dependencies() {
            let target = *index
                .get(dependency)
                .ok_or_else(|| Error::UnknownGlobal(dependency.to_string()))?;
            if target == i {
                return Err(Error::InitializerCycle(vec![
                    global.name.clone(),
                    global.name.clone(),
                ]));
            }
            adjacency[i].push(target);
        }
    }

    let sccs = tarjan_scc(&adjacency)?;
    let mut order = Vec::with_capacity(globals.len());
    for scc in sccs {
        if scc.len() > 1 {
            let mut names: Vec<String> = scc
                .iter()
                .rev()
                .map(|&i| globals[i].name.clone())
                .collect();
            names.push(names[0].clone());
            return Err(Error::InitializerCycle(names));
        }
        order.extend(scc);
    }
    Ok(order)
}

/// Allocates and initializes every global.
///
/// # Arguments
///
/// * `globals` - All global definitions of the project
/// * `functions` - Function identities for `FunctionAddress` constants
///
/// # Errors
///
/// [`Error::InitializerCycle`] for value cycles, layout errors for unsized global types, and
/// resolution or memory errors raised while writing an initializer.
pub fn initialize(
    globals: &[&GlobalVariable],
    functions: &FxHashMap<String, FunctionId>,
) -> Result<GlobalImage> {
    let mut image = GlobalImage::default();

    for global in globals {
        let size = global.ty.size()?;
        let fill = match global.initializer {
            Some(Constant::Undef(_)) => Fill::Uninit,
            _ => Fill::Zero,
        };
        let id = image
            .memory
            .allocate(ObjectKind::Global, global.name.as_str(), size, fill);
        image.objects.insert(global.name.clone(), id);
    }

    let order = evaluation_order(globals)?;
    debug!(globals = globals.len(), "evaluating global initializers");

    let resolver = ImageResolver {
        objects: &image.objects,
        functions,
    };
    for i in order {
        let global = globals[i];
        let Some(initializer) = &global.initializer else {
            continue;
        };
        let object = resolver.global_object(&global.name)?;
        image.memory.write_constant(
            &Pointer::to_object(object),
            initializer,
            &resolver,
            &mut image.symbols,
        )?;
        debug!(global = %global.name, "initialized");
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, Type};

    fn global(name: &str, ty: Type, init: Option<Constant>) -> GlobalVariable {
        GlobalVariable::new(name, ty, init)
    }

    fn read(image: &mut GlobalImage, name: &str, ty: &Type) -> crate::memory::Value {
        let object = image.objects[name];
        image
            .memory
            .load(&Pointer::to_object(object), ty, &mut image.symbols)
            .unwrap()
    }

    #[test]
    fn test_address_cycle_resolves() {
        // struct node { struct node *next; int v; } a = { &b, 1 }, b = { &a, 2 };
        let node = Type::structure(vec![Type::ptr(), Type::i32()]);
        let a = global(
            "a",
            node.clone(),
            Some(Constant::Struct {
                ty: node.clone(),
                fields: vec![Constant::global("b"), Constant::i32(1)],
            }),
        );
        let b = global(
            "b",
            node.clone(),
            Some(Constant::Struct {
                ty: node.clone(),
                fields: vec![Constant::global("a"), Constant::i32(2)],
            }),
        );
        let mut image = initialize(&[&a, &b], &FxHashMap::default()).unwrap();
        let b_id = image.objects["b"];
        let next = read(&mut image, "a", &Type::ptr());
        assert_eq!(next.as_pointer().and_then(Pointer::object), Some(b_id));
    }

    #[test]
    fn test_value_dependency_orders_evaluation() {
        // int first = second + 1; int second = 41;
        let first = global(
            "first",
            Type::i32(),
            Some(Constant::binary(
                BinaryOp::Add,
                Constant::value_of("second", Type::i32()),
                Constant::i32(1),
            )),
        );
        let second = global("second", Type::i32(), Some(Constant::i32(41)));
        let globals = [&first, &second];
        assert_eq!(evaluation_order(&globals).unwrap(), vec![1, 0]);

        let mut image = initialize(&globals, &FxHashMap::default()).unwrap();
        assert_eq!(read(&mut image, "first", &Type::i32()).as_u64(), Some(42));
    }

    #[test]
    fn test_value_cycle_is_rejected() {
        let a = global("a", Type::i32(), Some(Constant::value_of("b", Type::i32())));
        let b = global("b", Type::i32(), Some(Constant::value_of("a", Type::i32())));
        match initialize(&[&a, &b], &FxHashMap::default()) {
            Err(Error::InitializerCycle(names)) => {
                assert!(names.contains(&"a".to_string()));
                assert!(names.contains(&"b".to_string()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_self_value_reference_is_rejected() {
        let a = global("a", Type::i32(), Some(Constant::value_of("a", Type::i32())));
        assert!(matches!(
            evaluation_order(&[&a]),
            Err(Error::InitializerCycle(_))
        ));
    }

    #[test]
    fn test_missing_initializer_is_zero_and_undef_is_symbolic() {
        let zero = global("zero", Type::i64(), None);
        let undef = global("undef", Type::i64(), Some(Constant::Undef(Type::i64())));
        let mut image = initialize(&[&zero, &undef], &FxHashMap::default()).unwrap();
        assert_eq!(read(&mut image, "zero", &Type::i64()).as_u64(), Some(0));
        assert_eq!(read(&mut image, "undef", &Type::i64()).as_u64(), None);
    }

    #[test]
    fn test_function_address_resolves() {
        let handler = global("handler", Type::ptr(), Some(Constant::function("callback")));
        let mut functions = FxHashMap::default();
        functions.insert("callback".to_string(), FunctionId(3));
        let mut image = initialize(&[&handler], &functions).unwrap();
        let value = read(&mut image, "handler", &Type::ptr());
        assert_eq!(value, crate::memory::Value::Pointer(Pointer::to_function(FunctionId(3))));
    }
}
