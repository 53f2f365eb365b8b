//! Calls and returns.
//!
//! A call resolves its callee to a [`FunctionId`] and then either pushes a frame for a defined
//! function or runs the hook registered for an external one. Call-depth and per-call-site
//! recursion bounds are checked before the frame is pushed.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::{
    engine::{
        hooks::{HookContext, HookOutcome},
        interpreter::{Flow, StepContext},
        result::{Bound, Fault, Outcome},
        state::{CallSite, ExecutionState, Frame},
    },
    ir::{Constant, Function, LocalId, Operand, Type},
    memory::{Pointer, PointerTarget, Value},
    project::{FunctionEntry, FunctionId},
    Error, Result,
};

/// Executes a call instruction.
///
/// # Errors
///
/// [`Error::UnknownFunction`] for a direct call to an unknown name,
/// [`Error::UnresolvedSymbol`] for an external without a hook, and
/// [`Error::Malformed`] for an argument count mismatch or a non-pointer callee.
pub(crate) fn call(
    state: &mut ExecutionState,
    dest: Option<LocalId>,
    callee: &Operand,
    args: &[Operand],
    ctx: &StepContext<'_>,
) -> Result<Flow> {
    let target = match callee {
        Operand::Const(Constant::FunctionAddress(name)) => ctx
            .project
            .function_id(name)
            .ok_or_else(|| Error::UnknownFunction(name.clone()))?,
        other => match state.value(other, ctx.project)? {
            Value::Pointer(Pointer {
                target: PointerTarget::Function(id),
                offset,
            }) if offset.as_constant() == Some(0) => id,
            Value::Pointer(_) => return Ok(Flow::Finish(Outcome::Fault(Fault::InvalidCallTarget))),
            Value::Int { expr, .. } if expr.as_constant() == Some(0) => {
                return Ok(Flow::Finish(Outcome::Fault(Fault::InvalidCallTarget)))
            }
            value => return Err(malformed_error!("call through {}", value)),
        },
    };

    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(state.value(arg, ctx.project)?);
    }
    match ctx.project.function(target) {
        Some(FunctionEntry::Defined(body)) => {
            push_frame(state, target, Arc::clone(body), values, dest, ctx)
        }
        Some(FunctionEntry::External(name)) => call_hook(state, name, &values, dest, ctx),
        None => Err(malformed_error!("call to unlinked function {}", target)),
    }
}

fn push_frame(
    state: &mut ExecutionState,
    id: FunctionId,
    body: Arc<Function>,
    mut args: Vec<Value>,
    dest: Option<LocalId>,
    ctx: &StepContext<'_>,
) -> Result<Flow> {
    if args.len() != body.params.len() {
        return Err(malformed_error!(
            "{} takes {} arguments, called with {}",
            body.name,
            body.params.len(),
            args.len()
        ));
    }
    if state.stack.len() >= ctx.config.max_call_depth {
        debug!(callee = %body.name, depth = state.stack.len(), "call depth bound exceeded");
        return Ok(Flow::Finish(Outcome::BoundExceeded(Bound::CallDepth)));
    }
    let caller = state.frame()?;
    let site = CallSite {
        function: caller.function,
        block: caller.block,
        index: caller.index,
    };
    let active = state
        .stack
        .iter()
        .filter(|frame| frame.call_site == Some(site))
        .count();
    if active >= ctx.config.recursion_bound as usize {
        debug!(callee = %body.name, active, "recursion bound exceeded");
        return Ok(Flow::Finish(Outcome::BoundExceeded(Bound::Recursion)));
    }

    for (value, param) in args.iter_mut().zip(&body.params) {
        retag(value, &param.ty);
    }
    state.frame_mut()?.index += 1;
    trace!(callee = %body.name, depth = state.stack.len() + 1, "call");
    let entry = body.entry();
    state.stack.push(Frame::new(id, body, args, dest, Some(site)));
    if ctx.config.record_path {
        state.record_block(id, entry);
    }
    Ok(Flow::Continue)
}

fn call_hook(
    state: &mut ExecutionState,
    name: &str,
    args: &[Value],
    dest: Option<LocalId>,
    ctx: &StepContext<'_>,
) -> Result<Flow> {
    let hook = ctx
        .config
        .hooks
        .get(name)
        .ok_or_else(|| Error::UnresolvedSymbol {
            symbol: name.to_string(),
            module: "<hooks>".to_string(),
        })?;
    trace!(hook = name, "external call");

    let mut hook_ctx = HookContext::new(name, &mut state.memory, &mut state.symbols, ctx.config);
    let outcome = hook.call(&mut hook_ctx, args)?;
    for constraint in hook_ctx.into_constraints() {
        state.assume(constraint);
    }

    match outcome {
        HookOutcome::Abort => Ok(Flow::Finish(Outcome::Aborted)),
        HookOutcome::Return(value) => {
            match (dest, value) {
                (Some(dest), Some(value)) => state.bind(dest, value)?,
                (Some(_), None) => {
                    return Err(Error::Hook {
                        name: name.to_string(),
                        message: "returned no value to a call that expects one".to_string(),
                    })
                }
                (None, _) => {}
            }
            state.frame_mut()?.index += 1;
            Ok(Flow::Continue)
        }
    }
}

/// Pops the innermost frame, releasing its stack objects.
///
/// Returning from the entry frame ends the path with [`Outcome::Returned`].
///
/// # Errors
///
/// [`Error::Malformed`] if a value-less return reaches a call that expects a value.
pub(crate) fn ret(state: &mut ExecutionState, value: Option<Value>) -> Result<Flow> {
    let frame = state
        .stack
        .pop()
        .ok_or_else(|| malformed_error!("return with no active frame"))?;
    for id in &frame.allocas {
        state.memory.release(*id);
    }
    let value = value.map(|mut v| {
        retag(&mut v, &frame.body.ret);
        v
    });
    if state.stack.is_empty() {
        return Ok(Flow::Finish(Outcome::Returned(value)));
    }
    trace!(function = %frame.body.name, "return");
    if let Some(dest) = frame.return_dest {
        let value =
            value.ok_or_else(|| malformed_error!("{} returned no value", frame.body.name))?;
        state.bind(dest, value)?;
    }
    Ok(Flow::Continue)
}

/// Gives an integer the signedness of the type it is passed or returned as.
fn retag(value: &mut Value, ty: &Type) {
    if let (Value::Int { signed, .. }, Type::Int { signed: declared, .. }) = (value, ty) {
        *signed = *declared;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        engine::{interpreter::step, ExplorationConfig, Successor},
        ir::{BinaryOp, FunctionBuilder, ModuleBuilder, Param},
        project::{Linker, Project},
        symbolic::SymbolicExpr,
    };

    fn run_to_end(project: &Project, config: &ExplorationConfig, function: &str) -> Vec<Outcome> {
        let (id, body) = project.defined(function).unwrap();
        let mut state = ExecutionState::new(
            project.image().memory.clone(),
            project.image().symbols.clone(),
        );
        state
            .stack
            .push(Frame::new(id, Arc::clone(body), Vec::new(), None, None));
        let ctx = StepContext { project, config };
        let mut pending = vec![state];
        let mut outcomes = Vec::new();
        while let Some(state) = pending.pop() {
            for successor in step(state, &ctx).unwrap() {
                match successor {
                    Successor::Active(s) => pending.push(s),
                    Successor::Terminal { outcome, .. } => outcomes.push(outcome),
                }
            }
        }
        outcomes
    }

    fn recursive_project() -> Project {
        // int down(int n) { return n == 0 ? 0 : down(n - 1); }  main() { return down(5); }
        let mut down = FunctionBuilder::new("down", vec![Param::new("n", Type::i32())], Type::i32());
        let base = down.block("base");
        let recurse = down.block("recurse");
        let zero = down.compare(crate::ir::CompareOp::Eq, down.param(0), Operand::i32(0));
        down.cond_br(zero, base, recurse);
        down.position_at(base);
        down.ret(Operand::i32(0));
        down.position_at(recurse);
        let n1 = down.binary(BinaryOp::Sub, down.param(0), Operand::i32(1));
        let r = down.call(Operand::function("down"), vec![n1]);
        down.ret(r);

        let mut main = FunctionBuilder::new("main", vec![], Type::i32());
        let r = main.call(Operand::function("down"), vec![Operand::i32(5)]);
        main.ret(r);

        let module = ModuleBuilder::new("m")
            .function(down.finish().unwrap())
            .function(main.finish().unwrap())
            .build();
        Project::link(vec![module]).unwrap()
    }

    #[test]
    fn test_recursion_within_bound_returns() {
        let project = recursive_project();
        let outcomes = run_to_end(&project, &ExplorationConfig::default(), "main");
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(&outcomes[0], Outcome::Returned(Some(v)) if v.as_u64() == Some(0)));
    }

    #[test]
    fn test_recursion_bound_exceeded() {
        let project = recursive_project();
        let config = ExplorationConfig::default().with_recursion_bound(3);
        let outcomes = run_to_end(&project, &config, "main");
        assert_eq!(outcomes, vec![Outcome::BoundExceeded(Bound::Recursion)]);
    }

    #[test]
    fn test_call_depth_bound_exceeded() {
        let project = recursive_project();
        let config = ExplorationConfig::default().with_max_call_depth(2);
        let outcomes = run_to_end(&project, &config, "main");
        assert_eq!(outcomes, vec![Outcome::BoundExceeded(Bound::CallDepth)]);
    }

    #[test]
    fn test_missing_hook_is_unresolved() {
        let mut main = FunctionBuilder::new("main", vec![], Type::Void);
        main.call_void(Operand::function("mystery"), vec![]);
        main.ret_void();
        let module = ModuleBuilder::new("m")
            .function(main.finish().unwrap())
            .declare("mystery")
            .build();
        let project = Linker::new()
            .external("mystery")
            .module(module)
            .link()
            .unwrap();
        let config = ExplorationConfig::default();
        let (id, body) = project.defined("main").unwrap();
        let mut state = ExecutionState::new(
            project.image().memory.clone(),
            project.image().symbols.clone(),
        );
        state
            .stack
            .push(Frame::new(id, Arc::clone(body), Vec::new(), None, None));
        let ctx = StepContext {
            project: &project,
            config: &config,
        };
        assert!(matches!(
            step(state, &ctx),
            Err(Error::UnresolvedSymbol { symbol, .. }) if symbol == "mystery"
        ));
    }

    #[test]
    fn test_abort_hook_ends_path() {
        let mut main = FunctionBuilder::new("main", vec![], Type::i32());
        main.call_void(Operand::function("abort"), vec![]);
        main.ret(Operand::i32(1));
        let module = ModuleBuilder::new("m")
            .function(main.finish().unwrap())
            .declare("abort")
            .build();
        let project = Project::link(vec![module]).unwrap();
        let outcomes = run_to_end(&project, &ExplorationConfig::default(), "main");
        assert_eq!(outcomes, vec![Outcome::Aborted]);
    }

    #[test]
    fn test_null_call_target_faults() {
        let mut main = FunctionBuilder::new("main", vec![], Type::Void);
        main.call_void(Operand::null(), vec![]);
        main.ret_void();
        let module = ModuleBuilder::new("m").function(main.finish().unwrap()).build();
        let project = Project::link(vec![module]).unwrap();
        let outcomes = run_to_end(&project, &ExplorationConfig::default(), "main");
        assert_eq!(outcomes, vec![Outcome::Fault(Fault::InvalidCallTarget)]);
    }

    #[test]
    fn test_retag_follows_declared_type() {
        let mut value = Value::int(SymbolicExpr::constant(1, 32), true);
        retag(&mut value, &Type::u32());
        assert!(!value.is_signed());
    }
}
