//! Exception regions and unwinding.
//!
//! A `throw` puts the state into [`Status::Unwinding`]. Each following step performs one
//! unwinding action: it searches the innermost frame's open regions from the inside out,
//! and either transfers control to the first matching handler or pops the frame. An
//! exception that pops the entry frame ends the path as [`Outcome::Uncaught`].
//!
//! Handlers run with their exception on the frame's `caught` stack so that `rethrow` can
//! raise it again. A region records the height of that stack when it was entered, which
//! discards the exceptions of handlers that were exited by a nested throw.

use std::sync::Arc;

use tracing::debug;

use crate::{
    engine::{
        interpreter::{Flow, StepContext},
        result::Outcome,
        state::{ExecutionState, PendingException, Status, TryRegion},
    },
    ir::{CatchClause, Type},
    memory::Value,
    Result,
};

/// Opens a protected region in the innermost frame.
pub(crate) fn try_begin(state: &mut ExecutionState, handlers: &[CatchClause]) -> Result<()> {
    let frame = state.frame_mut()?;
    let caught_depth = frame.caught.len();
    frame.try_regions.push(TryRegion {
        handlers: handlers.into(),
        caught_depth,
    });
    Ok(())
}

/// Closes the innermost protected region.
///
/// # Errors
///
/// [`crate::Error::Malformed`] if no region is open.
pub(crate) fn try_end(state: &mut ExecutionState) -> Result<()> {
    state
        .frame_mut()?
        .try_regions
        .pop()
        .map(|_| ())
        .ok_or_else(|| malformed_error!("end of a protected region that was never entered"))
}

/// Leaves the innermost handler.
///
/// # Errors
///
/// [`crate::Error::Malformed`] outside a handler.
pub(crate) fn catch_end(state: &mut ExecutionState) -> Result<()> {
    state
        .frame_mut()?
        .caught
        .pop()
        .map(|_| ())
        .ok_or_else(|| malformed_error!("end of a handler that is not running"))
}

/// Raises an exception.
pub(crate) fn throw(state: &mut ExecutionState, ty: Type, payload: Value) {
    debug!(state = state.id, %ty, %payload, "throw");
    state.status = Status::Unwinding(PendingException { ty, payload });
}

/// Raises the exception of the innermost running handler again.
///
/// # Errors
///
/// [`crate::Error::Malformed`] outside a handler.
pub(crate) fn rethrow(state: &mut ExecutionState) -> Result<()> {
    let exception = state
        .frame_mut()?
        .caught
        .pop()
        .ok_or_else(|| malformed_error!("rethrow outside of a handler"))?;
    debug!(state = state.id, ty = %exception.ty, "rethrow");
    state.status = Status::Unwinding(exception);
    Ok(())
}

/// Performs one unwinding action.
///
/// # Errors
///
/// [`crate::Error::Malformed`] for a handler block that does not exist.
pub(crate) fn unwind(state: &mut ExecutionState, ctx: &StepContext<'_>) -> Result<Flow> {
    let Status::Unwinding(exception) = &state.status else {
        return Ok(Flow::Continue);
    };
    let exception = exception.clone();

    let frame = state.frame_mut()?;
    while let Some(region) = frame.try_regions.pop() {
        let Some(clause) = region
            .handlers
            .iter()
            .find(|clause| clause.filter.matches(&exception.ty))
        else {
            continue;
        };
        let body = Arc::clone(&frame.body);
        let handler = body.block(clause.handler).ok_or_else(|| {
            malformed_error!("handler {} missing from {}", clause.handler, body.name)
        })?;
        debug!(function = %body.name, handler = %clause.handler, ty = %exception.ty, "exception caught");

        frame.caught.truncate(region.caught_depth);
        if let Some(binding) = clause.binding {
            frame.locals.insert(binding, exception.payload.clone());
        }
        frame.caught.push(exception);
        frame.previous_block = Some(frame.block);
        frame.block = clause.handler;
        frame.index = handler.phi_count();
        let function = frame.function;
        state.status = Status::Normal;
        if ctx.config.record_path {
            state.record_block(function, clause.handler);
        }
        return Ok(Flow::Continue);
    }

    let frame = state
        .stack
        .pop()
        .ok_or_else(|| malformed_error!("unwinding with no active frame"))?;
    for id in &frame.allocas {
        state.memory.release(*id);
    }
    if state.stack.is_empty() {
        debug!(state = state.id, ty = %exception.ty, "exception escaped the entry function");
        return Ok(Flow::Finish(Outcome::Uncaught {
            ty: exception.ty,
            payload: exception.payload,
        }));
    }
    debug!(function = %frame.body.name, ty = %exception.ty, "exception propagates to caller");
    Ok(Flow::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        engine::{interpreter::step, ExplorationConfig, Frame, Successor},
        ir::{CatchFilter, FunctionBuilder, ModuleBuilder, Operand},
        project::Project,
    };

    fn run(project: &Project, function: &str) -> Vec<Outcome> {
        let config = ExplorationConfig::default();
        let (id, body) = project.defined(function).unwrap();
        let mut state = ExecutionState::new(
            project.image().memory.clone(),
            project.image().symbols.clone(),
        );
        state
            .stack
            .push(Frame::new(id, Arc::clone(body), Vec::new(), None, None));
        let ctx = StepContext {
            project,
            config: &config,
        };
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

    /// `thrower` throws `payload` as `ty`.
    fn thrower(ty: Type, payload: i32) -> crate::ir::Function {
        let mut f = FunctionBuilder::new("thrower", vec![], Type::Void);
        f.throw(Operand::i32(payload), ty);
        f.finish().unwrap()
    }

    #[test]
    fn test_caught_in_caller() {
        // try { thrower(); return 0; } catch (int e) { return e; }
        let mut main = FunctionBuilder::new("main", vec![], Type::i32());
        let handler = main.block("handler");
        let (clause, payload) = main.catch_clause(CatchFilter::Type(Type::i32()), handler);
        main.try_begin(vec![clause]);
        main.call_void(Operand::function("thrower"), vec![]);
        main.try_end();
        main.ret(Operand::i32(0));
        main.position_at(handler);
        main.catch_end();
        main.ret(payload);
        let module = ModuleBuilder::new("m")
            .function(thrower(Type::i32(), 9))
            .function(main.finish().unwrap())
            .build();
        let project = Project::link(vec![module]).unwrap();
        let outcomes = run(&project, "main");
        assert!(matches!(&outcomes[..], [Outcome::Returned(Some(v))] if v.as_u64() == Some(9)));
    }

    #[test]
    fn test_unmatched_filter_escapes() {
        let mut main = FunctionBuilder::new("main", vec![], Type::i32());
        let handler = main.block("handler");
        let (clause, _) = main.catch_clause(CatchFilter::Type(Type::i64()), handler);
        main.try_begin(vec![clause]);
        main.call_void(Operand::function("thrower"), vec![]);
        main.try_end();
        main.ret(Operand::i32(0));
        main.position_at(handler);
        main.catch_end();
        main.ret(Operand::i32(1));
        let module = ModuleBuilder::new("m")
            .function(thrower(Type::i32(), 4))
            .function(main.finish().unwrap())
            .build();
        let project = Project::link(vec![module]).unwrap();
        let outcomes = run(&project, "main");
        assert!(matches!(
            &outcomes[..],
            [Outcome::Uncaught { ty, payload }] if *ty == Type::i32() && payload.as_u64() == Some(4)
        ));
    }

    #[test]
    fn test_rethrow_reaches_outer_region() {
        // try { try { throw 3; } catch (...) { throw; } } catch (int e) { return e + 0; }
        let mut main = FunctionBuilder::new("main", vec![], Type::i32());
        let inner = main.block("inner");
        let outer = main.block("outer");
        let (outer_clause, payload) = main.catch_clause(CatchFilter::Type(Type::i32()), outer);
        main.try_begin(vec![outer_clause]);
        let (inner_clause, _) = main.catch_clause(CatchFilter::Any, inner);
        main.try_begin(vec![inner_clause]);
        main.throw(Operand::i32(3), Type::i32());
        main.position_at(inner);
        main.rethrow();
        main.position_at(outer);
        main.catch_end();
        main.ret(payload);
        let module = ModuleBuilder::new("m").function(main.finish().unwrap()).build();
        let project = Project::link(vec![module]).unwrap();
        let outcomes = run(&project, "main");
        assert!(matches!(&outcomes[..], [Outcome::Returned(Some(v))] if v.as_u64() == Some(3)));
    }

    #[test]
    fn test_region_bookkeeping_errors() {
        let mut state = ExecutionState::new(
            crate::memory::Memory::new(),
            crate::symbolic::SymbolGenerator::new(),
        );
        assert!(try_end(&mut state).is_err());
        assert!(rethrow(&mut state).is_err());
    }
}
