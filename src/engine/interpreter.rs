//! The step function.
//!
//! [`step`] consumes one instruction (or one unwinding step) of a state and returns its
//! successors. It is pure with respect to the rest of the engine: it never consults the
//! solver, and constraints it adds only mark the successor for a feasibility check by the
//! explorer.
//!
//! # Architecture
//!
//! ```text
//! ExecutionState ──► step ──┬─► Status::Unwinding ──► exception::unwind
//!                           ├─► instruction ──► memory / dispatch / exception
//!                           └─► terminator  ──► enter_block (phis, loop bounds) / ret
//! ```
//!
//! Forks are produced at:
//!
//! - symbolic conditional branches and switches
//! - divisors that may be zero (a fault successor)
//! - symbolic-offset accesses that may leave their object, under
//!   [`OutOfBoundsPolicy::Terminate`] (a fault successor)
//! - [`Value::Choice`] operands, one successor per alternative
//!
//! Memory faults raised anywhere in an instruction end the path with [`Outcome::Fault`];
//! every other error aborts the exploration.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::{
    engine::{
        config::{ExplorationConfig, OutOfBoundsPolicy},
        dispatch, exception,
        result::{Bound, Fault, Outcome},
        state::{ExecutionState, Status},
    },
    ir::{
        BinaryOp, BlockId, CastOp, CompareOp, Instruction, LocalId, Operand, Terminator, Type,
    },
    memory::{element_offset, Fill, MemoryFault, ObjectKind, Pointer, Value, OFFSET_BITS},
    project::Project,
    symbolic::{SymbolicExpr, SymbolicOp},
    Error, Result,
};

/// Read-only inputs of the step function.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    /// The linked program
    pub project: &'a Project,
    /// Active configuration
    pub config: &'a ExplorationConfig,
}

/// A state produced by one step.
#[derive(Debug, Clone)]
pub enum Successor {
    /// The path continues
    Active(ExecutionState),
    /// The path ended; the explorer turns it into a record once it is known to be feasible
    Terminal {
        /// Final state
        state: ExecutionState,
        /// How it ended
        outcome: Outcome,
    },
}

/// What happens to the stepped state itself.
#[derive(Debug)]
pub(crate) enum Flow {
    /// It continues
    Continue,
    /// It ends
    Finish(Outcome),
    /// It was replaced by forks
    Replaced,
}

/// Executes one step of `state`.
///
/// # Arguments
///
/// * `state` - The state to advance; consumed
/// * `ctx` - Project and configuration
///
/// # Returns
///
/// Zero or more successors. Infeasible successors are not filtered here; they carry
/// [`ExecutionState::infeasible`] or [`ExecutionState::pending_check`] for the explorer.
///
/// # Errors
///
/// Malformed or unsupported IR, hook failures, and unresolved externals. Memory faults are
/// not errors; they become [`Outcome::Fault`] successors.
pub fn step(mut state: ExecutionState, ctx: &StepContext<'_>) -> Result<Vec<Successor>> {
    if state.steps >= ctx.config.max_steps_per_path {
        return Ok(vec![Successor::Terminal {
            state,
            outcome: Outcome::BoundExceeded(Bound::Steps),
        }]);
    }
    state.steps += 1;

    let mut forks = Vec::new();
    let result = if matches!(state.status, Status::Unwinding(_)) {
        exception::unwind(&mut state, ctx)
    } else {
        execute_next(&mut state, ctx, &mut forks)
    };
    let flow = match result {
        Ok(flow) => flow,
        Err(Error::Memory(fault)) => {
            debug!(state = state.id, %fault, "memory fault");
            Flow::Finish(Outcome::Fault(Fault::Memory(fault)))
        }
        Err(error) => return Err(error),
    };
    match flow {
        Flow::Continue => forks.push(Successor::Active(state)),
        Flow::Finish(outcome) => forks.push(Successor::Terminal { state, outcome }),
        Flow::Replaced => {}
    }
    Ok(forks)
}

fn execute_next(
    state: &mut ExecutionState,
    ctx: &StepContext<'_>,
    forks: &mut Vec<Successor>,
) -> Result<Flow> {
    let frame = state.frame()?;
    let body = Arc::clone(&frame.body);
    let (block_id, index) = (frame.block, frame.index);
    let block = body
        .block(block_id)
        .ok_or_else(|| malformed_error!("missing block {} in {}", block_id, body.name))?;

    if let Some(instruction) = block.instructions.get(index) {
        trace!(function = %body.name, block = %block_id, index, %instruction, "step");
        let operands = match instruction {
            Instruction::Select { cond, .. } => vec![cond],
            Instruction::Phi { .. } => Vec::new(),
            other => other.operands(),
        };
        if fork_on_choice(state, &operands, forks)? {
            return Ok(Flow::Replaced);
        }
        ctx.config.callbacks.on_instruction(instruction, state)?;
        execute(state, instruction, ctx, forks)
    } else {
        trace!(function = %body.name, block = %block_id, terminator = %block.terminator, "step");
        if fork_on_choice(state, &block.terminator.operands(), forks)? {
            return Ok(Flow::Replaced);
        }
        ctx.config.callbacks.on_terminator(&block.terminator, state)?;
        terminate(state, &block.terminator, ctx, forks)
    }
}

/// Replaces `state` by one fork per alternative of the first choice operand.
///
/// Each fork assumes the alternative's guard, rebinds the local to it, and re-executes the
/// same instruction.
fn fork_on_choice(
    state: &mut ExecutionState,
    operands: &[&Operand],
    forks: &mut Vec<Successor>,
) -> Result<bool> {
    for operand in operands {
        let Operand::Local(local) = operand else {
            continue;
        };
        let Some(Value::Choice(alternatives)) = state.frame()?.locals.get(local).cloned() else {
            continue;
        };
        debug!(state = state.id, %local, alternatives = alternatives.len(), "forking on choice");
        for (guard, value) in alternatives.iter() {
            let mut fork = state.clone();
            fork.assume(guard.clone());
            if fork.infeasible {
                continue;
            }
            fork.bind(*local, value.clone())?;
            forks.push(Successor::Active(fork));
        }
        return Ok(true);
    }
    Ok(false)
}

fn advance(state: &mut ExecutionState) -> Result<Flow> {
    state.frame_mut()?.index += 1;
    Ok(Flow::Continue)
}

fn execute(
    state: &mut ExecutionState,
    instruction: &Instruction,
    ctx: &StepContext<'_>,
    forks: &mut Vec<Successor>,
) -> Result<Flow> {
    let project = ctx.project;
    match instruction {
        Instruction::Binary { dest, op, lhs, rhs } => {
            let lhs = state.value(lhs, project)?;
            let rhs = state.value(rhs, project)?;
            match binary(state, *op, lhs, rhs, forks)? {
                Some(value) => state.bind(*dest, value)?,
                None => return Ok(Flow::Finish(Outcome::Fault(Fault::DivisionByZero))),
            }
            advance(state)
        }
        Instruction::Compare { dest, op, lhs, rhs } => {
            let lhs = state.value(lhs, project)?;
            let rhs = state.value(rhs, project)?;
            state.bind(*dest, compare(*op, lhs, rhs)?)?;
            advance(state)
        }
        Instruction::Cast { dest, op, value, to } => {
            let value = state.value(value, project)?;
            state.bind(*dest, cast(*op, value, to)?)?;
            advance(state)
        }
        Instruction::Select {
            dest,
            cond,
            then,
            otherwise,
        } => {
            let cond = state.value(cond, project)?;
            let then = state.value(then, project)?;
            let otherwise = state.value(otherwise, project)?;
            state.bind(*dest, select(cond, then, otherwise)?)?;
            advance(state)
        }
        Instruction::Phi { dest, .. } => Err(malformed_error!(
            "phi {} executed outside of block entry",
            dest
        )),
        Instruction::Alloca { dest, ty } => {
            let size = ty.size()?;
            let frame = state.frame()?;
            let name = format!("{}:{}", frame.body.name, dest);
            let id = state
                .memory
                .allocate(ObjectKind::Stack, name.as_str(), size, Fill::Uninit);
            state.frame_mut()?.allocas.push(id);
            state.bind(*dest, Value::Pointer(Pointer::to_object(id)))?;
            advance(state)
        }
        Instruction::Load { dest, ty, ptr } => {
            let pointer = expect_pointer(state.value(ptr, project)?)?;
            if let Some(outcome) = guard_access(state, &pointer, ty.size()?, ctx, forks)? {
                return Ok(Flow::Finish(outcome));
            }
            let value = match state.memory.load(&pointer, ty, &mut state.symbols) {
                Ok(value) => value,
                Err(Error::Memory(fault @ MemoryFault::OutOfBounds { .. }))
                    if ctx.config.out_of_bounds == OutOfBoundsPolicy::Symbolic =>
                {
                    let Some(value) = fresh_value(state, ty) else {
                        return Err(fault.into());
                    };
                    debug!(state = state.id, %fault, "out-of-bounds read produced a fresh value");
                    value
                }
                Err(error) => return Err(error),
            };
            state.bind(*dest, value)?;
            advance(state)
        }
        Instruction::Store { ptr, value } => {
            let pointer = expect_pointer(state.value(ptr, project)?)?;
            if let Operand::Const(constant) = value {
                let ty = constant.ty();
                if ty.is_aggregate() {
                    if let Some(outcome) = guard_access(state, &pointer, ty.size()?, ctx, forks)? {
                        return Ok(Flow::Finish(outcome));
                    }
                    let result =
                        state
                            .memory
                            .write_constant(&pointer, constant, project, &mut state.symbols);
                    tolerate_store(state, result, ctx)?;
                    return advance(state);
                }
            }
            let value = state.value(value, project)?;
            if let Some(outcome) = guard_access(state, &pointer, value.byte_size(), ctx, forks)? {
                return Ok(Flow::Finish(outcome));
            }
            let result = state.memory.store(&pointer, &value, &mut state.symbols);
            tolerate_store(state, result, ctx)?;
            advance(state)
        }
        Instruction::AtomicRmw {
            dest,
            op,
            ty,
            ptr,
            value,
        } => {
            let pointer = expect_pointer(state.value(ptr, project)?)?;
            let Type::Int { signed, .. } = ty else {
                return Err(malformed_error!("atomicrmw on {}", ty));
            };
            if let Some(outcome) = guard_access(state, &pointer, ty.size()?, ctx, forks)? {
                return Ok(Flow::Finish(outcome));
            }
            let old = expect_int(state.memory.load(&pointer, ty, &mut state.symbols)?)?;
            let operand = expect_int(state.value(value, project)?)?;
            same_width(&old, &operand)?;
            trace!(state = state.id, %op, "atomic read-modify-write");
            let updated = Value::int(op.apply(old.clone(), operand), *signed);
            state.memory.store(&pointer, &updated, &mut state.symbols)?;
            state.bind(*dest, Value::int(old, *signed))?;
            advance(state)
        }
        Instruction::ElementPtr {
            dest,
            base,
            ty,
            indices,
        } => {
            let base = expect_pointer(state.value(base, project)?)?;
            let mut path = Vec::with_capacity(indices.len());
            for index in indices {
                let index = expect_int(state.value(index, project)?)?;
                path.push(SymbolicExpr::resize(index, OFFSET_BITS, true));
            }
            let offset = element_offset(ty, &path)?;
            state.bind(*dest, Value::Pointer(base.offset_by(&offset)))?;
            advance(state)
        }
        Instruction::ExtractElement {
            dest,
            vector,
            index,
        } => {
            let (elements, signed) = expect_vector(state.value(vector, project)?)?;
            let index = expect_int(state.value(index, project)?)?;
            let lane = match index.as_constant() {
                Some(i) => elements
                    .get(i as usize)
                    .cloned()
                    .ok_or_else(|| malformed_error!("lane {} of a {}-lane vector", i, elements.len()))?,
                None => {
                    let mut lanes = elements.iter().enumerate().rev();
                    let (_, last) = lanes
                        .next()
                        .ok_or_else(|| malformed_error!("extract from an empty vector"))?;
                    lanes.fold(last.clone(), |acc, (i, lane)| {
                        let hit = index.equals(&SymbolicExpr::constant(i as u64, index.width()));
                        SymbolicExpr::ite(hit, lane.clone(), acc)
                    })
                }
            };
            state.bind(*dest, Value::int(lane, signed))?;
            advance(state)
        }
        Instruction::InsertElement {
            dest,
            vector,
            value,
            index,
        } => {
            let (mut elements, signed) = expect_vector(state.value(vector, project)?)?;
            let value = expect_int(state.value(value, project)?)?;
            let index = expect_int(state.value(index, project)?)?;
            match index.as_constant() {
                Some(i) => {
                    let lanes = elements.len();
                    let lane = elements.get_mut(i as usize).ok_or_else(|| {
                        malformed_error!("lane {} of a {}-lane vector", i, lanes)
                    })?;
                    *lane = value;
                }
                None => {
                    for (i, lane) in elements.iter_mut().enumerate() {
                        let hit = index.equals(&SymbolicExpr::constant(i as u64, index.width()));
                        *lane = SymbolicExpr::ite(hit, value.clone(), lane.clone());
                    }
                }
            }
            state.bind(*dest, Value::Vector { elements, signed })?;
            advance(state)
        }
        Instruction::Call { dest, callee, args } => dispatch::call(state, *dest, callee, args, ctx),
        Instruction::TryBegin { handlers } => {
            exception::try_begin(state, handlers)?;
            advance(state)
        }
        Instruction::TryEnd => {
            exception::try_end(state)?;
            advance(state)
        }
        Instruction::CatchEnd => {
            exception::catch_end(state)?;
            advance(state)
        }
    }
}

fn terminate(
    state: &mut ExecutionState,
    terminator: &Terminator,
    ctx: &StepContext<'_>,
    forks: &mut Vec<Successor>,
) -> Result<Flow> {
    let project = ctx.project;
    match terminator {
        Terminator::Ret(value) => {
            let value = value
                .as_ref()
                .map(|v| state.value(v, project))
                .transpose()?;
            dispatch::ret(state, value)
        }
        Terminator::Br(target) => enter_block(state, *target, ctx),
        Terminator::CondBr {
            cond,
            then,
            otherwise,
        } => {
            let cond = truthy(expect_int(state.value(cond, project)?)?);
            if let Some(c) = cond.as_constant() {
                return enter_block(state, if c != 0 { *then } else { *otherwise }, ctx);
            }
            debug!(state = state.id, "forking on branch");
            let mut taken = state.clone();
            taken.assume(cond.clone());
            branch_to(taken, *then, ctx, forks)?;
            state.assume(cond.logical_not());
            enter_block(state, *otherwise, ctx)
        }
        Terminator::Switch {
            value,
            cases,
            default,
        } => {
            let value = expect_int(state.value(value, project)?)?;
            let width = value.width();
            if let Some(v) = value.as_constant() {
                let target = cases
                    .iter()
                    .find(|(case, _)| SymbolicExpr::from_i64(*case, width).as_constant() == Some(v))
                    .map_or(*default, |(_, block)| *block);
                return enter_block(state, target, ctx);
            }
            debug!(state = state.id, cases = cases.len(), "forking on switch");
            for (case, target) in cases {
                let constant = SymbolicExpr::from_i64(*case, width);
                let mut fork = state.clone();
                fork.assume(value.equals(&constant));
                branch_to(fork, *target, ctx, forks)?;
                state.assume(value.not_equals(&constant));
            }
            enter_block(state, *default, ctx)
        }
        Terminator::Throw { value, ty } => {
            let payload = state.value(value, project)?;
            exception::throw(state, ty.clone(), payload);
            Ok(Flow::Continue)
        }
        Terminator::Rethrow => {
            exception::rethrow(state)?;
            Ok(Flow::Continue)
        }
        Terminator::Unreachable => Ok(Flow::Finish(Outcome::Fault(Fault::Unreachable))),
    }
}

/// Moves `fork` into `target` and queues it.
fn branch_to(
    mut fork: ExecutionState,
    target: BlockId,
    ctx: &StepContext<'_>,
    forks: &mut Vec<Successor>,
) -> Result<()> {
    if fork.infeasible {
        return Ok(());
    }
    match enter_block(&mut fork, target, ctx)? {
        Flow::Continue => forks.push(Successor::Active(fork)),
        Flow::Finish(outcome) => forks.push(Successor::Terminal {
            state: fork,
            outcome,
        }),
        Flow::Replaced => {}
    }
    Ok(())
}

/// Transfers control to `target` in the current frame.
///
/// Counts back edges against the loop bound, resets the count of a loop header entered from
/// outside the loop, and evaluates the leading phis of `target` simultaneously.
///
/// # Errors
///
/// [`Error::Malformed`] for a missing block or a phi without a value for the incoming edge.
pub(crate) fn enter_block(
    state: &mut ExecutionState,
    target: BlockId,
    ctx: &StepContext<'_>,
) -> Result<Flow> {
    let frame = state.frame_mut()?;
    let from = frame.block;
    let function = frame.function;
    if let Some(loops) = ctx.project.loops(function) {
        if loops.is_back_edge(from, target) {
            let count = frame.loop_counts.entry(target).or_insert(0);
            *count += 1;
            if *count > ctx.config.loop_bound {
                debug!(%function, header = %target, "loop bound exceeded");
                return Ok(Flow::Finish(Outcome::BoundExceeded(Bound::Loop)));
            }
        } else if loops.is_header(target) {
            frame.loop_counts.remove(&target);
        }
    }
    let body = Arc::clone(&frame.body);
    let block = body
        .block(target)
        .ok_or_else(|| malformed_error!("branch to missing block {} in {}", target, body.name))?;

    let phi_count = block.phi_count();
    let mut incoming: Vec<(LocalId, Value)> = Vec::with_capacity(phi_count);
    for instruction in &block.instructions[..phi_count] {
        let Instruction::Phi { dest, incoming: edges } = instruction else {
            continue;
        };
        let operand = edges
            .iter()
            .find(|(predecessor, _)| *predecessor == from)
            .map(|(_, operand)| operand)
            .ok_or_else(|| malformed_error!("phi {} has no value for edge from {}", dest, from))?;
        incoming.push((*dest, state.value(operand, ctx.project)?));
    }

    let frame = state.frame_mut()?;
    for (dest, value) in incoming {
        frame.locals.insert(dest, value);
    }
    frame.previous_block = Some(from);
    frame.block = target;
    frame.index = phi_count;
    if ctx.config.record_path {
        state.record_block(function, target);
    }
    Ok(Flow::Continue)
}

/// Forks a terminal successor under `bad` and continues `state` under its negation.
///
/// Returns the outcome when `bad` always holds, in which case nothing was forked.
fn split_fault(
    state: &mut ExecutionState,
    bad: SymbolicExpr,
    outcome: Outcome,
    forks: &mut Vec<Successor>,
) -> Option<Outcome> {
    if bad.is_false() {
        return None;
    }
    if bad.is_true() {
        return Some(outcome);
    }
    let mut fault = state.clone();
    fault.assume(bad.clone());
    forks.push(Successor::Terminal {
        state: fault,
        outcome,
    });
    state.assume(bad.logical_not());
    None
}

/// Forks off the out-of-bounds continuation of a symbolic-offset access.
fn guard_access(
    state: &mut ExecutionState,
    pointer: &Pointer,
    size: u64,
    ctx: &StepContext<'_>,
    forks: &mut Vec<Successor>,
) -> Result<Option<Outcome>> {
    if ctx.config.out_of_bounds == OutOfBoundsPolicy::Symbolic || pointer.concrete_offset().is_some()
    {
        return Ok(None);
    }
    let inside = state.memory.in_bounds(pointer, size)?;
    let (object, object_size) = pointer
        .object()
        .and_then(|id| state.memory.object(id))
        .map_or_else(|| (String::from("?"), 0), |o| (o.name.to_string(), o.size));
    let fault = MemoryFault::OutOfBounds {
        object,
        offset: -1,
        size,
        object_size,
    };
    Ok(split_fault(
        state,
        inside.logical_not(),
        Outcome::Fault(Fault::Memory(fault)),
        forks,
    ))
}

/// Drops out-of-bounds store faults under the symbolic policy.
fn tolerate_store(state: &ExecutionState, result: Result<()>, ctx: &StepContext<'_>) -> Result<()> {
    match result {
        Err(Error::Memory(fault @ MemoryFault::OutOfBounds { .. }))
            if ctx.config.out_of_bounds == OutOfBoundsPolicy::Symbolic =>
        {
            debug!(state = state.id, %fault, "dropped out-of-bounds store");
            Ok(())
        }
        other => other,
    }
}

fn fresh_value(state: &mut ExecutionState, ty: &Type) -> Option<Value> {
    match ty {
        Type::Int { bits, signed } => Some(Value::int(state.symbols.fresh("oob_read", *bits), *signed)),
        Type::Vector { element, len } => {
            let bits = element.bits()?;
            Some(Value::Vector {
                elements: (0..*len).map(|_| state.symbols.fresh("oob_read", bits)).collect(),
                signed: element.is_signed(),
            })
        }
        _ => None,
    }
}

fn expect_int(value: Value) -> Result<SymbolicExpr> {
    match value {
        Value::Int { expr, .. } => Ok(expr),
        other => Err(malformed_error!("expected an integer, found {}", other)),
    }
}

fn expect_vector(value: Value) -> Result<(Vec<SymbolicExpr>, bool)> {
    match value {
        Value::Vector { elements, signed } => Ok((elements, signed)),
        other => Err(malformed_error!("expected a vector, found {}", other)),
    }
}

/// Pointers, and the integer constant zero as null.
fn expect_pointer(value: Value) -> Result<Pointer> {
    match value {
        Value::Pointer(pointer) => Ok(pointer),
        Value::Int { expr, .. } if expr.as_constant() == Some(0) => Ok(Pointer::null()),
        other => Err(malformed_error!("expected a pointer, found {}", other)),
    }
}

/// A branch condition as a 1-bit expression.
fn truthy(expr: SymbolicExpr) -> SymbolicExpr {
    if expr.width() == 1 {
        expr
    } else {
        expr.not_equals(&SymbolicExpr::constant(0, expr.width()))
    }
}

fn is_zero(expr: &SymbolicExpr) -> SymbolicExpr {
    expr.equals(&SymbolicExpr::constant(0, expr.width()))
}

fn same_width(lhs: &SymbolicExpr, rhs: &SymbolicExpr) -> Result<()> {
    if lhs.width() == rhs.width() {
        Ok(())
    } else {
        Err(malformed_error!(
            "operand widths differ: {} and {}",
            lhs.width(),
            rhs.width()
        ))
    }
}

/// Integer, vector and pointer arithmetic; `None` if the divisor is zero on every path.
fn binary(
    state: &mut ExecutionState,
    op: BinaryOp,
    lhs: Value,
    rhs: Value,
    forks: &mut Vec<Successor>,
) -> Result<Option<Value>> {
    let division_fault = || Outcome::Fault(Fault::DivisionByZero);
    match (lhs, rhs) {
        (Value::Int { expr: a, signed }, Value::Int { expr: b, .. }) => {
            same_width(&a, &b)?;
            if op.is_division() && split_fault(state, is_zero(&b), division_fault(), forks).is_some() {
                return Ok(None);
            }
            Ok(Some(Value::int(
                SymbolicExpr::binary(op.to_symbolic(signed), a, b),
                signed,
            )))
        }
        (
            Value::Vector {
                elements: a,
                signed,
            },
            Value::Vector { elements: b, .. },
        ) => {
            if a.len() != b.len() {
                return Err(malformed_error!("vector lengths differ: {} and {}", a.len(), b.len()));
            }
            if op.is_division() {
                let any_zero = b
                    .iter()
                    .fold(SymbolicExpr::truth(false), |acc, lane| acc.logical_or(&is_zero(lane)));
                if split_fault(state, any_zero, division_fault(), forks).is_some() {
                    return Ok(None);
                }
            }
            let mut elements = Vec::with_capacity(a.len());
            for (x, y) in a.into_iter().zip(b) {
                same_width(&x, &y)?;
                elements.push(SymbolicExpr::binary(op.to_symbolic(signed), x, y));
            }
            Ok(Some(Value::Vector { elements, signed }))
        }
        (Value::Pointer(pointer), Value::Int { expr, signed })
            if matches!(op, BinaryOp::Add | BinaryOp::Sub) =>
        {
            let delta = SymbolicExpr::resize(expr, OFFSET_BITS, signed);
            let delta = if op == BinaryOp::Sub {
                SymbolicExpr::unary(SymbolicOp::Neg, delta)
            } else {
                delta
            };
            Ok(Some(Value::Pointer(pointer.offset_by(&delta))))
        }
        (Value::Int { expr, signed }, Value::Pointer(pointer)) if op == BinaryOp::Add => {
            let delta = SymbolicExpr::resize(expr, OFFSET_BITS, signed);
            Ok(Some(Value::Pointer(pointer.offset_by(&delta))))
        }
        (Value::Pointer(a), Value::Pointer(b)) if op == BinaryOp::Sub => {
            if a.target != b.target {
                return Err(unrelated(&a, &b));
            }
            Ok(Some(Value::int(
                SymbolicExpr::binary(SymbolicOp::Sub, a.offset, b.offset),
                true,
            )))
        }
        (lhs, rhs) => Err(malformed_error!("{} of {} and {}", op, lhs, rhs)),
    }
}

fn compare(op: CompareOp, lhs: Value, rhs: Value) -> Result<Value> {
    match (lhs, rhs) {
        (Value::Int { expr: a, signed }, Value::Int { expr: b, .. }) => {
            same_width(&a, &b)?;
            Ok(Value::bool(SymbolicExpr::binary(op.to_symbolic(signed), a, b)))
        }
        (
            Value::Vector {
                elements: a,
                signed,
            },
            Value::Vector { elements: b, .. },
        ) => {
            if a.len() != b.len() {
                return Err(malformed_error!("vector lengths differ: {} and {}", a.len(), b.len()));
            }
            let elements = a
                .into_iter()
                .zip(b)
                .map(|(x, y)| SymbolicExpr::binary(op.to_symbolic(signed), x, y))
                .collect();
            Ok(Value::Vector {
                elements,
                signed: false,
            })
        }
        (lhs, rhs) => {
            let a = expect_pointer(lhs)?;
            let b = expect_pointer(rhs)?;
            Ok(Value::bool(compare_pointers(op, &a, &b)?))
        }
    }
}

/// Pointers into one target compare by offset; pointers into distinct targets are unequal
/// and unordered.
fn compare_pointers(op: CompareOp, a: &Pointer, b: &Pointer) -> Result<SymbolicExpr> {
    if a.target == b.target {
        return Ok(SymbolicExpr::binary(
            op.to_symbolic(false),
            a.offset.clone(),
            b.offset.clone(),
        ));
    }
    match op {
        CompareOp::Eq => Ok(SymbolicExpr::truth(false)),
        CompareOp::Ne => Ok(SymbolicExpr::truth(true)),
        _ => Err(unrelated(a, b)),
    }
}

fn unrelated(a: &Pointer, b: &Pointer) -> Error {
    Error::Memory(MemoryFault::UnrelatedPointers(
        a.target.to_string(),
        b.target.to_string(),
    ))
}

fn cast_int(op: CastOp, expr: SymbolicExpr, signed: bool, bits: u32) -> Result<SymbolicExpr> {
    let from = expr.width();
    match op {
        CastOp::Trunc if bits <= from => Ok(SymbolicExpr::resize(expr, bits, false)),
        CastOp::ZExt if bits >= from => Ok(SymbolicExpr::resize(expr, bits, false)),
        CastOp::SExt if bits >= from => Ok(SymbolicExpr::resize(expr, bits, true)),
        CastOp::IntCast => Ok(SymbolicExpr::resize(expr, bits, signed)),
        CastOp::Bitcast if bits == from => Ok(expr),
        _ => Err(malformed_error!("{} from i{} to i{}", op, from, bits)),
    }
}

fn cast(op: CastOp, value: Value, to: &Type) -> Result<Value> {
    match (value, to) {
        (Value::Int { expr, signed }, Type::Int { bits, signed: to_signed }) => {
            Ok(Value::int(cast_int(op, expr, signed, *bits)?, *to_signed))
        }
        (Value::Pointer(pointer), Type::Ptr) => Ok(Value::Pointer(pointer)),
        (Value::Int { expr, .. }, Type::Ptr) => {
            if expr.as_constant() == Some(0) {
                Ok(Value::null())
            } else {
                Err(Error::Unsupported(format!("integer {expr} converted to a pointer")))
            }
        }
        (Value::Pointer(pointer), Type::Int { bits, signed }) => {
            if pointer.is_null() && pointer.offset.as_constant() == Some(0) {
                Ok(Value::from_u64(0, *bits, *signed))
            } else {
                Err(Error::Unsupported(format!("pointer {pointer} converted to an integer")))
            }
        }
        (Value::Vector { elements, signed }, Type::Vector { element, len })
            if elements.len() == *len as usize =>
        {
            let bits = element
                .bits()
                .ok_or_else(|| Error::MalformedType(format!("vector of {element}")))?;
            let elements = elements
                .into_iter()
                .map(|lane| cast_int(op, lane, signed, bits))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::Vector {
                elements,
                signed: element.is_signed(),
            })
        }
        (value, to) => Err(malformed_error!("cannot {} {} to {}", op, value, to)),
    }
}

fn select(cond: Value, then: Value, otherwise: Value) -> Result<Value> {
    match cond {
        Value::Int { expr, .. } => Ok(Value::select(&truthy(expr), then, otherwise)),
        Value::Vector {
            elements: conds, ..
        } => match (then, otherwise) {
            (
                Value::Vector {
                    elements: a,
                    signed,
                },
                Value::Vector { elements: b, .. },
            ) if a.len() == conds.len() && b.len() == conds.len() => Ok(Value::Vector {
                elements: conds
                    .into_iter()
                    .zip(a.into_iter().zip(b))
                    .map(|(c, (x, y))| SymbolicExpr::ite(truthy(c), x, y))
                    .collect(),
                signed,
            }),
            (then, otherwise) => Err(malformed_error!(
                "lane-wise select between {} and {}",
                then,
                otherwise
            )),
        },
        other => Err(malformed_error!("select on {}", other)),
    }
}
