//! Execution states and call frames.
//!
//! An [`ExecutionState`] is one path in progress. Forking is a plain `clone`: memory, the path
//! condition, and the locals of each frame are persistent `imbl` structures, so siblings share
//! everything neither has written since the fork.

use std::sync::Arc;

use imbl::{HashMap as ImHashMap, Vector as ImVector};
use rustc_hash::FxHashMap;

use crate::{
    engine::result::{Outcome, TerminalRecord},
    ir::{BlockId, CatchClause, Function, LocalId, Operand, Type},
    memory::{ConstantResolver, Memory, ObjectId, Value},
    project::FunctionId,
    symbolic::{SymbolGenerator, SymbolicExpr},
    Result,
};

/// Position of a call instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSite {
    /// Calling function
    pub function: FunctionId,
    /// Block holding the call
    pub block: BlockId,
    /// Instruction index within the block
    pub index: usize,
}

/// An exception in flight or being handled.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingException {
    /// Declared type, matched against catch filters
    pub ty: Type,
    /// Thrown value
    pub payload: Value,
}

/// Control status of a state.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Status {
    /// Executing instructions
    #[default]
    Normal,
    /// Searching for a handler
    Unwinding(PendingException),
}

/// An open protected region.
#[derive(Debug, Clone)]
pub struct TryRegion {
    /// Handlers, tried in order
    pub handlers: Arc<[CatchClause]>,
    /// Height of the frame's caught stack when the region was entered
    pub caught_depth: usize,
}

/// Activation record of one function call.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Function being executed
    pub function: FunctionId,
    /// Its body
    pub body: Arc<Function>,
    /// Current block
    pub block: BlockId,
    /// Index of the next instruction in the block; the terminator when past the end
    pub index: usize,
    /// Block control came from, for phi selection
    pub previous_block: Option<BlockId>,
    /// SSA bindings
    pub locals: ImHashMap<LocalId, Value>,
    /// Open protected regions, innermost last
    pub try_regions: Vec<TryRegion>,
    /// Exceptions whose handlers are running, innermost last
    pub caught: Vec<PendingException>,
    /// Back-edge traversals per loop header since the loop was entered
    pub loop_counts: FxHashMap<BlockId, u32>,
    /// Stack objects released on return
    pub allocas: Vec<ObjectId>,
    /// Caller local receiving the return value
    pub return_dest: Option<LocalId>,
    /// Call instruction that pushed this frame; `None` for the entry frame
    pub call_site: Option<CallSite>,
}

impl Frame {
    /// Creates a frame positioned at the entry block with parameters bound.
    #[must_use]
    pub fn new(
        function: FunctionId,
        body: Arc<Function>,
        args: Vec<Value>,
        return_dest: Option<LocalId>,
        call_site: Option<CallSite>,
    ) -> Self {
        let locals = args
            .into_iter()
            .enumerate()
            .map(|(i, value)| (Function::param_local(i), value))
            .collect();
        Frame {
            function,
            block: body.entry(),
            body,
            index: 0,
            previous_block: None,
            locals,
            try_regions: Vec::new(),
            caught: Vec::new(),
            loop_counts: FxHashMap::default(),
            allocas: Vec::new(),
            return_dest,
            call_site,
        }
    }
}

/// One path through the program.
#[derive(Debug, Clone)]
pub struct ExecutionState {
    /// Identifier assigned by the explorer
    pub id: u64,
    /// Call stack, innermost last
    pub stack: Vec<Frame>,
    /// Path condition
    pub path: ImVector<SymbolicExpr>,
    /// Memory
    pub memory: Memory,
    /// Control status
    pub status: Status,
    /// Fresh-symbol source
    pub symbols: SymbolGenerator,
    /// Visited blocks, when path recording is enabled
    pub trace: ImVector<(FunctionId, BlockId)>,
    /// A constraint was added since the last solver check
    pub pending_check: bool,
    /// A constraint folded to false
    pub infeasible: bool,
    /// Steps executed
    pub steps: u64,
}

impl ExecutionState {
    /// Creates a state with an empty stack.
    #[must_use]
    pub fn new(memory: Memory, symbols: SymbolGenerator) -> Self {
        ExecutionState {
            id: 0,
            stack: Vec::new(),
            path: ImVector::new(),
            memory,
            status: Status::Normal,
            symbols,
            trace: ImVector::new(),
            pending_check: false,
            infeasible: false,
            steps: 0,
        }
    }

    /// Conjoins `constraint` onto the path condition.
    ///
    /// Constant-true constraints are dropped and constant-false ones mark the state
    /// infeasible; anything else flags the state for a solver check.
    pub fn assume(&mut self, constraint: SymbolicExpr) {
        if constraint.is_true() {
            return;
        }
        if constraint.is_false() {
            self.infeasible = true;
            return;
        }
        self.path.push_back(constraint);
        self.pending_check = true;
    }

    /// The path condition as a slice-friendly vector.
    #[must_use]
    pub fn constraints(&self) -> Vec<SymbolicExpr> {
        self.path.iter().cloned().collect()
    }

    /// The innermost frame.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Malformed`] on an empty stack.
    pub fn frame(&self) -> Result<&Frame> {
        self.stack
            .last()
            .ok_or_else(|| malformed_error!("no active frame"))
    }

    /// The innermost frame, mutably.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Malformed`] on an empty stack.
    pub fn frame_mut(&mut self) -> Result<&mut Frame> {
        self.stack
            .last_mut()
            .ok_or_else(|| malformed_error!("no active frame"))
    }

    /// Evaluates an operand in the innermost frame.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Malformed`] for an unbound local; resolution errors for constants.
    pub fn value(&mut self, operand: &Operand, resolver: &dyn ConstantResolver) -> Result<Value> {
        match operand {
            Operand::Local(id) => self
                .stack
                .last()
                .and_then(|frame| frame.locals.get(id))
                .cloned()
                .ok_or_else(|| malformed_error!("read of unbound local {}", id)),
            Operand::Const(constant) => {
                self.memory
                    .constant_value(constant, resolver, &mut self.symbols)
            }
        }
    }

    /// Binds a local in the innermost frame.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Malformed`] on an empty stack.
    pub fn bind(&mut self, local: LocalId, value: Value) -> Result<()> {
        self.frame_mut()?.locals.insert(local, value);
        Ok(())
    }

    /// Appends a block to the trace.
    pub fn record_block(&mut self, function: FunctionId, block: BlockId) {
        self.trace.push_back((function, block));
    }

    /// Ends the path.
    #[must_use]
    pub fn into_record(self, outcome: Outcome) -> TerminalRecord {
        TerminalRecord {
            watch_hits: self.memory.watchpoints().hits().cloned().collect(),
            path_condition: self.path.into_iter().collect(),
            outcome,
            path: self.trace.into_iter().collect(),
            steps: self.steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::SymbolicOp;

    #[test]
    fn test_assume_folds_constants() {
        let mut state = ExecutionState::new(Memory::new(), SymbolGenerator::new());
        state.assume(SymbolicExpr::truth(true));
        assert!(state.path.is_empty());
        assert!(!state.pending_check);

        let x = SymbolicExpr::symbol("x", 32);
        state.assume(SymbolicExpr::binary(
            SymbolicOp::LtS,
            x,
            SymbolicExpr::constant(3, 32),
        ));
        assert_eq!(state.path.len(), 1);
        assert!(state.pending_check);

        state.assume(SymbolicExpr::truth(false));
        assert!(state.infeasible);
    }

    #[test]
    fn test_fork_is_independent() {
        let mut parent = ExecutionState::new(Memory::new(), SymbolGenerator::new());
        parent.assume(SymbolicExpr::symbol("c", 1));
        let mut child = parent.clone();
        child.assume(SymbolicExpr::symbol("d", 1));
        assert_eq!(parent.path.len(), 1);
        assert_eq!(child.path.len(), 2);
    }

    #[test]
    fn test_value_of_unbound_local_is_malformed() {
        let mut state = ExecutionState::new(Memory::new(), SymbolGenerator::new());
        let project = crate::project::Project::link(vec![]).unwrap();
        assert!(state.value(&Operand::Local(LocalId(0)), &project).is_err());
    }
}
