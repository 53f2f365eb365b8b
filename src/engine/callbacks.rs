//! Observer callbacks.
//!
//! Callbacks see every instruction and terminator just before it executes, together with
//! the state executing it. They cannot change the state; an error they return aborts the
//! exploration like any other engine error.

use std::{fmt, sync::Arc};

use crate::{
    engine::state::ExecutionState,
    ir::{Instruction, Terminator},
    Result,
};

/// Called before an instruction executes.
pub type InstructionCallback =
    Arc<dyn Fn(&Instruction, &ExecutionState) -> Result<()> + Send + Sync>;

/// Called before a terminator executes.
pub type TerminatorCallback = Arc<dyn Fn(&Terminator, &ExecutionState) -> Result<()> + Send + Sync>;

/// The callbacks of one exploration, run in the order they were added.
///
/// Callbacks are shared by all workers of a parallel run, so they must be `Send + Sync`.
#[derive(Clone, Default)]
pub struct Callbacks {
    instruction: Vec<InstructionCallback>,
    terminator: Vec<TerminatorCallback>,
}

impl Callbacks {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a callback run before every instruction.
    pub fn add_instruction_callback(
        &mut self,
        callback: impl Fn(&Instruction, &ExecutionState) -> Result<()> + Send + Sync + 'static,
    ) {
        self.instruction.push(Arc::new(callback));
    }

    /// Adds a callback run before every terminator.
    pub fn add_terminator_callback(
        &mut self,
        callback: impl Fn(&Terminator, &ExecutionState) -> Result<()> + Send + Sync + 'static,
    ) {
        self.terminator.push(Arc::new(callback));
    }

    /// Returns `true` if no callback is installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instruction.is_empty() && self.terminator.is_empty()
    }

    pub(crate) fn on_instruction(&self, instruction: &Instruction, state: &ExecutionState) -> Result<()> {
        self.instruction
            .iter()
            .try_for_each(|callback| callback(instruction, state))
    }

    pub(crate) fn on_terminator(&self, terminator: &Terminator, state: &ExecutionState) -> Result<()> {
        self.terminator
            .iter()
            .try_for_each(|callback| callback(terminator, state))
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("instruction", &self.instruction.len())
            .field("terminator", &self.terminator.len())
            .finish()
    }
}
