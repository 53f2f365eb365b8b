//! Terminal records and exploration reports.

use std::fmt;

use strum::Display;
use thiserror::Error;

use crate::{
    engine::stats::ExplorationStats,
    ir::{BlockId, Type},
    memory::{MemoryFault, Value, WatchHit},
    project::FunctionId,
    solver::Model,
    symbolic::SymbolicExpr,
};

/// Exploration bound that truncated a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Bound {
    /// A loop header was re-entered more than `loop_bound` times
    Loop,
    /// One call site had more than `recursion_bound` active frames
    Recursion,
    /// The call stack reached `max_call_depth`
    CallDepth,
    /// The path executed `max_steps_per_path` steps
    Steps,
}

/// An error confined to one path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Invalid memory access
    #[error("{0}")]
    Memory(MemoryFault),
    /// Division or remainder by zero
    #[error("division by zero")]
    DivisionByZero,
    /// An `unreachable` terminator executed
    #[error("unreachable code executed")]
    Unreachable,
    /// Call through a null or data pointer
    #[error("call through a pointer that is not a function")]
    InvalidCallTarget,
}

/// How a path ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The entry function returned; `None` for void functions
    Returned(Option<Value>),
    /// An exception escaped the entry function
    Uncaught {
        /// Declared type of the exception
        ty: Type,
        /// Thrown value
        payload: Value,
    },
    /// The path was cut short by an exploration bound
    BoundExceeded(Bound),
    /// The path faulted
    Fault(Fault),
    /// `abort` or `exit` was called
    Aborted,
}

impl Outcome {
    /// Returns `true` for outcomes that represent completed program behavior rather than
    /// truncation or a fault.
    #[must_use]
    pub const fn is_genuine(&self) -> bool {
        matches!(
            self,
            Outcome::Returned(_) | Outcome::Uncaught { .. } | Outcome::Aborted
        )
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Returned(Some(value)) => write!(f, "return {value}"),
            Outcome::Returned(None) => write!(f, "return void"),
            Outcome::Uncaught { ty, payload } => write!(f, "uncaught {ty} {payload}"),
            Outcome::BoundExceeded(bound) => write!(f, "bound exceeded: {bound}"),
            Outcome::Fault(fault) => write!(f, "fault: {fault}"),
            Outcome::Aborted => write!(f, "aborted"),
        }
    }
}

/// One explored path and how it ended.
#[derive(Debug, Clone)]
pub struct TerminalRecord {
    /// Constraints on the inputs under which this path is taken
    pub path_condition: Vec<SymbolicExpr>,
    /// The ending
    pub outcome: Outcome,
    /// Visited blocks, if path recording is enabled
    pub path: Vec<(FunctionId, BlockId)>,
    /// Instructions executed
    pub steps: u64,
    /// Watchpoint hits along the path, oldest first
    pub watch_hits: Vec<WatchHit>,
}

impl TerminalRecord {
    /// The path condition as a single boolean expression.
    #[must_use]
    pub fn condition(&self) -> SymbolicExpr {
        SymbolicExpr::conjunction(&self.path_condition)
    }

    /// The returned value, for [`Outcome::Returned`] records.
    #[must_use]
    pub fn return_value(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Returned(value) => value.as_ref(),
            _ => None,
        }
    }
}

/// A path reaching the query target, with inputs that drive execution down it.
#[derive(Debug, Clone)]
pub struct Witness {
    /// The path
    pub record: TerminalRecord,
    /// Satisfying assignment of the path condition and the target constraint
    pub model: Model,
}

/// How an exploration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Completion {
    /// Every path was explored to a terminal record
    Complete,
    /// The cancellation token fired
    Cancelled,
    /// The query timeout elapsed
    TimedOut,
    /// The target was reached and exploration stopped early
    TargetFound,
}

/// An entry-function parameter as seeded into the initial state.
#[derive(Debug, Clone)]
pub struct Input {
    /// Parameter name
    pub name: String,
    /// Parameter type
    pub ty: Type,
    /// Bound value; integers are symbols named after the parameter unless concrete
    pub value: Value,
}

/// Everything one exploration found.
#[derive(Debug, Clone)]
pub struct Report {
    /// Entry function
    pub function: String,
    /// Entry parameters
    pub inputs: Vec<Input>,
    /// Terminal records, in discovery order for sequential runs
    pub records: Vec<TerminalRecord>,
    /// Target witness, if a target was set and reached
    pub witness: Option<Witness>,
    /// Counters
    pub stats: ExplorationStats,
    /// Why exploration ended
    pub completion: Completion,
    /// States still pending when exploration stopped early
    pub abandoned: u64,
}

impl Report {
    /// Returns `true` if every path was explored.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completion == Completion::Complete
    }

    /// Records of paths that returned normally.
    pub fn returned(&self) -> impl Iterator<Item = &TerminalRecord> {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Returned(_)))
    }

    /// Records of paths that ended with an uncaught exception.
    pub fn uncaught(&self) -> impl Iterator<Item = &TerminalRecord> {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Uncaught { .. }))
    }

    /// Records of paths cut short by a bound.
    pub fn bound_exceeded(&self) -> impl Iterator<Item = &TerminalRecord> {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::BoundExceeded(_)))
    }

    /// Records of paths that faulted.
    pub fn faults(&self) -> impl Iterator<Item = &TerminalRecord> {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Fault(_)))
    }

    /// Looks up an entry parameter by name.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<&Input> {
        self.inputs.iter().find(|i| i.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(outcome: Outcome) -> TerminalRecord {
        TerminalRecord {
            path_condition: Vec::new(),
            outcome,
            path: Vec::new(),
            steps: 0,
            watch_hits: Vec::new(),
        }
    }

    #[test]
    fn test_outcome_display() {
        let ret = Outcome::Returned(Some(Value::from_u64(7, 32, true)));
        assert_eq!(ret.to_string(), "return 7");
        assert_eq!(
            Outcome::BoundExceeded(Bound::Loop).to_string(),
            "bound exceeded: Loop"
        );
        assert_eq!(
            Outcome::Fault(Fault::DivisionByZero).to_string(),
            "fault: division by zero"
        );
    }

    #[test]
    fn test_report_filters() {
        let report = Report {
            function: "f".into(),
            inputs: Vec::new(),
            records: vec![
                record(Outcome::Returned(None)),
                record(Outcome::BoundExceeded(Bound::Recursion)),
                record(Outcome::Fault(Fault::Unreachable)),
            ],
            witness: None,
            stats: ExplorationStats::default(),
            completion: Completion::Complete,
            abandoned: 0,
        };
        assert_eq!(report.returned().count(), 1);
        assert_eq!(report.bound_exceeded().count(), 1);
        assert_eq!(report.faults().count(), 1);
        assert!(report.is_complete());
        assert!(!Outcome::Fault(Fault::Unreachable).is_genuine());
    }
}
