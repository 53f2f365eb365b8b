use thiserror::Error;

use crate::memory::MemoryFault;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Errors fall into two groups. Load-time errors are raised while linking modules and
/// evaluating global initializers, before any state exists; they are always fatal and no
/// partial result is produced. Exploration-time errors abort a query only when the IR itself
/// is inconsistent (an ill-typed operand, a call with the wrong number of arguments). Problems
/// that belong to a single path, such as an out-of-bounds access or a division by zero, are
/// never surfaced as errors: the explorer turns them into [`crate::engine::Outcome::Fault`]
/// records.
///
/// # Error Categories
///
/// ## Load-time Errors
/// - [`Error::UnresolvedSymbol`] - A declaration has no definition and no hook
/// - [`Error::DuplicateSymbol`] - Two modules define the same symbol
/// - [`Error::InitializerCycle`] - Global initializers depend on each other's values
/// - [`Error::MalformedType`] - A type has no valid memory layout
///
/// ## IR Errors
/// - [`Error::Malformed`] - Structurally invalid IR
/// - [`Error::Unsupported`] - Valid IR using a construct the engine does not model
/// - [`Error::UnknownFunction`] / [`Error::UnknownGlobal`] - Lookup of a missing symbol
///
/// ## Exploration Errors
/// - [`Error::Memory`] - A memory fault on the current path (converted to an outcome)
/// - [`Error::Solver`] - The constraint solver failed
/// - [`Error::Hook`] - A function hook rejected its arguments
///
/// # Examples
///
/// ```rust
/// use pathscope::{Error, project::Project, ir::Module};
///
/// let mut module = Module::new("main");
/// module.declare_function("missing");
/// match Project::link(vec![module]) {
///     Err(Error::UnresolvedSymbol { symbol, .. }) => assert_eq!(symbol, "missing"),
///     other => panic!("unexpected: {other:?}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The IR is structurally invalid.
    ///
    /// Carries the source location where the problem was detected.
    ///
    /// # Fields
    ///
    /// * `message` - Description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A type cannot be laid out in memory.
    ///
    /// Raised for zero-length aggregates, integer widths outside 1..=64 and attempts to
    /// store function or void types.
    #[error("Malformed type layout: {0}")]
    MalformedType(String),

    /// A declaration could not be resolved to any definition.
    #[error("Unresolved symbol '{symbol}' referenced from module '{module}'")]
    UnresolvedSymbol {
        /// The unresolved symbol name
        symbol: String,
        /// The module that referenced it
        module: String,
    },

    /// The same symbol is defined by more than one module.
    #[error("Duplicate definition of '{symbol}' in modules '{first}' and '{second}'")]
    DuplicateSymbol {
        /// The symbol defined twice
        symbol: String,
        /// Module holding the first definition
        first: String,
        /// Module holding the second definition
        second: String,
    },

    /// Global initializers form a value-dependency cycle.
    ///
    /// Address references between globals are always legal; this error is only raised
    /// when an initializer needs another global's content and that global (transitively)
    /// needs this one's content.
    #[error("Global initializer value cycle: {}", .0.join(" -> "))]
    InitializerCycle(Vec<String>),

    /// A function name was looked up but is not part of the linked project.
    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    /// A global name was looked up but is not part of the linked project.
    #[error("Unknown global '{0}'")]
    UnknownGlobal(String),

    /// The IR uses a construct the engine does not model.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// A memory access faulted on the current path.
    ///
    /// The interpreter converts this into a fault outcome for the affected path only.
    #[error("Memory fault: {0}")]
    Memory(MemoryFault),

    /// The constraint solver failed to answer a query.
    #[error("Solver error: {0}")]
    Solver(String),

    /// A function hook rejected its invocation.
    #[error("Hook '{name}' failed: {message}")]
    Hook {
        /// Name of the hooked function
        name: String,
        /// Description of the failure
        message: String,
    },
}

impl From<MemoryFault> for Error {
    fn from(fault: MemoryFault) -> Self {
        Error::Memory(fault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_macro_records_location() {
        let err = malformed_error!("bad block {}", 3);
        match err {
            Error::Malformed { message, file, .. } => {
                assert_eq!(message, "bad block 3");
                assert!(file.ends_with("error.rs"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_cycle_display() {
        let err = Error::InitializerCycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(
            err.to_string(),
            "Global initializer value cycle: a -> b -> a"
        );
    }
}
