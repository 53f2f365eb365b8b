//! High-level questions answered by exploring a function.
//!
//! # Key Components
//!
//! - [`find_zero`] - Inputs under which a function returns zero
//! - [`possible_return_values`] - The set of values a function can return or throw
//!
//! # Examples
//!
//! ```rust
//! use pathscope::prelude::*;
//!
//! // int dec(int a) { return a - 3; }
//! let mut f = FunctionBuilder::new("dec", vec![Param::new("a", Type::i32())], Type::i32());
//! let r = f.binary(BinaryOp::Sub, f.param(0), Operand::i32(3));
//! f.ret(r);
//! let project = Project::link(vec![ModuleBuilder::new("m").function(f.finish()?).build()])?;
//!
//! let explorer = Explorer::with_config(&project, ExplorationConfig::default());
//! assert_eq!(find_zero(&explorer, "dec")?, Some(vec![SolutionValue::I32(3)]));
//! # Ok::<(), pathscope::Error>(())
//! ```

use std::{collections::BTreeSet, fmt};

use tracing::debug;

use crate::{
    engine::{ArgSpec, Explorer, Outcome, Query, Target, TerminalRecord},
    ir::Type,
    memory::{PointerTarget, Value},
    solver::{Model, SatResult, Solutions, Solver},
    symbolic::SymbolicExpr,
    Error, Result,
};

/// Address reported for the first pointer argument; later objects follow at this stride.
const ARGUMENT_ADDRESS_BASE: u64 = 0x1000;

/// A concrete argument value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SolutionValue {
    /// 8-bit integer (and narrower)
    I8(i8),
    /// 16-bit integer
    I16(i16),
    /// 32-bit integer
    I32(i32),
    /// 64-bit integer
    I64(i64),
    /// Pointer argument. Pointer arguments point to fresh objects, so this is a non-null
    /// placeholder address rather than a solved value.
    Ptr(u64),
}

impl SolutionValue {
    /// The integer value, sign-extended to 64 bits.
    #[must_use]
    pub const fn as_i64(self) -> Option<i64> {
        match self {
            SolutionValue::I8(v) => Some(v as i64),
            SolutionValue::I16(v) => Some(v as i64),
            SolutionValue::I32(v) => Some(v as i64),
            SolutionValue::I64(v) => Some(v),
            SolutionValue::Ptr(_) => None,
        }
    }

    /// The pointer placeholder.
    #[must_use]
    pub const fn as_ptr(self) -> Option<u64> {
        match self {
            SolutionValue::Ptr(address) => Some(address),
            _ => None,
        }
    }

    fn from_input(value: &Value, ty: &Type, model: &Model) -> Result<Self> {
        match (value, ty) {
            (Value::Int { expr, .. }, Type::Int { bits, .. }) => {
                let raw = model.eval(expr);
                Ok(match bits {
                    1..=8 => SolutionValue::I8(raw as u8 as i8),
                    9..=16 => SolutionValue::I16(raw as u16 as i16),
                    17..=32 => SolutionValue::I32(raw as u32 as i32),
                    _ => SolutionValue::I64(raw as i64),
                })
            }
            (Value::Pointer(pointer), _) => Ok(SolutionValue::Ptr(match pointer.target {
                PointerTarget::Null => 0,
                PointerTarget::Object(id) => ARGUMENT_ADDRESS_BASE * (u64::from(id.0) + 1),
                PointerTarget::Function(id) => ARGUMENT_ADDRESS_BASE * (u64::from(id.0) + 1),
            })),
            (value, ty) => Err(Error::Unsupported(format!(
                "argument {value} of type {ty} has no solution form"
            ))),
        }
    }
}

impl fmt::Display for SolutionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolutionValue::I8(v) => write!(f, "{v}i8"),
            SolutionValue::I16(v) => write!(f, "{v}i16"),
            SolutionValue::I32(v) => write!(f, "{v}i32"),
            SolutionValue::I64(v) => write!(f, "{v}i64"),
            SolutionValue::Ptr(v) => write!(f, "ptr {v:#x}"),
        }
    }
}

/// Finds argument values under which `function` returns zero.
///
/// Exploration stops at the first path that can return zero.
///
/// # Arguments
///
/// * `explorer` - Explorer holding the project, configuration and solver
/// * `function` - Entry function; its parameters must be integers or pointers
///
/// # Returns
///
/// One value per parameter, or `None` if no explored path returns zero. Paths cut by a
/// bound are not searched past the bound, so `None` from an incomplete exploration only
/// means none was found within the bounds.
///
/// # Errors
///
/// Errors of [`Explorer::explore`], and [`Error::Unsupported`] for parameters that are
/// neither integers nor pointers.
pub fn find_zero(explorer: &Explorer<'_>, function: &str) -> Result<Option<Vec<SolutionValue>>> {
    let report = explorer.explore(&Query::new(function).target(Target::Returns(0)))?;
    let Some(witness) = &report.witness else {
        debug!(function, completion = %report.completion, "no path returns zero");
        return Ok(None);
    };
    report
        .inputs
        .iter()
        .map(|input| SolutionValue::from_input(&input.value, &input.ty, &witness.model))
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

/// A way a function can finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReturnValue {
    /// Returned this integer
    Return(u64),
    /// Returned from a void function
    ReturnVoid,
    /// Threw this integer
    Throw(u64),
    /// Called `abort` or `exit`
    Abort,
}

impl ReturnValue {
    /// The value carried by a return or a throw of the same kind as `self`.
    fn same_kind(self, other: ReturnValue) -> Option<u64> {
        match (self, other) {
            (ReturnValue::Return(_), ReturnValue::Return(v))
            | (ReturnValue::Throw(_), ReturnValue::Throw(v)) => Some(v),
            _ => None,
        }
    }
}

/// A set of values that is either complete or known to have more members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PossibleSolutions<V: Ord> {
    /// Exactly these values
    Exactly(BTreeSet<V>),
    /// These values and possibly more
    AtLeast(BTreeSet<V>),
}

impl<V: Ord> PossibleSolutions<V> {
    /// The values found.
    #[must_use]
    pub fn values(&self) -> &BTreeSet<V> {
        match self {
            PossibleSolutions::Exactly(values) | PossibleSolutions::AtLeast(values) => values,
        }
    }

    /// Returns `true` if the set is known to be complete.
    #[must_use]
    pub const fn is_exact(&self) -> bool {
        matches!(self, PossibleSolutions::Exactly(_))
    }
}

/// Describes the values `function` can return or throw.
///
/// # Arguments
///
/// * `explorer` - Explorer holding the project, configuration and solver
/// * `function` - Entry function
/// * `args` - Per parameter, a concrete value or `None` for any value; missing trailing
///   entries mean `None`
/// * `n` - Stop after more than `n` distinct values
///
/// # Returns
///
/// [`PossibleSolutions::Exactly`] when every path was explored, the solver decided every
/// query, and at most `n` values exist; [`PossibleSolutions::AtLeast`] otherwise. Faulting
/// and bound-exceeded paths contribute nothing, and neither do values the solver could not
/// confirm.
///
/// # Errors
///
/// Errors of [`Explorer::explore`] and the solver, and [`Error::Unsupported`] for a
/// non-integer return value or exception payload.
pub fn possible_return_values(
    explorer: &Explorer<'_>,
    function: &str,
    args: &[Option<u64>],
    n: usize,
) -> Result<PossibleSolutions<ReturnValue>> {
    let query = args
        .iter()
        .enumerate()
        .filter_map(|(index, arg)| arg.map(|value| (index, value)))
        .fold(Query::new(function), |query, (index, value)| {
            query.arg(index, ArgSpec::Concrete(value))
        });
    let report = explorer.explore(&query)?;

    let solver = explorer.solver();
    let mut found = BTreeSet::new();
    let mut approximate = false;
    for record in &report.records {
        if found.len() > n {
            break;
        }
        let exact = match &record.outcome {
            Outcome::Returned(None) => witness(solver, record, ReturnValue::ReturnVoid, &mut found)?,
            Outcome::Aborted => witness(solver, record, ReturnValue::Abort, &mut found)?,
            Outcome::Returned(Some(value)) => {
                collect(solver, record, value, ReturnValue::Return(0), &mut found, n)?
            }
            Outcome::Uncaught { payload, .. } => {
                collect(solver, record, payload, ReturnValue::Throw(0), &mut found, n)?
            }
            Outcome::BoundExceeded(_) | Outcome::Fault(_) => true,
        };
        if !exact {
            debug!(outcome = %record.outcome, "path contributes an approximate answer");
            approximate = true;
        }
    }

    if approximate || found.len() > n || !report.is_complete() {
        Ok(PossibleSolutions::AtLeast(found))
    } else {
        Ok(PossibleSolutions::Exactly(found))
    }
}

/// Adds `value` if the record's path is feasible.
///
/// Returns `false` when the solver cannot decide; the value is then left out.
fn witness(
    solver: &dyn Solver,
    record: &TerminalRecord,
    value: ReturnValue,
    found: &mut BTreeSet<ReturnValue>,
) -> Result<bool> {
    match solver.check(&record.path_condition)? {
        SatResult::Sat => {
            found.insert(value);
            Ok(true)
        }
        SatResult::Unsat => Ok(true),
        SatResult::Unknown => Ok(false),
    }
}

/// Adds the values `value` can take on the record's path, excluding ones already found.
///
/// Returns `false` if the enumeration stopped short, either because more than `n` values
/// are now known or because the solver could not decide.
fn collect(
    solver: &dyn Solver,
    record: &TerminalRecord,
    value: &Value,
    kind: ReturnValue,
    found: &mut BTreeSet<ReturnValue>,
    n: usize,
) -> Result<bool> {
    let Value::Int { expr, .. } = value else {
        return Err(Error::Unsupported(format!(
            "enumerating non-integer value {value}"
        )));
    };
    let mut constraints = record.path_condition.clone();
    for known in found.iter().filter_map(|known| kind.same_kind(*known)) {
        constraints.push(expr.not_equals(&SymbolicExpr::constant(known, expr.width())));
    }
    let wrap = |v: u64| match kind {
        ReturnValue::Throw(_) => ReturnValue::Throw(v),
        _ => ReturnValue::Return(v),
    };
    let solutions = solver.solutions(&constraints, expr, n - found.len().min(n))?;
    let exact = matches!(solutions, Solutions::Exactly(_));
    let values = match solutions {
        Solutions::Exactly(values) | Solutions::AtLeast(values) => values,
    };
    found.extend(values.into_iter().map(wrap));
    Ok(exact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        engine::ExplorationConfig,
        ir::{BinaryOp, CompareOp, FunctionBuilder, ModuleBuilder, Operand, Param},
        project::Project,
    };

    fn project(function: crate::ir::Function) -> Project {
        Project::link(vec![ModuleBuilder::new("m").function(function).build()]).unwrap()
    }

    #[test]
    fn test_find_zero_narrow_types() {
        // int8_t f(int8_t a) { return a + 5; }
        let mut f = FunctionBuilder::new("f", vec![Param::new("a", Type::i8())], Type::i8());
        let r = f.binary(BinaryOp::Add, f.param(0), Operand::int(5, Type::i8()));
        f.ret(r);
        let project = project(f.finish().unwrap());
        let explorer = Explorer::with_config(&project, ExplorationConfig::default());
        assert_eq!(
            find_zero(&explorer, "f").unwrap(),
            Some(vec![SolutionValue::I8(-5)])
        );
    }

    #[test]
    fn test_find_zero_none() {
        // int f(int a) { return 1; }
        let mut f = FunctionBuilder::new("f", vec![Param::new("a", Type::i32())], Type::i32());
        f.ret(Operand::i32(1));
        let project = project(f.finish().unwrap());
        let explorer = Explorer::with_config(&project, ExplorationConfig::default());
        assert_eq!(find_zero(&explorer, "f").unwrap(), None);
    }

    #[test]
    fn test_find_zero_pointer_is_non_null() {
        // int f(int *p) { return 0; }
        let mut f = FunctionBuilder::new("f", vec![Param::new("p", Type::Ptr)], Type::i32());
        f.ret(Operand::i32(0));
        let project = project(f.finish().unwrap());
        let explorer = Explorer::with_config(&project, ExplorationConfig::default());
        let solution = find_zero(&explorer, "f").unwrap().unwrap();
        assert!(matches!(solution[..], [SolutionValue::Ptr(p)] if p != 0));
    }

    /// uint8_t f(uint8_t a) { return a < 3 ? a : 3; }
    fn clamp() -> crate::ir::Function {
        let mut f = FunctionBuilder::new("f", vec![Param::new("a", Type::u8())], Type::u8());
        let lt = f.compare(CompareOp::Lt, f.param(0), Operand::int(3, Type::u8()));
        let r = f.select(lt, f.param(0), Operand::int(3, Type::u8()));
        f.ret(r);
        f.finish().unwrap()
    }

    #[test]
    fn test_possible_return_values_exact() {
        let project = project(clamp());
        let explorer = Explorer::with_config(&project, ExplorationConfig::default());
        let values = possible_return_values(&explorer, "f", &[None], 10).unwrap();
        assert!(values.is_exact());
        let expected: BTreeSet<_> = (0..=3).map(ReturnValue::Return).collect();
        assert_eq!(values.values(), &expected);
    }

    #[test]
    fn test_possible_return_values_truncated() {
        let project = project(clamp());
        let explorer = Explorer::with_config(&project, ExplorationConfig::default());
        let values = possible_return_values(&explorer, "f", &[None], 2).unwrap();
        assert!(!values.is_exact());
        assert!(values.values().len() > 2);
    }

    #[test]
    fn test_possible_return_values_concrete_argument() {
        let project = project(clamp());
        let explorer = Explorer::with_config(&project, ExplorationConfig::default());
        let values = possible_return_values(&explorer, "f", &[Some(200)], 4).unwrap();
        assert_eq!(
            values,
            PossibleSolutions::Exactly(BTreeSet::from([ReturnValue::Return(3)]))
        );
    }

    #[test]
    fn test_void_and_throw() {
        let mut f = FunctionBuilder::new("f", vec![Param::new("a", Type::i32())], Type::Void);
        let throw = f.block("throw");
        let done = f.block("done");
        let neg = f.compare(CompareOp::Lt, f.param(0), Operand::i32(0));
        f.cond_br(neg, throw, done);
        f.position_at(throw);
        f.throw(Operand::i32(7), Type::i32());
        f.position_at(done);
        f.ret_void();
        let project = project(f.finish().unwrap());
        let explorer = Explorer::with_config(&project, ExplorationConfig::default());
        let values = possible_return_values(&explorer, "f", &[], 5).unwrap();
        assert_eq!(
            values,
            PossibleSolutions::Exactly(BTreeSet::from([
                ReturnValue::ReturnVoid,
                ReturnValue::Throw(7)
            ]))
        );
    }

    /// int f(int a) { if (a * 2 == 3) return 1; return 0; }
    fn odd_double() -> crate::ir::Function {
        let mut f = FunctionBuilder::new("f", vec![Param::new("a", Type::i32())], Type::i32());
        let one = f.block("one");
        let zero = f.block("zero");
        let twice = f.binary(BinaryOp::Mul, f.param(0), Operand::i32(2));
        let eq = f.compare(CompareOp::Eq, twice, Operand::i32(3));
        f.cond_br(eq, one, zero);
        f.position_at(one);
        f.ret(Operand::i32(1));
        f.position_at(zero);
        f.ret(Operand::i32(0));
        f.finish().unwrap()
    }

    #[test]
    fn test_infeasible_branch_contributes_nothing() {
        let project = project(odd_double());
        let explorer = Explorer::with_config(&project, ExplorationConfig::default());
        let values = possible_return_values(&explorer, "f", &[None], 10).unwrap();
        assert_eq!(
            values,
            PossibleSolutions::Exactly(BTreeSet::from([ReturnValue::Return(0)]))
        );
    }

    /// Answers `Unknown` for every constraint set that allows `a == 7`.
    struct UndecidedAtSeven {
        inner: crate::solver::Z3Solver,
    }

    impl Solver for UndecidedAtSeven {
        fn name(&self) -> &'static str {
            "undecided-at-seven"
        }

        fn solve(&self, constraints: &[SymbolicExpr]) -> Result<crate::solver::Verdict> {
            let mut widened = constraints.to_vec();
            widened.push(
                SymbolicExpr::symbol("a", 32).equals(&SymbolicExpr::constant(7, 32)),
            );
            if self.inner.check(&widened)? == SatResult::Sat {
                return Ok(crate::solver::Verdict::Unknown);
            }
            self.inner.solve(constraints)
        }
    }

    #[test]
    fn test_undecided_path_downgrades_without_stopping() {
        // int f(int a) { return a == 7 ? 1 : 2; }
        let mut f = FunctionBuilder::new("f", vec![Param::new("a", Type::i32())], Type::i32());
        let seven = f.block("seven");
        let other = f.block("other");
        let eq = f.compare(CompareOp::Eq, f.param(0), Operand::i32(7));
        f.cond_br(eq, seven, other);
        f.position_at(seven);
        f.ret(Operand::i32(1));
        f.position_at(other);
        f.ret(Operand::i32(2));
        let project = project(f.finish().unwrap());
        let solver = std::sync::Arc::new(UndecidedAtSeven {
            inner: crate::solver::Z3Solver::new(),
        });
        let explorer = Explorer::new(&project, ExplorationConfig::default(), solver);

        let values = possible_return_values(&explorer, "f", &[None], 10).unwrap();
        assert_eq!(
            values,
            PossibleSolutions::AtLeast(BTreeSet::from([ReturnValue::Return(2)]))
        );
    }
}
